//! Profile source backed by Instagram's public web profile endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{Diagnostics, ProfileSource, SourceError, SourceErrorKind};
use crate::error::Result;
use crate::model::ProfileRecord;

const BASE_URL: &str = "https://i.instagram.com/api/v1/users/web_profile_info/";

/// App id the Instagram web client sends with its API calls.
const WEB_APP_ID: &str = "936619743392459";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Longest slice of a response body kept for diagnostics.
const BODY_SNIPPET: usize = 512;

pub struct InstagramSource {
    client: reqwest::Client,
    base_url: String,
}

impl InstagramSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(BASE_URL, timeout)
    }

    /// Point the source at another host (used against local fakes).
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProfileSource for InstagramSource {
    async fn lookup(
        &self,
        username: &str,
        diagnostics: &mut Diagnostics,
    ) -> std::result::Result<ProfileRecord, SourceError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("username", username)])
            .header("x-ig-app-id", WEB_APP_ID)
            .send()
            .await
            .map_err(|e| SourceError::new(SourceErrorKind::Connection, e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::new(SourceErrorKind::Connection, e.to_string()))?;

        if !status.is_success() {
            diagnostics.push(snippet(&body));
            let kind = match status {
                StatusCode::NOT_FOUND => SourceErrorKind::NotFound,
                StatusCode::TOO_MANY_REQUESTS => SourceErrorKind::Throttled,
                _ => SourceErrorKind::BadRequest,
            };
            return Err(SourceError::new(kind, format!("{status} for {username}")));
        }

        let parsed: WebProfileResponse = serde_json::from_str(&body).map_err(|e| {
            diagnostics.push(snippet(&body));
            SourceError::new(SourceErrorKind::Other, format!("undecodable profile payload: {e}"))
        })?;

        if let Some(message) = parsed.message.filter(|m| !m.is_empty()) {
            diagnostics.push(message);
        }

        let user = parsed
            .data
            .and_then(|data| data.user)
            .ok_or_else(|| SourceError::new(SourceErrorKind::NotFound, username.to_string()))?;

        Ok(user.into_record())
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET).collect()
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WebProfileResponse {
    data: Option<WebProfileData>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebProfileData {
    user: Option<WebUser>,
}

#[derive(Debug, Deserialize)]
struct WebUser {
    id: String,
    username: String,
    full_name: Option<String>,
    biography: Option<String>,
    external_url: Option<String>,
    edge_followed_by: Option<EdgeCount>,
    edge_follow: Option<EdgeCount>,
    is_private: Option<bool>,
    is_verified: Option<bool>,
    is_business_account: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct EdgeCount {
    count: u64,
}

impl WebUser {
    fn into_record(self) -> ProfileRecord {
        ProfileRecord {
            profile_url: ProfileRecord::url_for(&self.username),
            username: self.username,
            full_name: self.full_name,
            userid: self.id,
            biography: self.biography,
            external_url: self.external_url,
            followers: self.edge_followed_by.map_or(0, |e| e.count),
            following: self.edge_follow.map_or(0, |e| e.count),
            is_private: self.is_private,
            is_verified: self.is_verified,
            is_business: self.is_business_account,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_web_profile_payload() {
        let body = r#"{
            "data": {"user": {
                "id": "25025320",
                "username": "instagram",
                "full_name": "Instagram",
                "biography": "Discover what's new",
                "external_url": "https://about.instagram.com",
                "edge_followed_by": {"count": 680000000},
                "edge_follow": {"count": 180},
                "is_private": false,
                "is_verified": true
            }},
            "status": "ok"
        }"#;

        let parsed: WebProfileResponse = serde_json::from_str(body).unwrap();
        let record = parsed.data.unwrap().user.unwrap().into_record();

        assert_eq!(record.userid, "25025320");
        assert_eq!(record.profile_url, "https://www.instagram.com/instagram/");
        assert_eq!(record.followers, 680_000_000);
        assert_eq!(record.following, 180);
        assert_eq!(record.is_verified, Some(true));
        assert_eq!(record.is_business, None);
    }

    #[test]
    fn missing_user_decodes_to_none() {
        let parsed: WebProfileResponse =
            serde_json::from_str(r#"{"data": {"user": null}, "status": "ok"}"#).unwrap();
        assert!(parsed.data.unwrap().user.is_none());
    }
}
