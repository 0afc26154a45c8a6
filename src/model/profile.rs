//! The profile summary forwarded to the ingestion API.

use serde::{Deserialize, Serialize};

/// Public profile attributes collected for one username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub username: String,
    pub full_name: Option<String>,
    pub profile_url: String,
    pub userid: String,
    pub biography: Option<String>,
    pub external_url: Option<String>,
    pub followers: u64,
    pub following: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_business: Option<bool>,
}

impl ProfileRecord {
    /// Canonical public URL of a profile.
    pub fn url_for(username: &str) -> String {
        format!("https://www.instagram.com/{username}/")
    }
}
