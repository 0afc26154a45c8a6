//! Rate-limit indicator rules.
//!
//! Case-insensitive substrings matched against failure messages and
//! captured diagnostic output. The built-in set can be replaced with a TOML
//! file:
//!
//! ```toml
//! [rate_limit]
//! indicators = ["too many requests", "429"]
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_INDICATORS: &[&str] = &[
    "please wait a few minutes before you try again",
    "429",
    "too many requests",
    "401 unauthorized",
    "rate limit",
    "temporary failure in name resolution",
];

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct RulesFile {
    rate_limit: RulesSection,
}

#[derive(Debug, Deserialize)]
struct RulesSection {
    indicators: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitRules {
    /// Stored lowercased.
    indicators: Vec<String>,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self::new(DEFAULT_INDICATORS.iter().copied())
    }
}

impl RateLimitRules {
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            indicators: indicators
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Load indicators from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read rate-limit rules {}: {e}", path.display()))
        })?;
        let file: RulesFile = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("bad rate-limit rules {}: {e}", path.display()))
        })?;
        let rules = Self::new(file.rate_limit.indicators);
        if rules.indicators.is_empty() {
            return Err(Error::Config(format!(
                "rate-limit rules {} define no indicators",
                path.display()
            )));
        }
        Ok(rules)
    }

    /// Does `text` contain any indicator?
    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        self.indicators.iter().any(|indicator| text.contains(indicator))
    }

    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_case_insensitively() {
        let rules = RateLimitRules::default();
        assert!(rules.matches("HTTP error 429"));
        assert!(rules.matches("Too Many Requests"));
        assert!(rules.matches("Please wait a few minutes before you try again."));
        assert!(!rules.matches("connection reset by peer"));
        assert!(!rules.matches(""));
    }

    #[test]
    fn load_replaces_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nindicators = [\"Feedback Required\"]").unwrap();

        let rules = RateLimitRules::load(file.path()).unwrap();
        assert_eq!(rules.indicators(), ["feedback required".to_string()]);
        assert!(rules.matches("feedback_required: feedback required"));
        assert!(!rules.matches("429"));
    }

    #[test]
    fn load_rejects_empty_rule_set() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nindicators = [\"  \"]").unwrap();
        assert!(RateLimitRules::load(file.path()).is_err());
    }
}
