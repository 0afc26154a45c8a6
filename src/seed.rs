//! Username list parsing for `biocrawl seed`.

use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;

/// One username per line. Blank lines and `#` comments are skipped, a
/// leading `@` and surrounding whitespace are stripped, duplicates dropped.
pub fn parse_usernames(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_start_matches('@').trim())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

pub async fn read_usernames(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_usernames(&text))
}
