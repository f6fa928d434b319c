use std::path::Path;

use crate::error::UsageError;

/// Reads album urls from a text file, one per line. Blank lines and lines
/// starting with `#` are skipped.
pub fn read_url_list(path: &Path) -> Result<Vec<String>, UsageError> {
    let text = std::fs::read_to_string(path).map_err(|source| UsageError::UrlFile {
        path: path.to_path_buf(),
        source,
    })?;
    non_empty(parse_url_list(&text))
}

pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn non_empty(urls: Vec<String>) -> Result<Vec<String>, UsageError> {
    if urls.is_empty() {
        Err(UsageError::NoUrls)
    } else {
        Ok(urls)
    }
}
