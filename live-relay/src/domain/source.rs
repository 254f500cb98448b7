//! Source link parsing.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static FILE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/file/d/([A-Za-z0-9_-]+)").unwrap());

static ID_QUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:open|uc)\?(?:[^#]*&)?id=([A-Za-z0-9_-]+)").unwrap());

/// Extract the Drive file id from a sharing link.
///
/// Accepts `.../file/d/<id>/...`, `.../open?id=<id>` and `.../uc?id=<id>`.
pub fn parse_drive_file_id(link: &str) -> Result<String> {
    let link = link.trim();
    FILE_PATH_RE
        .captures(link)
        .or_else(|| ID_QUERY_RE.captures(link))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::InvalidSource(format!("no file id in {link:?}")))
}
