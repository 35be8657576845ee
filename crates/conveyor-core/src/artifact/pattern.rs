//! Output glob patterns.
//!
//! `*` matches within one path segment, `?` one non-separator character, and
//! `**` any number of segments. A pattern naming a directory captures every
//! file beneath it.

use regex::Regex;

use crate::domain::error::{ConveyorError, Result};

#[derive(Debug, Clone)]
pub struct OutputPattern {
    raw: String,
    regex: Regex,
}

impl OutputPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_start_matches("./").trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConveyorError::Artifact(format!(
                "empty output pattern: {raw:?}"
            )));
        }
        if trimmed.starts_with('/') || trimmed.split('/').any(|seg| seg == "..") {
            return Err(ConveyorError::Artifact(format!(
                "output pattern must stay inside the workspace: {raw}"
            )));
        }
        let regex = Regex::new(&glob_to_regex(trimmed))
            .map_err(|e| ConveyorError::Artifact(format!("bad output pattern {raw}: {e}")))?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when `path` or one of its parent directories matches.
    pub fn matches(&self, path: &str) -> bool {
        if self.regex.is_match(path) {
            return true;
        }
        path.match_indices('/')
            .any(|(i, _)| self.regex.is_match(&path[..i]))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}
