//! Dotenv file parsing
//!
//! Supports the common dotenv dialect: `KEY=VALUE` lines, `#` comments,
//! blank lines, an optional `export ` prefix, single/double quoted values,
//! `\n` escapes inside double quotes and trailing `#` comments.

use super::EnvironmentError;
use std::fs;
use std::path::Path;
use tracing::debug;

/// An ordered set of key/value pairs parsed from one dotenv file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn parse(content: &str) -> Result<Self, EnvironmentError> {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim_end_matches('\r').trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

            let (key, raw_value) = line.split_once('=').ok_or(EnvironmentError::MalformedLine {
                line: idx + 1,
                content: raw_line.to_string(),
            })?;

            let key = key.trim();
            if key.is_empty() || !valid_key(key) {
                return Err(EnvironmentError::MalformedLine {
                    line: idx + 1,
                    content: raw_line.to_string(),
                });
            }

            let value = parse_value(raw_value.trim(), idx + 1, raw_line)?;

            if let Some(existing) = entries.iter_mut().find(|(k, _)| k == key) {
                debug!(key, line = idx + 1, "Duplicate key in env file, last value wins");
                existing.1 = value;
            } else {
                entries.push((key.to_string(), value));
            }
        }

        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, EnvironmentError> {
        let content = fs::read_to_string(path).map_err(|source| EnvironmentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| e.with_file(path))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_value(raw: &str, line: usize, raw_line: &str) -> Result<String, EnvironmentError> {
    let malformed = || EnvironmentError::MalformedLine {
        line,
        content: raw_line.to_string(),
    };

    // Quoted values may carry a trailing comment after the closing quote.
    if let Some(inner) = raw.strip_prefix('"') {
        let end = closing_double_quote(inner).ok_or_else(malformed)?;
        if !comment_or_blank(&inner[end + 1..]) {
            return Err(malformed());
        }
        return Ok(unescape_double_quoted(&inner[..end]));
    }

    if let Some(inner) = raw.strip_prefix('\'') {
        let end = inner.find('\'').ok_or_else(malformed)?;
        if !comment_or_blank(&inner[end + 1..]) {
            return Err(malformed());
        }
        return Ok(inner[..end].to_string());
    }

    // Unquoted values end at a comment marker.
    let value = match raw.find(" #") {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    Ok(value.trim().to_string())
}

fn comment_or_blank(rest: &str) -> bool {
    let rest = rest.trim_start();
    rest.is_empty() || rest.starts_with('#')
}

/// Index of the closing quote in `s`, skipping backslash-escaped quotes.
fn closing_double_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some(i);
        }
    }
    None
}

fn unescape_double_quoted(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
