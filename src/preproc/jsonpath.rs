//! Definite JSONPath queries over parsed JSON documents.
//!
//! Supported syntax: `$`, `.name`, `['name']` / `["name"]` and `[index]`.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JsonPathError {
    #[error("cannot parse as a valid JSON object: {0}")]
    InvalidJson(String),
    #[error("invalid JSONPath \"{path}\" at position {position}")]
    InvalidPath { path: String, position: usize },
    #[error("no data matches the specified path")]
    NoMatch,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Evaluate `path` against JSON `text` and return the matched fragment.
///
/// String results are returned without quotes, anything else as compact JSON.
pub fn query(text: &str, path: &str) -> Result<String, JsonPathError> {
    let segments = parse_path(path)?;
    let document: Value =
        serde_json::from_str(text).map_err(|e| JsonPathError::InvalidJson(e.to_string()))?;

    let mut current = &document;
    for segment in &segments {
        current = match segment {
            Segment::Key(key) => current.get(key.as_str()),
            Segment::Index(index) => current.get(*index),
        }
        .ok_or(JsonPathError::NoMatch)?;
    }

    Ok(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn parse_path(path: &str) -> Result<Vec<Segment>, JsonPathError> {
    let invalid = |position: usize| JsonPathError::InvalidPath {
        path: path.to_string(),
        position,
    };

    let bytes = path.as_bytes();
    if bytes.first() != Some(&b'$') {
        return Err(invalid(0));
    }

    let mut segments = Vec::new();
    let mut pos = 1;

    while pos < bytes.len() {
        match bytes[pos] {
            b'.' => {
                let start = pos + 1;
                let end = path[start..]
                    .find(['.', '['])
                    .map_or(path.len(), |offset| start + offset);
                if end == start {
                    return Err(invalid(pos));
                }
                segments.push(Segment::Key(path[start..end].to_string()));
                pos = end;
            }
            b'[' => {
                let start = pos + 1;
                match bytes.get(start) {
                    Some(&quote @ (b'\'' | b'"')) => {
                        let name_start = start + 1;
                        let close = path[name_start..]
                            .find(quote as char)
                            .map(|offset| name_start + offset)
                            .ok_or_else(|| invalid(start))?;
                        if bytes.get(close + 1) != Some(&b']') {
                            return Err(invalid(close + 1));
                        }
                        segments.push(Segment::Key(path[name_start..close].to_string()));
                        pos = close + 2;
                    }
                    Some(_) => {
                        let close = path[start..]
                            .find(']')
                            .map(|offset| start + offset)
                            .ok_or_else(|| invalid(start))?;
                        let index = path[start..close]
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| invalid(start))?;
                        segments.push(Segment::Index(index));
                        pos = close + 1;
                    }
                    None => return Err(invalid(start)),
                }
            }
            _ => return Err(invalid(pos)),
        }
    }

    Ok(segments)
}
