//! The path grammar shared by the router, the listeners fan-out, and the
//! one-shot/channel reserved forms.
//!
//! ```text
//! path      := subsystem "://" segment ("/" segment)*
//! subsystem := [A-Za-z][A-Za-z0-9_-]*
//! segment   := literal | "{" name "}" | "*"
//! ```

use std::collections::BTreeMap;

use crate::error::{MyceliaError, Result};

/// A parsed, routable path: the subsystem routing key plus its `/`-separated
/// segments (everything after `://`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub subsystem: String,
    pub segments: Vec<String>,
}

impl Path {
    /// Parse `"{subsystem}://{segments}"`. Rejects an empty path, a missing
    /// `://` separator, an invalid subsystem identifier, or empty segments.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(MyceliaError::InvalidPath {
                path: raw.to_string(),
            });
        }
        let (subsystem, rest) = raw.split_once("://").ok_or_else(|| MyceliaError::InvalidPath {
            path: raw.to_string(),
        })?;
        if !is_valid_subsystem(subsystem) {
            return Err(MyceliaError::InvalidPath {
                path: raw.to_string(),
            });
        }
        let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(MyceliaError::InvalidPath {
                path: raw.to_string(),
            });
        }
        Ok(Path {
            subsystem: subsystem.to_string(),
            segments,
        })
    }

    /// Render back to the canonical `"{subsystem}://{segments}"` string form.
    pub fn render(&self) -> String {
        format!("{}://{}", self.subsystem, self.segments.join("/"))
    }

    /// Whether this path is the reserved one-shot temporary reply form:
    /// `{sub}://request/oneShot/{msgId}`.
    pub fn is_one_shot(&self) -> bool {
        self.segments.len() == 3 && self.segments[0] == "request" && self.segments[1] == "oneShot"
    }

    /// The message id embedded in a one-shot path, if this is one.
    pub fn one_shot_message_id(&self) -> Option<&str> {
        if self.is_one_shot() {
            Some(self.segments[2].as_str())
        } else {
            None
        }
    }

    /// Build a one-shot reply path for the given reply subsystem and message id.
    pub fn one_shot_for(reply_subsystem: &str, message_id: &str) -> Self {
        Path {
            subsystem: reply_subsystem.to_string(),
            segments: vec![
                "request".to_string(),
                "oneShot".to_string(),
                message_id.to_string(),
            ],
        }
    }

    /// Whether the segment immediately following `://` is `channel` — the
    /// recognition rule for "channel path" from spec.md §4.4, explicitly
    /// excluding one-shot paths even though they also start with a reserved
    /// first segment.
    pub fn is_channel_path(&self) -> bool {
        !self.is_one_shot() && self.segments.first().map(String::as_str) == Some("channel")
    }

    /// The channel name (trailing segment) for a channel path, if any.
    pub fn channel_name(&self) -> Option<&str> {
        if self.is_channel_path() {
            self.segments.last().map(String::as_str)
        } else {
            None
        }
    }
}

fn is_valid_subsystem(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// One segment of a registered pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled route/listener pattern: subsystem plus parsed segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub subsystem: String,
    pub segments: Vec<PatternSegment>,
}

impl Pattern {
    /// Parse a registration pattern, e.g. `api://users/{id}` or `api://files/*`.
    ///
    /// The trailing `*` wildcard, if present, must be the final segment and
    /// matches one-or-more trailing path segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let (subsystem, rest) = raw.split_once("://").ok_or_else(|| MyceliaError::InvalidPath {
            path: raw.to_string(),
        })?;
        if !is_valid_subsystem(subsystem) {
            return Err(MyceliaError::InvalidPath {
                path: raw.to_string(),
            });
        }
        let raw_segments: Vec<&str> = rest.split('/').collect();
        if raw_segments.iter().any(|s| s.is_empty()) {
            return Err(MyceliaError::InvalidPath {
                path: raw.to_string(),
            });
        }
        let mut segments = Vec::with_capacity(raw_segments.len());
        for (i, seg) in raw_segments.iter().enumerate() {
            if *seg == "*" {
                if i != raw_segments.len() - 1 {
                    return Err(MyceliaError::InvalidPath {
                        path: raw.to_string(),
                    });
                }
                segments.push(PatternSegment::Wildcard);
            } else if let Some(name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(MyceliaError::InvalidPath {
                        path: raw.to_string(),
                    });
                }
                segments.push(PatternSegment::Param(name.to_string()));
            } else {
                segments.push(PatternSegment::Literal((*seg).to_string()));
            }
        }
        Ok(Pattern {
            subsystem: subsystem.to_string(),
            segments,
        })
    }

    /// Match against a concrete path's segments (subsystem equality is
    /// checked by the caller, which already dispatched on it). Returns the
    /// captured params on success.
    pub fn matches(&self, segments: &[String]) -> Option<BTreeMap<String, String>> {
        let has_wildcard = matches!(self.segments.last(), Some(PatternSegment::Wildcard));
        if !has_wildcard && self.segments.len() != segments.len() {
            return None;
        }
        if has_wildcard && segments.len() < self.segments.len() - 1 {
            return None;
        }
        let mut params = BTreeMap::new();
        for (i, pat) in self.segments.iter().enumerate() {
            match pat {
                PatternSegment::Wildcard => break,
                PatternSegment::Literal(lit) => {
                    if segments.get(i) != Some(lit) {
                        return None;
                    }
                }
                PatternSegment::Param(name) => {
                    let value = segments.get(i)?;
                    params.insert(name.clone(), value.clone());
                }
            }
        }
        Some(params)
    }

    /// Specificity used to break ties among multiple matching patterns:
    /// exact (no params/wildcard) > more literal segments > fewer params,
    /// with registration order as the final, stable tie-break applied by
    /// the caller.
    pub fn specificity(&self) -> Specificity {
        let literal_count = self
            .segments
            .iter()
            .filter(|s| matches!(s, PatternSegment::Literal(_)))
            .count();
        let param_count = self
            .segments
            .iter()
            .filter(|s| matches!(s, PatternSegment::Param(_)))
            .count();
        let is_wildcard = matches!(self.segments.last(), Some(PatternSegment::Wildcard));
        let is_exact = !is_wildcard && param_count == 0;
        Specificity {
            is_exact,
            literal_count,
            param_count,
            is_wildcard,
        }
    }
}

/// Ordered so that `a.cmp(&b) == Greater` means `a` should win over `b`,
/// matching spec.md §4.7: "exact > more literal segments > fewer params".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    is_exact: bool,
    literal_count: usize,
    param_count: usize,
    is_wildcard: bool,
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.is_exact
            .cmp(&other.is_exact)
            .then(self.literal_count.cmp(&other.literal_count))
            .then(other.param_count.cmp(&self.param_count))
            .then(other.is_wildcard.cmp(&self.is_wildcard))
    }
}
