// src/classifier.rs
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::ConfigError;

/// Quote, space, three ASCII digits, space: the status code slot of an
/// access-log line such as `"GET / HTTP/1.1" 200 512 "-"`.
pub const DEFAULT_STATUS_PATTERN: &str = r#"" (?P<code>[0-9]{3}) "#;

static DEFAULT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(DEFAULT_STATUS_PATTERN).expect("default status pattern is valid")
});

/// Category a line falls into based on its status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Info,
    Warning,
    Error,
    Unparseable,
}

impl Category {
    /// Map a numeric status code onto its band.
    pub fn from_code(code: u16) -> Self {
        match code {
            100..=299 => Category::Info,
            300..=399 => Category::Warning,
            400..=599 => Category::Error,
            _ => Category::Unparseable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Info => "info",
            Category::Warning => "warning",
            Category::Error => "error",
            Category::Unparseable => "unparseable",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    /// The extracted code, when the token was three digits (even out of band).
    pub code: Option<u16>,
}

impl Classification {
    pub fn unparseable() -> Self {
        Classification {
            category: Category::Unparseable,
            code: None,
        }
    }
}

/// Extracts the status token from a line and maps it to a [`Category`].
#[derive(Debug, Clone)]
pub struct Classifier {
    regex: Regex,
    group: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier {
            regex: DEFAULT_REGEX.clone(),
            group: 1,
        }
    }
}

impl Classifier {
    /// Build a classifier from a custom extraction pattern.
    ///
    /// The token is taken from the group named `code` if there is one,
    /// otherwise from the first capture group.
    pub fn with_pattern(pattern: &str) -> Result<Self, ConfigError> {
        if pattern == DEFAULT_STATUS_PATTERN {
            return Ok(Classifier::default());
        }
        let regex = Regex::new(pattern)?;
        if regex.captures_len() < 2 {
            return Err(ConfigError::MissingCaptureGroup(pattern.to_string()));
        }
        let group = regex
            .capture_names()
            .position(|name| name == Some("code"))
            .unwrap_or(1);
        Ok(Classifier { regex, group })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn classify(&self, line: &str) -> Classification {
        let token = match self
            .regex
            .captures(line)
            .and_then(|caps| caps.get(self.group))
        {
            Some(m) => m.as_str(),
            None => return Classification::unparseable(),
        };

        match parse_code(token) {
            Some(code) => Classification {
                category: Category::from_code(code),
                code: Some(code),
            },
            None => Classification::unparseable(),
        }
    }
}

/// Exactly three ASCII digits.
fn parse_code(token: &str) -> Option<u16> {
    let bytes = token.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        bytes
            .iter()
            .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0')),
    )
}
