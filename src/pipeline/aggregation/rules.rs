//! Candidate filters applied before ranking selection.
//!
//! All rules are data-driven from `EngineConfig`; none looks at the score.

use std::collections::HashSet;

use regex::Regex;

use crate::config::{ConfigError, NameLabels};
use crate::models::NOT_FOUND;

/// Case-folded, trimmed form used for denylist comparison.
fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Known-bad extractions, compared exactly after trim + case-fold.
///
/// Empty text and the "not found" sentinel are always members, so failed
/// model calls flow through the same filter as garbage answers.
#[derive(Debug, Clone)]
pub struct Denylist {
    entries: HashSet<String>,
}

impl Denylist {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut set: HashSet<String> = entries.iter().map(|e| fold(e.as_ref())).collect();
        set.insert(String::new());
        set.insert(NOT_FOUND.to_string());
        Self { entries: set }
    }

    pub fn contains(&self, answer: &str) -> bool {
        self.entries.contains(&fold(answer))
    }
}

/// Purely numeric spans shorter than `max_len` are page-number noise.
pub fn is_numeric_noise(answer: &str, max_len: usize) -> bool {
    let trimmed = answer.trim();
    !trimmed.is_empty() && trimmed.len() < max_len && trimmed.bytes().all(|b| b.is_ascii_digit())
}

/// Full-name cleanup: strips a leading banner and the configured field
/// sub-labels. Applies only when the answer starts with one of them.
#[derive(Debug, Clone)]
pub struct NameCleanup {
    leading_banner: Option<Regex>,
    leading_label: Option<Regex>,
    any_label: Option<Regex>,
}

/// Case-insensitive alternation of literal labels, internal whitespace
/// matching any run of whitespace.
fn label_alternation(labels: &[String]) -> Option<String> {
    let parts: Vec<String> = labels
        .iter()
        .map(|l| {
            l.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(format!("(?:{})", parts.join("|")))
    }
}

fn compile(key: &str, pattern: String) -> Result<Regex, ConfigError> {
    Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: e.to_string(),
    })
}

impl NameCleanup {
    pub fn new(labels: &NameLabels) -> Result<Self, ConfigError> {
        let banners = label_alternation(&labels.banners);
        let fields = label_alternation(&labels.field_labels);

        Ok(Self {
            leading_banner: banners
                .map(|b| compile("name_labels.banners", format!(r"(?i)^\s*{b}")))
                .transpose()?,
            leading_label: fields
                .as_ref()
                .map(|f| compile("name_labels.field_labels", format!(r"(?i)^\s*{f}")))
                .transpose()?,
            any_label: fields
                .map(|f| compile("name_labels.field_labels", format!(r"(?i)(?:^|\s){f}")))
                .transpose()?,
        })
    }

    /// Returns the name tokens with labels removed and whitespace collapsed.
    /// Text not starting with a banner or label is returned unchanged.
    pub fn apply(&self, text: &str) -> String {
        let starts_labelled = self.leading_banner.as_ref().is_some_and(|r| r.is_match(text))
            || self.leading_label.as_ref().is_some_and(|r| r.is_match(text));
        if !starts_labelled {
            return text.to_string();
        }

        let mut cleaned = match &self.leading_banner {
            Some(banner) => banner.replace(text, "").into_owned(),
            None => text.to_string(),
        };
        if let Some(labels) = &self.any_label {
            cleaned = labels.replace_all(&cleaned, " ").into_owned();
        }
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
