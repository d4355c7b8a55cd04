//! # Include/exclude matching of workflow ids.
//!
//! A pattern containing regex metacharacters (other than `*`) is compiled as a
//! regular expression. Anything else is a wildcard pattern where `*` matches any
//! run of characters. Both forms must match the whole id.
//!
//! ```text
//! "orders"        → exactly "orders"
//! "orders-*"      → "orders-eu", "orders-"
//! "(billing|tax)" → "billing", "tax"
//! ```
//!
//! ## Rules
//! - Exclude wins over include.
//! - An empty include list matches every id not excluded.

use regex::Regex;

use crate::error::ContextError;

const META: &[char] = &['.', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\'];

/// Compiled include/exclude filter.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl WorkflowFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, ContextError> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    /// Returns `true` when `id` is selected.
    pub fn matches(&self, id: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(id)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(id))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ContextError> {
    patterns.iter().map(|p| compile(p)).collect()
}

fn compile(pattern: &str) -> Result<Regex, ContextError> {
    let source = if pattern.contains(META) {
        pattern.to_owned()
    } else {
        pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*")
    };
    Regex::new(&format!("^(?:{source})$")).map_err(|e| ContextError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}
