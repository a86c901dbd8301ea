//! Label selectors
//!
//! Equality-based selector expressions: `k=v`, `k==v`, `k!=v`, `k`, `!k`,
//! comma-separated and AND-ed together. Requirements are kept sorted so the
//! `Display` form is canonical and can be used as part of a cache key.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// A single selector requirement
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Requirement {
    /// Label present with the given value
    Equals(String, String),
    /// Label absent or with a different value
    NotEquals(String, String),
    /// Label present with any value
    Exists(String),
    /// Label absent
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{}={}", key, value),
            Requirement::NotEquals(key, value) => write!(f, "{}!={}", key, value),
            Requirement::Exists(key) => write!(f, "{}", key),
            Requirement::NotExists(key) => write!(f, "!{}", key),
        }
    }
}

/// Conjunction of label requirements; empty selects everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse a selector expression
    pub fn parse(expr: &str) -> Result<Self> {
        let mut requirements = Vec::new();

        for term in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            requirements.push(parse_requirement(term)?);
        }

        Ok(Self::from_requirements(requirements))
    }

    /// Build a selector from requirements
    pub fn from_requirements(mut requirements: Vec<Requirement>) -> Self {
        requirements.sort();
        requirements.dedup();
        Self { requirements }
    }

    /// Check if the selector has no requirements
    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Requirements in canonical order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Check if `labels` satisfy every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, requirement) in self.requirements.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", requirement)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_requirement(term: &str) -> Result<Requirement> {
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(key_part(key, term)?, value_part(value, term)?));
    }
    if let Some((key, value)) = term.split_once("==") {
        return Ok(Requirement::Equals(key_part(key, term)?, value_part(value, term)?));
    }
    if let Some((key, value)) = term.split_once('=') {
        return Ok(Requirement::Equals(key_part(key, term)?, value_part(value, term)?));
    }
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(key_part(key, term)?));
    }
    Ok(Requirement::Exists(key_part(term, term)?))
}

fn key_part(key: &str, term: &str) -> Result<String> {
    let key = key.trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !valid {
        return Err(Error::InvalidSelector(format!("bad key in '{}'", term)));
    }
    Ok(key.to_string())
}

fn value_part(value: &str, term: &str) -> Result<String> {
    let value = value.trim();
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(Error::InvalidSelector(format!("bad value in '{}'", term)));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_everything() {
        let selector = LabelSelector::everything();
        assert!(selector.is_everything());
        assert!(selector.matches(&labels(&[])));
        assert_eq!(selector.to_string(), "");
        assert_eq!(LabelSelector::parse("  ").unwrap(), selector);
    }

    #[test]
    fn test_parse_all_operators() {
        let selector = LabelSelector::parse("app=web, tier==frontend, env!=prod, canary, !legacy").unwrap();
        assert_eq!(selector.requirements().len(), 5);

        let pod = labels(&[("app", "web"), ("tier", "frontend"), ("env", "dev"), ("canary", "")]);
        assert!(selector.matches(&pod));

        let prod = labels(&[("app", "web"), ("tier", "frontend"), ("env", "prod"), ("canary", "")]);
        assert!(!selector.matches(&prod));

        let legacy = labels(&[("app", "web"), ("tier", "frontend"), ("canary", ""), ("legacy", "1")]);
        assert!(!selector.matches(&legacy));
    }

    #[test]
    fn test_canonical_display() {
        let a: LabelSelector = "b=2,a=1".parse().unwrap();
        let b: LabelSelector = "a==1,b=2,a=1".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "a=1,b=2");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(LabelSelector::parse("=web").is_err());
        assert!(LabelSelector::parse("app=we b").is_err());
        assert!(LabelSelector::parse("!").is_err());
    }
}
