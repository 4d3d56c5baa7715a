//! Flag extraction from exploit output.

use std::collections::HashSet;

use regex::Regex;

use crate::error::RunnerError;

/// Matches flags in single lines of text against the game's flag format.
#[derive(Debug, Clone)]
pub struct FlagExtractor {
    pattern: Regex,
}

impl FlagExtractor {
    /// Compile the flag format. A malformed pattern is a startup error.
    pub fn new(pattern: &str) -> Result<Self, RunnerError> {
        let pattern = Regex::new(pattern).map_err(|e| RunnerError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    /// The distinct substrings of `line` matching the format.
    pub fn extract(&self, line: &str) -> HashSet<String> {
        self.pattern
            .find_iter(line)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: &str = r"[A-Z0-9]{31}=";

    fn flag(c: char) -> String {
        let mut s: String = std::iter::repeat(c).take(31).collect();
        s.push('=');
        s
    }

    #[test]
    fn test_extracts_every_distinct_match() {
        let ex = FlagExtractor::new(FORMAT).unwrap();
        let (a, b) = (flag('A'), flag('B'));
        let line = format!("got {a} and {b} and {a} again");

        let found = ex.extract(&line);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&a));
        assert!(found.contains(&b));
    }

    #[test]
    fn test_order_in_line_is_irrelevant() {
        let ex = FlagExtractor::new(FORMAT).unwrap();
        let (a, b, c) = (flag('A'), flag('B'), flag('C'));
        let forward = ex.extract(&format!("{a} {b} {c}"));
        let backward = ex.extract(&format!("{c}|{b}|{a}"));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_no_match_yields_empty_set() {
        let ex = FlagExtractor::new(FORMAT).unwrap();
        assert!(ex.extract("Traceback (most recent call last):").is_empty());
        assert!(ex.extract("").is_empty());
    }

    #[test]
    fn test_malformed_pattern_is_rejected() {
        let err = FlagExtractor::new("[A-Z").unwrap_err();
        assert!(matches!(err, RunnerError::InvalidPattern { .. }));
    }
}
