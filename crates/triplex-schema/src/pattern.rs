//! Pattern compilation shared by the index, the inferer and the detector

use regex::{Regex, RegexBuilder};
use triplex_core::{Result, TriplexError};

/// Upper bound on compiled program size, to keep hostile schema patterns cheap
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Compile a schema pattern for name matching: case-insensitive and
/// anchored at the start of the name.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    build(&format!("^(?:{})", pattern), pattern)
}

/// Compile a schema pattern for scanning free text: case-insensitive,
/// unanchored.
pub fn compile_search_pattern(pattern: &str) -> Result<Regex> {
    build(pattern, pattern)
}

fn build(source: &str, original: &str) -> Result<Regex> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| TriplexError::InvalidPattern {
            pattern: original.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchored_at_start() {
        let re = compile_pattern(r"\w+\s+algorithm").unwrap();
        assert!(re.is_match("Genetic Algorithm"));
        assert!(!re.is_match("the genetic algorithm"));
        let re = compile_pattern("algo").unwrap();
        assert!(re.is_match("Algorithm"));
        assert!(!re.is_match("An algorithm"));
    }

    #[test]
    fn test_search_pattern_unanchored() {
        let re = compile_search_pattern(r"\bproblem\b").unwrap();
        assert_eq!(re.find_iter("One Problem, two problems, a problem").count(), 2);
    }

    #[test]
    fn test_invalid_pattern_error() {
        let err = compile_pattern("(unclosed").unwrap_err();
        assert!(matches!(err, TriplexError::InvalidPattern { .. }));
    }

    #[test]
    fn test_alternation_stays_anchored() {
        let re = compile_pattern("foo|bar").unwrap();
        assert!(re.is_match("bar baz"));
        assert!(!re.is_match("baz bar"));
    }
}
