//! Text helpers shared by the detector and the extractors

/// Sentence terminators, Latin and CJK
const SENTENCE_ENDS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Whether `term` occurs in `haystack` as a whole word. Both arguments
/// must already be lower-cased. Word boundaries are only enforced on
/// edges where the term itself is alphanumeric, so CJK terms match as
/// plain substrings.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    count_term(haystack, term) > 0
}

/// Number of whole-word occurrences of `term` in `haystack`
pub fn count_term(haystack: &str, term: &str) -> usize {
    if term.is_empty() {
        return 0;
    }
    let first_is_word = term.chars().next().map(is_latin_word).unwrap_or(false);
    let last_is_word = term.chars().last().map(is_latin_word).unwrap_or(false);

    haystack
        .match_indices(term)
        .filter(|(start, _)| {
            let end = start + term.len();
            let before_ok = !first_is_word
                || haystack[..*start]
                    .chars()
                    .last()
                    .map(|c| !is_latin_word(c))
                    .unwrap_or(true);
            let after_ok = !last_is_word
                || haystack[end..]
                    .chars()
                    .next()
                    .map(|c| !is_latin_word(c))
                    .unwrap_or(true);
            before_ok && after_ok
        })
        .count()
}

fn is_latin_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split text into trimmed, non-empty sentences
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|c: char| SENTENCE_ENDS.contains(&c) || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// First `max_chars` characters of `text`
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Up to `window` characters on each side of the byte span `start..end`
pub fn context_window(text: &str, start: usize, end: usize, window: usize) -> &str {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(window)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .nth(window)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    &text[from..to]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_term_word_boundaries() {
        assert!(contains_term("the art of war", "art"));
        assert!(!contains_term("a fresh start", "art"));
        assert!(contains_term("ant colony optimization.", "optimization"));
        assert!(contains_term("蚁群算法是一种算法", "算法"));
        assert_eq!(count_term("problem, problems, problem", "problem"), 2);
        assert!(!contains_term("anything", ""));
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second!  \nThird？ 第四。");
        assert_eq!(s, vec!["First one", "Second", "Third", "第四"]);
    }

    #[test]
    fn test_excerpt_char_safe() {
        assert_eq!(excerpt("蚁群算法", 2), "蚁群");
        assert_eq!(excerpt("abc", 10), "abc");
    }

    #[test]
    fn test_context_window() {
        let text = "0123456789TARGET9876543210";
        let start = text.find("TARGET").unwrap();
        assert_eq!(context_window(text, start, start + 6, 3), "789TARGET987");
        assert_eq!(context_window(text, start, start + 6, 100), text);
    }
}
