//! Text normalization shared by word lists and speech matching.

/// Lowercase, map every non-alphanumeric character to a space, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize every entry, dropping empties and duplicates while keeping first-seen order.
pub fn normalize_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let n = normalize_text(item.as_ref());
        if !n.is_empty() && !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

/// True when `phrase` occurs in `normalized` on word boundaries.
///
/// Both sides must already be normalized.
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let padded = format!(" {} ", normalized);
    padded.contains(&format!(" {} ", phrase))
}

/// True when `needle` occurs anywhere in `normalized` (plain substring match).
pub fn contains_substring(normalized: &str, needle: &str) -> bool {
    !needle.is_empty() && normalized.contains(needle)
}

/// Lowercased tokens that keep apostrophes, so contractions survive (`i'm`, `don't`).
/// Curly apostrophes are folded to `'`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.chars()
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' => '\'',
            c if c.is_alphanumeric() || c == '\'' => c,
            _ => ' ',
        })
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.trim_matches('\'').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_punctuation() {
        assert_eq!(normalize_text("  That was BAD!!  "), "that was bad");
        assert_eq!(normalize_text("come-here,  Rex"), "come here rex");
        assert_eq!(normalize_text("?!"), "");
    }

    #[test]
    fn normalize_list_dedupes() {
        let l = normalize_list(["Bad", "bad!", " ", "good boy"]);
        assert_eq!(l, vec!["bad".to_string(), "good boy".to_string()]);
    }

    #[test]
    fn phrase_respects_word_boundaries() {
        assert!(contains_phrase("that was bad", "bad"));
        assert!(contains_phrase("lay down now", "lay down"));
        assert!(!contains_phrase("badge", "bad"));
        assert!(contains_substring("badge", "bad"));
    }

    #[test]
    fn tokenize_keeps_contractions() {
        assert_eq!(tokenize("I’m sure, don't!"), vec!["i'm", "sure", "don't"]);
    }
}
