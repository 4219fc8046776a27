//! Term extraction for names, paths and queries.

use std::collections::BTreeSet;

/// Lowercase alphanumeric tokens, split on everything else.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fuzzy 2-grams of one token.
///
/// ASCII tokens of at least three bytes yield every byte bigram. Otherwise
/// each run of two or more CJK characters yields its code point bigrams.
pub fn ngrams(token: &str) -> Vec<String> {
    if token.is_ascii() {
        if token.len() < 3 {
            return Vec::new();
        }
        return token
            .as_bytes()
            .windows(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect();
    }

    let mut grams = Vec::new();
    let mut run: Vec<char> = Vec::new();
    for c in token.chars().chain(std::iter::once(' ')) {
        if is_cjk(c) {
            run.push(c);
            continue;
        }
        if run.len() >= 2 {
            grams.extend(run.windows(2).map(|pair| pair.iter().collect::<String>()));
        }
        run.clear();
    }
    grams
}

/// Distinct exact terms of `text`.
pub fn exact_terms(text: &str) -> BTreeSet<String> {
    tokens(text).into_iter().collect()
}

/// Distinct fuzzy terms of `text`.
pub fn fuzzy_terms(text: &str) -> BTreeSet<String> {
    tokens(text).iter().flat_map(|token| ngrams(token)).collect()
}

/// Han ideographs, kana and Hangul syllables.
pub fn is_cjk(c: char) -> bool {
    matches!(
        c,
        '\u{3040}'..='\u{30FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{F900}'..='\u{FAFF}'
            | '\u{20000}'..='\u{2A6DF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(
            tokens("/srv/Media/The_Matrix (1999).MKV"),
            vec!["srv", "media", "the", "matrix", "1999", "mkv"]
        );
        assert!(tokens("  --//  ").is_empty());
    }

    #[test]
    fn test_ascii_ngrams() {
        assert_eq!(ngrams("heat"), vec!["he", "ea", "at"]);
        assert!(ngrams("ab").is_empty());
    }

    #[test]
    fn test_cjk_ngrams() {
        assert_eq!(ngrams("千と千尋"), vec!["千と", "と千", "千尋"]);
        // Runs shorter than two characters contribute nothing.
        assert_eq!(ngrams("a漢b字"), Vec::<String>::new());
        assert_eq!(ngrams("café"), Vec::<String>::new());
    }

    #[test]
    fn test_term_sets_are_distinct() {
        let terms = exact_terms("Heat/heat.mkv");
        assert_eq!(terms.len(), 2);
        assert!(fuzzy_terms("heat heat").contains("ea"));
    }
}
