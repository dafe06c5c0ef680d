//! Whole-word masking of a fixed blocklist.
//!
//! Matching is case-insensitive and bounded by word boundaries, so a
//! flagged word embedded in a longer word is left alone. Each match is
//! replaced by the same number of [`MASK_CHAR`]s; text outside matches keeps
//! its original case.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::MASK_CHAR;

const BLOCKLIST: &[&str] = &[
    "anjing", "bangsat", "bego", "bodoh", "jancuk", "kampret", "kontol", "memek", "ngentot",
    "perek", "setan", "sialan", "tolol",
];

static FLAGGED: Lazy<Regex> = Lazy::new(|| {
    let alternation = BLOCKLIST
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("blocklist pattern is valid")
});

/// Replace every flagged word with an equal-length run of mask characters.
/// Idempotent: masked text contains no word characters where a match was.
pub fn mask(text: &str) -> String {
    FLAGGED
        .replace_all(text, |caps: &regex::Captures<'_>| {
            MASK_CHAR.to_string().repeat(caps[0].chars().count())
        })
        .into_owned()
}

/// Whether `text` contains at least one flagged word.
pub fn contains_flagged(text: &str) -> bool {
    FLAGGED.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_whole_words_any_case() {
        assert_eq!(mask("Dasar BODOH!"), "Dasar *****!");
        assert_eq!(mask("setan, tolol"), "*****, *****");
    }

    #[test]
    fn test_ignores_substrings() {
        assert_eq!(mask("kebodohan itu"), "kebodohan itu");
        assert!(!contains_flagged("kebodohan itu"));
    }

    #[test]
    fn test_mask_is_idempotent() {
        let once = mask("kamu bego dan sialan sekali");
        assert_eq!(mask(&once), once);
        assert!(!contains_flagged(&once));
    }

    #[test]
    fn test_detects_flagged() {
        assert!(contains_flagged("ah Kampret"));
        assert!(!contains_flagged("halo semua"));
    }
}
