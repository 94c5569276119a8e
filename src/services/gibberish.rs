//! Gibberish detection. One source of truth: the same function gates prompt
//! acceptance on /interpretations and name selection during backfill.

use regex::Regex;
use std::sync::OnceLock;

use crate::services::naming;

/// Names longer than this must carry a vocabulary segment to pass.
const MAX_PLAIN_NAME_LEN: usize = 24;

fn dsc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^dsc_[0-9a-f]+$").expect("valid regex"))
}

fn novel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Novel\d+$").expect("valid regex"))
}

pub fn is_gibberish_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return true;
    }
    if dsc_re().is_match(trimmed) || novel_re().is_match(trimmed) {
        return true;
    }
    if trimmed.len() <= MAX_PLAIN_NAME_LEN {
        return false;
    }
    let lower = trimmed.to_lowercase();
    let vocab = naming::vocabulary();
    if vocab.contains(lower.as_str()) {
        return false;
    }
    let has_segment = vocab
        .iter()
        .any(|w| lower.starts_with(w) || lower.ends_with(w));
    !has_segment
}

/// Token-wise check over a prompt. Strict mode (the loop's explore path)
/// rejects on any gibberish token; lenient mode on a majority.
pub fn is_gibberish_prompt(text: &str, strict: bool) -> bool {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return true;
    }
    let bad = words.iter().filter(|w| is_gibberish_name(w)).count();
    if strict {
        bad > 0
    } else {
        bad * 2 > words.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_markers_are_gibberish() {
        assert!(is_gibberish_name("dsc_ab12cd"));
        assert!(is_gibberish_name("dsc_0f"));
        assert!(is_gibberish_name("Novel00042"));
        assert!(is_gibberish_name("Novel7"));
    }

    #[test]
    fn test_vocabulary_names_pass() {
        assert!(!is_gibberish_name("emberglow"));
        assert!(!is_gibberish_name("zephyr"));
        assert!(!is_gibberish_name("shadow"));
        // Short unknown words are tolerated.
        assert!(!is_gibberish_name("sunbeam"));
    }

    #[test]
    fn test_long_unvocabulary_names_fail() {
        assert!(is_gibberish_name("xqzkfjwpqnvbtrlmzzzzzhhhh"));
        // Long but ends with a vocabulary segment.
        assert!(!is_gibberish_name("extraordinarycrystalglimmer"));
    }

    #[test]
    fn test_prompt_modes() {
        assert!(!is_gibberish_prompt("Sunset over the ocean", true));
        assert!(is_gibberish_prompt("Sunset over dsc_ab12 water", true));
        assert!(!is_gibberish_prompt("Sunset over dsc_ab12 water", false));
        assert!(is_gibberish_prompt("dsc_ab12 dsc_cd34 glow", false));
        assert!(is_gibberish_prompt("", true));
        assert!(is_gibberish_prompt("   ", false));
    }
}
