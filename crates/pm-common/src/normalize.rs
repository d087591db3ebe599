use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Fold free text for comparison: strip diacritics, lowercase, collapse
/// whitespace, trim. "  São   Paulo " and "sao paulo" fold to the same value.
pub fn fold_text(value: &str) -> String {
    let stripped: String = value.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let lowered = stripped.to_lowercase();
    RE_WHITESPACE.replace_all(lowered.trim(), " ").into_owned()
}

/// Folded equality; blank values never match anything.
pub fn same_place(a: &str, b: &str) -> bool {
    let a = fold_text(a);
    !a.is_empty() && a == fold_text(b)
}

/// Case- and accent-insensitive substring test. Blank keywords never match.
pub fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    let keyword = fold_text(keyword);
    if keyword.is_empty() {
        return false;
    }
    fold_text(haystack).contains(&keyword)
}

/// SHA-256 of the text, first 16 hex chars. Identifies the profile version an
/// embedding was computed from.
pub fn text_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let bytes = hasher.finalize();
    let mut hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(16);
    hex
}

/// Trimmed, folded rejection reason; `None` when blank.
pub fn normalize_reason(reason: Option<&str>) -> Option<String> {
    reason.map(fold_text).filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_accents_case_and_spacing() {
        assert_eq!(fold_text("  São   Paulo "), "sao paulo");
        assert_eq!(fold_text("RIBEIRÃO\tPRETO"), "ribeirao preto");
        assert_eq!(fold_text(""), "");
    }

    #[test]
    fn same_place_ignores_accents_and_blank() {
        assert!(same_place("São Paulo", "sao paulo"));
        assert!(!same_place("São Paulo", "Rio de Janeiro"));
        assert!(!same_place("", ""));
    }

    #[test]
    fn keyword_match_is_substring_and_case_insensitive() {
        assert!(contains_keyword("ANVISA Regulatory Affairs", "regulatory"));
        assert!(contains_keyword("Análise Clínica", "clinica"));
        assert!(!contains_keyword("ISO 9001", "regulatory"));
        assert!(!contains_keyword("anything", "  "));
    }

    #[test]
    fn fingerprint_is_stable_and_text_sensitive() {
        let a = text_fingerprint("laboratory\nSão Paulo");
        assert_eq!(a, text_fingerprint("laboratory\nSão Paulo"));
        assert_ne!(a, text_fingerprint("laboratory\nCampinas"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn normalizes_reasons() {
        assert_eq!(normalize_reason(Some("  Too Expensive ")), Some("too expensive".into()));
        assert_eq!(normalize_reason(Some("   ")), None);
        assert_eq!(normalize_reason(None), None);
    }
}
