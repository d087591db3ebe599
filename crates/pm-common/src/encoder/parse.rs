use once_cell::sync::Lazy;
use regex::Regex;

// Innermost bracketed spans; nested arrays surface their inner rows.
static RE_BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());

/// Pull the first well-formed, non-empty numeric JSON array out of free-form
/// analyzer output. Prose, code fences and malformed spans are skipped.
pub fn extract_feature_array(response: &str) -> Option<Vec<f64>> {
    RE_BRACKETED.find_iter(response).find_map(|span| {
        let values: Vec<f64> = serde_json::from_str(span.as_str()).ok()?;
        (!values.is_empty()).then_some(values)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_array() {
        assert_eq!(
            extract_feature_array("[0.1, 0.5, 1]"),
            Some(vec![0.1, 0.5, 1.0])
        );
    }

    #[test]
    fn finds_array_inside_prose_and_fences() {
        let response = "Sure! Here are the features:\n```json\n[0.2,0.4]\n```\nHope this helps.";
        assert_eq!(extract_feature_array(response), Some(vec![0.2, 0.4]));
    }

    #[test]
    fn skips_malformed_and_non_numeric_spans() {
        let response = r#"["a", "b"] then [0.1, oops] and finally [0.9, 0.8]"#;
        assert_eq!(extract_feature_array(response), Some(vec![0.9, 0.8]));
    }

    #[test]
    fn skips_empty_arrays() {
        assert_eq!(extract_feature_array("[] [0.3]"), Some(vec![0.3]));
    }

    #[test]
    fn returns_none_for_plain_text() {
        assert_eq!(extract_feature_array("I cannot help with that."), None);
        assert_eq!(extract_feature_array("{\"features\": \"none\"}"), None);
    }
}
