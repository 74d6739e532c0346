//! Shared utility functions for the epicflow crate.

/// Extract the last balanced JSON object from text that may contain other
/// content. The stage executor prints human-readable progress followed by a
/// final result object, so the last object wins.
///
/// Uses brace-counting; braces inside JSON strings are not handled, which is
/// acceptable for the executor protocol (result objects carry no brace
/// characters in string fields).
pub fn extract_last_json_object(text: &str) -> Option<String> {
    let mut last: Option<String> = None;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0;
        let mut end = None;

        for (i, ch) in text[start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                last = Some(text[start..end].to_string());
                search_from = end;
            }
            // Unbalanced tail; nothing further to find.
            None => break,
        }
    }

    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_object() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(
            extract_last_json_object(text),
            Some(r#"{"key": "value"}"#.to_string())
        );
    }

    #[test]
    fn extracts_object_with_surrounding_text() {
        let text = r#"running checks... {"success": true} done"#;
        assert_eq!(
            extract_last_json_object(text),
            Some(r#"{"success": true}"#.to_string())
        );
    }

    #[test]
    fn last_object_wins() {
        let text = r#"{"progress": 50} still working {"success": true}"#;
        assert_eq!(
            extract_last_json_object(text),
            Some(r#"{"success": true}"#.to_string())
        );
    }

    #[test]
    fn nested_objects_stay_intact() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(
            extract_last_json_object(text),
            Some(r#"{"outer": {"inner": "value"}}"#.to_string())
        );
    }

    #[test]
    fn no_json_returns_none() {
        assert_eq!(extract_last_json_object("No JSON here"), None);
    }

    #[test]
    fn unclosed_object_is_ignored() {
        let text = r#"{"complete": true} {"key": "value"#;
        assert_eq!(
            extract_last_json_object(text),
            Some(r#"{"complete": true}"#.to_string())
        );
    }
}
