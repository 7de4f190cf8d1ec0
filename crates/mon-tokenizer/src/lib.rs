//! Deterministic word-splitter used by the materializer to turn a rendered
//! command string into an argv list, honoring single- and double-quoted
//! spans.
//!
//! Operates over `&str` rather than bytes (the rendered command is always
//! valid UTF-8 text coming out of `serde_json`/template substitution), and
//! every index into an accumulated field is bounds-checked so a lone
//! quote-character field can never panic.

/// Split `input` into argv fields.
///
/// Total: there is no malformed input this function rejects. An unclosed
/// quote simply yields whatever partial field had accumulated by the time
/// the input ran out; callers treat the result as best-effort.
pub fn argv(input: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut quote: Option<char> = None;

    for field in input.split_ascii_whitespace() {
        match quote {
            None => {
                let first = field
                    .chars()
                    .next()
                    .expect("split_ascii_whitespace never yields empty fields");
                if first != '\'' && first != '"' {
                    result.push(field.to_string());
                    continue;
                }
                let rest = &field[first.len_utf8()..];
                match rest.strip_suffix(first) {
                    Some(closed) if !rest.is_empty() => result.push(closed.to_string()),
                    _ => {
                        quote = Some(first);
                        result.push(rest.to_string());
                    }
                }
            }
            Some(q) => {
                let last = result.len() - 1;
                match field.strip_suffix(q) {
                    Some(closed) => {
                        result[last].push(' ');
                        result[last].push_str(closed);
                        quote = None;
                    }
                    None => {
                        result[last].push(' ');
                        result[last].push_str(field);
                    }
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_sequence() {
        assert_eq!(argv(""), Vec::<String>::new());
        assert_eq!(argv("   "), Vec::<String>::new());
    }

    #[test]
    fn unquoted_fields() {
        assert_eq!(argv("foo"), vec!["foo"]);
        assert_eq!(argv("foo bar"), vec!["foo", "bar"]);
    }

    #[test]
    fn single_quoted_word() {
        assert_eq!(argv(r#"foo "bar""#), vec!["foo", "bar"]);
    }

    #[test]
    fn quoted_span_with_embedded_space() {
        assert_eq!(argv(r#"foo "bar baz""#), vec!["foo", "bar baz"]);
    }

    #[test]
    fn two_adjacent_quoted_fields() {
        assert_eq!(argv(r#"foo "bar" "baz""#), vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn quoted_then_bare_field() {
        assert_eq!(argv(r#"foo "bar" baz"#), vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn embedded_single_quote_does_not_confuse_the_double_quote_span() {
        assert_eq!(
            argv(r#"foo "bar 'hello" baz"#),
            vec!["foo", "bar 'hello", "baz"]
        );
        assert_eq!(
            argv(r#"foo "bar hello'" baz"#),
            vec!["foo", "bar hello'", "baz"]
        );
        assert_eq!(
            argv(r#"foo "bar 'hello'" baz"#),
            vec!["foo", "bar 'hello'", "baz"]
        );
    }

    #[test]
    fn idempotent_for_inputs_with_no_quote_transitions() {
        for input in ["ping -c 3 example.com", "echo hello world", "true"] {
            let once = argv(input);
            let rejoined = once.join(" ");
            assert_eq!(argv(&rejoined), once);
        }
    }
}
