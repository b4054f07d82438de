//! Filename sanitization for the recording session's output names.
//!
//! Grounded in the teacher's `utils/filename.rs`, but the allowed
//! character class is the one the specification names explicitly
//! (`[-\w.%{}\[\]【】「」（）・°\s]`) rather than a cross-platform
//! denylist, since filename templates here carry strftime/placeholder
//! syntax (`%Y`, `{streamer}`) that must survive sanitization.

/// `true` if `c` is in the specification's allowed character class for a
/// sanitized filename prefix.
fn is_allowed(c: char) -> bool {
    c.is_alphanumeric()
        || c == '_'
        || matches!(
            c,
            '-' | '.'
                | '%'
                | '{'
                | '}'
                | '['
                | ']'
                | '【'
                | '】'
                | '「'
                | '」'
                | '（'
                | '）'
                | '・'
                | '°'
        )
        || c.is_whitespace()
}

/// Strip every character outside the allowed class. Stripping (rather
/// than substitution) makes this a fixed point by construction: a
/// second pass sees only characters the first pass already kept (P7).
pub fn sanitize(input: &str) -> String {
    input.chars().filter(|c| is_allowed(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(sanitize("hello?world"), "helloworld");
        assert_eq!(sanitize("a/b\\c"), "abc");
    }

    #[test]
    fn keeps_template_syntax() {
        assert_eq!(sanitize("{streamer}_%Y-%m-%d"), "{streamer}_%Y-%m-%d");
    }

    #[test]
    fn keeps_cjk_and_bracket_characters() {
        assert_eq!(sanitize("观看一只青蛙【直播】「测试」"), "观看一只青蛙【直播】「测试」");
    }

    #[test]
    fn is_a_fixed_point() {
        for input in [
            "hello?world",
            "观看一只青蛙?",
            "{streamer}-%Y°・",
            "  spaced  ",
            "",
        ] {
            let once = sanitize(input);
            let twice = sanitize(&once);
            assert_eq!(once, twice, "not a fixed point for {input:?}");
        }
    }
}
