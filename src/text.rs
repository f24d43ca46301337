//! Small text helpers shared by the synchronizer and the renderer.

use chrono::{DateTime, NaiveDateTime};

/// Number of characters (not bytes) in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Truncate a string to at most `max` characters (Unicode-safe).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Truncate with a trailing ellipsis when the text is longer than `max`.
pub fn ellipsize(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        s.to_string()
    } else if max <= 1 {
        truncate_chars(s, max)
    } else {
        format!("{}…", truncate_chars(s, max - 1))
    }
}

/// Format a backend timestamp as `May 01 2024 10:20:30`.
///
/// Accepts RFC 3339 and naive ISO 8601 (with or without fractional
/// seconds). Offsets are kept as sent; no local-time conversion.
/// Returns `None` for anything unparseable.
pub fn format_timestamp(raw: &str) -> Option<String> {
    const DISPLAY: &str = "%b %d %Y %H:%M:%S";
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format(DISPLAY).to_string());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(dt.format(DISPLAY).to_string());
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Html,
    Json,
    Css,
    Plain,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Html => "html",
            Language::Json => "json",
            Language::Css => "css",
            Language::Plain => "plaintext",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "javascript" | "js" | "typescript" | "ts" => Some(Language::JavaScript),
            "html" | "xml" => Some(Language::Html),
            "json" => Some(Language::Json),
            "css" => Some(Language::Css),
            _ => None,
        }
    }
}

fn has_word(code: &str, words: &[&str]) -> bool {
    code.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| words.contains(&token))
}

/// Guess the language of a code block for highlighting.
pub fn detect_language(code: &str) -> Language {
    if has_word(code, &["def", "elif", "self", "__name__", "async", "await"])
        || code.lines().any(|l| {
            let l = l.trim_start();
            (l.starts_with("import ") && !l.contains(" from ")) || l.starts_with("from ")
        })
    {
        return Language::Python;
    }
    if has_word(code, &["function", "const", "let", "var"]) || code.contains("=>") {
        return Language::JavaScript;
    }
    let trimmed = code.trim_start();
    if trimmed.starts_with('<')
        && trimmed
            .chars()
            .nth(1)
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
    {
        return Language::Html;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Language::Json;
    }
    if code.contains('{') && code.contains(':') {
        return Language::Css;
    }
    Language::Plain
}

/// A run of output lines, either prose or the body of a fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub code: Option<Language>,
    pub lines: Vec<&'a str>,
}

/// Split output on ``` fences. Fence lines are dropped; an unterminated
/// fence runs to the end of the text.
pub fn split_fenced(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut current = Segment {
        code: None,
        lines: Vec::new(),
    };
    let mut fence_tag: Option<Option<Language>> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(tag) = trimmed.strip_prefix("```") {
            match fence_tag.take() {
                None => {
                    if !current.lines.is_empty() {
                        segments.push(std::mem::replace(
                            &mut current,
                            Segment {
                                code: None,
                                lines: Vec::new(),
                            },
                        ));
                    }
                    fence_tag = Some(Language::from_tag(tag));
                }
                Some(tagged) => {
                    let body = std::mem::take(&mut current.lines);
                    let language = tagged.unwrap_or_else(|| detect_language(&body.join("\n")));
                    segments.push(Segment {
                        code: Some(language),
                        lines: body,
                    });
                }
            }
            continue;
        }
        current.lines.push(line);
    }

    if let Some(tagged) = fence_tag {
        let language = tagged.unwrap_or_else(|| detect_language(&current.lines.join("\n")));
        current.code = Some(language);
        segments.push(current);
    } else if !current.lines.is_empty() {
        segments.push(current);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_unicode() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(char_len("héllo"), 5);
    }

    #[test]
    fn ellipsize_only_when_needed() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("a longer line", 6), "a lon…");
        assert_eq!(ellipsize("abc", 1), "a");
    }

    #[test]
    fn timestamp_naive_iso() {
        assert_eq!(
            format_timestamp("2024-05-01T10:20:30.123456").as_deref(),
            Some("May 01 2024 10:20:30")
        );
        assert_eq!(
            format_timestamp("2024-05-01 10:20:30").as_deref(),
            Some("May 01 2024 10:20:30")
        );
    }

    #[test]
    fn timestamp_rfc3339_keeps_offset() {
        assert_eq!(
            format_timestamp("2024-12-31T23:59:59+02:00").as_deref(),
            Some("Dec 31 2024 23:59:59")
        );
    }

    #[test]
    fn timestamp_garbage_is_none() {
        assert_eq!(format_timestamp(""), None);
        assert_eq!(format_timestamp("yesterday"), None);
    }

    #[test]
    fn detects_python() {
        assert_eq!(detect_language("def main():\n    pass"), Language::Python);
        assert_eq!(detect_language("from os import path"), Language::Python);
    }

    #[test]
    fn detects_javascript() {
        assert_eq!(detect_language("const x = () => 1;"), Language::JavaScript);
    }

    #[test]
    fn detects_html_json_css() {
        assert_eq!(detect_language("<div>hi</div>"), Language::Html);
        assert_eq!(detect_language("{\"a\": 1}"), Language::Json);
        assert_eq!(detect_language("body { color: red }"), Language::Css);
        assert_eq!(detect_language("just words"), Language::Plain);
    }

    #[test]
    fn split_fenced_mixed() {
        let text = "Applied edit\n```python\ndef f():\n    return 1\n```\nDone";
        let segments = split_fenced(text);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].code, None);
        assert_eq!(segments[0].lines, vec!["Applied edit"]);
        assert_eq!(segments[1].code, Some(Language::Python));
        assert_eq!(segments[1].lines, vec!["def f():", "    return 1"]);
        assert_eq!(segments[2].lines, vec!["Done"]);
    }

    #[test]
    fn split_fenced_untagged_detects() {
        let segments = split_fenced("```\nconst a = 1;\n```");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].code, Some(Language::JavaScript));
    }

    #[test]
    fn split_fenced_unterminated_runs_to_end() {
        let segments = split_fenced("intro\n```json\n{\"a\": 1}");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].code, Some(Language::Json));
        assert_eq!(segments[1].lines, vec!["{\"a\": 1}"]);
    }

    #[test]
    fn split_fenced_plain_text() {
        let segments = split_fenced("a\nb");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].lines, vec!["a", "b"]);
        assert!(split_fenced("").is_empty());
    }
}
