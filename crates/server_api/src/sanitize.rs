use crate::directory::ContentSanitizer;

/// Treats every body as plain text: HTML metacharacters are escaped and
/// control characters other than newline and tab are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSanitizer;

impl ContentSanitizer for PlainTextSanitizer {
    fn sanitize(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for ch in raw.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                '\n' | '\t' => out.push(ch),
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
        out
    }
}
