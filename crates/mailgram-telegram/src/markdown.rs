//! Helpers for Telegram's legacy `Markdown` parse mode.

/// Characters with meaning in legacy Markdown.
const SPECIAL: [char; 4] = ['_', '*', '`', '['];

/// Escapes text so it renders literally in legacy Markdown.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
