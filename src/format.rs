//! Reply cleanup before an answer is sent to the chat.
//!
//! Model output often carries `**bold**` markers and HTML line breaks that
//! render badly in Telegram. Bullets and hyphens are left alone so lists
//! and prices like `Rp 350.000 - 500.000` survive.

use once_cell::sync::Lazy;
use regex::Regex;

static BOLD: Lazy<Regex> = Lazy::new(|| compile_regex(r"\*\*(.*?)\*\*"));
static HTML_BREAK: Lazy<Regex> = Lazy::new(|| compile_regex(r"<br\s*/?>"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| compile_regex(r"\n{2,}"));

pub fn format_answer(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = HTML_BREAK.replace_all(&text, "\n");
    let text = BLANK_RUNS.replace_all(&text, "\n");
    text.trim().to_string()
}

pub(crate) fn compile_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid regex literal {pattern}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bold() {
        assert_eq!(
            format_answer("Paket **Bromo Sunrise**: **Rp 350.000**"),
            "Paket Bromo Sunrise: Rp 350.000"
        );
    }

    #[test]
    fn test_html_breaks_become_newlines() {
        assert_eq!(format_answer("a<br>b<br/>c<br />d"), "a\nb\nc\nd");
    }

    #[test]
    fn test_collapses_blank_lines_and_trims() {
        assert_eq!(format_answer("\n\nSatu\n\n\nDua\n\n"), "Satu\nDua");
    }

    #[test]
    fn test_break_then_newline_collapses() {
        assert_eq!(format_answer("Harga:<br>\n- Jeep"), "Harga:\n- Jeep");
    }

    #[test]
    fn test_keeps_hyphens_and_bullets() {
        assert_eq!(
            format_answer("• Jeep - Rp 350.000 - 500.000"),
            "• Jeep - Rp 350.000 - 500.000"
        );
    }
}
