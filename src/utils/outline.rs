use regex::Regex;
use std::sync::OnceLock;

fn chapter_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第([一二三四五六七八九十0-9]+)章").expect("valid heading pattern"))
}

fn blank_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid blank-line pattern"))
}

fn horizontal_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("valid whitespace pattern"))
}

/// Normalizes a generated outline for review.
///
/// Line breaks become `\n`, every `第N章` heading (Arabic digits or 一..十) starts
/// after a blank line, runs of blank lines collapse to one and runs of spaces or
/// tabs collapse to a single space. The pass is idempotent.
pub fn format_outline(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let normalized = normalized.trim();

    let spaced = chapter_heading().replace_all(normalized, "\n\n第${1}章");
    let spaced = spaced.trim_start();
    let collapsed = blank_run().replace_all(spaced, "\n\n");
    horizontal_space().replace_all(&collapsed, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_headings_get_blank_line() {
        let outline = "故事简介\n第一章：觉醒\n第2章：初入修仙界";
        assert_eq!(
            format_outline(outline),
            "故事简介\n\n第一章：觉醒\n\n第2章：初入修仙界"
        );
    }

    #[test]
    fn test_line_endings_and_spaces() {
        let outline = "  第一章\r\n  内容\t\t很  多\r第二章\r\n\r\n\r\n\r\n结尾  ";
        assert_eq!(format_outline(outline), "第一章\n 内容 很 多\n\n第二章\n\n结尾");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(format_outline(""), "");
        assert_eq!(format_outline(" \n\t "), "");
    }

    #[test]
    fn test_leading_heading_has_no_blank_prefix() {
        assert_eq!(format_outline("第十章 终局"), "第十章 终局");
    }

    proptest! {
        #[test]
        fn prop_format_is_idempotent(text in "[ \t\r\n第章一二十0-9ab：]{0,64}") {
            let once = format_outline(&text);
            prop_assert_eq!(format_outline(&once), once);
        }

        #[test]
        fn prop_format_is_idempotent_any_text(text in any::<String>()) {
            let once = format_outline(&text);
            prop_assert_eq!(format_outline(&once), once);
        }
    }
}
