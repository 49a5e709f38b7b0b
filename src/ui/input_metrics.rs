use unicode_width::UnicodeWidthChar;

pub fn truncate_to_display_width(text: &str, max_width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let ch_width = char_display_width(ch);
        if used + ch_width > max_width && used > 0 {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out
}

/// Fits `text` into `width` columns, replacing the tail with `...` when cut.
pub fn truncate_line(text: &str, width: usize) -> String {
    let width = width.max(1);
    if display_width(text) <= width {
        return text.to_string();
    }
    if width < 4 {
        return truncate_to_display_width(text, width);
    }
    let mut out = truncate_to_display_width(text, width - 3);
    out.push_str("...");
    out
}

pub fn char_display_width(ch: char) -> usize {
    UnicodeWidthChar::width(ch).unwrap_or(0)
}

pub fn display_width(text: &str) -> usize {
    text.chars().map(char_display_width).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_line_keeps_short_text() {
        assert_eq!(truncate_line("Connected", 76), "Connected");
    }

    #[test]
    fn test_truncate_line_adds_ellipsis_within_width() {
        let long = "x".repeat(100);
        let cut = truncate_line(&long, 76);
        assert_eq!(display_width(&cut), 76);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_wide_characters_count_double() {
        assert_eq!(display_width("日本"), 4);
        assert_eq!(truncate_to_display_width("日本語", 5), "日本");
    }
}
