use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Ellipsis appended to truncated text
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates a string to fit within `max_width` terminal columns.
///
/// Appends "..." when text is cut. Widths of 3 or less have no room for
/// the ellipsis, so as many characters as fit are returned instead.
/// Returns `Cow::Borrowed` whenever the input already fits.
///
/// # Examples
///
/// ```
/// use tidings::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("你好世界", 7), "你好...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if max_width == 0 {
        return Cow::Borrowed("");
    }

    if max_width <= ELLIPSIS_WIDTH {
        let mut byte_end = 0;
        let mut current_width = 0;
        for (idx, c) in s.char_indices() {
            let char_width = UnicodeWidthChar::width(c).unwrap_or(0);
            if current_width + char_width > max_width {
                break;
            }
            current_width += char_width;
            byte_end = idx + c.len_utf8();
        }
        if byte_end == s.len() {
            return Cow::Borrowed(s);
        }
        return Cow::Owned(s[..byte_end].to_string());
    }

    let target_width = max_width - ELLIPSIS_WIDTH;
    let mut current_width = 0;
    let mut cut_point = None;

    for (idx, c) in s.char_indices() {
        let char_width = UnicodeWidthChar::width(c).unwrap_or(0);
        if cut_point.is_none() && current_width + char_width > target_width {
            cut_point = Some(idx);
        }
        if current_width + char_width > max_width {
            let cut = cut_point.unwrap_or(idx);
            return Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS));
        }
        current_width += char_width;
    }

    Cow::Borrowed(s)
}

/// Right-pads `s` with spaces up to `width` columns. Wider text is returned as is.
pub fn pad_to_width(s: &str, width: usize) -> Cow<'_, str> {
    let current = display_width(s);
    if current >= width {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("{}{}", s, " ".repeat(width - current)))
}

/// "1 feed", "3 feeds".
pub fn pluralize(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Compact age of something that happened `seconds` ago ("now", "5m", "3h", "2d").
///
/// Negative ages (items dated in the future) are shown with a leading "in ".
pub fn relative_time(seconds: i64) -> String {
    if seconds < 0 {
        return format!("in {}", relative_time(-seconds));
    }
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 365 * DAY;

    match seconds {
        s if s < MINUTE => "now".to_string(),
        s if s < HOUR => format!("{}m", s / MINUTE),
        s if s < DAY => format!("{}h", s / HOUR),
        s if s < WEEK => format!("{}d", s / DAY),
        s if s < MONTH => format!("{}w", s / WEEK),
        s if s < YEAR => format!("{}mo", s / MONTH),
        s => format!("{}y", s / YEAR),
    }
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences.
///
/// Feed titles and links come from remote servers and are printed straight
/// to the terminal, so CSI (`ESC [`), OSC (`ESC ]` up to BEL or `ESC \`),
/// bare ESC, DEL and C0 controls other than tab/newline/CR are removed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |b: u8| b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d);
    let bytes = s.as_bytes();
    let len = bytes.len();

    if !bytes.iter().any(|&b| is_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        if b == 0x1b && i + 1 < len && bytes[i + 1] == b'[' {
            i += 2;
            while i < len {
                let c = bytes[i];
                i += 1;
                if (0x40..=0x7e).contains(&c) {
                    break;
                }
            }
        } else if b == 0x1b && i + 1 < len && bytes[i + 1] == b']' {
            i += 2;
            while i < len {
                if bytes[i] == 0x07 {
                    i += 1;
                    break;
                }
                if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                    i += 2;
                    break;
                }
                i += 1;
            }
        } else if is_control(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_control(bytes[i]) {
                i += 1;
            }
            // Only ASCII control bytes end a run, so the slice is valid UTF-8
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}
