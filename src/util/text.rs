use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: char = '…';

/// Display width of `s` in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Shorten `s` to at most `max_width` columns, marking cuts with `…`.
///
/// ```
/// use postpulse::util::fit_width;
///
/// assert_eq!(fit_width("https://facebook.com/page", 10), "https://f…");
/// assert_eq!(fit_width("short", 10), "short");
/// ```
pub fn fit_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }
    if max_width == 0 {
        return Cow::Borrowed("");
    }

    let budget = max_width - 1;
    let mut used = 0;
    let mut out = String::new();
    for c in s.chars() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push(ELLIPSIS);
    Cow::Owned(out)
}

/// Right-pad `s` with spaces to `width` columns, truncating if longer.
pub fn pad_to_width(s: &str, width: usize) -> String {
    let fitted = fit_width(s, width);
    let pad = width.saturating_sub(display_width(&fitted));
    format!("{}{}", fitted, " ".repeat(pad))
}

/// Remove terminal control characters and escape sequences.
///
/// Comment text and URLs come from third parties and are printed straight
/// to the terminal. Tab and newline survive; CSI (`ESC [`) and OSC (`ESC ]`)
/// sequences are dropped whole.
pub fn sanitize_for_terminal(s: &str) -> Cow<'_, str> {
    let is_unsafe = |c: char| c == '\u{1b}' || (c.is_control() && c != '\t' && c != '\n');
    if !s.chars().any(is_unsafe) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameters run until a final byte in '@'..='~'.
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // Terminated by BEL or ESC '\'.
                    while let Some(c) = chars.next() {
                        if c == '\u{7}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_unsafe(c) {
            out.push(c);
        }
    }
    Cow::Owned(out)
}
