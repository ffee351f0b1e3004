//! Shared source-context rendering for assembler errors and VM exceptions.
//!
//! `legv8-asm` and `legv8-cli` both need "point at this byte range in this source
//! text" rendering; it lives here so the two crates render diagnostics identically.

/// 1-based line and column of a byte offset into `source`.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut col = 1;
    for ch in source[..offset].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// The full text of the line containing byte offset `offset`.
fn line_text(source: &str, offset: usize) -> &str {
    let offset = offset.min(source.len());
    let start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = source[offset..]
        .find('\n')
        .map_or(source.len(), |i| offset + i);
    &source[start..end]
}

/// Whether ANSI color escapes should be emitted, per the `NO_COLOR` convention.
pub fn color_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

const RED: &str = "\x1b[31m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Renders a `label:line:col: error: message` block with the offending source line
/// and a caret-and-tilde underline of `[start, end)`.
///
/// `nearest_label`, when given, names the closest preceding label and is appended as
/// "(near '<label>')" — VM exceptions pass this so a fault deep in unlabeled code still
/// reads as "roughly here" instead of a bare instruction index.
pub fn render(
    label: &str,
    source: &str,
    start: usize,
    end: usize,
    message: &str,
    nearest_label: Option<&str>,
    color: bool,
) -> String {
    let (line, col) = line_col(source, start);
    let text = line_text(source, start);
    let line_start = start - (col - 1);
    let underline_start = start.saturating_sub(line_start);
    let underline_len = end.saturating_sub(start).max(1);

    let mut caret_line = String::new();
    for _ in 0..underline_start {
        caret_line.push(' ');
    }
    caret_line.push('^');
    for _ in 1..underline_len {
        caret_line.push('~');
    }

    let message = match nearest_label {
        Some(name) => format!("{message} (near '{name}')"),
        None => message.to_string(),
    };

    if color {
        format!(
            "{BOLD}{label}:{line}:{col}:{RESET} {RED}error:{RESET} {message}\n{text}\n{RED}{caret_line}{RESET}"
        )
    } else {
        format!("{label}:{line}:{col}: error: {message}\n{text}\n{caret_line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let src = "ADDI X1, XZR, #5\nB L\n";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 18), (2, 1));
    }

    #[test]
    fn render_without_color_is_plain_text() {
        let src = "BOGUS X0, X0\n";
        let out = render("prog.s", src, 0, 5, "unknown instruction mnemonic", None, false);
        assert!(out.starts_with("prog.s:1:1: error: unknown instruction mnemonic\n"));
        assert!(out.contains("^~~~~"));
        assert!(!out.contains('\x1b'));
    }

    #[test]
    fn render_with_color_wraps_in_ansi() {
        let src = "X\n";
        let out = render("prog.s", src, 0, 1, "bad", None, true);
        assert!(out.contains('\x1b'));
    }

    #[test]
    fn render_appends_nearest_label_when_given() {
        let src = "loop:\nADD X0, X0, X0\n";
        let out = render("prog.s", src, 6, 9, "division by zero", Some("loop"), false);
        assert!(out.contains("division by zero (near 'loop')"));
    }
}
