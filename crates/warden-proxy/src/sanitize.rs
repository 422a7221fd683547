//! ANSI control-sequence sanitizer.
//!
//! Every text surface flowing toward the host passes through here: tool
//! descriptions on `tools/list`, text content of tool results, and server
//! instructions surfaced to review. A downstream server that embeds escape
//! sequences can otherwise repaint or hide text in the host's terminal.
//!
//! Two modes:
//! - **strip** (default): CSI and OSC sequences, stray escapes, and control
//!   characters are removed outright.
//! - **visualize**: the escape byte is replaced with the literal text `ESC`
//!   so a reviewer sees exactly what the server sent.
//!
//! Configuration hashing happens *before* sanitization, so stripping here
//! never masks drift.

/// Sanitizer mode, selected by `--visualize-ansi-codes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SanitizeMode {
    /// Remove control sequences entirely.
    #[default]
    Strip,
    /// Make the escape byte visible as the text `ESC`.
    Visualize,
}

impl SanitizeMode {
    /// Mode for a `visualize_ansi_codes` flag.
    pub fn from_flag(visualize: bool) -> Self {
        if visualize {
            SanitizeMode::Visualize
        } else {
            SanitizeMode::Strip
        }
    }
}

/// Sanitize one text field according to the mode.
pub fn sanitize_text(text: &str, mode: SanitizeMode) -> String {
    match mode {
        SanitizeMode::Strip => strip_controls(text),
        SanitizeMode::Visualize => text.replace('\u{1b}', "ESC"),
    }
}

/// Remove ANSI escape sequences and control characters.
///
/// Handles:
/// - CSI: `ESC [` parameters/intermediates up to a final byte in `@`..`~`
/// - OSC: `ESC ]` up to BEL or the ST terminator `ESC \`
/// - Any other `ESC x` two-character escape
/// - C0 controls except `\t`, `\n`, `\r`; DEL; C1 controls (U+0080–U+009F)
fn strip_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Consume parameter and intermediate bytes, stop after
                    // the final byte (0x40..=0x7E).
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC terminates on BEL or ST (ESC \).
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' {
                            if chars.peek() == Some(&'\\') {
                                chars.next();
                            }
                            break;
                        }
                    }
                }
                Some(_) => {
                    // Two-character escape (e.g. ESC c, ESC ( B).
                    chars.next();
                }
                None => {}
            }
            continue;
        }

        let keep = match c {
            '\t' | '\n' | '\r' => true,
            c if (c as u32) < 0x20 => false,
            '\u{7f}' => false,
            c if ('\u{80}'..='\u{9f}').contains(&c) => false,
            _ => true,
        };
        if keep {
            out.push(c);
        }
    }

    out
}
