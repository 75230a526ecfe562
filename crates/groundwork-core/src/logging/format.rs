//! Output-format template handling.
//!
//! The template is processed once, at logger initialization: backslash
//! escapes are decoded, then the string is compiled into an ordered part
//! list: token expanders for the `{...}` substitutions the logger knows,
//! verbatim ranges for everything else. Emission just walks the parts,
//! which keeps the per-message path free of any parsing.

use crate::logging::{LogLocation, Severity};
use crate::types::CharArray;

/// Longest accepted template, in bytes (longer input is cut).
pub(crate) const MAX_OUTPUT_FORMAT_LEN: usize = 2048;
/// Upper bound on compiled parts.
pub(crate) const MAX_FORMAT_PARTS: usize = 1024;

pub(crate) const DEFAULT_OUTPUT_FORMAT: &str = "[{severity}] [{time}] [{name}]: {message}";

/// One step of the compiled output pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormatPart {
    Severity,
    Name,
    Message,
    FunctionName,
    FileName,
    /// `{time}`: decimal seconds.
    TimeSeconds,
    /// `{date_time_with_ms}`: local date with milliseconds.
    DateWithMs,
    /// `{time_as_nanoseconds}`.
    TimeNanoseconds,
    LineNumber,
    /// Verbatim byte range of the decoded template.
    Literal { start: usize, end: usize },
}

fn token_part(token: &str) -> Option<FormatPart> {
    match token {
        "severity" => Some(FormatPart::Severity),
        "name" => Some(FormatPart::Name),
        "message" => Some(FormatPart::Message),
        "function_name" => Some(FormatPart::FunctionName),
        "file_name" => Some(FormatPart::FileName),
        "time" => Some(FormatPart::TimeSeconds),
        "date_time_with_ms" => Some(FormatPart::DateWithMs),
        "time_as_nanoseconds" => Some(FormatPart::TimeNanoseconds),
        "line_number" => Some(FormatPart::LineNumber),
        _ => None,
    }
}

/// Decode the backslash escapes the template language recognizes:
/// `\a \b \n \r \t` and the four-character literal `\x1b`. Unrecognized
/// escapes pass through verbatim, as does a trailing backslash.
pub(crate) fn decode_escapes(raw: &str) -> String {
    let mut limit = raw.len().min(MAX_OUTPUT_FORMAT_LEN - 1);
    while limit > 0 && !raw.is_char_boundary(limit) {
        limit -= 1;
    }
    let raw = &raw[..limit];

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().map(|(_, next)| *next) {
            Some('x') if raw[i..].starts_with("\\x1b") => {
                out.push('\u{1b}');
                chars.next();
                chars.next();
                chars.next();
            }
            Some('a') => {
                out.push('\u{7}');
                chars.next();
            }
            Some('b') => {
                out.push('\u{8}');
                chars.next();
            }
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            Some('r') => {
                out.push('\r');
                chars.next();
            }
            Some('t') => {
                out.push('\t');
                chars.next();
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
                chars.next();
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Compile the decoded template into its part list.
pub(crate) fn compile_parts(decoded: &str) -> Vec<FormatPart> {
    let mut parts = Vec::new();
    let size = decoded.len();
    let mut i = 0;

    while i < size {
        if parts.len() >= MAX_FORMAT_PARTS {
            eprintln!("too many substitutions in the logging output format string; truncating");
            break;
        }
        match decoded[i..].find('{') {
            None => {
                parts.push(FormatPart::Literal { start: i, end: size });
                break;
            }
            Some(distance) if distance > 0 => {
                parts.push(FormatPart::Literal {
                    start: i,
                    end: i + distance,
                });
                i += distance;
            }
            Some(_) => match decoded[i..].find('}') {
                None => {
                    // No terminator left, so no further tokens either.
                    parts.push(FormatPart::Literal { start: i, end: size });
                    break;
                }
                Some(end) => match token_part(&decoded[i + 1..i + end]) {
                    Some(part) => {
                        parts.push(part);
                        i += end + 1;
                    }
                    None => {
                        // Not a known token: emit the brace and keep
                        // scanning (the rest may contain real tokens).
                        parts.push(FormatPart::Literal { start: i, end: i + 1 });
                        i += 1;
                    }
                },
            },
        }
    }
    parts
}

/// Everything a token expander may draw from.
pub(crate) struct LoggingInput<'a> {
    pub location: Option<&'a LogLocation>,
    pub severity: Severity,
    pub name: &'a str,
    pub timestamp: i64,
    pub msg: &'a str,
}

/// Run the compiled parts, appending the expansion of each to `out`.
pub(crate) fn expand_parts(
    parts: &[FormatPart],
    decoded: &str,
    input: &LoggingInput<'_>,
    out: &mut CharArray,
) -> crate::Result {
    for part in parts {
        match part {
            FormatPart::Severity => out.append_str(input.severity.as_str())?,
            FormatPart::Name => out.append_str(input.name)?,
            FormatPart::Message => out.append_str(input.msg)?,
            FormatPart::FunctionName => {
                if let Some(location) = input.location {
                    out.append_str(location.function_name)?;
                }
            }
            FormatPart::FileName => {
                if let Some(location) = input.location {
                    out.append_str(location.file_name)?;
                }
            }
            FormatPart::LineNumber => {
                if let Some(location) = input.location {
                    out.append_str(itoa_buf(location.line_number).as_str())?;
                }
            }
            FormatPart::TimeSeconds => {
                crate::time::time_point_value_as_seconds_string(input.timestamp, out)?;
            }
            FormatPart::DateWithMs => {
                crate::time::time_point_value_as_date_string(input.timestamp, out)?;
            }
            FormatPart::TimeNanoseconds => {
                crate::time::time_point_value_as_nanoseconds_string(input.timestamp, out)?;
            }
            FormatPart::Literal { start, end } => {
                out.append_str(&decoded[*start..*end])?;
            }
        }
    }
    Ok(())
}

/// Small stack formatter for line numbers.
struct ItoaBuf {
    buf: [u8; 20],
    len: usize,
}

impl ItoaBuf {
    fn as_str(&self) -> &str {
        // SAFETY: only ASCII digits are written.
        unsafe { std::str::from_utf8_unchecked(&self.buf[..self.len]) }
    }
}

fn itoa_buf(mut value: usize) -> ItoaBuf {
    let mut out = ItoaBuf {
        buf: [0; 20],
        len: 0,
    };
    let mut digits = [0u8; 20];
    let mut n = 0;
    loop {
        digits[n] = b'0' + (value % 10) as u8;
        value /= 10;
        n += 1;
        if value == 0 {
            break;
        }
    }
    for i in 0..n {
        out.buf[i] = digits[n - 1 - i];
    }
    out.len = n;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_template_compiles_to_tokens_and_literals() {
        let decoded = decode_escapes(DEFAULT_OUTPUT_FORMAT);
        let parts = compile_parts(&decoded);
        assert_eq!(
            parts,
            vec![
                FormatPart::Literal { start: 0, end: 1 },
                FormatPart::Severity,
                FormatPart::Literal { start: 11, end: 14 },
                FormatPart::TimeSeconds,
                FormatPart::Literal { start: 20, end: 23 },
                FormatPart::Name,
                FormatPart::Literal { start: 29, end: 32 },
                FormatPart::Message,
            ]
        );
    }

    #[test]
    fn unknown_tokens_pass_through_verbatim() {
        let decoded = decode_escapes("{unknown} {name}");
        let parts = compile_parts(&decoded);
        // '{' is emitted alone, then the rest scans normally.
        assert_eq!(parts[0], FormatPart::Literal { start: 0, end: 1 });
        assert!(parts.contains(&FormatPart::Name));
    }

    #[test]
    fn escapes_decode_and_unknown_escapes_survive() {
        assert_eq!(decode_escapes(r"a\nb"), "a\nb");
        assert_eq!(decode_escapes(r"a\tb\r"), "a\tb\r");
        assert_eq!(decode_escapes(r"\a\b"), "\u{7}\u{8}");
        assert_eq!(decode_escapes(r"\x1b[0m"), "\u{1b}[0m");
        assert_eq!(decode_escapes(r"\q"), r"\q");
        assert_eq!(decode_escapes("trailing\\"), "trailing\\");
        assert_eq!(decode_escapes(r"\\n"), r"\\n");
    }

    #[test]
    fn unterminated_token_becomes_literal_tail() {
        let decoded = decode_escapes("x {name");
        let parts = compile_parts(&decoded);
        assert_eq!(
            parts,
            vec![
                FormatPart::Literal { start: 0, end: 2 },
                FormatPart::Literal { start: 2, end: 7 },
            ]
        );
    }

    #[test]
    fn line_number_formatting() {
        assert_eq!(itoa_buf(0).as_str(), "0");
        assert_eq!(itoa_buf(42).as_str(), "42");
        assert_eq!(itoa_buf(123_456_789).as_str(), "123456789");
    }
}
