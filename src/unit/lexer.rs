//! Tokenizer that turns raw unit-file text into [`Section`] values.
//!
//! The grammar follows systemd unit files: `[Section]` headers, `name =
//! value` options, `#`/`;` line comments, and backslash line continuation.
//! Every physical line is capped at [`SYSTEMD_LINE_MAX`] bytes, matching
//! systemd's own hard limit.

use std::io::Read;

use crate::error::{SystemDeployError, SYSTEMD_LINE_MAX};
use crate::unit::{Options, Section};

/// One physical line of input, with its trailing `\n`/`\r\n` stripped.
struct RawLine {
    content: Vec<u8>,
    /// Whether this line was terminated by a newline (false only for a
    /// trailing, unterminated final line).
    had_newline: bool,
}

fn split_lines(buf: &[u8]) -> Result<Vec<RawLine>, SystemDeployError> {
    let mut lines = Vec::new();
    let mut start = 0;

    while start < buf.len() {
        let (end, had_newline, next_start) = match buf[start..].iter().position(|&b| b == b'\n') {
            Some(rel) => (start + rel, true, start + rel + 1),
            None => (buf.len(), false, buf.len()),
        };

        let mut content = buf[start..end].to_vec();
        if content.last() == Some(&b'\r') {
            content.pop();
        }

        if content.len() >= SYSTEMD_LINE_MAX {
            return Err(SystemDeployError::LineTooLong {
                max: SYSTEMD_LINE_MAX,
            });
        }

        lines.push(RawLine { content, had_newline });
        start = next_start;
    }

    Ok(lines)
}

fn to_str(content: &[u8]) -> Result<&str, SystemDeployError> {
    std::str::from_utf8(content)
        .map_err(|_| SystemDeployError::Validation("unit file is not valid UTF-8".to_string()))
}

/// Parses `reader`'s content into an ordered list of sections.
///
/// Options appearing before the first `[Section]` header are rejected
/// with [`SystemDeployError::OptionOutsideSection`].
pub fn parse<R: Read>(mut reader: R) -> Result<Vec<Section>, SystemDeployError> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| SystemDeployError::io("reading unit file", e))?;

    let lines = split_lines(&buf)?;
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;
    let mut i = 0;

    while i < lines.len() {
        let text = to_str(&lines[i].content)?;
        let trimmed = text.trim_start();

        if trimmed.trim().is_empty() {
            i += 1;
            continue;
        }

        let first = trimmed.chars().next().unwrap();

        if first == '#' || first == ';' {
            i = skip_comment(&lines, i)?;
            continue;
        }

        if first == '[' {
            let Some(close) = trimmed.find(']') else {
                return Err(SystemDeployError::GarbageAfterSection {
                    section: String::new(),
                    garbage: "missing closing ']'".to_string(),
                });
            };
            let name = trimmed[1..close].to_string();
            let garbage = trimmed[close + 1..].trim();
            if !garbage.is_empty() {
                return Err(SystemDeployError::GarbageAfterSection {
                    section: name,
                    garbage: garbage.to_string(),
                });
            }
            if let Some(section) = current.take() {
                sections.push(section);
            }
            current = Some(Section::new(name));
            i += 1;
            continue;
        }

        // Option line: `name = value`, possibly continued.
        let Some(current_section) = current.as_mut() else {
            return Err(SystemDeployError::OptionOutsideSection);
        };

        let Some(eq) = trimmed.find('=') else {
            return Err(SystemDeployError::UnexpectedNewlineInOption);
        };

        let name = trimmed[..eq].trim().to_string();
        let first_chunk = trimmed[eq + 1..].to_string();

        let (value, next_i) = lex_value(&lines, i, &first_chunk)?;
        current_section.options.push(name, value);
        i = next_i;
    }

    if let Some(section) = current.take() {
        sections.push(section);
    }

    Ok(sections)
}

/// Skips a comment line, honoring backslash-continued comment blocks.
fn skip_comment(lines: &[RawLine], mut i: usize) -> Result<usize, SystemDeployError> {
    loop {
        let mut content = lines[i].content.clone();
        if content.last() == Some(&b' ') {
            content.pop();
        }
        i += 1;
        if content.last() != Some(&b'\\') || i >= lines.len() {
            break;
        }
    }
    Ok(i)
}

/// Accumulates an option's value across backslash-continued lines.
///
/// Returns the assembled value and the index of the first line not
/// consumed by this option.
fn lex_value(
    lines: &[RawLine],
    name_line: usize,
    first_chunk: &str,
) -> Result<(String, usize), SystemDeployError> {
    let mut partial = String::new();
    let mut chunk = first_chunk.to_string();
    let mut i = name_line;

    loop {
        if chunk.trim().is_empty() {
            i += 1;
            break;
        }

        let is_last_physical_line = i + 1 >= lines.len();
        let continues = chunk.ends_with('\\');
        let value_part = if continues { &chunk[..chunk.len() - 1] } else { &chunk[..] };
        partial.push_str(value_part);

        i += 1;
        if !continues {
            break;
        }
        if is_last_physical_line {
            break;
        }
        partial.push('\n');

        chunk = to_str(&lines[i].content)?.to_string();
    }

    Ok((partial.trim().to_string(), i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(input: &str) -> Vec<Section> {
        parse(input.as_bytes()).expect("parse should succeed")
    }

    #[test]
    fn parses_simple_section_and_options() {
        let sections = parse_str("[Task]\nDescription = hello world\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, "Task");
        assert_eq!(
            sections[0].get_string("Description").unwrap(),
            "hello world"
        );
    }

    #[test]
    fn supports_multiple_sections() {
        let sections = parse_str("[Task]\nDescription = d\n\n[Copy]\nSource = /a\n");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].name, "Copy");
    }

    #[test]
    fn ignores_comment_lines() {
        let sections = parse_str("# a comment\n[Task]\n; another comment\nDescription = d\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].get_string("Description").unwrap(), "d");
    }

    #[test]
    fn rejects_option_before_section() {
        let err = parse("Description = d\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SystemDeployError::OptionOutsideSection));
    }

    #[test]
    fn rejects_garbage_after_section() {
        let err = parse("[Task] extra\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SystemDeployError::GarbageAfterSection { .. }));
    }

    #[test]
    fn joins_backslash_continued_values() {
        let sections = parse_str("[Exec]\nCommand = echo \\\n  hello\n");
        let value = sections[0].get_string("Command").unwrap();
        assert_eq!(value, "echo \n  hello");
    }

    #[test]
    fn accepts_line_just_under_max() {
        let prefix = "Description = ";
        let value = "a".repeat(SYSTEMD_LINE_MAX - 1 - prefix.len());
        let line = format!("{}{}", prefix, value);
        assert_eq!(line.len(), SYSTEMD_LINE_MAX - 1);
        let input = format!("[Task]\n{}\n", line);
        let sections = parse_str(&input);
        assert_eq!(sections[0].get_string("Description").unwrap(), value);
    }

    #[test]
    fn rejects_line_at_max() {
        let prefix = "Description = ";
        let value = "a".repeat(SYSTEMD_LINE_MAX - prefix.len());
        let line = format!("{}{}", prefix, value);
        assert_eq!(line.len(), SYSTEMD_LINE_MAX);
        let input = format!("[Task]\n{}\n", line);
        let err = parse(input.as_bytes()).unwrap_err();
        assert!(matches!(err, SystemDeployError::LineTooLong { .. }));
    }

    #[test]
    fn repeated_options_are_both_kept() {
        let sections = parse_str("[Service]\nEnvironment = A=1\nEnvironment = B=2\n");
        assert_eq!(
            sections[0].get_string_slice("Environment"),
            vec!["A=1", "B=2"]
        );
    }
}
