//! Line-oriented reader over a byte source
//!
//! UTF-8 input is decoded incrementally, one line at a time. UTF-16 input has
//! no cheap line boundary at the byte level, so it is read and decoded in one
//! go on first use and then handed out line by line.
//!
//! The reader owns its source. Whether iteration runs to the end, stops on an
//! error, or is abandoned half way, dropping the iterator drops the source.

use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Read};

/// Text encoding of a session log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "utf-16le", alias = "utf16le")]
    Utf16Le,
    #[serde(rename = "utf-16be", alias = "utf16be")]
    Utf16Be,
}

/// Iterator of decoded lines without their terminators.
///
/// Lines are split on `\n` and a trailing `\r` is removed. The final line is
/// emitted even without a terminator. Empty input yields nothing.
pub struct LineReader<R> {
    state: State<R>,
}

enum State<R> {
    Streaming { reader: BufReader<R>, buf: Vec<u8> },
    Unread { reader: R, encoding: TextEncoding },
    Decoded(std::vec::IntoIter<String>),
    Done,
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R, encoding: TextEncoding) -> Self {
        let state = match encoding {
            TextEncoding::Utf8 => State::Streaming {
                reader: BufReader::new(reader),
                buf: Vec::with_capacity(4096),
            },
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => State::Unread { reader, encoding },
        };
        Self { state }
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Streaming {
                    mut reader,
                    mut buf,
                } => {
                    buf.clear();
                    return match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => None,
                        Ok(_) => {
                            let line = decode_utf8_line(&buf);
                            self.state = State::Streaming { reader, buf };
                            Some(Ok(line))
                        }
                        Err(e) => Some(Err(e)),
                    };
                }
                State::Unread {
                    mut reader,
                    encoding,
                } => {
                    let mut bytes = Vec::new();
                    if let Err(e) = reader.read_to_end(&mut bytes) {
                        return Some(Err(e));
                    }
                    drop(reader);
                    let text = decode_utf16(&bytes, encoding);
                    tracing::debug!(bytes = bytes.len(), ?encoding, "Decoded UTF-16 input");
                    self.state = State::Decoded(split_lines(&text).into_iter());
                }
                State::Decoded(mut lines) => {
                    let line = lines.next()?;
                    self.state = State::Decoded(lines);
                    return Some(Ok(line));
                }
                State::Done => return None,
            }
        }
    }
}

fn decode_utf8_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn decode_utf16(bytes: &[u8], encoding: TextEncoding) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| match encoding {
            TextEncoding::Utf16Be => u16::from_be_bytes([pair[0], pair[1]]),
            _ => u16::from_le_bytes([pair[0], pair[1]]),
        })
        .collect();
    let units = match units.first() {
        Some(0xFEFF) => &units[1..],
        _ => &units[..],
    };
    String::from_utf16_lossy(units)
}

fn split_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    if lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(bytes: &[u8], encoding: TextEncoding) -> Vec<String> {
        LineReader::new(bytes, encoding)
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_splits_and_strips_carriage_returns() {
        let lines = collect(b"one\r\ntwo\n\nthree", TextEncoding::Utf8);
        assert_eq!(lines, vec!["one", "two", "", "three"]);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(collect(b"", TextEncoding::Utf8).is_empty());
        assert!(collect(b"", TextEncoding::Utf16Le).is_empty());
    }

    #[test]
    fn test_trailing_newline_does_not_add_line() {
        assert_eq!(collect(b"a\nb\n", TextEncoding::Utf8), vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let lines = collect(b"ok\n\xff\xfe bad\n", TextEncoding::Utf8);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(" bad"));
    }

    #[test]
    fn test_utf16_le_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "{\"a\":1}\r\nsecond".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(
            collect(&bytes, TextEncoding::Utf16Le),
            vec!["{\"a\":1}", "second"]
        );
    }

    #[test]
    fn test_utf16_be() {
        let mut bytes = Vec::new();
        for unit in "x\ny".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(collect(&bytes, TextEncoding::Utf16Be), vec!["x", "y"]);
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::Other, "disk gone"));
            }
            self.served = true;
            let data = b"first\nsec";
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }

    #[test]
    fn test_read_error_ends_iteration() {
        let mut reader = LineReader::new(FailingReader { served: false }, TextEncoding::Utf8);
        assert_eq!(reader.next().unwrap().unwrap(), "first");
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
