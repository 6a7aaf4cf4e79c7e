//! multipart/form-data framing with a fixed boundary
//!
//! Chunk bytes travel as file parts named `chunk`; the part's file name carries
//! the URL-encoded chunk descriptor telling the receiver where to write.
//!
//! Layout written by [`PartWriter`]:
//!
//! ```text
//! --B\r\n<headers>\r\n\r\n<data>\r\n--B\r\n<headers>\r\n\r\n<data>\r\n--B--\r\n
//! ```

use memchr::memmem;
use std::io::{self, Read, Write};

use crate::error::{FsError, Result};

const CRLF: &[u8] = b"\r\n";

pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Streams parts into an underlying writer.
pub struct PartWriter<W: Write> {
    inner: W,
    boundary: String,
    parts: usize,
}

impl<W: Write> PartWriter<W> {
    pub fn new(inner: W, boundary: &str) -> Self {
        Self {
            inner,
            boundary: boundary.to_string(),
            parts: 0,
        }
    }

    fn open_part(&mut self, field: &str, filename: &str) -> io::Result<()> {
        if self.parts > 0 {
            self.inner.write_all(CRLF)?;
        }
        write!(
            self.inner,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.boundary,
            escape_quotes(field),
            escape_quotes(filename)
        )?;
        self.parts += 1;
        Ok(())
    }

    /// Write one file part, copying at most `limit` bytes from `data`.
    /// Returns the number of payload bytes written.
    pub fn write_file_part<R: Read>(
        &mut self,
        field: &str,
        filename: &str,
        data: &mut R,
        limit: u64,
    ) -> io::Result<u64> {
        self.open_part(field, filename)?;
        io::copy(&mut data.take(limit), &mut self.inner)
    }

    /// Write the closing delimiter and hand back the writer.
    pub fn finish(mut self) -> io::Result<W> {
        if self.parts > 0 {
            self.inner.write_all(CRLF)?;
        }
        write!(self.inner, "--{}--\r\n", self.boundary)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// One decoded part, borrowing its payload from the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub data: &'a [u8],
}

/// Split a `form-data; name="x"; filename="y"` header value into its parameters.
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();

    // skip the disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ';') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ';' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        let mut val = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(esc) = chars.next() {
                                val.push(esc);
                            }
                        }
                        '"' => break,
                        _ => val.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ';' {
                        break;
                    }
                    val.push(c);
                    chars.next();
                }
            }
        }
        params.push((key.trim().to_ascii_lowercase(), val.trim().to_string()));
    }
    params
}

fn parse_headers(block: &[u8]) -> Result<(Option<String>, Option<String>)> {
    let text = std::str::from_utf8(block)
        .map_err(|e| FsError::Multipart(format!("part headers are not utf-8: {e}")))?;
    let mut name = None;
    let mut filename = None;
    for line in text.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        for (k, v) in disposition_params(value) {
            match k.as_str() {
                "name" => name = Some(v),
                "filename" => filename = Some(v),
                _ => {}
            }
        }
    }
    Ok((name, filename))
}

/// Parse every part of a complete multipart body.
pub fn parse_parts<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let delim = format!("--{boundary}");
    let delim = delim.as_bytes();
    let mut next_delim = Vec::with_capacity(delim.len() + 2);
    next_delim.extend_from_slice(CRLF);
    next_delim.extend_from_slice(delim);
    let part_end = memmem::Finder::new(&next_delim);

    let first = memmem::find(body, delim)
        .ok_or_else(|| FsError::Multipart("no opening boundary".into()))?;
    let mut cursor = first + delim.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let line_end = memmem::find(rest, CRLF)
            .ok_or_else(|| FsError::Multipart("truncated boundary line".into()))?;
        if !rest[..line_end].iter().all(|b| *b == b' ' || *b == b'\t') {
            return Err(FsError::Multipart("garbage after boundary".into()));
        }
        cursor += line_end + CRLF.len();

        let rest = &body[cursor..];
        let (headers, data_start) = if rest.starts_with(CRLF) {
            (&rest[..0], cursor + CRLF.len())
        } else {
            let end = memmem::find(rest, b"\r\n\r\n")
                .ok_or_else(|| FsError::Multipart("unterminated part headers".into()))?;
            (&rest[..end], cursor + end + 4)
        };
        let (name, filename) = parse_headers(headers)?;

        let data_len = part_end
            .find(&body[data_start..])
            .ok_or_else(|| FsError::Multipart("missing closing boundary".into()))?;
        parts.push(Part {
            name,
            filename,
            data: &body[data_start..data_start + data_len],
        });
        cursor = data_start + data_len + next_delim.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: &str = "8d7b0e5709d756e21e971ff4d9ac3b20";

    #[test]
    fn writer_output_parses_back() {
        let mut w = PartWriter::new(Vec::new(), B);
        let n = w
            .write_file_part("chunk", "path=%2Fa&offset=0&size=5", &mut &b"hello world"[..], 5)
            .unwrap();
        assert_eq!(n, 5);
        w.write_file_part("chunk", "path=%2Fa&offset=5&size=3", &mut &b"\r\n-"[..], 3)
            .unwrap();
        let body = w.finish().unwrap();

        let parts = parse_parts(&body, B).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name.as_deref(), Some("chunk"));
        assert_eq!(parts[0].filename.as_deref(), Some("path=%2Fa&offset=0&size=5"));
        assert_eq!(parts[0].data, b"hello");
        assert_eq!(parts[1].data, b"\r\n-");
    }

    #[test]
    fn wire_layout_is_stable() {
        let mut w = PartWriter::new(Vec::new(), "XYZ");
        w.write_file_part("chunk", "f", &mut &b"ab"[..], 2).unwrap();
        let body = w.finish().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "--XYZ\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"f\"\r\nContent-Type: application/octet-stream\r\n\r\nab\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn quoted_filename_round_trips() {
        let mut w = PartWriter::new(Vec::new(), B);
        w.write_file_part("chunk", "a\"b\\c;d", &mut &b""[..], 0).unwrap();
        let body = w.finish().unwrap();
        let parts = parse_parts(&body, B).unwrap();
        assert_eq!(parts[0].filename.as_deref(), Some("a\"b\\c;d"));
        assert!(parts[0].data.is_empty());
    }

    #[test]
    fn empty_body_has_no_parts() {
        let body = PartWriter::new(Vec::new(), B).finish().unwrap();
        assert!(parse_parts(&body, B).unwrap().is_empty());
    }

    #[test]
    fn preamble_is_ignored() {
        let body = format!("preamble\r\n--{B}\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\nv\r\n--{B}--\r\n");
        let parts = parse_parts(body.as_bytes(), B).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name.as_deref(), Some("x"));
        assert_eq!(parts[0].filename, None);
        assert_eq!(parts[0].data, b"v");
    }

    #[test]
    fn truncated_body_is_rejected() {
        let body = format!("--{B}\r\nContent-Disposition: form-data; name=\"chunk\"\r\n\r\nabc");
        assert!(parse_parts(body.as_bytes(), B).is_err());
        assert!(parse_parts(b"no boundary here", B).is_err());
    }
}
