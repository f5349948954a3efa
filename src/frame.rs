//! In-memory frame representation, header escaping, and serialization.
//!
//! Grounded on `yotamofek-tokio-stomp/src/frame.rs`'s `write_escaped` byte
//! switch and content-length handling, generalized from borrowed `&[u8]`
//! slices to an owned, ordered header list so a `Frame` can be built,
//! mutated, and round-tripped independently of the buffer it was parsed
//! from.

use bytes::{BufMut, BytesMut};

/// An ordered header list. Peers don't care about order, but the test suite
/// demands determinism (§9 Design Notes), so headers are kept in insertion
/// order rather than hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// First value for `name`, per STOMP 1.2's "first occurrence wins" rule.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive lookup, for the handful of headers the protocol
    /// treats specially (`content-length`, `transformation`).
    pub fn get_ci(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Appends a header, even if `name` is already present. Use [`Self::set`]
    /// to replace a unique header.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces the first occurrence of `name`, or appends if absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == name)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers(iter.into_iter().collect())
    }
}

/// A decoded or to-be-serialized STOMP frame.
///
/// A frame is either a heartbeat (empty command, no headers, no body) or has
/// a non-empty command (§3 Data Model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Governs header escaping: V1.0 escapes only `\n`; V1.1+ escapes
    /// `\\`, `\r`, `\n`, `:`.
    pub legacy_mode: bool,
    /// Forces `content-length` emission even when the body contains no NUL
    /// byte (used by SEND when the caller wants brokers to trust the byte
    /// count rather than scan for the terminator).
    pub expect_length_header: bool,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Frame {
            command: command.into(),
            headers: Headers::new(),
            body: Vec::new(),
            legacy_mode: false,
            expect_length_header: false,
        }
    }

    /// The zero-byte heartbeat frame (§4.1: "A heartbeat is serialized as
    /// the single byte `\n`").
    pub fn heartbeat() -> Self {
        Frame {
            command: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            legacy_mode: false,
            expect_length_header: false,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.is_empty() && self.headers.is_empty() && self.body.is_empty()
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy_mode = legacy;
        self
    }

    pub fn expect_length(mut self, expect: bool) -> Self {
        self.expect_length_header = expect;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn header_ci(&self, name: &str) -> Option<&str> {
        self.headers.get_ci(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    fn needs_content_length(&self) -> bool {
        self.expect_length_header || self.body.contains(&0u8)
    }

    /// Serializes this frame onto `buffer`, following §4.1.
    pub fn serialize(&self, buffer: &mut BytesMut) {
        if self.is_heartbeat() {
            buffer.put_u8(b'\n');
            return;
        }

        buffer.put_slice(self.command.as_bytes());
        buffer.put_u8(b'\n');

        if self.needs_content_length() && self.header("content-length").is_none() {
            buffer.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        for (key, value) in self.headers.iter() {
            write_escaped_str(key, self.legacy_mode, buffer);
            buffer.put_u8(b':');
            write_escaped_str(value, self.legacy_mode, buffer);
            buffer.put_u8(b'\n');
        }

        buffer.put_u8(b'\n');
        buffer.put_slice(&self.body);
        buffer.put_u8(0);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf
    }
}

/// Escapes a single header key or value per §4.1.
///
/// Legacy (V1.0) replaces only `\n`. Modern (V1.1+) replaces `\\`, `\r`,
/// `\n`, `:` in that scan order, so a literal backslash is never
/// double-escaped.
fn write_escaped_str(s: &str, legacy: bool, buffer: &mut BytesMut) {
    for &b in s.as_bytes() {
        if legacy {
            match b {
                b'\n' => buffer.put_slice(b"\\n"),
                _ => buffer.put_u8(b),
            }
        } else {
            match b {
                b'\\' => buffer.put_slice(b"\\\\"),
                b'\r' => buffer.put_slice(b"\\r"),
                b'\n' => buffer.put_slice(b"\\n"),
                b':' => buffer.put_slice(b"\\c"),
                _ => buffer.put_u8(b),
            }
        }
    }
}

/// Inverse of [`write_escaped_str`], used by the parser.
pub(crate) fn unescape(bytes: &[u8], legacy: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        if legacy {
            match iter.next() {
                Some(b'n') => out.push(b'\n'),
                Some(other) => {
                    out.push(b);
                    out.push(other);
                }
                None => out.push(b),
            }
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b'c') => out.push(b':'),
            Some(b'\\') => out.push(b'\\'),
            Some(other) => {
                out.push(b);
                out.push(other);
            }
            None => out.push(b),
        }
    }
    out
}
