//! Byte-to-frame splitting for the two transport flavors.

const DATA_PREFIX: &str = "data: ";

/// Transport framing flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Every decoded fragment is one frame.
    Text,
    /// `data: <payload>` frames separated by a blank line.
    Event,
}

/// Incremental UTF-8 decoder.
///
/// Keeps an incomplete multi-byte sequence at the end of a fragment until the
/// next fragment arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes `bytes` in streaming mode.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        let consumed = loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break self.pending.len();
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => break self.pending.len() - after.len(),
                    }
                }
            }
        };
        self.pending.drain(..consumed);
        out
    }

    /// Flushes a dangling incomplete sequence at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}

/// Splits decoded text into complete frames for one flavor.
#[derive(Debug)]
pub struct FrameBuffer {
    flavor: Flavor,
    buf: String,
    // Bytes of `buf` already searched for a delimiter.
    scanned: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer for `flavor`.
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            buf: String::new(),
            scanned: 0,
        }
    }

    /// Returns the flavor this buffer frames.
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Appends a decoded fragment and returns every frame it completed.
    ///
    /// Event-flavor frames are returned raw (prefix not yet stripped); the
    /// unterminated remainder stays buffered for the next call.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }
        match self.flavor {
            Flavor::Text => vec![fragment.to_owned()],
            Flavor::Event => {
                self.buf.push_str(fragment);
                let mut frames = Vec::new();
                let mut start = 0;
                // A delimiter may straddle the previous end of the buffer.
                let mut from = self.scanned.saturating_sub(3);
                while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
                    frames.push(self.buf[start..idx].to_owned());
                    start = idx + delim_len;
                    from = start;
                }
                self.buf.drain(..start);
                self.scanned = self.buf.len();
                frames
            }
        }
    }

    /// Takes the unterminated remainder, if any non-whitespace data is left.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        if rest.trim().is_empty() { None } else { Some(rest) }
    }
}

fn find_frame_delimiter(buf: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = buf.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < bytes.len() && &bytes[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Extracts the payload of an event frame.
///
/// Returns `None` for frames that do not start with `data: ` after trimming
/// (comments, keep-alives, other SSE fields).
pub fn event_payload(frame: &str) -> Option<&str> {
    frame
        .trim()
        .strip_prefix(DATA_PREFIX)
        .map(str::trim)
}
