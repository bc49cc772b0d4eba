//! Incremental UTF-8 decoding for byte streams whose chunk boundaries may
//! fall inside a multi-byte character.

const REPLACEMENT: char = '\u{FFFD}';

/// Decodes byte chunks as they arrive.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back
/// until the next chunk completes it. Bytes that can never form valid UTF-8
/// are replaced with U+FFFD, and so is a sequence still incomplete when the
/// stream ends.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as is currently decodable.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            let error = match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(error) => error,
            };

            let valid = error.valid_up_to();
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match error.error_len() {
                // Truncated sequence at the end: wait for more bytes.
                None => {
                    self.pending.drain(..valid);
                    return out;
                }
                Some(invalid) => {
                    out.push(REPLACEMENT);
                    self.pending.drain(..valid + invalid);
                }
            }
        }
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
