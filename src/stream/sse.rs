//! Incremental server-sent events decoder
//!
//! Bytes arrive in arbitrary chunks; events are separated by a blank line.
//! The decoder buffers partial frames (and partial UTF-8 sequences) across
//! chunks and returns the `data:` payload of each complete event.
//!
//! Field handling:
//!
//! - `data:` -- one leading space stripped; multiple lines joined with `\n`.
//! - `event: ping` and `data: [PING]` -- discarded.
//! - `id:`, `retry:` and `:` comments -- ignored.

/// Stateful SSE frame decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes, returning the data payloads of completed events
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending_bytes.extend_from_slice(bytes);

        let text = match std::str::from_utf8(&self.pending_bytes) {
            Ok(s) => {
                let s = s.to_string();
                self.pending_bytes.clear();
                s
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete multi-byte sequence at the end; keep the tail.
                let valid = e.valid_up_to();
                let tail = self.pending_bytes.split_off(valid);
                let s = String::from_utf8_lossy(&self.pending_bytes).into_owned();
                self.pending_bytes = tail;
                s
            }
            Err(_) => {
                let s = String::from_utf8_lossy(&self.pending_bytes).into_owned();
                self.pending_bytes.clear();
                s
            }
        };

        self.push(&text)
    }

    /// Feeds text, returning the data payloads of completed events
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = Self::parse_block(&block[..pos]) {
                frames.push(data);
            }
        }
        frames
    }

    /// Flushes a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.buffer.push_str(&tail);
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }
        Self::parse_block(rest)
    }

    fn parse_block(block: &str) -> Option<String> {
        let mut data_lines: Vec<&str> = Vec::new();
        let mut is_ping = false;

        for line in block.lines() {
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            } else if let Some(value) = line.strip_prefix("event:") {
                is_ping = value.trim().eq_ignore_ascii_case("ping");
            }
        }

        if is_ping || data_lines.is_empty() {
            return None;
        }

        let data = data_lines.join("\n");
        if data.trim().is_empty() || data.trim().eq_ignore_ascii_case("[ping]") {
            return None;
        }
        Some(data)
    }
}
