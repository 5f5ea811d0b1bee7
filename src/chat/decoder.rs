//! Incremental response-stream decoder
//!
//! Splits a chunked chat response body into its two logical streams: the
//! assistant's text, and the side payload that follows a sentinel marker.
//! Text is delivered as true incremental deltas. To keep deltas safe against
//! sentinel false-starts, the decoder withholds the longest buffer suffix
//! that could still begin the sentinel until the next chunk disambiguates it,
//! so sentinel bytes never leak into emitted text and no text is lost.
//!
//! Chunks arrive as raw bytes; multi-byte UTF-8 sequences split across chunk
//! boundaries are reassembled before scanning.

/// One decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Newly arrived assistant text; consumers append deltas in order
    Text(String),

    /// Raw side payload. Terminal: nothing follows it.
    SidePayload(String),
}

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Scanning for the sentinel, emitting text deltas
    Text,
    /// Sentinel found, accumulating the side payload
    Payload,
    /// Terminal event delivered
    Done,
}

/// Push-style decoder over a chunked response body
///
/// Feed raw chunks with [`feed`](Self::feed); call [`finish`](Self::finish)
/// exactly once when the source is exhausted. The decoder is finite and
/// non-restartable: after the terminal event, further input is logged and
/// ignored.
#[derive(Debug)]
pub struct StreamDecoder {
    sentinel: String,
    state: DecoderState,
    /// Decoded assistant text accumulated so far
    buffer: String,
    /// Byte offset into `buffer` already emitted as deltas
    emitted: usize,
    /// Side payload accumulated after the sentinel
    payload: String,
    /// Incomplete UTF-8 sequence carried between chunks
    pending: Vec<u8>,
}

impl StreamDecoder {
    /// Create a decoder for the given sentinel
    #[must_use]
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            state: DecoderState::Text,
            buffer: String::new(),
            emitted: 0,
            payload: String::new(),
            pending: Vec::new(),
        }
    }

    /// Whether the terminal event has been delivered
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Consume one chunk from the transport
    ///
    /// Returns zero or more events, in order. Zero events is normal: the
    /// chunk may have completed nothing visible (an undecided sentinel
    /// prefix, a split UTF-8 sequence, or payload bytes held for
    /// [`finish`](Self::finish)).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.state == DecoderState::Done {
            tracing::warn!(len = chunk.len(), "chunk after terminal event, ignoring");
            return Vec::new();
        }

        let text = self.assemble_utf8(chunk);
        if text.is_empty() {
            return Vec::new();
        }

        match self.state {
            DecoderState::Text => self.scan_text(&text),
            DecoderState::Payload => {
                self.payload.push_str(&text);
                Vec::new()
            }
            DecoderState::Done => unreachable!("guarded above"),
        }
    }

    /// Signal end of source
    ///
    /// In text mode, flushes any withheld tail as a final text delta and ends
    /// with no payload event. In payload mode, emits the single terminal
    /// [`StreamEvent::SidePayload`]. An empty payload is a valid event,
    /// distinct from no payload at all.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.state == DecoderState::Done {
            tracing::warn!("finish after terminal event, ignoring");
            return Vec::new();
        }

        self.flush_pending();

        match self.state {
            DecoderState::Text => {
                let mut events = Vec::new();
                if self.buffer.len() > self.emitted {
                    events.push(StreamEvent::Text(self.buffer[self.emitted..].to_string()));
                    self.emitted = self.buffer.len();
                }
                self.state = DecoderState::Done;
                tracing::debug!(text_len = self.buffer.len(), "stream ended, no side payload");
                events
            }
            DecoderState::Payload => {
                self.state = DecoderState::Done;
                tracing::debug!(
                    text_len = self.buffer.len(),
                    payload_len = self.payload.len(),
                    "stream ended with side payload"
                );
                vec![StreamEvent::SidePayload(std::mem::take(&mut self.payload))]
            }
            DecoderState::Done => unreachable!("guarded above"),
        }
    }

    /// Scan newly decoded text for the sentinel, emitting the safe delta
    fn scan_text(&mut self, text: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(text);

        // The emitted region is sentinel-free by construction, so scanning
        // from the cursor cannot miss an occurrence.
        if let Some(pos) = self.buffer[self.emitted..].find(&self.sentinel) {
            let idx = self.emitted + pos;
            let mut events = Vec::new();
            if idx > self.emitted {
                events.push(StreamEvent::Text(self.buffer[self.emitted..idx].to_string()));
                self.emitted = idx;
            }

            let after = idx + self.sentinel.len();
            self.payload.push_str(&self.buffer[after..]);
            self.buffer.truncate(idx);
            self.state = DecoderState::Payload;
            tracing::debug!(text_len = idx, "sentinel detected");
            return events;
        }

        let safe = self.safe_boundary();
        if safe > self.emitted {
            let delta = self.buffer[self.emitted..safe].to_string();
            self.emitted = safe;
            return vec![StreamEvent::Text(delta)];
        }
        Vec::new()
    }

    /// Largest prefix of the buffer that cannot be the start of the sentinel
    ///
    /// Withholds the longest buffer suffix equal to a proper sentinel prefix.
    /// The boundary always lands on a char boundary: sentinel prefixes are
    /// cut at the sentinel's own char boundaries, and a prefix match means
    /// the buffer position holds the sentinel's leading byte.
    fn safe_boundary(&self) -> usize {
        let buf = self.buffer.as_bytes();
        let max = buf.len().min(self.sentinel.len() - 1);
        for k in (1..=max).rev() {
            if !self.sentinel.is_char_boundary(k) {
                continue;
            }
            if buf.ends_with(&self.sentinel.as_bytes()[..k]) {
                return buf.len() - k;
            }
        }
        buf.len()
    }

    /// Append a chunk to any pending bytes and decode the valid UTF-8 region
    fn assemble_utf8(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::new();
        let mut start = 0;
        while start < bytes.len() {
            match std::str::from_utf8(&bytes[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = bytes.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(
                        std::str::from_utf8(&bytes[start..start + valid]).unwrap_or(""),
                    );
                    match e.error_len() {
                        // Incomplete sequence at the tail; hold for the next chunk
                        None => {
                            self.pending = bytes[start + valid..].to_vec();
                            return out;
                        }
                        Some(bad) => {
                            tracing::warn!(offset = start + valid, "invalid UTF-8 in stream");
                            out.push('\u{FFFD}');
                            start += valid + bad;
                        }
                    }
                }
            }
        }
        out
    }

    /// Lossily flush a dangling incomplete UTF-8 tail at end of source
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::warn!(len = self.pending.len(), "stream ended mid UTF-8 sequence");
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        match self.state {
            DecoderState::Text => self.buffer.push_str(&tail),
            DecoderState::Payload => self.payload.push_str(&tail),
            DecoderState::Done => {}
        }
    }
}
