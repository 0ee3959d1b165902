// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental decoder for the `event:` / `data:` / blank-line protocol.

use serde::{Deserialize, Serialize};

/// One dispatched frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: String,
    pub data: String,
}

impl PushEvent {
    /// Parse the payload as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.data).ok()
    }
}

/// Buffers raw bytes until a blank line completes a frame.
///
/// Splitting happens on bytes, so a multi-byte character cut across two
/// chunks is reassembled before decoding. `\r\n` line endings are accepted.
/// A frame that outgrows the pending-bytes limit is dropped whole.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a separator.
    scanned: usize,
    limit: usize,
    /// Skipping the tail of an oversized frame.
    discarding: bool,
}

/// Default cap on bytes held for one incomplete frame.
pub const MAX_PENDING_BYTES: usize = 1 << 20;

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), scanned: 0, limit, discarding: false }
    }

    /// Feed one chunk and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<PushEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        // A separator can straddle the previous scan end by up to two bytes.
        while let Some((end, sep_len)) = find_frame_end(&self.buf, self.scanned.saturating_sub(2)) {
            let raw: Vec<u8> = self.buf.drain(..end + sep_len).take(end).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(event) = parse_frame(&String::from_utf8_lossy(&raw)) {
                events.push(event);
            }
        }
        self.scanned = self.buf.len();

        if self.buf.len() > self.limit {
            tracing::debug!(
                pending = self.buf.len(),
                limit = self.limit,
                "dropping oversized frame"
            );
            // Keep the tail so a separator split across chunks is still seen.
            let keep = self.buf.len().saturating_sub(2);
            self.buf.drain(..keep);
            self.scanned = self.buf.len();
            self.discarding = true;
        }
        events
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.discarding = false;
    }
}

/// Locate the first blank-line separator at or after `from`:
/// `(frame_len, separator_len)`.
fn find_frame_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some((i, 2)),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Parse one frame. Returns `None` unless both an event type and a payload
/// were present.
pub fn parse_frame(frame: &str) -> Option<PushEvent> {
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for line in frame.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_owned());
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data {
                Some(ref mut d) => {
                    d.push('\n');
                    d.push_str(value);
                }
                None => data = Some(value.to_owned()),
            }
        }
    }

    match (event, data) {
        (Some(event), Some(data)) if !event.is_empty() => Some(PushEvent { event, data }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
