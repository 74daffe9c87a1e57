// SPDX-License-Identifier: Apache-2.0
//! Line-oriented SSE frame parsing and ping filtering.
//!
//! An SSE stream is a sequence of frames separated by blank lines, each
//! frame made of `field: value` lines. MCP servers keep the connection
//! alive with unnamed `ping` frames (no `event:` line, or `event: ping`)
//! that carry no payload useful to a client; everything else (an absent
//! `event:` line defaults to `"message"`, or an explicit `event: message`)
//! is forwarded untouched and in order. "Untouched" means every field
//! line of the frame — `data:`, `id:`, `retry:`, comments — not just its
//! `data:` payload: the filter decides whether a frame is forwarded, it
//! never rewrites one.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    /// Every field line of the frame, verbatim and in original order —
    /// `data:`, `id:`, `retry:`, and comment lines alike. The filter's
    /// job is deciding whether a frame gets forwarded, not rewriting it;
    /// nothing here is dropped or re-joined.
    pub lines: Vec<String>,
}

impl SseFrame {
    /// Reassemble the frame body as it appeared on the wire (terminator
    /// style aside): every line, `\n`-joined, `\n`-terminated.
    pub fn raw(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// The decoded `data:` payload: each `data:` line's value (one
    /// leading space stripped per the SSE spec), joined with `\n` in
    /// original order. A convenience for callers that want the payload
    /// rather than the full verbatim frame.
    pub fn data(&self) -> String {
        self.lines
            .iter()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|v| v.strip_prefix(' ').unwrap_or(v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse one frame's raw lines (already split on the blank-line separator).
fn parse_frame(lines: &[String]) -> Option<SseFrame> {
    if lines.is_empty() {
        return None;
    }
    let event = lines
        .iter()
        .find_map(|line| line.strip_prefix("event:"))
        .map(|rest| rest.trim().to_string());
    Some(SseFrame { event, lines: lines.to_vec() })
}

/// Should this frame be forwarded to the caller? Named events other than
/// `message` (e.g. `ping`) are dropped; an absent event name defaults to
/// `message` and is forwarded.
pub fn should_forward(frame: &SseFrame) -> bool {
    match frame.event.as_deref() {
        None | Some("message") => true,
        _ => false,
    }
}

/// Split a raw SSE byte stream into frames and filter out non-`message`
/// events (pings), preserving the byte order of everything forwarded.
pub async fn read_filtered_frames<R: AsyncBufRead + Unpin>(mut reader: R) -> std::io::Result<Vec<SseFrame>> {
    let mut forwarded = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if !pending.is_empty() {
                if let Some(frame) = parse_frame(&pending) {
                    if should_forward(&frame) {
                        forwarded.push(frame);
                    }
                }
            }
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            if !pending.is_empty() {
                if let Some(frame) = parse_frame(&pending) {
                    if should_forward(&frame) {
                        forwarded.push(frame);
                    }
                }
                pending.clear();
            }
        } else {
            pending.push(trimmed.to_string());
        }
    }
    Ok(forwarded)
}

/// Continuously read `reader` and send forwarded (non-ping) frames on
/// `tx`, for a long-lived transparent SSE proxy. Returns when the stream
/// closes or `tx`'s receiver is dropped; status and headers are the
/// caller's responsibility (this only re-frames the body).
pub async fn forward_live<R: AsyncBufRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<SseFrame>,
) -> std::io::Result<()> {
    let mut pending: Vec<String> = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if !pending.is_empty() {
                if let Some(frame) = parse_frame(&pending) {
                    if should_forward(&frame) {
                        let _ = tx.send(frame).await;
                    }
                }
            }
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            if !pending.is_empty() {
                let lines = std::mem::take(&mut pending);
                if let Some(frame) = parse_frame(&lines) {
                    if should_forward(&frame) && tx.send(frame).await.is_err() {
                        return Ok(());
                    }
                }
            }
        } else {
            pending.push(trimmed.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn forwards_unnamed_frames() {
        let raw = b"data: hello\n\n".to_vec();
        let frames = read_filtered_frames(Cursor::new(raw)).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), "hello");
    }

    #[tokio::test]
    async fn forwards_explicit_message_events() {
        let raw = b"event: message\ndata: hi\n\n".to_vec();
        let frames = read_filtered_frames(Cursor::new(raw)).await.unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn drops_ping_frames() {
        let raw = b"event: ping\ndata: {}\n\ndata: real\n\n".to_vec();
        let frames = read_filtered_frames(Cursor::new(raw)).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), "real");
    }

    #[tokio::test]
    async fn preserves_order_of_forwarded_frames() {
        let raw = b"data: one\n\nevent: ping\ndata: skip\n\ndata: two\n\n".to_vec();
        let frames = read_filtered_frames(Cursor::new(raw)).await.unwrap();
        assert_eq!(frames.iter().map(|f| f.data()).collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn multiline_data_is_joined_with_newline() {
        let raw = b"data: line1\ndata: line2\n\n".to_vec();
        let frames = read_filtered_frames(Cursor::new(raw)).await.unwrap();
        assert_eq!(frames[0].data(), "line1\nline2");
    }

    #[tokio::test]
    async fn forwards_id_and_comment_lines_verbatim() {
        // id: and retry: fields, and comment lines, must survive forwarding
        // untouched even though MCP itself never reads them.
        let raw = b": keep-alive note\nid: 42\nevent: message\ndata: payload\nretry: 1000\n\n".to_vec();
        let frames = read_filtered_frames(Cursor::new(raw)).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].raw(),
            ": keep-alive note\nid: 42\nevent: message\ndata: payload\nretry: 1000\n"
        );
        assert_eq!(frames[0].data(), "payload");
    }

    #[test]
    fn should_forward_rejects_named_non_message_events() {
        let frame = SseFrame { event: Some("ping".into()), lines: Vec::new() };
        assert!(!should_forward(&frame));
    }

    #[test]
    fn should_forward_accepts_absent_event() {
        let frame = SseFrame { event: None, lines: vec!["data: x".into()] };
        assert!(should_forward(&frame));
    }

    #[tokio::test]
    async fn forward_live_skips_pings_over_channel() {
        let raw = b"data: one\n\nevent: ping\ndata: skip\n\ndata: two\n\n".to_vec();
        let (tx, mut rx) = mpsc::channel(8);
        forward_live(Cursor::new(raw), tx).await.unwrap();
        let mut received = Vec::new();
        while let Some(frame) = rx.recv().await {
            received.push(frame.data());
        }
        assert_eq!(received, vec!["one".to_string(), "two".to_string()]);
    }
}
