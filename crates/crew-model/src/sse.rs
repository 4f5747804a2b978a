// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared SSE plumbing for the HTTP adapters.
//!
//! Every provider speaks the same outer framing: the response body is a
//! sequence of events separated by blank lines, each carrying one or more
//! `data:` payload lines.  Payloads can be split across TCP chunks, so a
//! carry-over buffer holds the trailing partial event between reads.

/// Extract complete `data:` payloads from an SSE buffer.
///
/// The buffer is drained in place: consumed bytes are removed and any
/// trailing partial event remains for the next chunk.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }
    payloads
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_event_is_drained() {
        let mut buf = "data: {\"a\":1}\n\n".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_event_stays_in_buffer() {
        let mut buf = "data: {\"a\":1}\n\ndata: {\"b\"".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines.len(), 1);
        assert_eq!(buf, "data: {\"b\"");
    }

    #[test]
    fn event_and_id_lines_are_ignored() {
        let mut buf = "event: message_start\nid: 7\ndata: {}\n\n".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{}"]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut buf = "data: 1\n\ndata: 2\n\ndata: 3\n\n".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["1", "2", "3"]);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut buf = "data: {\"x\":true}\r\n\n".to_string();
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"x\":true}"]);
    }
}
