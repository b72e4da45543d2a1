//! SSE Frame Encoder
//!
//! Explicit encoder for the wire format consumed by the front-end chat widget.
//! Contract: one call produces one event of one or more `data:` lines followed
//! by one trailing blank line. Embedded newlines become continuation `data:`
//! lines of the same event, so multi-line fragments round-trip through the
//! line-based protocol without being split into separate events.

/// Terminator frame closing every completed stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Encode one text fragment as a single SSE event.
///
/// `"foo\nbar"` becomes `"data: foo\ndata: bar\n\n"`; a standards-compliant
/// client reassembles the data lines with `\n` and recovers the original
/// fragment exactly.
pub fn encode_data_frame(fragment: &str) -> String {
    let mut frame = String::with_capacity(fragment.len() + 16);
    frame.push_str("data: ");
    frame.push_str(&fragment.replace('\n', "\ndata: "));
    frame.push_str("\n\n");
    frame
}

/// Encode a named event with a single data line.
pub fn encode_event_frame(event: &str, data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_fragment() {
        assert_eq!(encode_data_frame("Hei"), "data: Hei\n\n");
    }

    #[test]
    fn test_embedded_newline_becomes_continuation_line() {
        assert_eq!(encode_data_frame("foo\nbar"), "data: foo\ndata: bar\n\n");
    }

    #[test]
    fn test_multiple_newlines() {
        assert_eq!(
            encode_data_frame("a\nb\nc"),
            "data: a\ndata: b\ndata: c\n\n"
        );
    }

    #[test]
    fn test_empty_fragment_still_valid_event() {
        assert_eq!(encode_data_frame(""), "data: \n\n");
    }

    #[test]
    fn test_client_reassembly_roundtrip() {
        // 模拟 EventSource 客户端：去掉前缀后按 \n 重组 data 行
        let original = "foo\nbar";
        let frame = encode_data_frame(original);

        let reassembled: Vec<&str> = frame
            .trim_end_matches('\n')
            .lines()
            .map(|line| line.strip_prefix("data: ").unwrap())
            .collect();
        assert_eq!(reassembled.join("\n"), original);
    }

    #[test]
    fn test_done_frame_literal() {
        assert_eq!(DONE_FRAME, "data: [DONE]\n\n");
    }

    #[test]
    fn test_event_frame() {
        assert_eq!(
            encode_event_frame("error", "stream failed"),
            "event: error\ndata: stream failed\n\n"
        );
    }
}
