//! Unit tests for the NDJSON line codec.
//!
//! Covers:
//! - complete, batched, and partial lines
//! - the 1 MiB line limit and recovery on the following line
//! - lines that are not UTF-8 are dropped, not fatal
//! - `decode_eof` on an unterminated trailing line

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use agent_bridge::agent::codec::{NdjsonCodec, MAX_LINE_BYTES};

// ── Framing ──────────────────────────────────────────────────────────────────

/// A newline-terminated JSON object decodes to its content without the `\n`.
#[test]
fn single_line_decodes_without_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"turn/started\"}\n");

    let line = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(line.as_deref(), Some("{\"method\":\"turn/started\"}"));
}

/// Two lines in one buffer decode as two items, then the buffer is empty.
#[test]
fn batched_lines_decode_separately() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,\"result\":{}}\n{\"id\":2,\"result\":{}}\n");

    let first = codec.decode(&mut buf).expect("first decode");
    let second = codec.decode(&mut buf).expect("second decode");
    let third = codec.decode(&mut buf).expect("third decode");

    assert_eq!(first.as_deref(), Some("{\"id\":1,\"result\":{}}"));
    assert_eq!(second.as_deref(), Some("{\"id\":2,\"result\":{}}"));
    assert!(third.is_none(), "no third line expected");
}

/// A line split across reads is buffered until its newline arrives.
#[test]
fn partial_line_waits_for_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,");

    assert!(codec.decode(&mut buf).expect("partial decode").is_none());

    buf.extend_from_slice(b"\"result\":{}}\n");
    let line = codec.decode(&mut buf).expect("completed decode");
    assert_eq!(line.as_deref(), Some("{\"id\":1,\"result\":{}}"));
}

/// `decode_eof` yields a trailing line that never got its newline.
#[test]
fn eof_flushes_unterminated_line() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"id\":3,\"result\":null}");

    let line = codec.decode_eof(&mut buf).expect("eof decode");
    assert_eq!(line.as_deref(), Some("{\"id\":3,\"result\":null}"));
}

// ── Limits ───────────────────────────────────────────────────────────────────

/// The default limit is 1 MiB.
#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1_048_576);
}

/// An oversized line is dropped and the next line still decodes.
#[test]
fn oversized_line_is_skipped() {
    let mut codec = NdjsonCodec::with_max_length(16);
    let mut buf = BytesMut::from(format!("{}\n{{\"ok\":true}}\n", "x".repeat(64)).as_str());

    let line = codec.decode(&mut buf).expect("oversized line is not an error");

    assert_eq!(line.as_deref(), Some("{\"ok\":true}"));
    assert_eq!(codec.skipped(), 1);
}

/// An oversized line split across reads is discarded up to its newline.
#[test]
fn oversized_partial_line_is_discarded_across_reads() {
    let mut codec = NdjsonCodec::with_max_length(16);
    let mut buf = BytesMut::from("x".repeat(40).as_str());

    assert!(codec.decode(&mut buf).expect("first chunk").is_none());
    buf.extend_from_slice(b"yyyyyyyy\n{\"id\":1}\n");

    let line = codec.decode(&mut buf).expect("second chunk");
    assert_eq!(line.as_deref(), Some("{\"id\":1}"));
    assert_eq!(codec.skipped(), 1);
}

// ── Malformed input ──────────────────────────────────────────────────────────

/// A line that is not valid UTF-8 is dropped and decoding resumes.
#[test]
fn invalid_utf8_line_is_skipped() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe not utf8\n{\"method\":\"turn/started\"}\n"[..]);

    let line = codec.decode(&mut buf).expect("bad bytes are not an error");

    assert_eq!(line.as_deref(), Some("{\"method\":\"turn/started\"}"));
    assert_eq!(codec.skipped(), 1);
    assert!(buf.is_empty());
}

/// An unterminated trailing line that is not UTF-8 ends the stream cleanly.
#[test]
fn invalid_utf8_at_eof_yields_nothing() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(&b"\xc3\x28"[..]);

    let line = codec.decode_eof(&mut buf).expect("eof decode");

    assert!(line.is_none());
    assert_eq!(codec.skipped(), 1);
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encoding appends exactly one newline.
#[test]
fn encode_appends_newline() {
    let mut codec = NdjsonCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode("{\"method\":\"initialized\"}".to_owned(), &mut dst)
        .expect("encode");

    assert_eq!(&dst[..], b"{\"method\":\"initialized\"}\n");
}
