//! Incremental decoding of streamed chat completion events.
//!
//! The upstream body is a sequence of newline-terminated server-sent event
//! lines. Only `data: ` lines matter; each one carries a JSON record whose
//! `choices[0].delta.content` is the next piece of assistant text. Chunk
//! boundaries don't line up with lines, so the decoder owns a buffer that
//! survives across [`StreamDecoder::feed`] calls.

use serde_json::Value;

const DATA_PREFIX: &str = "data: ";

/// The payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What the decoder saw by the time the stream ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DecodeSummary {
    /// Whether the stream was terminated by the sentinel rather than by
    /// the connection closing.
    pub saw_sentinel: bool,
    /// Number of data payloads dropped because they never formed a valid
    /// record.
    pub malformed_frames: usize,
}

/// An incremental parser that turns body chunks into text fragments.
///
/// A decoder is good for exactly one response. Once the sentinel is seen
/// it ignores any further input.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
    // Start of the bytes in `buf` that are not consumed yet. Consumed bytes
    // are only compacted away when the next chunk arrives.
    cursor: usize,
    // A data payload that failed to parse, waiting for its continuation.
    held: Option<String>,
    done: bool,
    malformed_frames: usize,
}

impl StreamDecoder {
    /// Creates a new decoder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk to the buffer and returns the fragments that can be
    /// decoded so far.
    ///
    /// The returned iterator is lazy: lines are only parsed as it is
    /// pulled. Fragments left unpulled stay in the buffer and are returned
    /// by the next iterator.
    pub fn feed(&mut self, chunk: &[u8]) -> Fragments<'_> {
        if !self.done {
            if self.cursor > 0 {
                self.buf.drain(..self.cursor);
                self.cursor = 0;
            }
            self.buf.extend_from_slice(chunk);
        }
        Fragments { decoder: self }
    }

    /// Returns `true` once the sentinel has been seen.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decodes the next fragment from the buffered lines.
    ///
    /// Returns `None` when more input is needed or the stream is done.
    pub fn next_fragment(&mut self) -> Option<String> {
        while !self.done {
            let rest = &self.buf[self.cursor..];
            let eol = rest.iter().position(|b| *b == b'\n')?;
            let line = String::from_utf8_lossy(&rest[..eol]).into_owned();
            self.cursor += eol + 1;

            if let Some(fragment) = self.decode_line(&line) {
                return Some(fragment);
            }
        }
        None
    }

    /// Ends the stream and reports what was dropped.
    ///
    /// A payload still waiting for its continuation, or an unterminated
    /// trailing data line, is discarded without producing a fragment.
    pub fn finish(mut self) -> DecodeSummary {
        self.drop_held();

        if !self.done {
            let rest = String::from_utf8_lossy(&self.buf[self.cursor..]);
            let rest = rest.trim_end_matches('\r');
            if let Some(payload) = rest.strip_prefix(DATA_PREFIX) {
                if payload.trim() == DONE_SENTINEL {
                    self.done = true;
                } else {
                    warn!("dropping a truncated trailing frame");
                    self.malformed_frames += 1;
                }
            }
        }

        DecodeSummary {
            saw_sentinel: self.done,
            malformed_frames: self.malformed_frames,
        }
    }

    fn decode_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') || line.trim().is_empty() {
            return None;
        }

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            // A record split by a stray line break continues on a line
            // without the data prefix.
            if let Some(mut held) = self.held.take() {
                held.push_str(line);
                return self.retry_payload(held);
            }
            trace!("skipping non-data line: {line}");
            return None;
        };

        self.drop_held();

        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            trace!("got the done sentinel");
            self.done = true;
            self.buf.clear();
            self.cursor = 0;
            return None;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(record) => extract_content(&record),
            Err(err) => {
                trace!("holding back an incomplete payload: {err}");
                self.held = Some(payload.to_owned());
                None
            }
        }
    }

    fn retry_payload(&mut self, payload: String) -> Option<String> {
        match serde_json::from_str::<Value>(payload.trim()) {
            Ok(record) => extract_content(&record),
            Err(err) => {
                warn!("dropping a malformed frame: {err}");
                self.malformed_frames += 1;
                None
            }
        }
    }

    fn drop_held(&mut self) {
        if self.held.take().is_some() {
            warn!("dropping a malformed frame that never completed");
            self.malformed_frames += 1;
        }
    }
}

fn extract_content(record: &Value) -> Option<String> {
    record
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_owned)
}

/// A lazy iterator over the fragments decoded from the buffered input.
///
/// See [`StreamDecoder::feed`].
pub struct Fragments<'a> {
    decoder: &'a mut StreamDecoder,
}

impl Iterator for Fragments<'_> {
    type Item = String;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_fragment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(content: &str) -> String {
        let record = serde_json::json!({
            "choices": [{ "delta": { "content": content } }]
        });
        format!("data: {record}\n")
    }

    fn decode_all(chunks: &[&[u8]]) -> (Vec<String>, DecodeSummary) {
        let mut decoder = StreamDecoder::new();
        let mut fragments = Vec::new();
        for chunk in chunks {
            fragments.extend(decoder.feed(chunk));
        }
        (fragments, decoder.finish())
    }

    #[test]
    fn test_split_record() {
        let (fragments, summary) = decode_all(&[
            br#"data: {"choices":[{"delta":{"content":"Hel"#,
            b"lo\"}}]}\n",
            b"data: [DONE]\n",
        ]);
        assert_eq!(fragments, vec!["Hello"]);
        assert!(summary.saw_sentinel);
        assert_eq!(summary.malformed_frames, 0);
    }

    #[test]
    fn test_any_split_point() {
        let contents = ["• Sow ", "after ", "the first rain ", "✓ हाँ"];
        let mut stream: String = contents.iter().map(|c| frame(c)).collect();
        stream.push_str(": keep-alive\n\ndata: [DONE]\n");
        let bytes = stream.as_bytes();

        for split in 0..=bytes.len() {
            let (fragments, summary) =
                decode_all(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(fragments, contents, "split at {split}");
            assert!(summary.saw_sentinel);
        }

        let byte_chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        let (fragments, _) = decode_all(&byte_chunks);
        assert_eq!(fragments.concat(), contents.concat());
    }

    #[test]
    fn test_nothing_after_sentinel() {
        let tail = frame("ignored");
        let mut decoder = StreamDecoder::new();
        let first: Vec<_> = decoder
            .feed(format!("{}data: [DONE]\n{tail}", frame("kept")).as_bytes())
            .collect();
        assert_eq!(first, vec!["kept"]);
        assert!(decoder.is_done());

        assert_eq!(decoder.feed(tail.as_bytes()).count(), 0);
        assert!(decoder.finish().saw_sentinel);
    }

    #[test]
    fn test_frames_without_content() {
        let (fragments, summary) = decode_all(&[
            br#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            b"\n",
            br#"data: {"choices":[{"delta":{"content":""}}]}"#,
            b"\n",
            br#"data: {"choices":[]}"#,
            b"\n",
            br#"data: {"choices":[{"delta":{"content":null}}]}"#,
            b"\n",
            frame("A").as_bytes(),
        ]);
        assert_eq!(fragments, vec!["A"]);
        assert_eq!(summary.malformed_frames, 0);
        assert!(!summary.saw_sentinel);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let (fragments, summary) = decode_all(&[
            b": OPENROUTER PROCESSING\r\n",
            b"\n\n",
            b"event: message\nid: 7\n",
            frame("one").as_bytes(),
            b":\n",
            frame("two").replace('\n', "\r\n").as_bytes(),
        ]);
        assert_eq!(fragments, vec!["one", "two"]);
        assert_eq!(summary.malformed_frames, 0);
    }

    #[test]
    fn test_held_payload_continues_on_next_line() {
        let (fragments, summary) = decode_all(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\n",
            b": ping\n",
            b"\n",
            b"lo\"}}]}\n",
            frame(" world").as_bytes(),
        ]);
        assert_eq!(fragments, vec!["Hello", " world"]);
        assert_eq!(summary.malformed_frames, 0);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let (fragments, summary) = decode_all(&[
            b"data: {oops\n",
            frame("Hi").as_bytes(),
            b"data: {still broken\n",
            b"not json either\n",
            frame("!").as_bytes(),
        ]);
        assert_eq!(fragments, vec!["Hi", "!"]);
        assert_eq!(summary.malformed_frames, 2);
    }

    #[test]
    fn test_truncated_trailing_record() {
        let (fragments, summary) = decode_all(&[
            frame("• Check soil").as_bytes(),
            br#"data: {"choices":[{"delta":{"content":"moist"#,
        ]);
        assert_eq!(fragments, vec!["• Check soil"]);
        assert_eq!(summary.malformed_frames, 1);
        assert!(!summary.saw_sentinel);

        let (fragments, summary) = decode_all(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\n",
        ]);
        assert!(fragments.is_empty());
        assert_eq!(summary.malformed_frames, 1);
    }

    #[test]
    fn test_unterminated_sentinel() {
        let (fragments, summary) =
            decode_all(&[frame("a").as_bytes(), b"data: [DONE]"]);
        assert_eq!(fragments, vec!["a"]);
        assert!(summary.saw_sentinel);
        assert_eq!(summary.malformed_frames, 0);
    }

    #[test]
    fn test_fragments_are_lazy() {
        let mut decoder = StreamDecoder::new();
        let input = format!("{}{}", frame("a"), frame("b"));
        let mut fragments = decoder.feed(input.as_bytes());
        assert_eq!(fragments.next().as_deref(), Some("a"));

        // The unpulled fragment is still buffered.
        let rest: Vec<_> = decoder.feed(&[]).collect();
        assert_eq!(rest, vec!["b"]);
    }
}
