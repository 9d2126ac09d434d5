//! Groups streamed text deltas into speakable segments.
//!
//! A segment is released as soon as the buffered text is long enough to
//! sound natural: at a hard length cap, at clause punctuation past a shorter
//! threshold, or at a word boundary past a longer one. Whatever remains when the
//! deltas end is released as the final segment.

use crate::config::SegmenterConfig;
use crate::error::VoiceError;
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use kin_types::TextSegment;

const CLAUSE_PUNCTUATION: [char; 4] = ['.', '!', '?', ','];

/// Accumulates deltas and emits numbered segments.
#[derive(Debug, Clone)]
pub struct SegmentBuffer {
    config: SegmenterConfig,
    buffer: String,
    next_index: usize,
}

impl SegmentBuffer {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            next_index: 0,
        }
    }

    /// Appends a delta and returns a segment if the buffer is ready to flush.
    ///
    /// A buffer that is ready but holds only whitespace is kept, not reset.
    pub fn push(&mut self, delta: &str) -> Option<TextSegment> {
        self.buffer.push_str(delta);
        if self.ready() {
            self.take()
        } else {
            None
        }
    }

    /// Releases the trimmed remainder, if any.
    pub fn finish(&mut self) -> Option<TextSegment> {
        let segment = self.take();
        self.buffer.clear();
        segment
    }

    /// Number of segments emitted so far.
    pub fn emitted(&self) -> usize {
        self.next_index
    }

    fn ready(&self) -> bool {
        let len = self.buffer.chars().count();
        if len >= self.config.max_chars {
            return true;
        }
        match self.buffer.chars().last() {
            Some(c) if CLAUSE_PUNCTUATION.contains(&c) => len >= self.config.punctuation_min_chars,
            Some(' ') => len >= self.config.whitespace_min_chars,
            _ => false,
        }
    }

    fn take(&mut self) -> Option<TextSegment> {
        let text = self.buffer.trim();
        if text.is_empty() {
            return None;
        }
        let segment = TextSegment {
            text: text.to_string(),
            sequence_index: self.next_index,
        };
        self.next_index += 1;
        self.buffer.clear();
        Some(segment)
    }
}

/// Segments a delta stream. Errors from `deltas` are passed through and end
/// the stream.
pub fn segment_stream<S>(
    deltas: S,
    config: SegmenterConfig,
) -> impl Stream<Item = Result<TextSegment, VoiceError>> + Send
where
    S: Stream<Item = Result<String, VoiceError>> + Send + 'static,
{
    try_stream! {
        futures_util::pin_mut!(deltas);
        let mut buffer = SegmentBuffer::new(config);
        while let Some(delta) = deltas.next().await {
            if let Some(segment) = buffer.push(&delta?) {
                yield segment;
            }
        }
        if let Some(segment) = buffer.finish() {
            yield segment;
        }
    }
}
