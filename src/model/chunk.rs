//! Splitting oversized payloads into an ordered sequence of chunks.
//!
//! Each chunk becomes the `data` of a sibling job. Joining the chunks with
//! the delimiter reproduces the payload. Siblings have independent
//! lifecycles; nothing here makes multi-chunk updates atomic.

use crate::error::{Error, Result};

/// Ordered chunks of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSequence {
    delimiter: String,
    chunks: Vec<String>,
}

impl ChunkSequence {
    /// Cut `payload` into chunks of at most `max_len` bytes.
    ///
    /// With a delimiter, chunks are runs of whole delimiter-separated
    /// segments; a single segment longer than `max_len` is rejected. Without
    /// one, the payload is cut at character boundaries.
    pub fn split(payload: &str, delimiter: Option<&str>, max_len: usize) -> Result<Self> {
        if max_len == 0 {
            return Err(Error::Validation(
                "max field length must be greater than zero".into(),
            ));
        }
        match delimiter.filter(|d| !d.is_empty()) {
            Some(delimiter) => split_on_delimiter(payload, delimiter, max_len),
            None => split_on_chars(payload, max_len),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<String> {
        self.chunks
    }

    /// Reassemble the original payload.
    pub fn rejoin(&self) -> String {
        self.chunks.join(&self.delimiter)
    }
}

fn split_on_delimiter(payload: &str, delimiter: &str, max_len: usize) -> Result<ChunkSequence> {
    let mut chunks = Vec::new();
    let mut current: Option<String> = None;

    for segment in payload.split(delimiter) {
        if segment.len() > max_len {
            return Err(Error::Validation(format!(
                "payload segment of {} bytes exceeds the max field length of {max_len}",
                segment.len()
            )));
        }
        match current.as_mut() {
            Some(chunk) if chunk.len() + delimiter.len() + segment.len() <= max_len => {
                chunk.push_str(delimiter);
                chunk.push_str(segment);
            }
            _ => {
                if let Some(done) = current.replace(segment.to_string()) {
                    chunks.push(done);
                }
            }
        }
    }
    chunks.extend(current);

    Ok(ChunkSequence {
        delimiter: delimiter.to_string(),
        chunks,
    })
}

fn split_on_chars(payload: &str, max_len: usize) -> Result<ChunkSequence> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;

    for (at, ch) in payload.char_indices() {
        let width = ch.len_utf8();
        if width > max_len {
            return Err(Error::Validation(format!(
                "max field length of {max_len} bytes cannot hold a {width}-byte character"
            )));
        }
        if at + width - start > max_len {
            chunks.push(payload[start..end].to_string());
            start = at;
        }
        end = at + width;
    }
    if start < payload.len() || chunks.is_empty() {
        chunks.push(payload[start..].to_string());
    }

    Ok(ChunkSequence {
        delimiter: String::new(),
        chunks,
    })
}
