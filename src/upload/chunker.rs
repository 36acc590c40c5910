//! Chunker
//!
//! Regroups an arbitrarily fragmented byte stream into part-sized chunks.
//! Every chunk but the last is exactly `min_chunk_size` bytes; the last one
//! holds whatever remained when the source ended. At most one chunk worth of
//! bytes is buffered at a time.

use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};

use super::types::Chunk;
use crate::error::{Result, UploadError};

struct ChunkerState<S> {
    source: Pin<Box<S>>,
    buffer: BytesMut,
    chunk_size: usize,
    next_index: usize,
    exhausted: bool,
}

impl<S> ChunkerState<S> {
    fn take(&mut self, len: usize) -> Chunk {
        let bytes = self.buffer.split_to(len).freeze();
        let chunk = Chunk {
            index: self.next_index,
            bytes,
        };
        self.next_index += 1;
        chunk
    }
}

/// Lazily split `source` into indexed chunks of `min_chunk_size` bytes
///
/// A source error is yielded once and ends the sequence.
pub fn chunked<S>(source: S, min_chunk_size: usize) -> impl Stream<Item = Result<Chunk>>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let chunk_size = min_chunk_size.max(1);
    let state = ChunkerState {
        source: Box::pin(source),
        buffer: BytesMut::with_capacity(chunk_size),
        chunk_size,
        next_index: 0,
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.buffer.len() >= state.chunk_size {
                let chunk = state.take(state.chunk_size);
                return Some((Ok(chunk), state));
            }

            if state.exhausted {
                if state.buffer.is_empty() {
                    return None;
                }
                let remaining = state.buffer.len();
                let chunk = state.take(remaining);
                return Some((Ok(chunk), state));
            }

            match state.source.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.exhausted = true;
                    state.buffer.clear();
                    return Some((Err(UploadError::Source(e)), state));
                }
                None => state.exhausted = true,
            }
        }
    })
}
