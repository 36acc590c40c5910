//! Byte sources
//!
//! Adapts `AsyncRead` implementors (files, stdin, pipes) into the byte stream
//! consumed by the sink.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default read buffer: 64KB
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Stream the contents of `reader` in buffers of up to `read_size` bytes
pub fn reader_stream<R>(reader: R, read_size: usize) -> impl Stream<Item = io::Result<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let read_size = read_size.max(1);

    stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = BytesMut::with_capacity(read_size);
        let read = reader.read_buf(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok::<_, io::Error>(Some((buf.freeze(), reader)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_file_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();

        let reader = tokio::fs::File::open(file.path()).await.unwrap();
        let buffers: Vec<Bytes> = reader_stream(reader, 1024).try_collect().await.unwrap();

        assert!(buffers.iter().all(|b| b.len() <= 1024));
        let joined: Vec<u8> = buffers.iter().flat_map(|b| b.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_empty_reader() {
        let buffers: Vec<Bytes> = reader_stream(&b""[..], 16).try_collect().await.unwrap();
        assert!(buffers.is_empty());
    }
}
