//! Pull-based byte stream over a sequence of chunks.
//!
//! The decoder reads exactly the bytes it needs; chunk boundaries are invisible to it.

use std::io::{self, Read};
use std::iter::Fuse;

pub struct ByteStream<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    chunks: Fuse<I>,
    current: Option<I::Item>,
    pos: usize,
    consumed: usize,
}

impl<I> ByteStream<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    pub fn new(chunks: impl IntoIterator<IntoIter = I>) -> Self {
        ByteStream {
            chunks: chunks.into_iter().fuse(),
            current: None,
            pos: 0,
            consumed: 0,
        }
    }

    /// Bytes handed out so far.
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Current chunk with unread bytes left, pulling the next non-empty chunk when needed.
    fn fill(&mut self) -> Option<&[u8]> {
        loop {
            let has_data = matches!(&self.current, Some(c) if self.pos < c.as_ref().len());
            if has_data {
                break;
            }
            self.current = Some(self.chunks.next()?);
            self.pos = 0;
        }
        self.current.as_ref().map(|c| &c.as_ref()[self.pos..])
    }

    pub fn is_exhausted(&mut self) -> bool {
        self.fill().is_none()
    }

    /// Everything left in the stream.
    pub fn drain(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        while let Some(chunk) = self.fill() {
            let n = chunk.len();
            rest.extend_from_slice(chunk);
            self.pos += n;
            self.consumed += n;
        }
        rest
    }
}

impl<I> Read for ByteStream<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(chunk) = self.fill() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.pos += n;
        self.consumed += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt};

    #[test]
    fn reads_across_chunk_boundaries() {
        let chunks: Vec<Vec<u8>> = vec![vec![0x01], vec![], vec![0x02, 0x03, 0x04], vec![0xAA]];
        let mut s = ByteStream::new(chunks);
        assert_eq!(s.read_u32::<LittleEndian>().unwrap(), 0x0403_0201);
        assert_eq!(s.position(), 4);
        assert!(!s.is_exhausted());
        assert_eq!(s.drain(), vec![0xAA]);
        assert!(s.is_exhausted());
        assert_eq!(s.position(), 5);
    }

    #[test]
    fn short_read_is_unexpected_eof() {
        let mut s = ByteStream::new(std::iter::once(&[1u8, 2][..]));
        let err = s.read_u32::<LittleEndian>().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
