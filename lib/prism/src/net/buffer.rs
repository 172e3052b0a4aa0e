use std::io;

const READ_CHUNK: usize = 65536;

/// A buffered FIFO byte queue feeding the frame decoder. Data is appended at the tail
/// from the socket and consumed from the head in whole frames. The backing storage is
/// compacted once the dead prefix outgrows the live data.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
    limit: usize,
}

impl Buffer {
    #[inline]
    pub fn new(limit: usize) -> Buffer {
        Buffer {
            data: Vec::new(),
            head: 0,
            limit,
        }
    }

    /// The number of unconsumed bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice containing the unconsumed data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Appends raw bytes at the tail. Fails with `WriteZero` when the buffer limit
    /// would be exceeded.
    pub fn extend(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.len() + bytes.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "buffer limit exceeded"));
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Consumes `count` bytes from the head.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.head += count;

        // Reclaim the dead prefix once it dominates the storage.
        if self.head > self.data.len() / 2 && self.head >= READ_CHUNK {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Reads one chunk from the supplied reader into the tail. Returns the number of
    /// bytes transferred; zero means the peer closed the stream.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];

        let available = self.limit - self.len();
        if available == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "Buffer overrun"));
        }

        let window = available.min(READ_CHUNK);
        let count = reader.read(&mut chunk[..window])?;

        self.data.extend_from_slice(&chunk[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ingress_then_consume() {
        let mut buffer = Buffer::new(1024);
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4, 5]);

        let count = buffer.ingress(&mut cursor).unwrap();

        assert_eq!(count, 5);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5]);

        buffer.consume(2);
        assert_eq!(buffer.as_slice(), &[3, 4, 5]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_ingress_eof_returns_zero() {
        let mut buffer = Buffer::new(1024);
        let mut cursor = Cursor::new(Vec::<u8>::new());

        assert_eq!(buffer.ingress(&mut cursor).unwrap(), 0);
    }

    #[test]
    fn test_extend_respects_limit() {
        let mut buffer = Buffer::new(4);

        buffer.extend(&[1, 2, 3]).unwrap();
        let result = buffer.extend(&[4, 5]);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_ingress_respects_limit() {
        let mut buffer = Buffer::new(8);
        let data = vec![7u8; 16];

        let count = buffer.ingress(&data[..]).unwrap();
        assert_eq!(count, 8);

        let result = buffer.ingress(&data[..]);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_compaction_preserves_data() {
        let mut buffer = Buffer::new(READ_CHUNK * 4);
        let payload: Vec<u8> = (0..(READ_CHUNK * 2)).map(|v| v as u8).collect();

        buffer.extend(&payload).unwrap();
        buffer.consume(READ_CHUNK + READ_CHUNK / 2);

        assert_eq!(buffer.as_slice(), &payload[READ_CHUNK + READ_CHUNK / 2..]);

        buffer.extend(&[0xAA, 0xBB]).unwrap();
        let tail = buffer.as_slice();
        assert_eq!(&tail[tail.len() - 2..], &[0xAA, 0xBB]);
    }
}
