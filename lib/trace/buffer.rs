use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, BufRead, BufReader, Read, Write};

/// Writes big-endian integers, handing them to the underlying writer in
/// blocks of a fixed size.
pub struct BlockWriter<W: Write> {
    inner: W,
    block: Vec<u8>,
    block_size: usize,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W, block_size: usize) -> BlockWriter<W> {
        BlockWriter {
            inner,
            block: Vec::with_capacity(block_size),
            block_size,
        }
    }

    pub fn put_i32(&mut self, value: i32) -> io::Result<()> {
        self.block.write_i32::<BigEndian>(value)?;
        if self.block.len() >= self.block_size {
            self.write_blocks()?;
        }
        Ok(())
    }

    fn write_blocks(&mut self) -> io::Result<()> {
        let full = self.block.len() - self.block.len() % self.block_size;
        self.inner.write_all(&self.block[..full])?;
        self.block.drain(..full);
        Ok(())
    }

    /// Writes out the partial block and flushes the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.block)?;
        self.block.clear();
        self.inner.flush()
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }
}

/// Reads big-endian integers through a buffer of the trace's block size.
pub struct BlockReader<R: Read> {
    inner: BufReader<R>,
    offset: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R, block_size: usize) -> BlockReader<R> {
        BlockReader {
            inner: BufReader::with_capacity(block_size, inner),
            offset: 0,
        }
    }

    /// Byte offset of the next read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// True when no bytes are left.
    pub fn at_end(&mut self) -> io::Result<bool> {
        Ok(self.inner.fill_buf()?.is_empty())
    }

    pub fn get_i32(&mut self) -> io::Result<i32> {
        let value = self.inner.read_i32::<BigEndian>()?;
        self.offset += 4;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_whole_blocks() {
        let mut writer = BlockWriter::new(Vec::new(), 8);
        writer.put_i32(1).unwrap();
        assert!(writer.inner.is_empty());
        writer.put_i32(-2).unwrap();
        assert_eq!(writer.inner.len(), 8);
        writer.put_i32(3).unwrap();
        assert_eq!(writer.inner.len(), 8);

        let bytes = writer.into_inner().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0xff, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn reads_back() {
        let bytes = vec![0, 0, 0, 7, 0, 0, 1, 0, 0];
        let mut reader = BlockReader::new(&bytes[..], 8);
        assert_eq!(reader.get_i32().unwrap(), 7);
        assert_eq!(reader.get_i32().unwrap(), 256);
        assert_eq!(reader.offset(), 8);
        assert!(!reader.at_end().unwrap());
        assert_eq!(
            reader.get_i32().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
