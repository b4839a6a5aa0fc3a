use crate::error::{CyclerError, Result};
use byteorder::ByteOrder;

/// Bounded cursor over the bytes of a binary file
///
/// Multi-byte reads are generic over [`ByteOrder`] so each field states
/// its own endianness at the call site.
pub struct ByteStream<'a> {
    data: &'a [u8],
    pub pos: usize,
    end: usize,
    pub eof: bool,
}

impl<'a> ByteStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
            eof: data.is_empty(),
        }
    }

    /// Cursor limited to `data[start..end]`, positioned at `start`
    pub fn bounded(data: &'a [u8], start: usize, end: usize) -> Result<Self> {
        if start > end || end > data.len() {
            return Err(CyclerError::FileFormat(format!(
                "byte range {start}..{end} outside file of {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            data,
            pos: start,
            end,
            eof: start >= end,
        })
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
        self.eof = pos >= self.end;
    }

    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.pos < self.end {
            let byte = self.data[self.pos];
            self.pos += 1;
            self.eof = self.pos >= self.end;
            Ok(byte)
        } else {
            self.eof = true;
            Err(CyclerError::UnexpectedEof)
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            self.eof = true;
            return Err(CyclerError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        self.eof = self.pos >= self.end;
        Ok(bytes)
    }

    /// Next `n` bytes without advancing
    pub fn peek_bytes(&self, n: usize) -> Option<&'a [u8]> {
        (n <= self.remaining()).then(|| &self.data[self.pos..self.pos + n])
    }

    pub fn read_u16<B: ByteOrder>(&mut self) -> Result<u16> {
        Ok(B::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32<B: ByteOrder>(&mut self) -> Result<u32> {
        Ok(B::read_u32(self.read_bytes(4)?))
    }

    pub fn read_f32<B: ByteOrder>(&mut self) -> Result<f32> {
        Ok(B::read_f32(self.read_bytes(4)?))
    }

    pub fn read_f64<B: ByteOrder>(&mut self) -> Result<f64> {
        Ok(B::read_f64(self.read_bytes(8)?))
    }

    /// Fixed-width text field, decoded as Latin-1
    pub fn read_ascii(&mut self, n: usize) -> Result<String> {
        Ok(self.read_bytes(n)?.iter().map(|&b| b as char).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    #[test]
    fn test_reads_track_position() {
        let data = [0x01, 0x00, 0x00, 0x00, 0xAB, 0xCD];
        let mut stream = ByteStream::new(&data);
        assert_eq!(stream.read_u32::<LittleEndian>().unwrap(), 1);
        assert_eq!(stream.pos, 4);
        assert_eq!(stream.read_u16::<BigEndian>().unwrap(), 0xABCD);
        assert!(stream.eof);
        assert!(matches!(stream.read_byte(), Err(CyclerError::UnexpectedEof)));
    }

    #[test]
    fn test_bounded_stops_at_end() {
        let data = [1u8, 2, 3, 4, 5];
        let mut stream = ByteStream::bounded(&data, 1, 3).unwrap();
        assert_eq!(stream.read_bytes(2).unwrap(), &[2, 3]);
        assert!(stream.read_byte().is_err());
        assert!(ByteStream::bounded(&data, 2, 9).is_err());
    }

    #[test]
    fn test_float_fields() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.extend_from_slice(&(-2.25f64).to_le_bytes());
        let mut stream = ByteStream::new(&data);
        assert_eq!(stream.read_f32::<LittleEndian>().unwrap(), 1.5);
        assert_eq!(stream.read_f64::<LittleEndian>().unwrap(), -2.25);
    }

    #[test]
    fn test_read_ascii_keeps_padding() {
        let mut stream = ByteStream::new(b"VMP data  xyz");
        assert_eq!(stream.read_ascii(10).unwrap(), "VMP data  ");
        assert_eq!(stream.peek_bytes(3), Some(&b"xyz"[..]));
        assert_eq!(stream.peek_bytes(4), None);
    }
}
