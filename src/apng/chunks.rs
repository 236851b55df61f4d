
use byteorder::{BigEndian, ByteOrder};

use crate::errors::{CodecError, CodecResult};



pub const IHDR: &[u8; 4] = b"IHDR";
pub const PLTE: &[u8; 4] = b"PLTE";
pub const IDAT: &[u8; 4] = b"IDAT";
pub const IEND: &[u8; 4] = b"IEND";
pub const ACTL: &[u8; 4] = b"acTL";
pub const FCTL: &[u8; 4] = b"fcTL";
pub const FDAT: &[u8; 4] = b"fdAT";
pub const TRNS: &[u8; 4] = b"tRNS";
pub const GAMA: &[u8; 4] = b"gAMA";
pub const SRGB: &[u8; 4] = b"sRGB";
pub const BKGD: &[u8; 4] = b"bKGD";
pub const PHYS: &[u8; 4] = b"pHYs";
pub const CHRM: &[u8; 4] = b"cHRM";
pub const TEXT: &[u8; 4] = b"tEXt";
pub const ITXT: &[u8; 4] = b"iTXt";
pub const HIST: &[u8; 4] = b"hIST";


/// One chunk, borrowed from the source buffer. The trailing CRC has been
/// read past but not verified.
pub struct Chunk<'a> {
    pub kind: [u8; 4],
    pub data: &'a [u8],
}

/// Walks the length-prefixed chunk sequence after the signature.
pub struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}


impl<'a> ChunkReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ChunkReader { buf, pos: 0 }
    }

    pub fn next_chunk(&mut self) -> CodecResult<Option<Chunk<'a>>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        if self.buf.len() - self.pos < 8 {
            return Err(CodecError::Truncated("chunk header"));
        }
        let length = BigEndian::read_u32(&self.buf[self.pos..]) as usize;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&self.buf[self.pos + 4..self.pos + 8]);

        let data_start = self.pos + 8;
        let data_end = data_start.checked_add(length)
            .filter(|&e| e <= self.buf.len() - 4)
            .ok_or(CodecError::Truncated("chunk payload"))?;

        self.pos = data_end + 4; // skip the CRC; it is not verified
        Ok(Some(Chunk { kind, data: &self.buf[data_start..data_end] }))
    }
}


pub fn read_u32(data: &[u8], offset: usize) -> CodecResult<u32> {
    if data.len() < offset + 4 {
        return Err(CodecError::Truncated("chunk field"));
    }
    Ok(BigEndian::read_u32(&data[offset..]))
}

pub fn read_u16(data: &[u8], offset: usize) -> CodecResult<u16> {
    if data.len() < offset + 2 {
        return Err(CodecError::Truncated("chunk field"));
    }
    Ok(BigEndian::read_u16(&data[offset..]))
}

pub fn read_u8(data: &[u8], offset: usize) -> CodecResult<u8> {
    data.get(offset).copied().ok_or(CodecError::Truncated("chunk field"))
}
