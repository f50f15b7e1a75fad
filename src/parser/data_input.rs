//! Positioned reader over the bytes of one chunk.
//!
//! Bytes, floats and doubles are always fixed width big-endian. When the chunk sets the
//! compressed-integers feature, shorts, chars, ints and longs are encoded as little-endian groups of
//! seven bits, where the high bit of each byte announces a following byte. A ninth byte contributes
//! all its eight bits.

use std::sync::Arc;

use nom::number::complete::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, be_u8};
use nom::IResult;

use crate::errors::OverheadSlurpError;

pub const STRING_ENCODING_NULL: i8 = 0;
pub const STRING_ENCODING_EMPTY: i8 = 1;
pub const STRING_ENCODING_CONSTANT_POOL: i8 = 2;
pub const STRING_ENCODING_UTF8: i8 = 3;
pub const STRING_ENCODING_CHAR_ARRAY: i8 = 4;
pub const STRING_ENCODING_LATIN1: i8 = 5;

const MAX_VARINT_GROUPS: u32 = 8;

type Result<T> = std::result::Result<T, OverheadSlurpError>;

#[derive(Debug, Clone)]
pub struct ChunkInput<'a> {
    data: &'a [u8],
    pos: usize,
    compressed_ints: bool,
}

impl<'a> ChunkInput<'a> {
    pub fn new(data: &'a [u8], compressed_ints: bool) -> Self {
        Self {
            data,
            pos: 0,
            compressed_ints,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "seek to {} is past the end of the chunk ({} bytes)",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip_bytes(&mut self, count: usize) -> Result<()> {
        let target = self.pos.checked_add(count).ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!("cannot skip {} bytes", count))
        })?;
        self.seek(target)
    }

    fn fixed<T>(&mut self, parser: fn(&'a [u8]) -> IResult<&'a [u8], T>) -> Result<T> {
        let data: &'a [u8] = self.data;
        match parser(&data[self.pos..]) {
            Ok((rest, value)) => {
                self.pos = data.len() - rest.len();
                Ok(value)
            }
            Err(_) => Err(OverheadSlurpError::invalid_recording(format!(
                "unexpected end of chunk at offset {}",
                self.pos
            ))),
        }
    }

    pub fn read_unsigned_byte(&mut self) -> Result<u8> {
        self.fixed(be_u8)
    }

    pub fn read_byte(&mut self) -> Result<i8> {
        Ok(self.read_unsigned_byte()? as i8)
    }

    pub fn read_boolean(&mut self) -> Result<bool> {
        Ok(self.read_unsigned_byte()? != 0)
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.fixed(be_f32)
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.fixed(be_f64)
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        for group in 0..MAX_VARINT_GROUPS {
            let b = self.read_unsigned_byte()?;
            result |= ((b & 0x7F) as u64) << (7 * group);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        let last = self.read_unsigned_byte()?;
        Ok(result | ((last as u64) << (7 * MAX_VARINT_GROUPS)))
    }

    pub fn read_short(&mut self) -> Result<i16> {
        if self.compressed_ints {
            Ok(self.read_varint()? as i16)
        } else {
            self.fixed(be_i16)
        }
    }

    pub fn read_unsigned_short(&mut self) -> Result<u16> {
        Ok(self.read_short()? as u16)
    }

    pub fn read_char(&mut self) -> Result<u16> {
        if self.compressed_ints {
            Ok(self.read_varint()? as u16)
        } else {
            self.fixed(be_u16)
        }
    }

    pub fn read_int(&mut self) -> Result<i32> {
        if self.compressed_ints {
            Ok(self.read_varint()? as i32)
        } else {
            self.fixed(be_i32)
        }
    }

    pub fn read_unsigned_int(&mut self) -> Result<u32> {
        Ok(self.read_int()? as u32)
    }

    pub fn read_long(&mut self) -> Result<i64> {
        if self.compressed_ints {
            Ok(self.read_varint()? as i64)
        } else {
            self.fixed(be_i64)
        }
    }

    /// Reads an int that is used as a length or count.
    pub fn read_length(&mut self) -> Result<usize> {
        let length = self.read_int()?;
        usize::try_from(length).map_err(|_| {
            OverheadSlurpError::invalid_recording(format!(
                "negative length {} at offset {}",
                length, self.pos
            ))
        })
    }

    /// Reads a string whose encoding byte was already consumed. `None` is the null string.
    ///
    /// Constant pool references are resolved by the caller, they are invalid here.
    pub fn read_raw_string(&mut self, encoding: i8) -> Result<Option<Arc<str>>> {
        match encoding {
            STRING_ENCODING_NULL => Ok(None),
            STRING_ENCODING_EMPTY => Ok(Some(Arc::from(""))),
            STRING_ENCODING_UTF8 => {
                let bytes = self.take_bytes()?;
                Ok(Some(Arc::from(String::from_utf8_lossy(bytes).as_ref())))
            }
            STRING_ENCODING_CHAR_ARRAY => {
                let length = self.read_length()?;
                let mut units = Vec::with_capacity(length.min(self.remaining()));
                for _ in 0..length {
                    units.push(self.read_char()?);
                }
                Ok(Some(Arc::from(String::from_utf16_lossy(&units).as_str())))
            }
            STRING_ENCODING_LATIN1 => {
                let bytes = self.take_bytes()?;
                let decoded: String = bytes.iter().map(|b| *b as char).collect();
                Ok(Some(Arc::from(decoded.as_str())))
            }
            STRING_ENCODING_CONSTANT_POOL => Err(OverheadSlurpError::invalid_recording(
                "unexpected constant pool string reference",
            )),
            other => Err(OverheadSlurpError::invalid_recording(format!(
                "unknown string encoding {} at offset {}",
                other, self.pos
            ))),
        }
    }

    pub fn skip_string(&mut self) -> Result<()> {
        match self.read_byte()? {
            STRING_ENCODING_NULL | STRING_ENCODING_EMPTY => Ok(()),
            STRING_ENCODING_CONSTANT_POOL => self.read_long().map(|_| ()),
            STRING_ENCODING_UTF8 | STRING_ENCODING_LATIN1 => {
                let length = self.read_length()?;
                self.skip_bytes(length)
            }
            STRING_ENCODING_CHAR_ARRAY => {
                let length = self.read_length()?;
                for _ in 0..length {
                    self.read_char()?;
                }
                Ok(())
            }
            other => Err(OverheadSlurpError::invalid_recording(format!(
                "unknown string encoding {} at offset {}",
                other, self.pos
            ))),
        }
    }

    fn take_bytes(&mut self) -> Result<&'a [u8]> {
        let length = self.read_length()?;
        let start = self.pos;
        self.skip_bytes(length)?;
        let data: &'a [u8] = self.data;
        Ok(&data[start..start + length])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_writer::ChunkWriter;

    #[test]
    fn varint_round_trip() {
        let values: [i64; 9] = [
            0,
            1,
            127,
            128,
            300,
            -1,
            i64::MAX,
            i64::MIN,
            0x00FF_FFFF_FFFF_FFFF,
        ];
        let mut writer = ChunkWriter::new(true);
        for v in values {
            writer.write_long(v);
        }
        let bytes = writer.into_bytes();
        let mut input = ChunkInput::new(&bytes, true);
        for v in values {
            assert_eq!(input.read_long().unwrap(), v);
        }
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn varint_widths() {
        let mut writer = ChunkWriter::new(true);
        writer.write_long(127);
        assert_eq!(writer.len(), 1);
        writer.write_long(-1);
        // eight groups of seven bits plus a full ninth byte
        assert_eq!(writer.len(), 10);
    }

    #[test]
    fn fixed_width_ints_are_big_endian() {
        let bytes = [0x00, 0x00, 0x01, 0x02, 0xFF, 0xFE];
        let mut input = ChunkInput::new(&bytes, false);
        assert_eq!(input.read_int().unwrap(), 0x0102);
        assert_eq!(input.read_short().unwrap(), -2);
        assert!(input.read_byte().is_err());
    }

    #[test]
    fn compressed_ints_leave_floats_alone() {
        let mut writer = ChunkWriter::new(true);
        writer.write_int(1_000_000);
        writer.write_double(2.5);
        writer.write_byte(-3);
        writer.write_char(0x263A);
        let bytes = writer.into_bytes();
        let mut input = ChunkInput::new(&bytes, true);
        assert_eq!(input.read_int().unwrap(), 1_000_000);
        assert_eq!(input.read_double().unwrap(), 2.5);
        assert_eq!(input.read_byte().unwrap(), -3);
        assert_eq!(input.read_char().unwrap(), 0x263A);
    }

    #[test]
    fn string_encodings() {
        let mut writer = ChunkWriter::new(true);
        writer.write_byte(STRING_ENCODING_NULL);
        writer.write_byte(STRING_ENCODING_EMPTY);
        writer.write_string(Some("héllo"));
        writer.write_byte(STRING_ENCODING_CHAR_ARRAY);
        writer.write_int(2);
        writer.write_char('o' as u16);
        writer.write_char('k' as u16);
        writer.write_byte(STRING_ENCODING_LATIN1);
        writer.write_int(2);
        writer.write_raw(&[0x63, 0xE9]);
        let bytes = writer.into_bytes();

        let mut input = ChunkInput::new(&bytes, true);
        let mut next = |input: &mut ChunkInput| {
            let encoding = input.read_byte().unwrap();
            input.read_raw_string(encoding).unwrap()
        };
        assert_eq!(next(&mut input), None);
        assert_eq!(next(&mut input).as_deref(), Some(""));
        assert_eq!(next(&mut input).as_deref(), Some("héllo"));
        assert_eq!(next(&mut input).as_deref(), Some("ok"));
        assert_eq!(next(&mut input).as_deref(), Some("cé"));

        let mut skipping = ChunkInput::new(&bytes, true);
        for _ in 0..5 {
            skipping.skip_string().unwrap();
        }
        assert_eq!(skipping.remaining(), 0);
    }

    #[test]
    fn seek_out_of_range_is_invalid() {
        let bytes = [0u8; 4];
        let mut input = ChunkInput::new(&bytes, false);
        assert!(input.seek(4).is_ok());
        assert!(matches!(
            input.seek(5),
            Err(OverheadSlurpError::InvalidRecording { .. })
        ));
        input.seek(0).unwrap();
        assert!(input.skip_bytes(usize::MAX).is_err());
    }
}
