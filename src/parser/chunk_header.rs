use nom::bytes::complete::tag;
use nom::number::complete::{be_i32, be_i64, be_u16};
use nom::sequence::tuple;
use nom::IResult;

use crate::errors::OverheadSlurpError;

pub const CHUNK_MAGIC: [u8; 4] = *b"FLR\0";
/// Magic, two version shorts, seven longs and the features int.
pub const HEADER_SIZE: usize = 68;

const GZIP_MAGIC: [u8; 2] = [31, 139];
const FEATURE_COMPRESSED_INTS: i32 = 1;
const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Fixed layout header at the start of every chunk. Offsets are relative to the chunk start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub chunk_size: i64,
    pub constant_pool_offset: i64,
    pub metadata_offset: i64,
    pub start_time_nanos: i64,
    pub duration_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: i64,
    pub features: i32,
}

fn parse_header(input: &[u8]) -> IResult<&[u8], ChunkHeader> {
    let (input, _) = tag(&CHUNK_MAGIC[..])(input)?;
    let (input, (major_version, minor_version)) = tuple((be_u16, be_u16))(input)?;
    let (
        input,
        (
            chunk_size,
            constant_pool_offset,
            metadata_offset,
            start_time_nanos,
            duration_nanos,
            start_ticks,
            ticks_per_second,
        ),
    ) = tuple((be_i64, be_i64, be_i64, be_i64, be_i64, be_i64, be_i64))(input)?;
    let (input, features) = be_i32(input)?;
    Ok((
        input,
        ChunkHeader {
            major_version,
            minor_version,
            chunk_size,
            constant_pool_offset,
            metadata_offset,
            start_time_nanos,
            duration_nanos,
            start_ticks,
            ticks_per_second,
            features,
        },
    ))
}

impl ChunkHeader {
    /// Reads and validates the header at the start of `data`, which may hold further chunks.
    pub fn read(data: &[u8]) -> Result<ChunkHeader, OverheadSlurpError> {
        if data.starts_with(&GZIP_MAGIC) {
            return Err(OverheadSlurpError::invalid_recording(
                "compressed recordings are not supported, decompress the file first",
            ));
        }
        if !data.starts_with(&CHUNK_MAGIC) {
            return Err(OverheadSlurpError::invalid_recording("missing chunk magic"));
        }
        let (_, header) = parse_header(data).map_err(|_| {
            OverheadSlurpError::invalid_recording(format!(
                "truncated chunk header ({} bytes)",
                data.len()
            ))
        })?;
        header.validate(data.len())?;
        Ok(header)
    }

    fn validate(&self, available: usize) -> Result<(), OverheadSlurpError> {
        if !(1..=2).contains(&self.major_version) {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "unsupported format version {}.{}",
                self.major_version, self.minor_version
            )));
        }
        if self.chunk_size < HEADER_SIZE as i64 || self.chunk_size as u64 > available as u64 {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "chunk size {} does not fit the {} available bytes",
                self.chunk_size, available
            )));
        }
        let in_body = |offset: i64| offset >= HEADER_SIZE as i64 && offset < self.chunk_size;
        if !in_body(self.metadata_offset) {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "metadata offset {} is outside the chunk",
                self.metadata_offset
            )));
        }
        if self.constant_pool_offset != 0 && !in_body(self.constant_pool_offset) {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "constant pool offset {} is outside the chunk",
                self.constant_pool_offset
            )));
        }
        if self.ticks_per_second <= 0 {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "invalid tick frequency {}",
                self.ticks_per_second
            )));
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.chunk_size as usize
    }

    /// The first event record follows the header.
    pub fn body_offset(&self) -> usize {
        HEADER_SIZE
    }

    pub fn compressed_ints(&self) -> bool {
        self.features & FEATURE_COMPRESSED_INTS != 0
    }

    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        (ticks as i128 * NANOS_PER_SECOND / self.ticks_per_second as i128) as i64
    }

    /// Converts a tick counter value into nanoseconds since the epoch.
    pub fn ticks_timestamp(&self, ticks: i64) -> i64 {
        self.start_time_nanos + self.ticks_to_nanos(ticks - self.start_ticks)
    }
}
