use ahash::AHashSet;

use crate::errors::OverheadSlurpError;
use crate::parser::chunk_header::ChunkHeader;
use crate::parser::data_input::ChunkInput;
use crate::parser::metadata::{ChunkMetadata, METADATA_EVENT_TYPE};
use crate::parser::type_manager::TypeManager;
use crate::parser::{EventSinkFactory, ParserOptions};

pub const CONSTANT_POOL_EVENT_TYPE: i64 = 1;

type Result<T> = std::result::Result<T, OverheadSlurpError>;

#[derive(Debug, Clone, Copy)]
pub struct ChunkSummary {
    pub header: ChunkHeader,
    pub num_events: u64,
    pub num_event_types: usize,
    pub num_constants: usize,
}

/// Splits a recording into its chunks, using the size announced by each chunk header.
pub fn split_chunks(data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut chunks = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let header = ChunkHeader::read(rest)?;
        let (chunk, tail) = rest.split_at(header.size());
        chunks.push(chunk);
        rest = tail;
    }
    if chunks.is_empty() {
        return Err(OverheadSlurpError::invalid_recording("empty recording"));
    }
    Ok(chunks)
}

/// Decodes one chunk: metadata, then every constant pool, then the events in stream order.
///
/// Any inconsistency aborts the whole chunk. Sinks may already have received events by then.
pub fn read_chunk(
    data: &[u8],
    options: &ParserOptions,
    sink_factory: &dyn EventSinkFactory,
) -> Result<ChunkSummary> {
    let header = ChunkHeader::read(data)?;
    let mut input = ChunkInput::new(&data[..header.size()], header.compressed_ints());

    input.seek(header.metadata_offset as usize)?;
    let metadata = ChunkMetadata::read(&mut input)?;
    let mut types = TypeManager::new(metadata.classes, header, options, sink_factory)?;

    read_constant_pools(&header, &mut input, &mut types)?;
    types.resolve_constants();

    let num_events = read_events(&header, &mut input, &mut types)?;
    Ok(ChunkSummary {
        header,
        num_events,
        num_event_types: types.num_event_types(),
        num_constants: types.table().num_constants(),
    })
}

/// Follows the pool chain from the header offset until a pool with a zero delta.
fn read_constant_pools(
    header: &ChunkHeader,
    input: &mut ChunkInput,
    types: &mut TypeManager,
) -> Result<()> {
    if header.constant_pool_offset == 0 {
        return Ok(());
    }
    let mut offset = header.constant_pool_offset;
    let mut visited = AHashSet::new();
    loop {
        if !visited.insert(offset) {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "constant pool chain loops back to offset {}",
                offset
            )));
        }
        let position = usize::try_from(offset).map_err(|_| {
            OverheadSlurpError::invalid_recording(format!("invalid constant pool offset {}", offset))
        })?;
        input.seek(position)?;
        let _size = input.read_int()?;
        let event_type = input.read_long()?;
        if event_type != CONSTANT_POOL_EVENT_TYPE {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "expected a constant pool at offset {}, found type {}",
                offset, event_type
            )));
        }
        let _start_ticks = input.read_long()?;
        let _duration = input.read_long()?;
        let delta = input.read_long()?;
        let _flush = input.read_boolean()?;
        let pool_count = input.read_length()?;
        for _ in 0..pool_count {
            let class_id = input.read_long()?;
            let constant_count = input.read_length()?;
            types.read_constants(class_id, constant_count, input)?;
        }
        if delta == 0 {
            return Ok(());
        }
        offset = offset.checked_add(delta).ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!("invalid constant pool delta {}", delta))
        })?;
    }
}

/// Reads the records following the header until the metadata record. Returns the number of events.
fn read_events(
    header: &ChunkHeader,
    input: &mut ChunkInput,
    types: &mut TypeManager,
) -> Result<u64> {
    let end = input.len();
    let mut position = header.body_offset();
    let mut num_events = 0;
    while position < end {
        input.seek(position)?;
        let size = input.read_int()?;
        if size <= 0 || position + size as usize > end {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "invalid record size {} at offset {}",
                size, position
            )));
        }
        match input.read_long()? {
            METADATA_EVENT_TYPE => break,
            CONSTANT_POOL_EVENT_TYPE => {}
            event_type => {
                types.read_event(event_type, input)?;
                num_events += 1;
            }
        }
        position += size as usize;
    }
    Ok(num_events)
}
