//! Decode plans built from the metadata and the interpreter running them over a chunk.

use std::sync::Arc;

use ahash::AHashMap;

use crate::errors::OverheadSlurpError;
use crate::parser::chunk_header::ChunkHeader;
use crate::parser::data_input::{ChunkInput, STRING_ENCODING_CONSTANT_POOL};
use crate::parser::struct_types::{KnownRecord, KnownStructKind, StructContentType};
use crate::parser::value::{ContentType, Number, StructValue, Unit, Value};

type Result<T> = std::result::Result<T, OverheadSlurpError>;

pub const STRING_TYPE: &str = "java.lang.String";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl Primitive {
    pub fn from_identifier(identifier: &str) -> Option<Primitive> {
        match identifier {
            "boolean" => Some(Primitive::Boolean),
            "byte" => Some(Primitive::Byte),
            "short" => Some(Primitive::Short),
            "char" => Some(Primitive::Char),
            "int" => Some(Primitive::Int),
            "long" => Some(Primitive::Long),
            "float" => Some(Primitive::Float),
            "double" => Some(Primitive::Double),
            _ => None,
        }
    }

    /// Numeric primitives can carry a unit and never live in a constant pool.
    pub fn numeric(identifier: &str) -> Option<Primitive> {
        Self::from_identifier(identifier).filter(|p| *p != Primitive::Boolean)
    }

    fn read(&self, input: &mut ChunkInput) -> Result<Value> {
        Ok(match self {
            Primitive::Boolean => Value::Boolean(input.read_boolean()?),
            Primitive::Byte => Value::Byte(input.read_byte()?),
            Primitive::Short => Value::Short(input.read_short()?),
            Primitive::Char => Value::Char(input.read_char()?),
            Primitive::Int => Value::Int(input.read_int()?),
            Primitive::Long => Value::Long(input.read_long()?),
            Primitive::Float => Value::Float(input.read_float()?),
            Primitive::Double => Value::Double(input.read_double()?),
        })
    }

    fn skip(&self, input: &mut ChunkInput) -> Result<()> {
        match self {
            Primitive::Boolean | Primitive::Byte => input.read_unsigned_byte().map(drop),
            Primitive::Short => input.read_short().map(drop),
            Primitive::Char => input.read_char().map(drop),
            Primitive::Int => input.read_int().map(drop),
            Primitive::Long => input.read_long().map(drop),
            Primitive::Float => input.read_float().map(drop),
            Primitive::Double => input.read_double().map(drop),
        }
    }

    fn read_number(&self, input: &mut ChunkInput, unsigned: bool) -> Result<Number> {
        let integer = match self {
            Primitive::Float => return Ok(Number::Float(input.read_float()? as f64)),
            Primitive::Double => return Ok(Number::Float(input.read_double()?)),
            Primitive::Byte if unsigned => input.read_unsigned_byte()? as i64,
            Primitive::Byte => input.read_byte()? as i64,
            Primitive::Short if unsigned => input.read_unsigned_short()? as i64,
            Primitive::Short => input.read_short()? as i64,
            Primitive::Char => input.read_char()? as i64,
            Primitive::Int if unsigned => input.read_unsigned_int()? as i64,
            Primitive::Int => input.read_int()? as i64,
            Primitive::Long => input.read_long()?,
            Primitive::Boolean => {
                return Err(OverheadSlurpError::invalid_recording(
                    "Unknown numeric type: boolean",
                ))
            }
        };
        Ok(Number::Integer(integer))
    }
}

/// One decode operation. Struct plans are referenced by class id so recursive types stay finite.
#[derive(Debug, Clone)]
pub enum ValueReader {
    Primitive(Primitive),
    String { pool: i64 },
    Quantity {
        primitive: Primitive,
        unit: Unit,
        unsigned: bool,
    },
    TicksTimespan { primitive: Primitive, unsigned: bool },
    TicksTimestamp { primitive: Primitive, unsigned: bool },
    TypeIdentifier { primitive: Primitive, unsigned: bool },
    Pool { pool: i64, content_type: ContentType },
    Array(Box<ValueReader>),
    Struct(i64),
}

#[derive(Debug, Clone)]
pub enum StructKind {
    Generic(Arc<StructContentType>),
    Known(KnownStructKind),
}

#[derive(Debug, Clone)]
pub struct FieldPlan {
    pub reader: ValueReader,
    /// Record slot, for well-known structs only. `None` drops the value.
    pub slot: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StructPlan {
    pub kind: StructKind,
    pub fields: Vec<FieldPlan>,
}

impl StructPlan {
    pub fn is_generic(&self) -> bool {
        matches!(self.kind, StructKind::Generic(_))
    }
}

/// Everything the interpreter needs while decoding one chunk.
#[derive(Debug)]
pub struct TypeTable {
    header: ChunkHeader,
    plans: AHashMap<i64, StructPlan>,
    constants: AHashMap<i64, AHashMap<i64, Value>>,
    event_type_names: AHashMap<i64, Arc<str>>,
}

impl TypeTable {
    pub fn new(header: ChunkHeader) -> Self {
        Self {
            header,
            plans: AHashMap::new(),
            constants: AHashMap::new(),
            event_type_names: AHashMap::new(),
        }
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn plan(&self, class_id: i64) -> Result<&StructPlan> {
        self.plans.get(&class_id).ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!(
                "no decode plan for class with id {}",
                class_id
            ))
        })
    }

    pub(crate) fn insert_plan(&mut self, class_id: i64, plan: StructPlan) {
        self.plans.insert(class_id, plan);
    }

    pub(crate) fn plan_mut(&mut self, class_id: i64) -> Option<&mut StructPlan> {
        self.plans.get_mut(&class_id)
    }

    pub(crate) fn insert_event_type_name(&mut self, class_id: i64, identifier: Arc<str>) {
        self.event_type_names.insert(class_id, identifier);
    }

    pub fn event_type_name(&self, class_id: i64) -> Option<&Arc<str>> {
        self.event_type_names.get(&class_id)
    }

    pub fn constant(&self, pool: i64, index: i64) -> Option<&Value> {
        self.constants.get(&pool).and_then(|c| c.get(&index))
    }

    pub(crate) fn has_constant(&self, pool: i64, index: i64) -> bool {
        self.constant(pool, index).is_some()
    }

    pub(crate) fn insert_constant(&mut self, pool: i64, index: i64, value: Value) {
        self.constants.entry(pool).or_default().insert(index, value);
    }

    pub(crate) fn constant_keys(&self) -> Vec<(i64, i64)> {
        let mut keys: Vec<(i64, i64)> = self
            .constants
            .iter()
            .flat_map(|(pool, c)| c.keys().map(move |index| (*pool, *index)))
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn num_constants(&self) -> usize {
        self.constants.values().map(|c| c.len()).sum()
    }

    fn pool_value(&self, pool: i64, index: i64, allow_unresolved: bool) -> Value {
        match self.constant(pool, index) {
            Some(value) => value.clone(),
            None if allow_unresolved => Value::PoolRef {
                class_id: pool,
                index,
            },
            None => Value::Null,
        }
    }
}

impl ValueReader {
    /// With `allow_unresolved`, a missing constant becomes a `PoolRef` placeholder instead of `Null`.
    pub fn read(
        &self,
        input: &mut ChunkInput,
        table: &TypeTable,
        allow_unresolved: bool,
    ) -> Result<Value> {
        match self {
            ValueReader::Primitive(p) => p.read(input),
            ValueReader::String { pool } => {
                let encoding = input.read_byte()?;
                if encoding == STRING_ENCODING_CONSTANT_POOL {
                    let index = input.read_long()?;
                    return Ok(table.pool_value(*pool, index, allow_unresolved));
                }
                Ok(input
                    .read_raw_string(encoding)?
                    .map_or(Value::Null, Value::String))
            }
            ValueReader::Quantity {
                primitive,
                unit,
                unsigned,
            } => Ok(Value::Quantity {
                number: primitive.read_number(input, *unsigned)?,
                unit: *unit,
            }),
            ValueReader::TicksTimespan {
                primitive,
                unsigned,
            } => {
                let header = table.header();
                let number = match primitive.read_number(input, *unsigned)? {
                    Number::Integer(ticks) => Number::Integer(header.ticks_to_nanos(ticks)),
                    Number::Float(ticks) => {
                        Number::Float(ticks * 1e9 / header.ticks_per_second as f64)
                    }
                };
                Ok(Value::Quantity {
                    number,
                    unit: Unit::Nanosecond,
                })
            }
            ValueReader::TicksTimestamp {
                primitive,
                unsigned,
            } => {
                let ticks = match primitive.read_number(input, *unsigned)? {
                    Number::Integer(ticks) => ticks,
                    Number::Float(ticks) => ticks as i64,
                };
                Ok(Value::Quantity {
                    number: Number::Integer(table.header().ticks_timestamp(ticks)),
                    unit: Unit::EpochNanosecond,
                })
            }
            ValueReader::TypeIdentifier {
                primitive,
                unsigned,
            } => {
                let type_id = match primitive.read_number(input, *unsigned)? {
                    Number::Integer(id) => id,
                    Number::Float(id) => id as i64,
                };
                Ok(table
                    .event_type_name(type_id)
                    .map_or(Value::Null, |name| Value::String(name.clone())))
            }
            ValueReader::Pool { pool, .. } => {
                let index = input.read_long()?;
                Ok(table.pool_value(*pool, index, allow_unresolved))
            }
            ValueReader::Array(element) => {
                let length = input.read_length()?;
                let mut values = Vec::with_capacity(length.min(input.remaining()));
                for _ in 0..length {
                    values.push(element.read(input, table, allow_unresolved)?);
                }
                Ok(Value::Array(Arc::from(values)))
            }
            ValueReader::Struct(class_id) => {
                let plan = table.plan(*class_id)?;
                match &plan.kind {
                    StructKind::Generic(content_type) => {
                        let values = plan
                            .fields
                            .iter()
                            .map(|f| f.reader.read(input, table, allow_unresolved))
                            .collect::<Result<Box<[Value]>>>()?;
                        Ok(Value::Struct(Arc::new(StructValue {
                            content_type: content_type.clone(),
                            values,
                        })))
                    }
                    StructKind::Known(kind) => {
                        let mut record = KnownRecord::empty(*kind);
                        for field in &plan.fields {
                            let value = field.reader.read(input, table, allow_unresolved)?;
                            if let Some(slot) = field.slot {
                                record.set_slot(slot, value);
                            }
                        }
                        Ok(Value::Known(Arc::new(record)))
                    }
                }
            }
        }
    }

    pub fn skip(&self, input: &mut ChunkInput, table: &TypeTable) -> Result<()> {
        match self {
            ValueReader::Primitive(p)
            | ValueReader::Quantity { primitive: p, .. }
            | ValueReader::TicksTimespan { primitive: p, .. }
            | ValueReader::TicksTimestamp { primitive: p, .. }
            | ValueReader::TypeIdentifier { primitive: p, .. } => p.skip(input),
            ValueReader::String { .. } => input.skip_string(),
            ValueReader::Pool { .. } => input.read_long().map(drop),
            ValueReader::Array(element) => {
                let length = input.read_length()?;
                for _ in 0..length {
                    element.skip(input, table)?;
                }
                Ok(())
            }
            ValueReader::Struct(class_id) => {
                for field in &table.plan(*class_id)?.fields {
                    field.reader.skip(input, table)?;
                }
                Ok(())
            }
        }
    }

    pub fn content_type(&self, table: &TypeTable) -> ContentType {
        match self {
            ValueReader::Primitive(Primitive::Boolean) => ContentType::Flag,
            ValueReader::Primitive(_) => ContentType::RawNumber,
            ValueReader::String { .. } => ContentType::Text,
            ValueReader::Quantity { unit, .. } => ContentType::Quantity(*unit),
            ValueReader::TicksTimespan { .. } => ContentType::Quantity(Unit::Nanosecond),
            ValueReader::TicksTimestamp { .. } => ContentType::Quantity(Unit::EpochNanosecond),
            ValueReader::TypeIdentifier { .. } => ContentType::TypeIdentifier,
            ValueReader::Pool { content_type, .. } => content_type.clone(),
            ValueReader::Array(_) => ContentType::Unknown,
            ValueReader::Struct(class_id) => match table.plan(*class_id).map(|p| &p.kind) {
                Ok(StructKind::Generic(content_type)) => ContentType::Struct(content_type.clone()),
                Ok(StructKind::Known(kind)) => ContentType::Known(*kind),
                Err(_) => ContentType::Unknown,
            },
        }
    }
}
