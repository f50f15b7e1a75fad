//! Decoded values and the descriptors handed to event sinks.

use std::sync::Arc;

use crate::parser::struct_types::{KnownRecord, KnownStructKind, StructContentType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Byte,
    PercentUnity,
    AddressUnity,
    Nanosecond,
    Millisecond,
    Second,
    EpochNanosecond,
    EpochMillisecond,
    EpochSecond,
    Number,
}

impl Unit {
    /// Unit of a `jdk.jfr.Timespan` annotation value. Ticks are handled by the reader.
    pub fn from_timespan(value: &str) -> Option<Unit> {
        match value {
            "NANOSECONDS" => Some(Unit::Nanosecond),
            "MILLISECONDS" => Some(Unit::Millisecond),
            "SECONDS" => Some(Unit::Second),
            _ => None,
        }
    }

    pub fn from_timestamp(value: &str) -> Option<Unit> {
        match value {
            "NANOSECONDS_SINCE_EPOCH" => Some(Unit::EpochNanosecond),
            "MILLISECONDS_SINCE_EPOCH" => Some(Unit::EpochMillisecond),
            "SECONDS_SINCE_EPOCH" => Some(Unit::EpochSecond),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Byte => "B",
            Unit::PercentUnity => "%",
            Unit::AddressUnity => "@",
            Unit::Nanosecond => "ns",
            Unit::Millisecond => "ms",
            Unit::Second => "s",
            Unit::EpochNanosecond => "epoch ns",
            Unit::EpochMillisecond => "epoch ms",
            Unit::EpochSecond => "epoch s",
            Unit::Number => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

/// How a field's values should be interpreted.
#[derive(Debug, Clone)]
pub enum ContentType {
    Flag,
    RawNumber,
    Text,
    /// Identifier of an event type, carried as `Value::String`.
    TypeIdentifier,
    Quantity(Unit),
    Struct(Arc<StructContentType>),
    Known(KnownStructKind),
    Unknown,
}

/// Descriptor of one (possibly flattened) event field.
#[derive(Debug, Clone)]
pub struct ValueField {
    pub identifier: Arc<str>,
    pub label: Arc<str>,
    pub description: Option<Arc<str>>,
    pub content_type: ContentType,
}

#[derive(Debug)]
pub struct StructValue {
    pub content_type: Arc<StructContentType>,
    pub values: Box<[Value]>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Arc<str>),
    Quantity { number: Number, unit: Unit },
    Array(Arc<[Value]>),
    Struct(Arc<StructValue>),
    Known(Arc<KnownRecord>),
    /// Constant pool entry not known yet at read time, or closing a reference cycle.
    PoolRef { class_id: i64, index: i64 },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Char(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            Value::Quantity {
                number: Number::Integer(v),
                ..
            } => Some(*v),
            _ => None,
        }
    }

    pub fn as_known(&self) -> Option<&KnownRecord> {
        match self {
            Value::Known(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Calls `f` on every pool reference directly or transitively contained in this value.
    pub(crate) fn for_each_pool_ref(&self, f: &mut impl FnMut(i64, i64)) {
        match self {
            Value::PoolRef { class_id, index } => f(*class_id, *index),
            Value::Array(values) => values.iter().for_each(|v| v.for_each_pool_ref(f)),
            Value::Struct(s) => s.values.iter().for_each(|v| v.for_each_pool_ref(f)),
            Value::Known(record) => record.slots().iter().for_each(|v| v.for_each_pool_ref(f)),
            _ => {}
        }
    }

    /// Rebuilds the value, replacing each pool reference for which `lookup` has an answer.
    pub(crate) fn substitute(&self, lookup: &impl Fn(i64, i64) -> Option<Value>) -> Value {
        match self {
            Value::PoolRef { class_id, index } => {
                lookup(*class_id, *index).unwrap_or_else(|| self.clone())
            }
            Value::Array(values) => {
                Value::Array(values.iter().map(|v| v.substitute(lookup)).collect())
            }
            Value::Struct(s) => Value::Struct(Arc::new(StructValue {
                content_type: s.content_type.clone(),
                values: s.values.iter().map(|v| v.substitute(lookup)).collect(),
            })),
            Value::Known(record) => Value::Known(Arc::new(KnownRecord::new(
                record.kind(),
                record.slots().iter().map(|v| v.substitute(lookup)).collect(),
            ))),
            other => other.clone(),
        }
    }
}
