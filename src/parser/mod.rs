use std::sync::Arc;

use crate::parser::value::{Unit, Value, ValueField};

pub mod chunk_header;
pub mod chunk_parser;
pub mod data_input;
pub mod metadata;
pub mod struct_types;
pub mod type_manager;
pub mod value;
pub mod value_readers;

#[cfg(test)]
pub(crate) mod test_writer;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Drops experimental event types entirely, and experimental fields of the other types.
    pub hide_experimentals: bool,
}

/// Receives the decoded events of one event type. The slice is reused between events.
pub trait EventSink {
    fn add_event(&mut self, values: &[Value]);
}

/// Overrides how a plain numeric event field is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInterpretation {
    /// The number is the id of an event type of the chunk, decoded as that type's identifier.
    TypeIdentifier,
    Unit(Unit),
}

/// Creates one sink per declared event type, once per chunk.
pub trait EventSinkFactory: Sync {
    /// Consulted for every numeric field without a unit annotation, nested fields are named
    /// `outer:inner`.
    fn value_interpretation(&self, _event_type: &str, _field: &str) -> Option<ValueInterpretation> {
        None
    }

    fn create(
        &self,
        identifier: &str,
        label: &str,
        category: &[Arc<str>],
        description: Option<&str>,
        fields: &[ValueField],
    ) -> Box<dyn EventSink>;
}
