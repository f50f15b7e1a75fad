//! Builds the decode plans of a chunk from its metadata and owns its constant pools.

use std::sync::Arc;

use ahash::AHashMap;
use log::warn;

use crate::errors::OverheadSlurpError;
use crate::parser::chunk_header::ChunkHeader;
use crate::parser::data_input::ChunkInput;
use crate::parser::metadata::{ClassElement, FieldElement, TicksKind};
use crate::parser::struct_types::{shared_struct_type, KnownStructKind, StructContentType, StructField};
use crate::parser::value::{Unit, Value, ValueField};
use crate::parser::value_readers::{
    FieldPlan, Primitive, StructKind, StructPlan, TypeTable, ValueReader, STRING_TYPE,
};
use crate::parser::{EventSink, EventSinkFactory, ParserOptions, ValueInterpretation};

type Result<T> = std::result::Result<T, OverheadSlurpError>;

struct TypeEntry {
    class: Arc<ClassElement>,
    reader: Option<ValueReader>,
    resolving: bool,
}

struct EventField {
    reader: ValueReader,
    hidden: bool,
}

struct EventTypeEntry {
    fields: Vec<EventField>,
    sink: Box<dyn EventSink>,
    buffer: Vec<Value>,
}

struct NopSink;

impl EventSink for NopSink {
    fn add_event(&mut self, _values: &[Value]) {}
}

pub struct TypeManager {
    types: AHashMap<i64, TypeEntry>,
    event_types: AHashMap<i64, EventTypeEntry>,
    table: TypeTable,
}

fn not_declared(class_id: i64) -> OverheadSlurpError {
    OverheadSlurpError::invalid_recording(format!("Class with id {} was not declared", class_id))
}

fn unknown_numeric(identifier: &str) -> OverheadSlurpError {
    OverheadSlurpError::invalid_recording(format!("Unknown numeric type: {}", identifier))
}

fn struct_descriptor(class: &ClassElement) -> StructContentType {
    StructContentType {
        class_id: class.class_id,
        identifier: class.identifier.clone(),
        label: class.annotated.label.clone(),
        description: class.annotated.description.clone(),
        fields: class
            .fields
            .iter()
            .map(|f| StructField {
                identifier: f.identifier.clone(),
                label: Arc::from(f.annotated.label_or(&f.identifier)),
                description: f.annotated.description.clone(),
            })
            .collect(),
    }
}

impl TypeManager {
    /// Resolves annotations and prepares one sink per event type. Value types get their plans
    /// on first use.
    pub fn new(
        classes: Vec<ClassElement>,
        header: ChunkHeader,
        options: &ParserOptions,
        sink_factory: &dyn EventSinkFactory,
    ) -> Result<TypeManager> {
        let type_names: AHashMap<i64, Arc<str>> = classes
            .iter()
            .filter(|c| !c.is_event_type())
            .map(|c| (c.class_id, c.identifier.clone()))
            .collect();

        let mut types = AHashMap::with_capacity(type_names.len());
        let mut event_classes = Vec::new();
        for mut class in classes {
            class.resolve_annotations(&type_names)?;
            if class.simple_type && class.fields.len() == 1 && class.fields[0].class_id == class.class_id {
                return Err(OverheadSlurpError::invalid_recording(format!(
                    "{} is a simple type referring to itself",
                    class.identifier
                )));
            }
            if class.is_event_type() {
                event_classes.push(class);
            } else {
                let entry = TypeEntry {
                    class: Arc::new(class),
                    reader: None,
                    resolving: false,
                };
                types.insert(entry.class.class_id, entry);
            }
        }

        let mut manager = TypeManager {
            types,
            event_types: AHashMap::with_capacity(event_classes.len()),
            table: TypeTable::new(header),
        };
        event_classes.sort_by_key(|c| c.class_id);
        for class in &event_classes {
            manager
                .table
                .insert_event_type_name(class.class_id, class.identifier.clone());
        }
        for class in &event_classes {
            let entry = manager.event_type_entry(class, options, sink_factory)?;
            manager.event_types.insert(class.class_id, entry);
        }
        Ok(manager)
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }

    pub fn num_event_types(&self) -> usize {
        self.event_types.len()
    }

    /// The memoized reader of a value type, built on first request.
    pub fn reader_for(&mut self, class_id: i64) -> Result<ValueReader> {
        let entry = self
            .types
            .get_mut(&class_id)
            .ok_or_else(|| not_declared(class_id))?;
        if let Some(reader) = &entry.reader {
            return Ok(reader.clone());
        }
        if entry.resolving {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "{} is part of a cycle of simple types",
                entry.class.identifier
            )));
        }
        let class = entry.class.clone();

        if class.simple_type && class.fields.len() == 1 {
            entry.resolving = true;
            let reader = self.field_reader(&class.fields[0], None);
            let entry = self.entry_mut(class_id)?;
            entry.resolving = false;
            let reader = reader?;
            entry.reader = Some(reader.clone());
            return Ok(reader);
        }

        if class.fields.is_empty() && class.super_type.is_none() {
            let reader = if &*class.identifier == STRING_TYPE {
                ValueReader::String { pool: class_id }
            } else {
                let primitive = Primitive::from_identifier(&class.identifier).ok_or_else(|| {
                    OverheadSlurpError::invalid_recording(format!(
                        "Unknown primitive type: {}",
                        class.identifier
                    ))
                })?;
                ValueReader::Primitive(primitive)
            };
            entry.reader = Some(reader.clone());
            return Ok(reader);
        }

        // Published before the fields are planned, which may refer back to this type.
        let kind = match KnownStructKind::from_identifier(&class.identifier) {
            Some(known) => StructKind::Known(known),
            None => StructKind::Generic(shared_struct_type(class_id, || struct_descriptor(&class))),
        };
        entry.reader = Some(ValueReader::Struct(class_id));
        self.table.insert_plan(
            class_id,
            StructPlan {
                kind: kind.clone(),
                fields: Vec::with_capacity(class.fields.len()),
            },
        );
        let mut fields = Vec::with_capacity(class.fields.len());
        for field in &class.fields {
            let reader = self.field_reader(field, None)?;
            let slot = match &kind {
                StructKind::Known(known) => {
                    let slot = known.slot_index(&field.identifier);
                    if slot.is_none() {
                        warn!(class = &*class.identifier, field = &*field.identifier;
                            "no record slot for declared field, values are dropped");
                    }
                    slot
                }
                StructKind::Generic(_) => None,
            };
            fields.push(FieldPlan { reader, slot });
        }
        if let Some(plan) = self.table.plan_mut(class_id) {
            plan.fields = fields;
        }
        Ok(ValueReader::Struct(class_id))
    }

    fn entry_mut(&mut self, class_id: i64) -> Result<&mut TypeEntry> {
        self.types
            .get_mut(&class_id)
            .ok_or_else(|| not_declared(class_id))
    }

    /// Reader of one field: the field type's reader, wrapped according to the field's annotations.
    /// `interpretation` only applies to numeric fields without a unit.
    fn field_reader(
        &mut self,
        field: &FieldElement,
        interpretation: Option<ValueInterpretation>,
    ) -> Result<ValueReader> {
        let field_type = self.entry_mut(field.class_id)?.class.clone();
        let numeric = Primitive::numeric(&field_type.identifier);
        let type_reader = self.reader_for(field.class_id)?;
        let unsigned = field.unsigned;
        let numeric_or_err = || numeric.ok_or_else(|| unknown_numeric(&field_type.identifier));

        let mut reader = match (field.ticks, field.unit) {
            (Some(TicksKind::Timespan), _) => ValueReader::TicksTimespan {
                primitive: numeric_or_err()?,
                unsigned,
            },
            (Some(TicksKind::Timestamp), _) => ValueReader::TicksTimestamp {
                primitive: numeric_or_err()?,
                unsigned,
            },
            (None, Some(unit)) => ValueReader::Quantity {
                primitive: numeric_or_err()?,
                unit,
                unsigned,
            },
            (None, None) => match (numeric, interpretation) {
                (Some(primitive), Some(ValueInterpretation::TypeIdentifier)) => {
                    ValueReader::TypeIdentifier {
                        primitive,
                        unsigned,
                    }
                }
                (Some(primitive), Some(ValueInterpretation::Unit(unit))) => {
                    ValueReader::Quantity {
                        primitive,
                        unit,
                        unsigned,
                    }
                }
                (Some(primitive), None) => ValueReader::Quantity {
                    primitive,
                    unit: Unit::Number,
                    unsigned,
                },
                (None, _) => type_reader,
            },
        };
        if field.constant_pool {
            if numeric.is_some() {
                return Err(OverheadSlurpError::invalid_recording(
                    "Numerics should not be put in constant pools",
                ));
            }
            reader = ValueReader::Pool {
                pool: field.class_id,
                content_type: reader.content_type(&self.table),
            };
        }
        Ok(if field.is_array {
            ValueReader::Array(Box::new(reader))
        } else {
            reader
        })
    }

    /// The class of a field read inline as a generic struct, whose fields are lifted into the event.
    fn flattened_class(&self, reader: &ValueReader) -> Option<Arc<ClassElement>> {
        match reader {
            ValueReader::Struct(class_id) => {
                let plan = self.table.plan(*class_id).ok()?;
                if plan.is_generic() {
                    self.types.get(class_id).map(|e| e.class.clone())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn event_type_entry(
        &mut self,
        class: &ClassElement,
        options: &ParserOptions,
        sink_factory: &dyn EventSinkFactory,
    ) -> Result<EventTypeEntry> {
        if options.hide_experimentals && class.annotated.experimental {
            return Ok(EventTypeEntry {
                fields: Vec::new(),
                sink: Box::new(NopSink),
                buffer: Vec::new(),
            });
        }
        let mut fields = Vec::with_capacity(class.fields.len());
        let mut descriptors = Vec::with_capacity(class.fields.len());
        for field in &class.fields {
            let interpretation =
                sink_factory.value_interpretation(&class.identifier, &field.identifier);
            let reader = self.field_reader(field, interpretation)?;
            let label = field.annotated.display_label(&field.identifier);
            if options.hide_experimentals && field.annotated.experimental {
                fields.push(EventField {
                    reader,
                    hidden: true,
                });
            } else if let Some(nested_class) = self.flattened_class(&reader) {
                for nested in &nested_class.fields {
                    let nested_id = format!("{}:{}", field.identifier, nested.identifier);
                    let interpretation =
                        sink_factory.value_interpretation(&class.identifier, &nested_id);
                    let nested_reader = self.field_reader(nested, interpretation)?;
                    descriptors.push(ValueField {
                        identifier: Arc::from(nested_id),
                        label: Arc::from(format!(
                            "{} : {}",
                            label,
                            nested.annotated.label_or(&nested.identifier)
                        )),
                        description: nested.annotated.description.clone(),
                        content_type: nested_reader.content_type(&self.table),
                    });
                    fields.push(EventField {
                        reader: nested_reader,
                        hidden: false,
                    });
                }
            } else {
                descriptors.push(ValueField {
                    identifier: field.identifier.clone(),
                    label,
                    description: field.annotated.description.clone(),
                    content_type: reader.content_type(&self.table),
                });
                fields.push(EventField {
                    reader,
                    hidden: false,
                });
            }
        }
        let sink = sink_factory.create(
            &class.identifier,
            &class.annotated.display_label(&class.identifier),
            &class.category,
            class.annotated.description.as_deref(),
            &descriptors,
        );
        Ok(EventTypeEntry {
            fields,
            sink,
            buffer: Vec::with_capacity(descriptors.len()),
        })
    }

    /// Reads `count` constants of one pool. Constants already known are skipped.
    pub fn read_constants(
        &mut self,
        class_id: i64,
        count: usize,
        input: &mut ChunkInput,
    ) -> Result<()> {
        let reader = self.reader_for(class_id)?;
        for _ in 0..count {
            let index = input.read_long()?;
            if self.table.has_constant(class_id, index) {
                reader.skip(input, &self.table)?;
            } else {
                let value = reader.read(input, &self.table, true)?;
                self.table.insert_constant(class_id, index, value);
            }
        }
        Ok(())
    }

    /// Replaces every placeholder left by the constant pass with the constant it designates.
    ///
    /// Constants are resolved depth first with an explicit stack. A reference closing a cycle
    /// stays a placeholder, a reference to a constant that was never read becomes `Null`.
    pub fn resolve_constants(&mut self) {
        #[derive(PartialEq, Eq)]
        enum State {
            InProgress,
            Done,
        }
        let mut states: AHashMap<(i64, i64), State> = AHashMap::new();
        for key in self.table.constant_keys() {
            if states.contains_key(&key) {
                continue;
            }
            states.insert(key, State::InProgress);
            let mut stack = vec![key];
            while let Some(&(pool, index)) = stack.last() {
                let Some(value) = self.table.constant(pool, index) else {
                    stack.pop();
                    continue;
                };
                let mut has_refs = false;
                let mut unvisited = None;
                value.for_each_pool_ref(&mut |c, i| {
                    has_refs = true;
                    if unvisited.is_none()
                        && !states.contains_key(&(c, i))
                        && self.table.has_constant(c, i)
                    {
                        unvisited = Some((c, i));
                    }
                });
                if let Some(dependency) = unvisited {
                    states.insert(dependency, State::InProgress);
                    stack.push(dependency);
                    continue;
                }
                if has_refs {
                    let resolved = value.substitute(&|c, i| match states.get(&(c, i)) {
                        Some(State::Done) => self.table.constant(c, i).cloned(),
                        Some(State::InProgress) => None,
                        None => Some(Value::Null),
                    });
                    self.table.insert_constant(pool, index, resolved);
                }
                states.insert((pool, index), State::Done);
                stack.pop();
            }
        }
    }

    pub fn read_event(&mut self, type_id: i64, input: &mut ChunkInput) -> Result<()> {
        let entry = self.event_types.get_mut(&type_id).ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!(
                "Event type with id {} was not declared",
                type_id
            ))
        })?;
        entry.buffer.clear();
        for field in &entry.fields {
            if field.hidden {
                field.reader.skip(input, &self.table)?;
            } else {
                entry
                    .buffer
                    .push(field.reader.read(input, &self.table, false)?);
            }
        }
        entry.sink.add_event(&entry.buffer);
        Ok(())
    }
}
