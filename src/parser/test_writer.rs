//! Encoder for hand-made chunks used by the decoder tests.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::parser::chunk_header::{CHUNK_MAGIC, HEADER_SIZE};
use crate::parser::data_input::{
    STRING_ENCODING_CONSTANT_POOL, STRING_ENCODING_NULL, STRING_ENCODING_UTF8,
};
use crate::parser::value::{Value, ValueField};
use crate::parser::{EventSink, EventSinkFactory, ValueInterpretation};

pub(crate) struct ChunkWriter {
    buf: Vec<u8>,
    compressed: bool,
}

impl ChunkWriter {
    pub(crate) fn new(compressed: bool) -> Self {
        Self {
            buf: Vec::new(),
            compressed,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn write_byte(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub(crate) fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn write_varint(&mut self, v: u64) {
        let mut rest = v;
        for _ in 0..8 {
            if rest < 0x80 {
                self.buf.push(rest as u8);
                return;
            }
            self.buf.push((rest as u8 & 0x7F) | 0x80);
            rest >>= 7;
        }
        self.buf.push(rest as u8);
    }

    pub(crate) fn write_short(&mut self, v: i16) {
        if self.compressed {
            self.write_varint(v as u16 as u64);
        } else {
            self.write_raw(&v.to_be_bytes());
        }
    }

    pub(crate) fn write_char(&mut self, v: u16) {
        if self.compressed {
            self.write_varint(v as u64);
        } else {
            self.write_raw(&v.to_be_bytes());
        }
    }

    pub(crate) fn write_int(&mut self, v: i32) {
        if self.compressed {
            self.write_varint(v as u32 as u64);
        } else {
            self.write_raw(&v.to_be_bytes());
        }
    }

    pub(crate) fn write_long(&mut self, v: i64) {
        if self.compressed {
            self.write_varint(v as u64);
        } else {
            self.write_raw(&v.to_be_bytes());
        }
    }

    pub(crate) fn write_float(&mut self, v: f32) {
        self.write_raw(&v.to_be_bytes());
    }

    pub(crate) fn write_double(&mut self, v: f64) {
        self.write_raw(&v.to_be_bytes());
    }

    /// Encoding byte included: null or UTF-8.
    pub(crate) fn write_string(&mut self, v: Option<&str>) {
        match v {
            None => self.write_byte(STRING_ENCODING_NULL),
            Some(s) => {
                self.write_byte(STRING_ENCODING_UTF8);
                self.write_int(s.len() as i32);
                self.write_raw(s.as_bytes());
            }
        }
    }

    pub(crate) fn write_pool_string(&mut self, index: i64) {
        self.write_byte(STRING_ENCODING_CONSTANT_POOL);
        self.write_long(index);
    }

    /// Writes a record framed by its size and type, the size always taking four bytes.
    pub(crate) fn write_record(&mut self, type_id: i64, body: impl FnOnce(&mut ChunkWriter)) {
        let start = self.buf.len();
        self.write_raw(&[0; 4]);
        self.write_long(type_id);
        body(self);
        let size = (self.buf.len() - start) as u32;
        let encoded = if self.compressed {
            [
                (size & 0x7F) as u8 | 0x80,
                ((size >> 7) & 0x7F) as u8 | 0x80,
                ((size >> 14) & 0x7F) as u8 | 0x80,
                ((size >> 21) & 0x7F) as u8,
            ]
        } else {
            size.to_be_bytes()
        };
        self.buf[start..start + 4].copy_from_slice(&encoded);
    }
}

/// A metadata tree element with its attributes and children.
#[derive(Clone, Debug)]
pub(crate) struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub(crate) fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    fn intern_all(&self, strings: &mut Vec<String>, index: &mut AHashMap<String, i32>) {
        let mut intern = |s: &str| {
            if !index.contains_key(s) {
                index.insert(s.to_string(), strings.len() as i32);
                strings.push(s.to_string());
            }
        };
        intern(&self.name);
        for (k, v) in &self.attributes {
            intern(k);
            intern(v);
        }
        for child in &self.children {
            child.intern_all(strings, index);
        }
    }

    fn write_body(&self, w: &mut ChunkWriter, index: &AHashMap<String, i32>) {
        w.write_int(self.attributes.len() as i32);
        for (k, v) in &self.attributes {
            w.write_int(index[k]);
            w.write_int(index[v]);
        }
        w.write_int(self.children.len() as i32);
        for child in &self.children {
            w.write_int(index[&child.name]);
            child.write_body(w, index);
        }
    }
}

pub(crate) fn class(id: i64, name: &str) -> Element {
    Element::new("class").attr("id", id).attr("name", name)
}

pub(crate) fn event_class(id: i64, name: &str) -> Element {
    class(id, name).attr("superType", "jdk.jfr.Event")
}

pub(crate) fn field(name: &str, class_id: i64) -> Element {
    Element::new("field").attr("name", name).attr("class", class_id)
}

pub(crate) fn annotation(class_id: i64, values: &[(&str, &str)]) -> Element {
    values
        .iter()
        .fold(Element::new("annotation").attr("class", class_id), |e, (k, v)| {
            e.attr(k, v)
        })
}

/// Wraps class elements into the `root > metadata` envelope.
pub(crate) fn metadata_root(classes: Vec<Element>) -> Element {
    let metadata = classes
        .into_iter()
        .fold(Element::new("metadata"), |m, c| m.child(c));
    Element::new("root")
        .child(metadata)
        .child(Element::new("region").attr("gmtOffset", 0))
}

/// Assembles a chunk: header, events and constant pools in call order, then the metadata.
pub(crate) struct ChunkBuilder {
    writer: ChunkWriter,
    last_pool: Option<usize>,
    pub(crate) start_nanos: i64,
    pub(crate) start_ticks: i64,
    pub(crate) ticks_per_second: i64,
    pub(crate) major: u16,
}

impl ChunkBuilder {
    pub(crate) fn new(compressed: bool) -> Self {
        let mut writer = ChunkWriter::new(compressed);
        writer.write_raw(&[0; HEADER_SIZE]);
        Self {
            writer,
            last_pool: None,
            start_nanos: 0,
            start_ticks: 0,
            ticks_per_second: 1_000_000_000,
            major: 2,
        }
    }

    pub(crate) fn event(&mut self, type_id: i64, body: impl FnOnce(&mut ChunkWriter)) -> &mut Self {
        self.writer.write_record(type_id, body);
        self
    }

    /// `body` writes the number of pools, then each `(class id, count, constants...)` group.
    pub(crate) fn constant_pool(&mut self, body: impl FnOnce(&mut ChunkWriter)) -> &mut Self {
        let start = self.writer.len();
        let delta = self.last_pool.map_or(0, |prev| prev as i64 - start as i64);
        self.writer.write_record(1, |w| {
            w.write_long(0);
            w.write_long(0);
            w.write_long(delta);
            w.write_bool(false);
            body(w);
        });
        self.last_pool = Some(start);
        self
    }

    pub(crate) fn finish(self, metadata: &Element) -> Vec<u8> {
        let Self {
            mut writer,
            last_pool,
            start_nanos,
            start_ticks,
            ticks_per_second,
            major,
        } = self;
        let mut strings = Vec::new();
        let mut index = AHashMap::new();
        metadata.intern_all(&mut strings, &mut index);

        let metadata_offset = writer.len();
        writer.write_record(0, |w| {
            w.write_long(0);
            w.write_long(0);
            w.write_long(1);
            w.write_int(strings.len() as i32);
            for s in &strings {
                w.write_string(Some(s));
            }
            w.write_int(index[&metadata.name]);
            metadata.write_body(w, &index);
        });

        let chunk_size = writer.len();
        let compressed = writer.compressed;
        let mut bytes = writer.into_bytes();
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&CHUNK_MAGIC);
        header.extend_from_slice(&major.to_be_bytes());
        header.extend_from_slice(&0u16.to_be_bytes());
        for v in [
            chunk_size as i64,
            last_pool.map_or(0, |p| p as i64),
            metadata_offset as i64,
            start_nanos,
            0,
            start_ticks,
            ticks_per_second,
        ] {
            header.extend_from_slice(&v.to_be_bytes());
        }
        header.extend_from_slice(&(compressed as i32).to_be_bytes());
        bytes[..HEADER_SIZE].copy_from_slice(&header);
        bytes
    }
}

pub(crate) struct CollectedType {
    pub(crate) identifier: String,
    pub(crate) label: String,
    pub(crate) category: Vec<String>,
    pub(crate) description: Option<String>,
    pub(crate) fields: Vec<ValueField>,
}

type CollectedEvents = Arc<Mutex<Vec<(Arc<str>, Vec<Value>)>>>;

/// Sink factory keeping every declared type and decoded event.
#[derive(Default)]
pub(crate) struct CollectingFactory {
    pub(crate) types: Mutex<Vec<CollectedType>>,
    /// `(event type, field, interpretation)` answers to `value_interpretation`.
    interpretations: Vec<(&'static str, &'static str, ValueInterpretation)>,
    events: CollectedEvents,
}

struct CollectingSink {
    identifier: Arc<str>,
    events: CollectedEvents,
}

impl EventSink for CollectingSink {
    fn add_event(&mut self, values: &[Value]) {
        self.events
            .lock()
            .push((self.identifier.clone(), values.to_vec()));
    }
}

impl EventSinkFactory for CollectingFactory {
    fn value_interpretation(&self, event_type: &str, field: &str) -> Option<ValueInterpretation> {
        self.interpretations
            .iter()
            .find(|(t, f, _)| *t == event_type && *f == field)
            .map(|(_, _, interpretation)| *interpretation)
    }

    fn create(
        &self,
        identifier: &str,
        label: &str,
        category: &[Arc<str>],
        description: Option<&str>,
        fields: &[ValueField],
    ) -> Box<dyn EventSink> {
        self.types.lock().push(CollectedType {
            identifier: identifier.to_string(),
            label: label.to_string(),
            category: category.iter().map(|c| c.to_string()).collect(),
            description: description.map(str::to_string),
            fields: fields.to_vec(),
        });
        Box::new(CollectingSink {
            identifier: Arc::from(identifier),
            events: self.events.clone(),
        })
    }
}

impl CollectingFactory {
    pub(crate) fn with_interpretations(
        interpretations: Vec<(&'static str, &'static str, ValueInterpretation)>,
    ) -> Self {
        Self {
            interpretations,
            ..Default::default()
        }
    }

    pub(crate) fn events_of(&self, identifier: &str) -> Vec<Vec<Value>> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| &**id == identifier)
            .map(|(_, values)| values.clone())
            .collect()
    }

    pub(crate) fn num_events(&self) -> usize {
        self.events.lock().len()
    }

    pub(crate) fn field_ids_of(&self, identifier: &str) -> Vec<String> {
        self.types
            .lock()
            .iter()
            .filter(|t| t.identifier == identifier)
            .flat_map(|t| t.fields.iter().map(|f| f.identifier.to_string()))
            .collect()
    }
}
