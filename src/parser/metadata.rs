//! The metadata event: an interned string table followed by an element tree describing every class.

use std::sync::Arc;

use ahash::AHashMap;
use log::warn;

use crate::errors::OverheadSlurpError;
use crate::parser::data_input::ChunkInput;
use crate::parser::value::Unit;

pub const METADATA_EVENT_TYPE: i64 = 0;
pub const EVENT_SUPER_TYPE: &str = "jdk.jfr.Event";
const ROOT_ELEMENT_NAME: &str = "root";
const VALUE: &str = "value";

type Result<T> = std::result::Result<T, OverheadSlurpError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Root,
    Metadata,
    Class,
    Field,
    Setting,
    Annotation,
    Region,
}

impl ElementKind {
    fn name(&self) -> &'static str {
        match self {
            ElementKind::Root => ROOT_ELEMENT_NAME,
            ElementKind::Metadata => "metadata",
            ElementKind::Class => "class",
            ElementKind::Field => "field",
            ElementKind::Setting => "setting",
            ElementKind::Annotation => "annotation",
            ElementKind::Region => "region",
        }
    }

    fn child(&self, name: &str) -> Option<ElementKind> {
        match (self, name) {
            (ElementKind::Root, "metadata") => Some(ElementKind::Metadata),
            (ElementKind::Root, "region") => Some(ElementKind::Region),
            (ElementKind::Metadata, "class") => Some(ElementKind::Class),
            (ElementKind::Class, "field") => Some(ElementKind::Field),
            (ElementKind::Class, "setting") => Some(ElementKind::Setting),
            (ElementKind::Class | ElementKind::Field | ElementKind::Setting, "annotation") => {
                Some(ElementKind::Annotation)
            }
            _ => None,
        }
    }
}

/// Generic element: attributes and children, before interpretation by kind.
struct RawElement {
    kind: ElementKind,
    attributes: Vec<(Arc<str>, Arc<str>)>,
    children: Vec<RawElement>,
}

impl RawElement {
    fn attribute(&self, key: &str) -> Option<&Arc<str>> {
        self.attributes
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    fn required(&self, key: &str) -> Result<&Arc<str>> {
        self.attribute(key).ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!(
                "{} element without '{}' attribute",
                self.kind.name(),
                key
            ))
        })
    }

    fn children_of(&self, kind: ElementKind) -> impl Iterator<Item = &RawElement> {
        self.children.iter().filter(move |c| c.kind == kind)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        OverheadSlurpError::invalid_recording(format!(
            "attribute '{}' is not a number: '{}'",
            key, value
        ))
    })
}

fn string_at<'s>(strings: &'s [Arc<str>], index: i32) -> Result<&'s Arc<str>> {
    usize::try_from(index)
        .ok()
        .and_then(|i| strings.get(i))
        .ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!(
                "string index {} out of range ({} strings)",
                index,
                strings.len()
            ))
        })
}

/// The nesting is bounded by the element kinds, annotations and regions being leaves.
fn read_element(
    input: &mut ChunkInput,
    strings: &[Arc<str>],
    kind: ElementKind,
) -> Result<RawElement> {
    let attribute_count = input.read_length()?;
    let mut attributes = Vec::with_capacity(attribute_count.min(64));
    for _ in 0..attribute_count {
        let key = string_at(strings, input.read_int()?)?.clone();
        let value = string_at(strings, input.read_int()?)?.clone();
        attributes.push((key, value));
    }
    let child_count = input.read_length()?;
    let mut children = Vec::with_capacity(child_count.min(1024));
    for _ in 0..child_count {
        let name = string_at(strings, input.read_int()?)?;
        let child_kind = kind.child(name).ok_or_else(|| {
            OverheadSlurpError::invalid_recording(format!(
                "Did not expect a child of {} with name '{}'",
                kind.name(),
                name
            ))
        })?;
        children.push(read_element(input, strings, child_kind)?);
    }
    Ok(RawElement {
        kind,
        attributes,
        children,
    })
}

#[derive(Debug, Clone)]
pub struct AnnotationElement {
    pub class_id: i64,
    pub values: AHashMap<Arc<str>, Arc<str>>,
}

impl AnnotationElement {
    fn from_raw(raw: &RawElement) -> Result<Self> {
        let mut class_id = None;
        let mut values = AHashMap::new();
        for (k, v) in &raw.attributes {
            if &**k == "class" {
                class_id = Some(parse_number(k, v)?);
            } else {
                values.insert(k.clone(), v.clone());
            }
        }
        let class_id = class_id.ok_or_else(|| {
            OverheadSlurpError::invalid_recording("annotation element without 'class' attribute")
        })?;
        Ok(Self { class_id, values })
    }

    fn value(&self) -> Option<&Arc<str>> {
        self.values.get(VALUE)
    }
}

fn annotations_of(raw: &RawElement) -> Result<Vec<AnnotationElement>> {
    raw.children_of(ElementKind::Annotation)
        .map(AnnotationElement::from_raw)
        .collect()
}

/// Label, description and experimental marker shared by classes and fields.
#[derive(Debug, Clone, Default)]
pub struct Annotated {
    pub label: Option<Arc<str>>,
    pub description: Option<Arc<str>>,
    pub experimental: bool,
}

impl Annotated {
    fn resolve(&mut self, annotation_type: &str, annotation: &AnnotationElement) -> bool {
        match annotation_type {
            "jdk.jfr.Label" => self.label = annotation.value().cloned(),
            "jdk.jfr.Description" => self.description = annotation.value().cloned(),
            "jdk.jfr.Experimental" => self.experimental = true,
            _ => return false,
        }
        true
    }

    pub fn label_or<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(identifier)
    }

    /// The label (or identifier) as displayed, flagged when experimental.
    pub fn display_label(&self, identifier: &str) -> Arc<str> {
        let label = self.label_or(identifier);
        if self.experimental {
            Arc::from(format!("{} (Experimental)", label))
        } else {
            Arc::from(label)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicksKind {
    Timespan,
    Timestamp,
}

#[derive(Debug, Clone)]
pub struct FieldElement {
    pub identifier: Arc<str>,
    pub class_id: i64,
    pub constant_pool: bool,
    pub is_array: bool,
    pub annotations: Vec<AnnotationElement>,
    pub annotated: Annotated,
    pub unit: Option<Unit>,
    pub ticks: Option<TicksKind>,
    pub unsigned: bool,
}

impl FieldElement {
    fn from_raw(raw: &RawElement) -> Result<Self> {
        let dimension = match raw.attribute("dimension") {
            Some(d) => parse_number::<i32>("dimension", d)?,
            None => 0,
        };
        let is_array = match dimension {
            0 => false,
            1 => true,
            other => {
                return Err(OverheadSlurpError::invalid_recording(format!(
                    "Array dimension {} is not supported",
                    other
                )))
            }
        };
        Ok(Self {
            identifier: raw.required("name")?.clone(),
            class_id: parse_number("class", raw.required("class")?)?,
            constant_pool: raw.attribute("constantPool").is_some_and(|v| &**v == "true"),
            is_array,
            annotations: annotations_of(raw)?,
            annotated: Annotated::default(),
            unit: None,
            ticks: None,
            unsigned: false,
        })
    }

    fn resolve(&mut self, annotation_type: &str, annotation: &AnnotationElement) {
        if self.annotated.resolve(annotation_type, annotation) {
            return;
        }
        let value = annotation.value().map(|v| &**v);
        match annotation_type {
            "jdk.jfr.Unsigned" => self.unsigned = true,
            "jdk.jfr.MemoryAmount" | "jdk.jfr.DataAmount" => self.unit = Some(Unit::Byte),
            "jdk.jfr.Percentage" => self.unit = Some(Unit::PercentUnity),
            "jdk.jfr.MemoryAddress" => self.unit = Some(Unit::AddressUnity),
            "jdk.jfr.Timespan" => match value {
                Some("TICKS") => self.ticks = Some(TicksKind::Timespan),
                Some(v) => self.unit = Unit::from_timespan(v).or(self.unit),
                None => {}
            },
            "jdk.jfr.Timestamp" => match value {
                Some("TICKS") => self.ticks = Some(TicksKind::Timestamp),
                Some(v) => self.unit = Unit::from_timestamp(v).or(self.unit),
                None => {}
            },
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassElement {
    pub class_id: i64,
    pub identifier: Arc<str>,
    pub super_type: Option<Arc<str>>,
    pub simple_type: bool,
    pub fields: Vec<FieldElement>,
    pub annotations: Vec<AnnotationElement>,
    pub annotated: Annotated,
    pub category: Vec<Arc<str>>,
}

impl ClassElement {
    fn from_raw(raw: &RawElement) -> Result<Self> {
        Ok(Self {
            class_id: parse_number("id", raw.required("id")?)?,
            identifier: raw.required("name")?.clone(),
            super_type: raw.attribute("superType").cloned(),
            simple_type: raw.attribute("simpleType").is_some_and(|v| &**v == "true"),
            fields: raw
                .children_of(ElementKind::Field)
                .map(FieldElement::from_raw)
                .collect::<Result<_>>()?,
            annotations: annotations_of(raw)?,
            annotated: Annotated::default(),
            category: Vec::new(),
        })
    }

    pub fn is_event_type(&self) -> bool {
        self.super_type.as_deref() == Some(EVENT_SUPER_TYPE)
    }

    /// Resolves the annotations of the class and its fields, given the identifiers of the
    /// non-event classes of the chunk.
    pub fn resolve_annotations(&mut self, types: &AHashMap<i64, Arc<str>>) -> Result<()> {
        for annotation in &self.annotations {
            let annotation_type = declared_type(types, annotation.class_id)?;
            if !self.annotated.resolve(annotation_type, annotation)
                && annotation_type == "jdk.jfr.Category"
            {
                self.category = (0..)
                    .map_while(|i| annotation.values.get(format!("value-{}", i).as_str()).cloned())
                    .collect();
            }
        }
        for field in &mut self.fields {
            let annotations = std::mem::take(&mut field.annotations);
            for annotation in &annotations {
                let annotation_type = declared_type(types, annotation.class_id)?;
                field.resolve(annotation_type, annotation);
            }
            field.annotations = annotations;
        }
        Ok(())
    }
}

pub fn declared_type(types: &AHashMap<i64, Arc<str>>, class_id: i64) -> Result<&str> {
    types.get(&class_id).map(|t| &**t).ok_or_else(|| {
        OverheadSlurpError::invalid_recording(format!(
            "Class with id {} was not declared",
            class_id
        ))
    })
}

#[derive(Debug)]
pub struct ChunkMetadata {
    pub metadata_id: i64,
    pub classes: Vec<ClassElement>,
}

impl ChunkMetadata {
    /// Reads the metadata event starting at the current position.
    pub fn read(input: &mut ChunkInput) -> Result<ChunkMetadata> {
        let offset = input.position();
        let _size = input.read_int()?;
        let event_type = input.read_long()?;
        if event_type != METADATA_EVENT_TYPE {
            return Err(OverheadSlurpError::invalid_recording(format!(
                "expected the metadata event at offset {}, found type {}",
                offset, event_type
            )));
        }
        let _start_ticks = input.read_long()?;
        let _duration = input.read_long()?;
        let metadata_id = input.read_long()?;

        let string_count = input.read_length()?;
        let mut strings = Vec::with_capacity(string_count.min(input.remaining()));
        for _ in 0..string_count {
            let encoding = input.read_byte()?;
            let s = input.read_raw_string(encoding)?;
            strings.push(s.unwrap_or_else(|| Arc::from("")));
        }

        let root_name = string_at(&strings, input.read_int()?)?;
        if &**root_name != ROOT_ELEMENT_NAME {
            warn!(name = &**root_name; "metadata root element is not named '{}'", ROOT_ELEMENT_NAME);
        }
        let root = read_element(input, &strings, ElementKind::Root)?;

        let classes = root
            .children_of(ElementKind::Metadata)
            .flat_map(|m| m.children_of(ElementKind::Class))
            .map(ClassElement::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkMetadata {
            metadata_id,
            classes,
        })
    }
}
