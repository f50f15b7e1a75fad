//! The slice of the heap model that the overhead aggregation consumes.
//!
//! Walking the heap graph and deciding which objects are problematic is done elsewhere;
//! this module only describes classes, objects and GC roots the way the walker hands them over.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub type ObjectId = u64;

/// Position of a class in the snapshot class list, cheaper to compare than its name.
pub type ClassIdx = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum FieldType {
    Object,
    Bool,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl FieldType {
    /// Element type for a JVM array descriptor character such as `B` in `[B`.
    pub fn from_descriptor(c: char) -> Option<FieldType> {
        match c {
            'Z' => Some(FieldType::Bool),
            'C' => Some(FieldType::Char),
            'F' => Some(FieldType::Float),
            'D' => Some(FieldType::Double),
            'B' => Some(FieldType::Byte),
            'S' => Some(FieldType::Short),
            'I' => Some(FieldType::Int),
            'J' => Some(FieldType::Long),
            'L' => Some(FieldType::Object),
            _ => None,
        }
    }

    pub fn java_name(&self) -> &'static str {
        match self {
            FieldType::Object => "Object",
            FieldType::Bool => "boolean",
            FieldType::Char => "char",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Byte => "byte",
            FieldType::Short => "short",
            FieldType::Int => "int",
            FieldType::Long => "long",
        }
    }

    /// Size of one element of this type inside a primitive array, `None` for references.
    pub fn primitive_byte_size(&self) -> Option<usize> {
        match self {
            FieldType::Byte | FieldType::Bool => Some(1),
            FieldType::Char | FieldType::Short => Some(2),
            FieldType::Float | FieldType::Int => Some(4),
            FieldType::Double | FieldType::Long => Some(8),
            FieldType::Object => None,
        }
    }
}

/// Kind of GC root, as found in the heap dump root records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RootKind {
    Unknown,
    ThreadObject,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
}

impl RootKind {
    fn label(&self) -> &'static str {
        match self {
            RootKind::Unknown => "Unknown root",
            RootKind::ThreadObject => "Thread object",
            RootKind::JniGlobal => "JNI global",
            RootKind::JniLocal => "JNI local",
            RootKind::JavaFrame => "Java local",
            RootKind::NativeStack => "Native stack",
            RootKind::StickyClass => "System class",
            RootKind::ThreadBlock => "Thread block",
            RootKind::MonitorUsed => "Busy monitor",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Root {
    pub object_id: ObjectId,
    pub kind: RootKind,
    /// Optional human readable detail, e.g. the class name for sticky class roots.
    pub description: Option<Box<str>>,
}

impl Root {
    pub fn new(object_id: ObjectId, kind: RootKind) -> Self {
        Self {
            object_id,
            kind,
            description: None,
        }
    }

    pub fn id_string(&self) -> String {
        match &self.description {
            Some(description) => format!("{}: {}", self.kind.label(), description),
            None => format!("{}: @{:#x}", self.kind.label(), self.object_id),
        }
    }
}

/// Known problems a collection instance can have.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ProblemKind {
    Empty,
    EmptyUnused,
    EmptyUsed,
    Small,
    SparseSmall,
    SparseLarge,
    Boxed,
    VerticalBar,
    Length0,
    Length1,
}

impl ProblemKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProblemKind::Empty => "EMPTY",
            ProblemKind::EmptyUnused => "EMPTY_UNUSED",
            ProblemKind::EmptyUsed => "EMPTY_USED",
            ProblemKind::Small => "SMALL",
            ProblemKind::SparseSmall => "SPARSE_SMALL",
            ProblemKind::SparseLarge => "SPARSE_LARGE",
            ProblemKind::Boxed => "BOXED",
            ProblemKind::VerticalBar => "VERTICAL_BAR",
            ProblemKind::Length0 => "LENGTH_0",
            ProblemKind::Length1 => "LENGTH_1",
        }
    }

    /// Kinds for which the number of elements is worth aggregating.
    pub fn tracks_num_elements(&self) -> bool {
        matches!(
            self,
            ProblemKind::Small | ProblemKind::SparseSmall | ProblemKind::SparseLarge
        )
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set with `set_flag`, meaning "instances may have a high impl-inclusive size".
pub const HIGH_SIZE_FLAG: u8 = 1;

#[derive(Debug)]
pub struct JavaClass {
    idx: ClassIdx,
    name: Arc<str>,
    instance_field_names: Vec<Box<str>>,
    static_field_names: Vec<Box<str>>,
    is_collection: bool,
    total_shallow_instance_size: u64,
    flags: AtomicU8,
}

impl JavaClass {
    pub fn new(idx: ClassIdx, name: &str) -> Self {
        Self {
            idx,
            name: Arc::from(name),
            instance_field_names: Vec::new(),
            static_field_names: Vec::new(),
            is_collection: false,
            total_shallow_instance_size: 0,
            flags: AtomicU8::new(0),
        }
    }

    pub fn with_instance_fields(mut self, names: &[&str]) -> Self {
        self.instance_field_names = names.iter().map(|n| Box::from(*n)).collect();
        self
    }

    pub fn with_static_fields(mut self, names: &[&str]) -> Self {
        self.static_field_names = names.iter().map(|n| Box::from(*n)).collect();
        self
    }

    pub fn as_collection(mut self) -> Self {
        self.is_collection = true;
        self
    }

    pub fn with_total_shallow_instance_size(mut self, size: u64) -> Self {
        self.total_shallow_instance_size = size;
        self
    }

    pub fn idx(&self) -> ClassIdx {
        self.idx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn is_collection(&self) -> bool {
        self.is_collection
    }

    pub fn total_shallow_instance_size(&self) -> u64 {
        self.total_shallow_instance_size
    }

    pub fn instance_field_name(&self, field_idx: u16) -> &str {
        self.instance_field_names
            .get(field_idx as usize)
            .map(|b| &**b)
            .unwrap_or("<unknown field>")
    }

    pub fn static_field_name(&self, field_idx: u16) -> &str {
        self.static_field_names
            .get(field_idx as usize)
            .map(|b| &**b)
            .unwrap_or("<unknown static>")
    }

    /// Two versions of a class (same name, different loaders) count as the same class.
    pub fn same_class(&self, other: &JavaClass) -> bool {
        self.idx == other.idx || self.name == other.name
    }

    pub fn set_flag(&self, flag: u8) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    pub fn flag_is_set(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Relaxed) & flag != 0
    }

    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Display name: popular packages are dropped and array descriptors decoded,
    /// e.g. `[Ljava.lang.String;` becomes `String[]` and `[[B` becomes `byte[][]`.
    pub fn human_friendly_name(&self) -> String {
        let name: &str = &self.name;
        if !self.is_array() {
            return short_name_for_popular_class(name).to_string();
        }
        let dims = name.chars().take_while(|c| *c == '[').count();
        let element = &name[dims..];
        let mut result = match element.strip_prefix('L') {
            Some(object) => {
                short_name_for_popular_class(object.strip_suffix(';').unwrap_or(object)).to_string()
            }
            None => element
                .chars()
                .next()
                .and_then(FieldType::from_descriptor)
                .map(|t| t.java_name().to_string())
                .unwrap_or_else(|| element.to_string()),
        };
        for _ in 0..dims {
            result.push_str("[]");
        }
        result
    }
}

/// Strips `java.lang.` and `java.util.` from top level classes of those packages.
pub fn short_name_for_popular_class(name: &str) -> &str {
    for prefix in ["java.lang.", "java.util."] {
        if let Some(short) = name.strip_prefix(prefix) {
            if !short.contains('.') {
                return short;
            }
        }
    }
    name
}

/// A heap object as reported by the walker.
#[derive(Clone, Debug)]
pub struct HeapObject {
    pub id: ObjectId,
    pub class: Arc<JavaClass>,
    /// Shallow size in bytes.
    pub size: u32,
}

impl HeapObject {
    pub fn new(id: ObjectId, class: Arc<JavaClass>, size: u32) -> Self {
        Self { id, class, size }
    }
}

/// Facts the walker established about one collection instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectionDescriptor {
    pub num_elements: u32,
    /// Size of the collection together with its private implementation objects.
    pub impl_size: u32,
}

/// Content of a primitive array, compared by value.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PrimitiveArray {
    pub element_type: FieldType,
    pub bytes: Box<[u8]>,
}

impl PrimitiveArray {
    pub fn new(element_type: FieldType, bytes: &[u8]) -> Self {
        Self {
            element_type,
            bytes: Box::from(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.element_type
            .primitive_byte_size()
            .map(|s| self.bytes.len() / s)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short rendering such as `byte[]{0x1F, 0x2A}` or `char[]{abc}`.
    pub fn value_as_string(&self) -> String {
        const MAX_ELEMENTS: usize = 16;
        let type_name = self.element_type.java_name();
        let mut result = format!("{}[{}]{{", type_name, self.len());
        match self.element_type {
            FieldType::Char => {
                let chars: String = self
                    .bytes
                    .chunks_exact(2)
                    .take(MAX_ELEMENTS * 4)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .map(|c| char::from_u32(c as u32).unwrap_or('?'))
                    .collect();
                result.push_str(&chars);
            }
            FieldType::Byte | FieldType::Bool => {
                let rendered: Vec<String> = self
                    .bytes
                    .iter()
                    .take(MAX_ELEMENTS)
                    .map(|b| format!("{:#04X}", b))
                    .collect();
                result.push_str(&rendered.join(", "));
            }
            other => {
                let size = other.primitive_byte_size().unwrap_or(1);
                let rendered: Vec<String> = self
                    .bytes
                    .chunks_exact(size)
                    .take(MAX_ELEMENTS)
                    .map(|c| c.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
                    .map(|v| v.to_string())
                    .collect();
                result.push_str(&rendered.join(", "));
            }
        }
        if self.len() > MAX_ELEMENTS && self.element_type != FieldType::Char {
            result.push_str(", ...");
        }
        result.push('}');
        result
    }
}

/// The classes of a snapshot, in class-list order.
#[derive(Debug, Default)]
pub struct Snapshot {
    classes: Vec<Arc<JavaClass>>,
}

impl Snapshot {
    pub fn new(classes: Vec<Arc<JavaClass>>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[Arc<JavaClass>] {
        &self.classes
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    pub total_obj_size: u64,
}
