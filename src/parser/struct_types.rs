//! Fixed-shape records for the well-known struct types, and the shared descriptors of all others.

use std::sync::{Arc, LazyLock};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::parser::value::Value;

const TYPE_NAMESPACES: [&str; 2] = ["jdk.types.", "com.oracle.jfr.types."];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownStructKind {
    Thread,
    ThreadGroup,
    Package,
    Module,
    ClassLoader,
    Class,
    OldObjectGcRoot,
    OldObject,
    OldObjectArray,
    OldObjectField,
    Method,
    StackFrame,
    StackTrace,
}

impl KnownStructKind {
    pub fn from_identifier(identifier: &str) -> Option<KnownStructKind> {
        match identifier {
            "java.lang.Thread" => return Some(KnownStructKind::Thread),
            "java.lang.Class" => return Some(KnownStructKind::Class),
            _ => {}
        }
        let simple_name = TYPE_NAMESPACES
            .iter()
            .find_map(|ns| identifier.strip_prefix(ns))?;
        let kind = match simple_name {
            "ThreadGroup" => KnownStructKind::ThreadGroup,
            "Package" => KnownStructKind::Package,
            "Module" => KnownStructKind::Module,
            "ClassLoader" => KnownStructKind::ClassLoader,
            "OldObjectGcRoot" => KnownStructKind::OldObjectGcRoot,
            "OldObject" => KnownStructKind::OldObject,
            "OldObjectArray" => KnownStructKind::OldObjectArray,
            "OldObjectField" => KnownStructKind::OldObjectField,
            "Method" => KnownStructKind::Method,
            "StackFrame" => KnownStructKind::StackFrame,
            "StackTrace" => KnownStructKind::StackTrace,
            _ => return None,
        };
        Some(kind)
    }

    /// Slot names in record order. A leading underscore marks a name that is a keyword upstream.
    pub fn slot_names(&self) -> &'static [&'static str] {
        match self {
            KnownStructKind::Thread => &["osName", "osThreadId", "javaThreadId", "javaName", "group"],
            KnownStructKind::ThreadGroup => &["name", "parent"],
            KnownStructKind::Package => &["name", "module", "exported"],
            KnownStructKind::Module => &["name", "version", "location", "classLoader"],
            KnownStructKind::ClassLoader => &["type", "name"],
            KnownStructKind::Class => &["classLoader", "modifiers", "_package", "name"],
            KnownStructKind::OldObjectGcRoot => &["system", "type", "description"],
            KnownStructKind::OldObject => &["address", "type", "description", "referrer"],
            KnownStructKind::OldObjectArray => &["size", "index"],
            KnownStructKind::OldObjectField => &["name", "modifiers"],
            KnownStructKind::Method => &["type", "name", "descriptor", "modifiers", "hidden"],
            KnownStructKind::StackFrame => &["method", "lineNumber", "bytecodeIndex", "type"],
            KnownStructKind::StackTrace => &["frames", "truncated"],
        }
    }

    /// Slot bound to a declared field: the exact name first, then the underscore-prefixed one.
    pub fn slot_index(&self, field_identifier: &str) -> Option<usize> {
        let names = self.slot_names();
        names
            .iter()
            .position(|n| *n == field_identifier)
            .or_else(|| {
                names
                    .iter()
                    .position(|n| n.strip_prefix('_') == Some(field_identifier))
            })
    }
}

/// A decoded well-known struct. Slots without a matching declared field stay `Null`.
#[derive(Debug, Clone)]
pub struct KnownRecord {
    kind: KnownStructKind,
    slots: Box<[Value]>,
}

impl KnownRecord {
    pub fn new(kind: KnownStructKind, slots: Box<[Value]>) -> Self {
        Self { kind, slots }
    }

    pub fn empty(kind: KnownStructKind) -> Self {
        let slots = vec![Value::Null; kind.slot_names().len()].into_boxed_slice();
        Self { kind, slots }
    }

    pub fn kind(&self) -> KnownStructKind {
        self.kind
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub(crate) fn set_slot(&mut self, slot: usize, value: Value) {
        self.slots[slot] = value;
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.kind.slot_index(name).map(|i| &self.slots[i])
    }
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub identifier: Arc<str>,
    pub label: Arc<str>,
    pub description: Option<Arc<str>>,
}

/// Descriptor of a generic struct type, shared by every chunk declaring the same class id.
#[derive(Debug)]
pub struct StructContentType {
    pub class_id: i64,
    pub identifier: Arc<str>,
    pub label: Option<Arc<str>>,
    pub description: Option<Arc<str>>,
    pub fields: Vec<StructField>,
}

static STRUCT_TYPES: LazyLock<Mutex<AHashMap<i64, Arc<StructContentType>>>> =
    LazyLock::new(|| Mutex::new(AHashMap::new()));

/// Returns the published descriptor for `class_id`, publishing the one built by `create` on first use.
pub fn shared_struct_type(
    class_id: i64,
    create: impl FnOnce() -> StructContentType,
) -> Arc<StructContentType> {
    let mut types = STRUCT_TYPES.lock();
    types
        .entry(class_id)
        .or_insert_with(|| Arc::new(create()))
        .clone()
}
