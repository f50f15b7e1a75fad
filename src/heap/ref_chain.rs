//! Reference chains: the path of fields, collections and arrays leading from a GC root to an object.
//!
//! Chains are built while the heap is walked, in a [`RefChainBuilder`] where every element knows
//! its children, so that the walker can find an already existing `Class.field` under a given parent
//! quickly. Once the walk is over, every root is switched to the final form, where each element only
//! knows its referer, and the builder is turned into a read-only [`RefChainGraph`].
//!
//! When elements are aggregated, two versions of the same class (same name, different loaders) are
//! treated as one class.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

use ahash::{AHashMap, AHasher};

use crate::heap::model::{JavaClass, Root};

/// Past this many children, static field children are indexed by a hash table.
const MAX_STATIC_CHILDREN_LIST_SIZE: usize = 100;

const INITIAL_STACK_CAPACITY: usize = 80;

/// Index of an element in the chain arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ElementId(u32);

impl ElementId {
    fn index(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        ElementId(0)
    }
}

/// A non-root step of a reference chain.
#[derive(Clone, Debug)]
pub enum ChainStep {
    /// `Foo.bar`, where `bar` is an instance field of `Foo` or one of its superclasses.
    InstanceField { class: Arc<JavaClass>, field_idx: u16 },
    /// A collapsed custom linked list, e.g. `{Node.next}`.
    LinkedList { class: Arc<JavaClass>, field_idx: u16 },
    /// `Foo:baz`, where `baz` is a static field declared in `Foo`.
    StaticField { class: Arc<JavaClass>, field_idx: u16 },
    /// A known collection with its implementation details collapsed, e.g. `{HashMap}`.
    Collection { class: Arc<JavaClass> },
    /// References aggregated from an object array, e.g. `Object[]`.
    Array { class: Arc<JavaClass> },
}

impl ChainStep {
    pub fn class(&self) -> &Arc<JavaClass> {
        match self {
            ChainStep::InstanceField { class, .. }
            | ChainStep::LinkedList { class, .. }
            | ChainStep::StaticField { class, .. }
            | ChainStep::Collection { class }
            | ChainStep::Array { class } => class,
        }
    }

    pub fn field_idx(&self) -> Option<u16> {
        match self {
            ChainStep::InstanceField { field_idx, .. }
            | ChainStep::LinkedList { field_idx, .. }
            | ChainStep::StaticField { field_idx, .. } => Some(*field_idx),
            ChainStep::Collection { .. } | ChainStep::Array { .. } => None,
        }
    }

    /// Instance fields, linked lists and static fields all name a `Class.field` pair.
    pub fn is_field(&self) -> bool {
        self.field_idx().is_some()
    }

    fn variant_tag(&self) -> u8 {
        match self {
            ChainStep::InstanceField { .. } => 0,
            ChainStep::LinkedList { .. } => 1,
            ChainStep::StaticField { .. } => 2,
            ChainStep::Collection { .. } => 3,
            ChainStep::Array { .. } => 4,
        }
    }

    pub fn shallow_eq(&self, other: &ChainStep) -> bool {
        self.variant_tag() == other.variant_tag()
            && self.field_idx() == other.field_idx()
            && self.class().same_class(other.class())
    }

    pub fn shallow_hash(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.variant_tag().hash(&mut hasher);
        self.class().name().hash(&mut hasher);
        self.field_idx().hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStep::InstanceField { class, field_idx } => write!(
                f,
                "{}.{}",
                class.human_friendly_name(),
                class.instance_field_name(*field_idx)
            ),
            ChainStep::LinkedList { class, field_idx } => write!(
                f,
                "{{{}.{}}}",
                class.human_friendly_name(),
                class.instance_field_name(*field_idx)
            ),
            ChainStep::StaticField { class, field_idx } => write!(
                f,
                "{}:{}",
                class.human_friendly_name(),
                class.static_field_name(*field_idx)
            ),
            ChainStep::Collection { class } => write!(f, "{{{}}}", class.human_friendly_name()),
            ChainStep::Array { class } => f.write_str(&class.human_friendly_name()),
        }
    }
}

/// One element of a reference chain: either a GC root or a step below one.
#[derive(Clone, Debug)]
pub enum RefChainElement {
    GcRoot(Root),
    Step(ChainStep),
}

impl RefChainElement {
    pub fn java_class(&self) -> Option<&Arc<JavaClass>> {
        match self {
            RefChainElement::GcRoot(_) => None,
            RefChainElement::Step(step) => Some(step.class()),
        }
    }

    pub fn as_step(&self) -> Option<&ChainStep> {
        match self {
            RefChainElement::GcRoot(_) => None,
            RefChainElement::Step(step) => Some(step),
        }
    }

    pub fn is_gc_root(&self) -> bool {
        matches!(self, RefChainElement::GcRoot(_))
    }

    pub fn shallow_eq(&self, other: &RefChainElement) -> bool {
        match (self, other) {
            (RefChainElement::GcRoot(a), RefChainElement::GcRoot(b)) => a == b,
            (RefChainElement::Step(a), RefChainElement::Step(b)) => a.shallow_eq(b),
            _ => false,
        }
    }

    pub fn shallow_hash(&self) -> u64 {
        match self {
            RefChainElement::GcRoot(root) => {
                let mut hasher = AHasher::default();
                root.hash(&mut hasher);
                hasher.finish()
            }
            RefChainElement::Step(step) => step.shallow_hash(),
        }
    }
}

impl fmt::Display for RefChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefChainElement::GcRoot(root) => f.write_str(&root.id_string()),
            RefChainElement::Step(step) => step.fmt(f),
        }
    }
}

#[derive(Debug, Default)]
struct Children {
    list: Vec<ElementId>,
    statics_by_key: Option<AHashMap<(Arc<str>, u16), ElementId>>,
}

#[derive(Debug)]
struct BuildNode {
    element: RefChainElement,
    children: Children,
}

/// Build-time arena: elements know their children so that existing ones can be looked up.
#[derive(Debug, Default)]
pub struct RefChainBuilder {
    nodes: Vec<BuildNode>,
    referers: Vec<Option<ElementId>>,
    roots: AHashMap<Root, ElementId>,
}

impl RefChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self, id: ElementId) -> &RefChainElement {
        &self.nodes[id.index()].element
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, element: RefChainElement) -> ElementId {
        let id = ElementId(self.nodes.len() as u32);
        self.nodes.push(BuildNode {
            element,
            children: Children::default(),
        });
        self.referers.push(None);
        id
    }

    fn attach(&mut self, referer: ElementId, step: ChainStep) -> ElementId {
        let child = self.push(RefChainElement::Step(step));
        self.nodes[referer.index()].children.list.push(child);
        child
    }

    /// Returns the element for the given GC root, creating it on first use.
    pub fn gc_root(&mut self, root: Root) -> ElementId {
        if let Some(id) = self.roots.get(&root) {
            return *id;
        }
        let id = self.push(RefChainElement::GcRoot(root.clone()));
        self.roots.insert(root, id);
        id
    }

    fn find_child<F>(&self, referer: ElementId, matches: F) -> Option<ElementId>
    where
        F: Fn(&ChainStep) -> bool,
    {
        self.nodes[referer.index()]
            .children
            .list
            .iter()
            .copied()
            .find(|child| match &self.nodes[child.index()].element {
                RefChainElement::Step(step) => matches(step),
                RefChainElement::GcRoot(_) => false,
            })
    }

    /// Creates or returns the existing `Class.field` element under `referer`.
    pub fn instance_field_element(
        &mut self,
        class: &Arc<JavaClass>,
        field_idx: u16,
        referer: ElementId,
    ) -> ElementId {
        let existing = self.find_child(referer, |step| match step {
            ChainStep::InstanceField {
                class: c,
                field_idx: f,
            } => *f == field_idx && c.same_class(class),
            _ => false,
        });
        existing.unwrap_or_else(|| {
            self.attach(
                referer,
                ChainStep::InstanceField {
                    class: class.clone(),
                    field_idx,
                },
            )
        })
    }

    /// Creates or returns the existing `Class:static` element under `referer`.
    ///
    /// Some referers (e.g. a registry holding thousands of classes) end up with very many
    /// static children, so past a threshold they are looked up through a hash index.
    pub fn static_field_element(
        &mut self,
        class: &Arc<JavaClass>,
        field_idx: u16,
        referer: ElementId,
    ) -> ElementId {
        let key = (class.shared_name().clone(), field_idx);
        let children = &self.nodes[referer.index()].children;
        let existing = match &children.statics_by_key {
            Some(index) => index.get(&key).copied(),
            // recently added statics are the most likely to be asked for again
            None => children.list.iter().rev().copied().find(|child| {
                match &self.nodes[child.index()].element {
                    RefChainElement::Step(ChainStep::StaticField {
                        class: c,
                        field_idx: f,
                    }) => *f == field_idx && c.same_class(class),
                    _ => false,
                }
            }),
        };
        if let Some(id) = existing {
            return id;
        }

        let child = self.attach(
            referer,
            ChainStep::StaticField {
                class: class.clone(),
                field_idx,
            },
        );
        let children = &self.nodes[referer.index()].children;
        if children.statics_by_key.is_none() && children.list.len() > MAX_STATIC_CHILDREN_LIST_SIZE {
            let index: AHashMap<(Arc<str>, u16), ElementId> = children
                .list
                .iter()
                .filter_map(|id| match &self.nodes[id.index()].element {
                    RefChainElement::Step(ChainStep::StaticField { class, field_idx }) => {
                        Some(((class.shared_name().clone(), *field_idx), *id))
                    }
                    _ => None,
                })
                .collect();
            self.nodes[referer.index()].children.statics_by_key = Some(index);
        } else if let Some(index) = &mut self.nodes[referer.index()].children.statics_by_key {
            index.insert(key, child);
        }
        child
    }

    /// Creates or returns the existing `{Collection}` element under `referer`.
    pub fn compound_collection_element(
        &mut self,
        class: &Arc<JavaClass>,
        referer: ElementId,
    ) -> ElementId {
        let existing = self.find_child(referer, |step| match step {
            ChainStep::Collection { class: c } => c.same_class(class),
            _ => false,
        });
        existing
            .unwrap_or_else(|| self.attach(referer, ChainStep::Collection { class: class.clone() }))
    }

    /// Creates or returns the existing `{Class.field}` linked list element under `referer`.
    pub fn compound_linked_list_element(
        &mut self,
        class: &Arc<JavaClass>,
        field_idx: u16,
        referer: ElementId,
    ) -> ElementId {
        let existing = self.find_child(referer, |step| match step {
            ChainStep::LinkedList {
                class: c,
                field_idx: f,
            } => *f == field_idx && c.same_class(class),
            _ => false,
        });
        existing.unwrap_or_else(|| {
            self.attach(
                referer,
                ChainStep::LinkedList {
                    class: class.clone(),
                    field_idx,
                },
            )
        })
    }

    /// Creates or returns the existing array element under `referer`.
    pub fn compound_array_element(&mut self, class: &Arc<JavaClass>, referer: ElementId) -> ElementId {
        let existing = self.find_child(referer, |step| match step {
            ChainStep::Array { class: c } => c.name() == class.name(),
            _ => false,
        });
        existing.unwrap_or_else(|| self.attach(referer, ChainStep::Array { class: class.clone() }))
    }

    fn take_children(&mut self, id: ElementId) -> Vec<ElementId> {
        mem::take(&mut self.nodes[id.index()].children).list
    }

    /// Converts the subtree hanging off `root` from the children form to the referer form.
    ///
    /// Must be called for every GC root once the walk is over. Chains can be many thousands of
    /// elements deep, so the tree is walked with an explicit stack. Children lookups below `root`
    /// no longer find anything afterwards.
    pub fn switch_tree_to_final_format(&mut self, root: ElementId) {
        let mut stack: Vec<(ElementId, Vec<ElementId>, usize)> =
            Vec::with_capacity(INITIAL_STACK_CAPACITY);
        let children = self.take_children(root);
        stack.push((root, children, 0));
        while let Some((parent, children, next_idx)) = stack.last_mut() {
            if *next_idx < children.len() {
                let child = children[*next_idx];
                *next_idx += 1;
                self.referers[child.index()] = Some(*parent);
                let grand_children = self.take_children(child);
                if !grand_children.is_empty() {
                    stack.push((child, grand_children, 0));
                }
            } else {
                stack.pop();
            }
        }
    }

    /// Switches every GC root and freezes the arena.
    pub fn finish(mut self) -> RefChainGraph {
        let mut roots: Vec<ElementId> = self.roots.values().copied().collect();
        roots.sort();
        for root in roots {
            self.switch_tree_to_final_format(root);
        }
        let nodes = self
            .nodes
            .into_iter()
            .zip(self.referers)
            .map(|(node, referer)| FinalNode {
                element: node.element,
                referer,
            })
            .collect();
        RefChainGraph {
            nodes,
            detached_chains: AHashMap::new(),
        }
    }
}

#[derive(Debug)]
struct FinalNode {
    element: RefChainElement,
    referer: Option<ElementId>,
}

/// Read-only arena of finalized chains: each element points at its referer.
#[derive(Debug, Default)]
pub struct RefChainGraph {
    nodes: Vec<FinalNode>,
    /// Terminal element of each derived chain, by rendering.
    detached_chains: AHashMap<Box<str>, ElementId>,
}

impl RefChainGraph {
    pub fn element(&self, id: ElementId) -> &RefChainElement {
        &self.nodes[id.index()].element
    }

    /// The parent element, `None` for GC roots and for the head of a detached chain.
    pub fn referer(&self, id: ElementId) -> Option<ElementId> {
        self.nodes[id.index()].referer
    }

    pub fn java_class(&self, id: ElementId) -> Option<&Arc<JavaClass>> {
        self.element(id).java_class()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends an element that is already in final form, used to materialize derived chains.
    pub fn push_final(&mut self, step: ChainStep, referer: Option<ElementId>) -> ElementId {
        let id = ElementId(self.nodes.len() as u32);
        self.nodes.push(FinalNode {
            element: RefChainElement::Step(step),
            referer,
        });
        id
    }

    /// The derived chain rendered as `key`, materialized by `build` on first request only.
    pub fn detached_chain(
        &mut self,
        key: &str,
        build: impl FnOnce(&mut RefChainGraph) -> ElementId,
    ) -> ElementId {
        if let Some(id) = self.detached_chains.get(key) {
            return *id;
        }
        let id = build(self);
        self.detached_chains.insert(Box::from(key), id);
        id
    }

    /// The element itself followed by all its referers, up to the root.
    pub fn ancestors(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        std::iter::successors(Some(id), move |current| self.referer(*current))
    }

    pub fn deep_eq(&self, a: ElementId, b: ElementId) -> bool {
        let mut left = self.ancestors(a);
        let mut right = self.ancestors(b);
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(l), Some(r)) if l == r => return true,
                (Some(l), Some(r)) => {
                    if !self.element(l).shallow_eq(self.element(r)) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    pub fn deep_hash(&self, id: ElementId) -> u64 {
        self.ancestors(id)
            .map(|e| self.element(e).shallow_hash())
            .fold(0u64, |acc, h| acc.wrapping_shl(4).wrapping_add(h))
    }

    /// Renders the chain top-down, e.g. `Foo.bar->{ArrayList}->Baz.qux`, keeping at most
    /// `max_depth` elements next to `id`.
    pub fn to_string_in_reverse_order(&self, id: ElementId, max_depth: usize) -> String {
        let mut elements: Vec<ElementId> = self.ancestors(id).take(max_depth + 1).collect();
        let truncated = elements.len() > max_depth;
        if truncated {
            elements.pop();
        }
        let mut result = String::new();
        if truncated {
            result.push_str("...");
        }
        for (i, element) in elements.iter().rev().enumerate() {
            if i > 0 || truncated {
                result.push_str("->");
            }
            result.push_str(&self.element(*element).to_string());
        }
        result
    }
}
