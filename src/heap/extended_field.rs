use std::hash::{Hash, Hasher};

use crate::heap::ref_chain::{ChainStep, ElementId, RefChainElement, RefChainGraph};

/// Classes whose fields say little on their own (unmodifiable wrappers, reference internals).
pub const NON_INFORMATIVE_FIELD_CLASS_PREFIXES: [&str; 2] = ["java.util.Collections$", "java.lang.ref."];
pub const NON_INFORMATIVE_FIELD_CLASSES: [&str; 1] = ["java.util.BitSet"];

pub fn is_non_informative_field_class(class_name: &str) -> bool {
    NON_INFORMATIVE_FIELD_CLASS_PREFIXES
        .iter()
        .any(|prefix| class_name.starts_with(prefix))
        || NON_INFORMATIVE_FIELD_CLASSES.contains(&class_name)
}

/// A field together with the collections, arrays and non-informative fields found between it and
/// the objects it leads to, e.g. `Baz.qux->{ArrayList}`, handled as one chain element.
///
/// Two extended fields are equal when they render the same, so structurally different chains with
/// an identical rendering are merged.
#[derive(Clone, Debug)]
pub struct ExtendedField {
    field: ChainStep,
    below: Vec<ChainStep>,
    rendered: Box<str>,
}

impl ExtendedField {
    /// `below` follows the chain downwards from `field`.
    pub fn new(field: ChainStep, below: Vec<ChainStep>) -> Self {
        let rendered = std::iter::once(&field)
            .chain(&below)
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("->");
        Self {
            field,
            below,
            rendered: rendered.into_boxed_str(),
        }
    }

    /// Walks up from `referer` to the nearest informative field.
    ///
    /// Returns `None` when a GC root is reached first.
    pub fn nearest_to(graph: &RefChainGraph, referer: ElementId) -> Option<ExtendedField> {
        let mut below = Vec::with_capacity(4);
        let mut current = Some(referer);
        let field = loop {
            let id = current?;
            match graph.element(id) {
                RefChainElement::GcRoot(_) => return None,
                RefChainElement::Step(step) => {
                    if step.is_field() && !is_non_informative_field_class(step.class().name()) {
                        break step.clone();
                    }
                    below.push(step.clone());
                    current = graph.referer(id);
                }
            }
        };
        below.reverse();
        Some(ExtendedField::new(field, below))
    }

    /// The field first, then the elements below it.
    pub fn steps(&self) -> impl Iterator<Item = &ChainStep> {
        std::iter::once(&self.field).chain(&self.below)
    }

    pub fn num_steps(&self) -> usize {
        1 + self.below.len()
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Materializes the steps as a detached chain in `graph` and returns its terminal element.
    /// Extended fields rendering the same share one chain.
    ///
    /// The field has no referer, so the chain holds exactly one element per step.
    pub fn to_reference_chain(&self, graph: &mut RefChainGraph) -> ElementId {
        graph.detached_chain(&self.rendered, |graph| {
            let mut terminal = graph.push_final(self.field.clone(), None);
            for step in &self.below {
                terminal = graph.push_final(step.clone(), Some(terminal));
            }
            terminal
        })
    }
}

impl PartialEq for ExtendedField {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for ExtendedField {}

impl Hash for ExtendedField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::{JavaClass, Root, RootKind};
    use crate::heap::ref_chain::RefChainBuilder;
    use std::sync::Arc;

    fn class(idx: u32, name: &str, fields: &[&str]) -> Arc<JavaClass> {
        Arc::new(JavaClass::new(idx, name).with_instance_fields(fields))
    }

    #[test]
    fn stops_at_nearest_informative_field() {
        let foo = class(0, "com.acme.Foo", &["bar"]);
        let list = class(1, "java.util.ArrayList", &[]);
        let baz = class(2, "com.acme.Baz", &["qux"]);
        let wrapper = class(3, "java.util.Collections$UnmodifiableList", &["list"]);
        let mut builder = RefChainBuilder::new();
        let root = builder.gc_root(Root::new(1, RootKind::JavaFrame));
        let bar = builder.instance_field_element(&foo, 0, root);
        let col = builder.compound_collection_element(&list, bar);
        let qux = builder.instance_field_element(&baz, 0, col);
        let wrapped = builder.instance_field_element(&wrapper, 0, qux);
        let terminal = builder.compound_collection_element(&list, wrapped);
        let graph = builder.finish();

        let field = ExtendedField::nearest_to(&graph, terminal).unwrap();
        assert_eq!(
            field.as_str(),
            "com.acme.Baz.qux->Collections$UnmodifiableList.list->{ArrayList}"
        );
        assert_eq!(
            ExtendedField::nearest_to(&graph, col).unwrap().as_str(),
            "com.acme.Foo.bar->{ArrayList}"
        );
        assert!(ExtendedField::nearest_to(&graph, root).is_none());
    }

    #[test]
    fn gc_root_without_field_is_discarded() {
        let list = class(1, "java.util.ArrayList", &[]);
        let mut builder = RefChainBuilder::new();
        let root = builder.gc_root(Root::new(1, RootKind::JniGlobal));
        let col = builder.compound_collection_element(&list, root);
        let graph = builder.finish();
        assert!(ExtendedField::nearest_to(&graph, col).is_none());
    }

    #[test]
    fn rebuilds_detached_chain() {
        let baz = class(2, "com.acme.Baz", &["qux"]);
        let list = class(1, "java.util.ArrayList", &[]);
        let array = class(4, "[Ljava.lang.Object;", &[]);
        let head = ChainStep::InstanceField {
            class: baz,
            field_idx: 0,
        };
        let below = vec![
            ChainStep::Collection { class: list },
            ChainStep::Array { class: array },
        ];
        let field = ExtendedField::new(head.clone(), below.clone());
        let steps: Vec<ChainStep> = field.steps().cloned().collect();
        assert_eq!(field.num_steps(), 3);
        let mut graph = RefChainGraph::default();
        let terminal = field.to_reference_chain(&mut graph);
        assert_eq!(field.clone().to_reference_chain(&mut graph), terminal);
        assert_eq!(graph.len(), 3);

        let chain: Vec<ElementId> = graph.ancestors(terminal).collect();
        assert_eq!(chain.len(), 3);
        for (id, step) in chain.iter().rev().zip(&steps) {
            let rebuilt = graph.element(*id).as_step().unwrap();
            assert!(rebuilt.shallow_eq(step));
            assert_eq!(rebuilt.field_idx(), step.field_idx());
        }
        assert_eq!(
            graph.to_string_in_reverse_order(terminal, 100),
            "com.acme.Baz.qux->{ArrayList}->Object[]"
        );
        assert_eq!(field, ExtendedField::new(head, below));
    }

    #[test]
    fn denylist() {
        assert!(is_non_informative_field_class("java.lang.ref.WeakReference"));
        assert!(is_non_informative_field_class("java.util.BitSet"));
        assert!(!is_non_informative_field_class("java.util.BitSetX"));
        assert!(!is_non_informative_field_class("java.util.HashMap"));
    }
}
