//! Per-class breakdowns of problematic collections and high-size objects.
//!
//! Entries are keyed by class name, so class versions are merged.

use std::cmp::Reverse;
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use indexmap::IndexMap;

use crate::heap::model::{JavaClass, ProblemKind};

/// Instances of one collection class suffering from one kind of problem.
#[derive(Clone, Debug)]
pub struct ClassAndOvhdCombo {
    pub class: Arc<JavaClass>,
    pub kind: ProblemKind,
    pub num_instances: u64,
    pub overhead: u64,
    /// Only maintained for kinds where [`ProblemKind::tracks_num_elements`] holds.
    pub total_num_elements: u64,
    pub max_num_elements: u64,
}

#[derive(Clone, Debug)]
pub struct ClassAndOvhdComboList {
    entries: IndexMap<(Arc<str>, ProblemKind), ClassAndOvhdCombo, RandomState>,
    total_overhead: u64,
}

impl Default for ClassAndOvhdComboList {
    fn default() -> Self {
        Self {
            entries: IndexMap::with_hasher(RandomState::new()),
            total_overhead: 0,
        }
    }
}

impl ClassAndOvhdComboList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection_info(
        &mut self,
        class: &Arc<JavaClass>,
        kind: ProblemKind,
        overhead: u64,
        num_instances: u64,
    ) {
        self.add_collection_info_with_num_els(class, kind, overhead, num_instances, 0, 0);
    }

    pub fn add_collection_info_with_num_els(
        &mut self,
        class: &Arc<JavaClass>,
        kind: ProblemKind,
        overhead: u64,
        num_instances: u64,
        total_num_elements: u64,
        max_num_elements: u64,
    ) {
        let combo = self
            .entries
            .entry((class.shared_name().clone(), kind))
            .or_insert_with(|| ClassAndOvhdCombo {
                class: class.clone(),
                kind,
                num_instances: 0,
                overhead: 0,
                total_num_elements: 0,
                max_num_elements: 0,
            });
        combo.num_instances += num_instances;
        combo.overhead += overhead;
        combo.total_num_elements += total_num_elements;
        combo.max_num_elements = combo.max_num_elements.max(max_num_elements);
        self.total_overhead += overhead;
    }

    pub fn merge(&mut self, other: &ClassAndOvhdComboList) {
        for combo in other.entries.values() {
            self.add_collection_info_with_num_els(
                &combo.class,
                combo.kind,
                combo.overhead,
                combo.num_instances,
                combo.total_num_elements,
                combo.max_num_elements,
            );
        }
    }

    pub fn total_overhead(&self) -> u64 {
        self.total_overhead
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of the same class are kept together. Classes with the highest overhead come
    /// first and, within a class, the kinds with the highest overhead come first.
    pub fn final_list(&self) -> Vec<ClassAndOvhdCombo> {
        let mut class_totals: AHashMap<&str, u64> = AHashMap::new();
        for combo in self.entries.values() {
            *class_totals.entry(combo.class.name()).or_insert(0) += combo.overhead;
        }
        let mut list: Vec<ClassAndOvhdCombo> = self.entries.values().cloned().collect();
        list.sort_by_key(|c| {
            (
                Reverse(class_totals.get(c.class.name()).copied().unwrap_or(0)),
                c.class.name().to_string(),
                Reverse(c.overhead),
                c.kind,
            )
        });
        list
    }
}

/// Instances of one class and their combined size.
#[derive(Clone, Debug)]
pub struct ClassAndSizeCombo {
    pub class: Arc<JavaClass>,
    pub num_instances: u64,
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct ClassAndSizeComboList {
    entries: IndexMap<Arc<str>, ClassAndSizeCombo, RandomState>,
    total_size: u64,
}

impl Default for ClassAndSizeComboList {
    fn default() -> Self {
        Self {
            entries: IndexMap::with_hasher(RandomState::new()),
            total_size: 0,
        }
    }
}

impl ClassAndSizeComboList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance_info(&mut self, class: &Arc<JavaClass>, size: u64, num_instances: u64) {
        let combo = self
            .entries
            .entry(class.shared_name().clone())
            .or_insert_with(|| ClassAndSizeCombo {
                class: class.clone(),
                num_instances: 0,
                size: 0,
            });
        combo.num_instances += num_instances;
        combo.size += size;
        self.total_size += size;
    }

    pub fn merge(&mut self, other: &ClassAndSizeComboList) {
        for combo in other.entries.values() {
            self.add_instance_info(&combo.class, combo.size, combo.num_instances);
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Largest classes first.
    pub fn final_list(&self) -> Vec<ClassAndSizeCombo> {
        let mut list: Vec<ClassAndSizeCombo> = self.entries.values().cloned().collect();
        list.sort_by(|a, b| {
            b.size
                .cmp(&a.size)
                .then_with(|| a.class.name().cmp(b.class.name()))
        });
        list
    }
}
