//! Mutable per-chain accumulators, grown while the heap is walked.
//!
//! There is one accumulator kind per problem category. An accumulator can be copied, merged with
//! another of the same kind (that is how the nearest-field view is built) and finally turned into
//! the details of a [`ReferencedObjCluster`](crate::heap::referenced_cluster::ReferencedObjCluster).

use std::hash::Hash;
use std::sync::Arc;

use crate::heap::combo_list::{ClassAndOvhdComboList, ClassAndSizeComboList};
use crate::heap::model::{JavaClass, PrimitiveArray, ProblemKind};
use crate::heap::object_to_int_map::{ObjectToIntMap, SmallSet};
use crate::heap::referenced_cluster::{ClusterDetails, DupValueEntry};

pub trait ClusterNode: Clone {
    fn total_overhead(&self) -> u64;

    /// Adds everything `other` accumulated to this node.
    fn add_cluster(&mut self, other: &Self);

    /// Sorted, read-only breakdown of what was accumulated.
    fn final_details(&self) -> ClusterDetails;
}

/// Problematic collections, by class and problem kind, plus the good ones seen on the same chain.
#[derive(Clone, Debug, Default)]
pub struct CollectionCluster {
    entries: ClassAndOvhdComboList,
    num_good_collections: u64,
}

impl CollectionCluster {
    pub fn add_collection_instance(&mut self, class: &Arc<JavaClass>, kind: ProblemKind, ovhd: u64) {
        self.entries.add_collection_info(class, kind, ovhd, 1);
    }

    pub fn add_collection_instance_with_num_els(
        &mut self,
        class: &Arc<JavaClass>,
        kind: ProblemKind,
        ovhd: u64,
        num_elements: u64,
    ) {
        self.entries
            .add_collection_info_with_num_els(class, kind, ovhd, 1, num_elements, num_elements);
    }

    pub fn add_good_collection(&mut self) {
        self.num_good_collections += 1;
    }

    pub fn num_good_collections(&self) -> u64 {
        self.num_good_collections
    }
}

impl ClusterNode for CollectionCluster {
    fn total_overhead(&self) -> u64 {
        self.entries.total_overhead()
    }

    fn add_cluster(&mut self, other: &Self) {
        self.entries.merge(&other.entries);
        self.num_good_collections += other.num_good_collections;
    }

    fn final_details(&self) -> ClusterDetails {
        ClusterDetails::Collections {
            entries: self.entries.final_list(),
            num_good_collections: self.num_good_collections,
        }
    }
}

/// Instance count and overhead per duplicated value.
#[derive(Clone, Debug)]
struct DupValues<K: Hash + Eq> {
    counts: ObjectToIntMap<K>,
    overheads: ObjectToIntMap<K>,
    total_overhead: u64,
}

impl<K: Hash + Eq + Clone + Ord> Default for DupValues<K> {
    fn default() -> Self {
        Self {
            counts: ObjectToIntMap::new(),
            overheads: ObjectToIntMap::new(),
            total_overhead: 0,
        }
    }
}

impl<K: Hash + Eq + Clone + Ord> DupValues<K> {
    fn add(&mut self, value: K, overhead: u64) {
        self.counts.put_one_or_increment(value.clone());
        self.overheads.put_or_increment_by(value, overhead);
        self.total_overhead += overhead;
    }

    fn merge(&mut self, other: &DupValues<K>) {
        self.counts.add_all(&other.counts);
        self.overheads.add_all(&other.overheads);
        self.total_overhead += other.total_overhead;
    }

    fn sorted_entries(&self) -> Vec<DupValueEntry<K>> {
        self.counts
            .entries_sorted_by_value_then_key()
            .into_iter()
            .map(|(value, num_instances)| {
                let overhead = self.overheads.get(&value).unwrap_or(0);
                DupValueEntry {
                    value,
                    num_instances,
                    overhead,
                }
            })
            .collect()
    }
}

/// Duplicated strings reachable through one chain.
#[derive(Clone, Debug, Default)]
pub struct DupStringCluster {
    strings: DupValues<Arc<str>>,
    num_dup_backing_arrays: u64,
    num_non_dup_strings: u64,
}

impl DupStringCluster {
    pub fn add_dup_string(&mut self, value: Arc<str>, overhead: u64, has_dup_backing_array: bool) {
        self.strings.add(value, overhead);
        if has_dup_backing_array {
            self.num_dup_backing_arrays += 1;
        }
    }

    pub fn add_non_dup_string(&mut self) {
        self.num_non_dup_strings += 1;
    }
}

impl ClusterNode for DupStringCluster {
    fn total_overhead(&self) -> u64 {
        self.strings.total_overhead
    }

    fn add_cluster(&mut self, other: &Self) {
        self.strings.merge(&other.strings);
        self.num_dup_backing_arrays += other.num_dup_backing_arrays;
        self.num_non_dup_strings += other.num_non_dup_strings;
    }

    fn final_details(&self) -> ClusterDetails {
        ClusterDetails::DupStrings {
            entries: self.strings.sorted_entries(),
            num_dup_backing_arrays: self.num_dup_backing_arrays,
            num_non_dup_strings: self.num_non_dup_strings,
        }
    }
}

/// Duplicated primitive arrays reachable through one chain, compared by content.
#[derive(Clone, Debug, Default)]
pub struct DupArrayCluster {
    arrays: DupValues<PrimitiveArray>,
    num_non_dup_arrays: u64,
}

impl DupArrayCluster {
    pub fn add_dup_array(&mut self, array: PrimitiveArray, overhead: u64) {
        self.arrays.add(array, overhead);
    }

    pub fn add_non_dup_array(&mut self) {
        self.num_non_dup_arrays += 1;
    }
}

impl ClusterNode for DupArrayCluster {
    fn total_overhead(&self) -> u64 {
        self.arrays.total_overhead
    }

    fn add_cluster(&mut self, other: &Self) {
        self.arrays.merge(&other.arrays);
        self.num_non_dup_arrays += other.num_non_dup_arrays;
    }

    fn final_details(&self) -> ClusterDetails {
        ClusterDetails::DupArrays {
            entries: self.arrays.sorted_entries(),
            num_non_dup_arrays: self.num_non_dup_arrays,
        }
    }
}

/// Weak hash maps whose values reference their keys back.
#[derive(Clone, Debug, Default)]
pub struct WeakHashMapCluster {
    col_classes: SmallSet<Arc<str>>,
    value_type_and_field_samples: SmallSet<Arc<str>>,
    num_instances: u64,
    total_overhead: u64,
}

impl WeakHashMapCluster {
    pub fn add_weak_hash_map(&mut self, col_class: Arc<str>, ovhd: u64, value_type_and_field_sample: Arc<str>) {
        self.total_overhead += ovhd;
        self.num_instances += 1;
        self.col_classes.add(col_class);
        self.value_type_and_field_samples
            .add(value_type_and_field_sample);
    }
}

impl ClusterNode for WeakHashMapCluster {
    fn total_overhead(&self) -> u64 {
        self.total_overhead
    }

    fn add_cluster(&mut self, other: &Self) {
        self.total_overhead += other.total_overhead;
        self.num_instances += other.num_instances;
        self.col_classes.add_all(&other.col_classes);
        self.value_type_and_field_samples
            .add_all(&other.value_type_and_field_samples);
    }

    fn final_details(&self) -> ClusterDetails {
        ClusterDetails::WeakHashMaps {
            num_instances: self.num_instances,
            col_classes: self.col_classes.clone(),
            value_type_and_field_samples: self.value_type_and_field_samples.clone(),
        }
    }
}

/// Objects whose impl-inclusive size is known or suspected to be high, per class.
#[derive(Clone, Debug, Default)]
pub struct HighSizeObjCluster {
    entries: ClassAndSizeComboList,
}

impl HighSizeObjCluster {
    pub fn add_instance(&mut self, class: &Arc<JavaClass>, impl_inclusive_size: u64) {
        self.entries.add_instance_info(class, impl_inclusive_size, 1);
    }
}

impl ClusterNode for HighSizeObjCluster {
    fn total_overhead(&self) -> u64 {
        self.entries.total_size()
    }

    fn add_cluster(&mut self, other: &Self) {
        self.entries.merge(&other.entries);
    }

    fn final_details(&self) -> ClusterDetails {
        ClusterDetails::HighSizeObjects {
            entries: self.entries.final_list(),
        }
    }
}
