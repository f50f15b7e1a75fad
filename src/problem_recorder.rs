//! Aggregation of problematic objects into clusters, keyed by reference chain.
//!
//! The heap walker reports every problematic (and some good) object together with the finalized
//! chain element leading to it. Observations reported against the same element end up in the same
//! accumulator. Two walks that build structurally identical chains through different elements are
//! not merged at this stage.

use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use indexmap::map::Entry;
use indexmap::IndexMap;
use log::debug;

use crate::heap::cluster::{
    ClusterNode, CollectionCluster, DupArrayCluster, DupStringCluster, HighSizeObjCluster,
    WeakHashMapCluster,
};
use crate::heap::extended_field::ExtendedField;
use crate::heap::model::{
    CollectionDescriptor, HeapObject, HeapStats, ObjectId, PrimitiveArray, ProblemKind, Snapshot,
    HIGH_SIZE_FLAG,
};
use crate::heap::ref_chain::{ElementId, RefChainGraph};
use crate::heap::referenced_cluster::{
    ProblemCategory, ReferencedObjCluster, CHAIN_STRING_MAX_DEPTH,
};

/// A class is a high-size candidate if its instances weigh at least 1/50 of the heap.
const HIGH_SIZE_CLASS_DIVISOR: u64 = 50;

/// High-size clusters are filtered with a threshold this many times higher than the others.
const HIGH_SIZE_THRESHOLD_FACTOR: u64 = 5;

/// Observations made by the heap walker.
pub trait ProblemRecorder {
    /// Called once before the walk starts.
    fn initialize(&mut self, snapshot: &Snapshot, heap_stats: &HeapStats);

    fn record_problematic_collection(
        &mut self,
        col: &HeapObject,
        col_desc: &CollectionDescriptor,
        kind: ProblemKind,
        ovhd: u64,
        referer: ElementId,
    );

    fn record_good_collection(
        &mut self,
        col: &HeapObject,
        col_desc: &CollectionDescriptor,
        referer: ElementId,
    );

    fn record_duplicate_string(
        &mut self,
        string_obj: &HeapObject,
        value: Arc<str>,
        impl_inclusive_size: u64,
        ovhd: u64,
        has_dup_backing_array: bool,
        referer: ElementId,
    );

    fn record_non_duplicate_string(
        &mut self,
        string_obj: &HeapObject,
        impl_inclusive_size: u64,
        referer: ElementId,
    );

    fn record_duplicate_array(
        &mut self,
        array_obj: &HeapObject,
        content: &PrimitiveArray,
        ovhd: u64,
        referer: ElementId,
    );

    fn record_non_duplicate_array(&mut self, array_obj: &HeapObject, referer: ElementId);

    fn record_weak_hash_map_with_back_refs(
        &mut self,
        col: &HeapObject,
        col_desc: &CollectionDescriptor,
        ovhd: u64,
        value_type_and_field_sample: &str,
        referer: ElementId,
    );

    /// Whether the walker should report `obj` through [`ProblemRecorder::record_good_instance`].
    fn should_record_good_instance(&self, obj: &HeapObject) -> bool;

    fn record_good_instance(&mut self, obj: &HeapObject, referer: ElementId);
}

/// Collects clusters in a compact form, suitable for a batch report.
#[derive(Debug, Default)]
pub struct BatchProblemRecorder {
    referer_to_hs_cluster: AHashMap<ElementId, HighSizeObjCluster>,
    referer_to_col_cluster: AHashMap<ElementId, CollectionCluster>,
    referer_to_ds_cluster: AHashMap<ElementId, DupStringCluster>,
    referer_to_da_cluster: AHashMap<ElementId, DupArrayCluster>,
    referer_to_wm_cluster: AHashMap<ElementId, WeakHashMapCluster>,
    last_obj: Option<ObjectId>,
}

impl BatchProblemRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_high_size_candidate(&self, obj: &HeapObject) -> bool {
        self.last_obj != Some(obj.id) && obj.class.flag_is_set(HIGH_SIZE_FLAG)
    }

    fn record_high_size_if_candidate(&mut self, obj: &HeapObject, referer: ElementId, size: u64) {
        if self.is_high_size_candidate(obj) {
            self.record_high_size_object(obj, referer, size);
        }
    }

    fn record_high_size_object(&mut self, obj: &HeapObject, referer: ElementId, size: u64) {
        self.referer_to_hs_cluster
            .entry(referer)
            .or_default()
            .add_instance(&obj.class, size);
        self.last_obj = Some(obj.id);
    }

    /// Builds both views of every category.
    ///
    /// Nearest-field clusters point at detached chains appended to `graph` once per distinct field.
    pub fn get_detailed_stats(&self, graph: &mut RefChainGraph, min_ovhd: u64) -> DetailedStats {
        let hs_min_ovhd = min_ovhd.saturating_mul(HIGH_SIZE_THRESHOLD_FACTOR);
        let full_chain = [
            full_chain_clusters(&self.referer_to_col_cluster, graph, min_ovhd),
            full_chain_clusters(&self.referer_to_ds_cluster, graph, min_ovhd),
            full_chain_clusters(&self.referer_to_da_cluster, graph, min_ovhd),
            full_chain_clusters(&self.referer_to_wm_cluster, graph, min_ovhd),
            full_chain_clusters(&self.referer_to_hs_cluster, graph, hs_min_ovhd),
        ];
        let nearest_field = [
            nearest_field_clusters(&self.referer_to_col_cluster, graph, min_ovhd),
            nearest_field_clusters(&self.referer_to_ds_cluster, graph, min_ovhd),
            nearest_field_clusters(&self.referer_to_da_cluster, graph, min_ovhd),
            nearest_field_clusters(&self.referer_to_wm_cluster, graph, min_ovhd),
            nearest_field_clusters(&self.referer_to_hs_cluster, graph, hs_min_ovhd),
        ];
        debug!(
            min_ovhd = min_ovhd,
            full_chain = full_chain.iter().map(Vec::len).sum::<usize>(),
            nearest_field = nearest_field.iter().map(Vec::len).sum::<usize>();
            "clusters finalized"
        );
        DetailedStats {
            min_ovhd,
            full_chain,
            nearest_field,
        }
    }
}

impl ProblemRecorder for BatchProblemRecorder {
    fn initialize(&mut self, snapshot: &Snapshot, heap_stats: &HeapStats) {
        // the impl-inclusive size of a collection is only known once inspected,
        // so every collection class is a candidate
        let min_ovhd_for_hs_classes = heap_stats.total_obj_size / HIGH_SIZE_CLASS_DIVISOR;
        let mut flagged = 0;
        for class in snapshot.classes() {
            if class.is_collection() || class.total_shallow_instance_size() >= min_ovhd_for_hs_classes {
                class.set_flag(HIGH_SIZE_FLAG);
                flagged += 1;
            }
        }
        debug!(classes = snapshot.classes().len(), flagged = flagged; "high size classes flagged");
    }

    fn record_problematic_collection(
        &mut self,
        col: &HeapObject,
        col_desc: &CollectionDescriptor,
        kind: ProblemKind,
        ovhd: u64,
        referer: ElementId,
    ) {
        let cluster = self.referer_to_col_cluster.entry(referer).or_default();
        if kind.tracks_num_elements() {
            cluster.add_collection_instance_with_num_els(
                &col.class,
                kind,
                ovhd,
                col_desc.num_elements as u64,
            );
        } else {
            cluster.add_collection_instance(&col.class, kind, ovhd);
        }
        self.record_high_size_if_candidate(col, referer, col_desc.impl_size as u64);
    }

    fn record_good_collection(
        &mut self,
        col: &HeapObject,
        col_desc: &CollectionDescriptor,
        referer: ElementId,
    ) {
        self.referer_to_col_cluster
            .entry(referer)
            .or_default()
            .add_good_collection();
        self.record_high_size_if_candidate(col, referer, col_desc.impl_size as u64);
    }

    fn record_duplicate_string(
        &mut self,
        string_obj: &HeapObject,
        value: Arc<str>,
        impl_inclusive_size: u64,
        ovhd: u64,
        has_dup_backing_array: bool,
        referer: ElementId,
    ) {
        self.referer_to_ds_cluster
            .entry(referer)
            .or_default()
            .add_dup_string(value, ovhd, has_dup_backing_array);
        self.record_high_size_if_candidate(string_obj, referer, impl_inclusive_size);
    }

    fn record_non_duplicate_string(
        &mut self,
        string_obj: &HeapObject,
        impl_inclusive_size: u64,
        referer: ElementId,
    ) {
        self.referer_to_ds_cluster
            .entry(referer)
            .or_default()
            .add_non_dup_string();
        self.record_high_size_if_candidate(string_obj, referer, impl_inclusive_size);
    }

    fn record_duplicate_array(
        &mut self,
        array_obj: &HeapObject,
        content: &PrimitiveArray,
        ovhd: u64,
        referer: ElementId,
    ) {
        self.referer_to_da_cluster
            .entry(referer)
            .or_default()
            .add_dup_array(content.clone(), ovhd);
        self.record_high_size_if_candidate(array_obj, referer, array_obj.size as u64);
    }

    fn record_non_duplicate_array(&mut self, array_obj: &HeapObject, referer: ElementId) {
        self.referer_to_da_cluster
            .entry(referer)
            .or_default()
            .add_non_dup_array();
        self.record_high_size_if_candidate(array_obj, referer, array_obj.size as u64);
    }

    fn record_weak_hash_map_with_back_refs(
        &mut self,
        col: &HeapObject,
        col_desc: &CollectionDescriptor,
        ovhd: u64,
        value_type_and_field_sample: &str,
        referer: ElementId,
    ) {
        self.referer_to_wm_cluster
            .entry(referer)
            .or_default()
            .add_weak_hash_map(
                Arc::from(col.class.human_friendly_name()),
                ovhd,
                Arc::from(value_type_and_field_sample),
            );
        self.record_high_size_if_candidate(col, referer, col_desc.impl_size as u64);
    }

    fn should_record_good_instance(&self, obj: &HeapObject) -> bool {
        self.is_high_size_candidate(obj)
    }

    fn record_good_instance(&mut self, obj: &HeapObject, referer: ElementId) {
        self.record_high_size_object(obj, referer, obj.size as u64);
    }
}

/// Accumulators in element order, so that results do not depend on hash map iteration.
fn sorted_entries<T>(map: &AHashMap<ElementId, T>) -> Vec<(ElementId, &T)> {
    let mut entries: Vec<(ElementId, &T)> = map.iter().map(|(id, c)| (*id, c)).collect();
    entries.sort_by_key(|(id, _)| *id);
    entries
}

fn final_cluster<T: ClusterNode>(
    graph: &RefChainGraph,
    referer: ElementId,
    cluster: &T,
) -> ReferencedObjCluster {
    ReferencedObjCluster::new(
        referer,
        graph.to_string_in_reverse_order(referer, CHAIN_STRING_MAX_DEPTH),
        cluster.total_overhead(),
        cluster.final_details(),
    )
}

fn full_chain_clusters<T: ClusterNode>(
    referer_to_cluster: &AHashMap<ElementId, T>,
    graph: &RefChainGraph,
    min_ovhd: u64,
) -> Vec<ReferencedObjCluster> {
    let mut clusters: Vec<ReferencedObjCluster> = sorted_entries(referer_to_cluster)
        .into_iter()
        .filter(|(_, cluster)| cluster.total_overhead() >= min_ovhd)
        .map(|(referer, cluster)| final_cluster(graph, referer, cluster))
        .collect();
    clusters.sort_by(ReferencedObjCluster::default_order);
    clusters
}

/// Re-keys every accumulator by the nearest informative field above it, merging copies of the
/// accumulators that meet on the same field. Chains without such a field are dropped.
fn nearest_field_clusters<T: ClusterNode>(
    referer_to_cluster: &AHashMap<ElementId, T>,
    graph: &mut RefChainGraph,
    min_ovhd: u64,
) -> Vec<ReferencedObjCluster> {
    let mut field_to_cluster: IndexMap<ExtendedField, T, RandomState> =
        IndexMap::with_hasher(RandomState::new());
    for (referer, cluster) in sorted_entries(referer_to_cluster) {
        let Some(field) = ExtendedField::nearest_to(graph, referer) else {
            continue;
        };
        match field_to_cluster.entry(field) {
            Entry::Occupied(mut entry) => entry.get_mut().add_cluster(cluster),
            Entry::Vacant(entry) => {
                entry.insert(cluster.clone());
            }
        }
    }

    let mut clusters = Vec::with_capacity(field_to_cluster.len());
    for (field, cluster) in &field_to_cluster {
        if cluster.total_overhead() < min_ovhd {
            continue;
        }
        let referer = field.to_reference_chain(graph);
        clusters.push(final_cluster(graph, referer, cluster));
    }
    clusters.sort_by(ReferencedObjCluster::default_order);
    clusters
}

/// Both views of the clusters of one analysis, indexed by [`ProblemCategory`].
#[derive(Debug, Clone)]
pub struct DetailedStats {
    min_ovhd: u64,
    full_chain: [Vec<ReferencedObjCluster>; 5],
    nearest_field: [Vec<ReferencedObjCluster>; 5],
}

impl DetailedStats {
    pub fn min_ovhd(&self) -> u64 {
        self.min_ovhd
    }

    /// Per category, in `[collections, dup strings, dup arrays, weak maps, high size]` order.
    pub fn full_chain(&self) -> &[Vec<ReferencedObjCluster>; 5] {
        &self.full_chain
    }

    pub fn nearest_field(&self) -> &[Vec<ReferencedObjCluster>; 5] {
        &self.nearest_field
    }

    pub fn full_chain_clusters(&self, category: ProblemCategory) -> &[ReferencedObjCluster] {
        &self.full_chain[category.index()]
    }

    pub fn nearest_field_clusters(&self, category: ProblemCategory) -> &[ReferencedObjCluster] {
        &self.nearest_field[category.index()]
    }

    pub fn total_overhead(&self, category: ProblemCategory) -> u64 {
        self.full_chain_clusters(category)
            .iter()
            .map(ReferencedObjCluster::total_overhead)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::{JavaClass, Root, RootKind};
    use crate::heap::ref_chain::RefChainBuilder;
    use crate::heap::referenced_cluster::ClusterDetails;

    struct Fixture {
        foo: Arc<JavaClass>,
        string: Arc<JavaClass>,
        big: Arc<JavaClass>,
        hash_map: Arc<JavaClass>,
    }

    fn fixture() -> Fixture {
        Fixture {
            foo: Arc::new(JavaClass::new(0, "com.acme.Foo").with_instance_fields(&["a", "b"])),
            string: Arc::new(JavaClass::new(1, "java.lang.String").with_total_shallow_instance_size(100)),
            big: Arc::new(JavaClass::new(2, "com.acme.Big").with_total_shallow_instance_size(5000)),
            hash_map: Arc::new(JavaClass::new(3, "java.util.HashMap").as_collection()),
        }
    }

    #[test]
    fn initialize_flags_large_classes_and_collections() {
        let f = fixture();
        let snapshot = Snapshot::new(vec![f.foo.clone(), f.string.clone(), f.big.clone(), f.hash_map.clone()]);
        let mut recorder = BatchProblemRecorder::new();
        recorder.initialize(&snapshot, &HeapStats { total_obj_size: 10_000 });
        assert!(!f.foo.flag_is_set(HIGH_SIZE_FLAG));
        assert!(!f.string.flag_is_set(HIGH_SIZE_FLAG));
        assert!(f.big.flag_is_set(HIGH_SIZE_FLAG));
        assert!(f.hash_map.flag_is_set(HIGH_SIZE_FLAG));
    }

    #[test]
    fn same_object_is_not_charged_twice_as_high_size() {
        let f = fixture();
        f.string.set_flag(HIGH_SIZE_FLAG);
        let mut builder = RefChainBuilder::new();
        let root = builder.gc_root(Root::new(1, RootKind::JavaFrame));
        let field = builder.instance_field_element(&f.foo, 0, root);
        let graph_builder = builder;

        let mut recorder = BatchProblemRecorder::new();
        let s = HeapObject::new(42, f.string.clone(), 24);
        recorder.record_duplicate_string(&s, Arc::from("x"), 1000, 48, false, field);
        assert!(!recorder.should_record_good_instance(&s));
        recorder.record_non_duplicate_string(&s, 1000, field);

        let other = HeapObject::new(43, f.string.clone(), 24);
        assert!(recorder.should_record_good_instance(&other));
        recorder.record_good_instance(&other, field);

        let mut graph = graph_builder.finish();
        let stats = recorder.get_detailed_stats(&mut graph, 0);
        let hs = stats.full_chain_clusters(ProblemCategory::HighSizeObjects);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].total_overhead(), 1024);
        assert_eq!(hs[0].num_bad_objects(), 2);
    }

    #[test]
    fn thresholds_filter_both_views() {
        let f = fixture();
        f.big.set_flag(HIGH_SIZE_FLAG);
        let mut builder = RefChainBuilder::new();
        let root = builder.gc_root(Root::new(1, RootKind::JavaFrame));
        let a = builder.instance_field_element(&f.foo, 0, root);
        let b = builder.instance_field_element(&f.foo, 1, root);
        let mut graph = builder.finish();

        let mut recorder = BatchProblemRecorder::new();
        let desc = CollectionDescriptor {
            num_elements: 0,
            impl_size: 48,
        };
        for id in 0..3 {
            let map = HeapObject::new(100 + id, f.hash_map.clone(), 48);
            recorder.record_problematic_collection(&map, &desc, ProblemKind::Empty, 40, a);
        }
        let map = HeapObject::new(200, f.hash_map.clone(), 48);
        recorder.record_problematic_collection(&map, &desc, ProblemKind::Empty, 40, b);
        // 300 bytes: above 100 but below 5 * 100
        recorder.record_good_instance(&HeapObject::new(300, f.big.clone(), 300), a);

        let stats = recorder.get_detailed_stats(&mut graph, 100);
        assert_eq!(stats.min_ovhd(), 100);
        for view in [stats.full_chain(), stats.nearest_field()] {
            let cols = &view[ProblemCategory::Collections.index()];
            assert_eq!(cols.len(), 1);
            assert_eq!(cols[0].total_overhead(), 120);
            assert!(view[ProblemCategory::HighSizeObjects.index()].is_empty());
            for category in view {
                assert!(category.iter().all(|c| c.total_overhead() >= 100));
            }
        }
        assert_eq!(
            stats.full_chain_clusters(ProblemCategory::Collections)[0].chain_string(),
            "Java local: @0x1->com.acme.Foo.a"
        );
        assert_eq!(
            stats.nearest_field_clusters(ProblemCategory::Collections)[0].chain_string(),
            "com.acme.Foo.a"
        );
    }

    #[test]
    fn nearest_field_merges_chains_meeting_on_a_field() {
        let f = fixture();
        let list = Arc::new(JavaClass::new(4, "java.util.ArrayList").as_collection());
        let mut builder = RefChainBuilder::new();
        let frame = builder.gc_root(Root::new(1, RootKind::JavaFrame));
        let global = builder.gc_root(Root::new(2, RootKind::JniGlobal));
        let via_frame = builder.instance_field_element(&f.foo, 0, frame);
        let via_global = builder.instance_field_element(&f.foo, 0, global);
        let col_frame = builder.compound_collection_element(&list, via_frame);
        let col_global = builder.compound_collection_element(&list, via_global);
        let mut graph = builder.finish();

        let mut recorder = BatchProblemRecorder::new();
        let s = HeapObject::new(1, f.string.clone(), 24);
        recorder.record_duplicate_string(&s, Arc::from("dup"), 40, 40, false, col_frame);
        recorder.record_duplicate_string(&s, Arc::from("dup"), 40, 40, false, col_global);
        recorder.record_duplicate_string(&s, Arc::from("other"), 48, 48, true, col_global);

        let stats = recorder.get_detailed_stats(&mut graph, 0);
        assert_eq!(stats.full_chain_clusters(ProblemCategory::DupStrings).len(), 2);
        let nearest = stats.nearest_field_clusters(ProblemCategory::DupStrings);
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].total_overhead(), 128);
        assert_eq!(nearest[0].chain_string(), "com.acme.Foo.a->{ArrayList}");
        match nearest[0].details() {
            ClusterDetails::DupStrings { entries, num_dup_backing_arrays, .. } => {
                assert_eq!(entries[0].value.as_ref(), "dup");
                assert_eq!(entries[0].num_instances, 2);
                assert_eq!(*num_dup_backing_arrays, 1);
            }
            other => panic!("unexpected details {:?}", other),
        }
        // full chain accumulators are left untouched by the merge
        assert_eq!(
            stats.full_chain_clusters(ProblemCategory::DupStrings)[0].total_overhead(),
            88
        );
    }

    #[test]
    fn repeated_finalization_reuses_derived_chains() {
        let f = fixture();
        let list = Arc::new(JavaClass::new(4, "java.util.ArrayList").as_collection());
        let mut builder = RefChainBuilder::new();
        let root = builder.gc_root(Root::new(1, RootKind::JavaFrame));
        let field = builder.instance_field_element(&f.foo, 0, root);
        let col = builder.compound_collection_element(&list, field);
        let mut graph = builder.finish();

        let mut recorder = BatchProblemRecorder::new();
        let s = HeapObject::new(1, f.string.clone(), 24);
        recorder.record_duplicate_string(&s, Arc::from("dup"), 40, 40, false, col);
        let desc = CollectionDescriptor {
            num_elements: 0,
            impl_size: 48,
        };
        let map = HeapObject::new(2, f.hash_map.clone(), 48);
        recorder.record_problematic_collection(&map, &desc, ProblemKind::Empty, 40, col);

        let first = recorder.get_detailed_stats(&mut graph, 0);
        let len_after_first = graph.len();
        let second = recorder.get_detailed_stats(&mut graph, 0);
        assert_eq!(graph.len(), len_after_first);

        let strings = first.nearest_field_clusters(ProblemCategory::DupStrings);
        let cols = first.nearest_field_clusters(ProblemCategory::Collections);
        // both categories meet on the same field and share its chain
        assert_eq!(strings[0].referer(), cols[0].referer());
        assert_eq!(
            second.nearest_field_clusters(ProblemCategory::DupStrings)[0].referer(),
            strings[0].referer()
        );
        assert_eq!(strings[0].chain_string(), "com.acme.Foo.a->{ArrayList}");
    }
}
