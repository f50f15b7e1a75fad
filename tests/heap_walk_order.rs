use std::collections::VecDeque;
use std::sync::Arc;

use overhead_slurp::heap::model::{
    CollectionDescriptor, HeapObject, HeapStats, JavaClass, ProblemKind, Root, RootKind, Snapshot,
};
use overhead_slurp::heap::ref_chain::{ElementId, RefChainBuilder};
use overhead_slurp::heap::referenced_cluster::{
    ClusterDetails, ProblemCategory, ReferencedObjCluster,
};
use overhead_slurp::problem_recorder::{BatchProblemRecorder, DetailedStats, ProblemRecorder};
use overhead_slurp::utils::MemNumFormatter;

const EMPTY_MAP_OVERHEAD: u64 = 40;

#[derive(Clone, Copy)]
enum Edge {
    Field(u16),
    Element,
}

enum Content {
    Plain,
    Collection { num_elements: u32 },
    Str(&'static str),
}

struct Obj {
    class: Arc<JavaClass>,
    size: u32,
    content: Content,
    refs: Vec<(Edge, usize)>,
}

struct MockHeap {
    classes: Vec<Arc<JavaClass>>,
    objects: Vec<Obj>,
    /// Static fields held by the system class root, in declaration order.
    statics: Vec<(Arc<JavaClass>, usize)>,
}

#[derive(Clone, Copy)]
enum Order {
    DepthFirst,
    BreadthFirst,
}

/// Root `Foo` object: `bar` leads to a `Baz` whose `qux` list holds three empty maps and a
/// non-empty one, `names` leads to an array of strings.
fn sample_heap() -> MockHeap {
    build_heap(false)
}

/// The sample heap where `Foo.alias` reaches the same `Baz` again, plus a system class root
/// holding more statics than a plain child list allows, some of them reached twice.
fn shared_heap() -> MockHeap {
    build_heap(true)
}

const REGISTERED_CLASSES: usize = 120;
const REGISTERED_TWICE: usize = 10;

fn build_heap(shared: bool) -> MockHeap {
    let foo = Arc::new(
        JavaClass::new(0, "com.acme.Foo").with_instance_fields(&["bar", "names", "alias"]),
    );
    let baz = Arc::new(JavaClass::new(1, "com.acme.Baz").with_instance_fields(&["qux"]));
    let list = Arc::new(JavaClass::new(2, "java.util.ArrayList").as_collection());
    let map = Arc::new(JavaClass::new(3, "java.util.HashMap").as_collection());
    let string = Arc::new(JavaClass::new(4, "java.lang.String"));
    let string_array = Arc::new(JavaClass::new(5, "[Ljava.lang.String;"));

    let plain = |class: &Arc<JavaClass>, refs: Vec<(Edge, usize)>| Obj {
        class: class.clone(),
        size: 16,
        content: Content::Plain,
        refs,
    };
    let collection = |class: &Arc<JavaClass>, num_elements: u32, refs: Vec<(Edge, usize)>| Obj {
        class: class.clone(),
        size: 48,
        content: Content::Collection { num_elements },
        refs,
    };
    let text = |value: &'static str| Obj {
        class: string.clone(),
        size: 24,
        content: Content::Str(value),
        refs: Vec::new(),
    };

    let mut foo_refs = vec![(Edge::Field(0), 1), (Edge::Field(1), 7)];
    if shared {
        foo_refs.push((Edge::Field(2), 1));
    }
    let mut objects = vec![
        // 0
        plain(&foo, foo_refs),
        // 1
        plain(&baz, vec![(Edge::Field(0), 2)]),
        // 2
        collection(
            &list,
            4,
            vec![
                (Edge::Element, 3),
                (Edge::Element, 4),
                (Edge::Element, 5),
                (Edge::Element, 6),
            ],
        ),
        // 3..=5
        collection(&map, 0, Vec::new()),
        collection(&map, 0, Vec::new()),
        collection(&map, 0, Vec::new()),
        // 6
        collection(&map, 2, vec![(Edge::Element, 11), (Edge::Element, 12)]),
        // 7
        plain(
            &string_array,
            vec![(Edge::Element, 8), (Edge::Element, 9), (Edge::Element, 10)],
        ),
        // 8..=10
        text("x"),
        text("x"),
        text("y"),
        // 11, 12
        text("dup"),
        text("dup"),
    ];

    let mut classes = vec![foo, baz, list, map.clone(), string.clone(), string_array];
    let mut statics = Vec::new();
    if shared {
        // keeps the two visits of the shared list apart in a breadth first walk
        let empty_name_map = objects.len();
        objects.push(collection(&map, 0, Vec::new()));
        objects[7].refs.push((Edge::Element, empty_name_map));

        for i in 0..REGISTERED_CLASSES {
            let registered = Arc::new(
                JavaClass::new(6 + i as u32, &format!("com.acme.Registered{}", i))
                    .with_static_fields(&["INSTANCE"]),
            );
            statics.push((registered.clone(), objects.len()));
            objects.push(collection(&map, 0, Vec::new()));
            classes.push(registered);
        }
        let again: Vec<_> = statics[..REGISTERED_TWICE].to_vec();
        statics.extend(again);
    }

    MockHeap {
        classes,
        objects,
        statics,
    }
}

impl MockHeap {
    fn total_size(&self) -> u64 {
        self.objects.iter().map(|o| o.size as u64).sum()
    }

    fn occurrences(&self, value: &str) -> usize {
        self.objects
            .iter()
            .filter(|o| matches!(o.content, Content::Str(v) if v == value))
            .count()
    }

    fn observe(&self, recorder: &mut BatchProblemRecorder, idx: usize, referer: ElementId) {
        let obj = &self.objects[idx];
        let heap_obj = HeapObject::new(idx as u64, obj.class.clone(), obj.size);
        match obj.content {
            Content::Collection { num_elements } => {
                let desc = CollectionDescriptor {
                    num_elements,
                    impl_size: obj.size,
                };
                if num_elements == 0 {
                    recorder.record_problematic_collection(
                        &heap_obj,
                        &desc,
                        ProblemKind::Empty,
                        EMPTY_MAP_OVERHEAD,
                        referer,
                    );
                } else {
                    recorder.record_good_collection(&heap_obj, &desc, referer);
                }
            }
            Content::Str(value) if self.occurrences(value) > 1 => {
                recorder.record_duplicate_string(
                    &heap_obj,
                    Arc::from(value),
                    obj.size as u64,
                    obj.size as u64,
                    false,
                    referer,
                );
            }
            Content::Str(_) => {
                recorder.record_non_duplicate_string(&heap_obj, obj.size as u64, referer)
            }
            Content::Plain => {
                if recorder.should_record_good_instance(&heap_obj) {
                    recorder.record_good_instance(&heap_obj, referer);
                }
            }
        }
    }

    fn walk(&self, order: Order, min_ovhd: u64) -> DetailedStats {
        let mut builder = RefChainBuilder::new();
        let mut recorder = BatchProblemRecorder::new();
        recorder.initialize(
            &Snapshot::new(self.classes.clone()),
            &HeapStats {
                total_obj_size: self.total_size(),
            },
        );

        let root = builder.gc_root(Root::new(1, RootKind::JavaFrame));
        let mut work = VecDeque::from([(0, root)]);
        if !self.statics.is_empty() {
            let system = builder.gc_root(Root::new(2, RootKind::StickyClass));
            for (class, target) in &self.statics {
                work.push_back((*target, builder.static_field_element(class, 0, system)));
            }
        }
        loop {
            let next = match order {
                Order::DepthFirst => work.pop_back(),
                Order::BreadthFirst => work.pop_front(),
            };
            let Some((idx, referer)) = next else {
                break;
            };
            self.observe(&mut recorder, idx, referer);
            let obj = &self.objects[idx];
            for (edge, target) in &obj.refs {
                let element = match edge {
                    Edge::Field(field_idx) => {
                        builder.instance_field_element(&obj.class, *field_idx, referer)
                    }
                    Edge::Element if obj.class.is_array() => {
                        builder.compound_array_element(&obj.class, referer)
                    }
                    Edge::Element => builder.compound_collection_element(&obj.class, referer),
                };
                work.push_back((*target, element));
            }
        }

        let mut graph = builder.finish();
        recorder.get_detailed_stats(&mut graph, min_ovhd)
    }
}

fn render(view: &[Vec<ReferencedObjCluster>; 5]) -> Vec<String> {
    let nf = MemNumFormatter::new(1024 * 1024);
    view.iter()
        .flatten()
        .map(|c| {
            format!(
                "{} | {} | {} | {}",
                c.chain_string(),
                c.total_overhead(),
                c.num_bad_objects(),
                c.cluster_as_string(&nf)
            )
        })
        .collect()
}

#[test]
fn depth_first_and_breadth_first_walks_agree() {
    let heap = sample_heap();
    for min_ovhd in [0, 50, 100] {
        let dfs = heap.walk(Order::DepthFirst, min_ovhd);
        let bfs = heap.walk(Order::BreadthFirst, min_ovhd);
        assert_eq!(render(dfs.full_chain()), render(bfs.full_chain()));
        assert_eq!(render(dfs.nearest_field()), render(bfs.nearest_field()));
        assert!(!render(dfs.full_chain()).is_empty() || min_ovhd > 0);
    }
}

#[test]
fn walks_agree_on_shared_objects_and_many_statics() {
    let heap = shared_heap();
    for min_ovhd in [0, 50, 100] {
        let dfs = heap.walk(Order::DepthFirst, min_ovhd);
        let bfs = heap.walk(Order::BreadthFirst, min_ovhd);
        assert_eq!(render(dfs.full_chain()), render(bfs.full_chain()));
        assert_eq!(render(dfs.nearest_field()), render(bfs.nearest_field()));
    }

    let stats = heap.walk(Order::BreadthFirst, 50);
    let full = stats.full_chain_clusters(ProblemCategory::Collections);
    let via_foo: Vec<&str> = full
        .iter()
        .map(|c| c.chain_string())
        .filter(|chain| chain.contains("com.acme.Baz.qux"))
        .collect();
    assert_eq!(
        via_foo,
        vec![
            "Java local: @0x1->com.acme.Foo.alias->com.acme.Baz.qux->{ArrayList}",
            "Java local: @0x1->com.acme.Foo.bar->com.acme.Baz.qux->{ArrayList}",
        ]
    );
    // statics reached twice share their element, the others stay under the threshold
    let twice: Vec<_> = full
        .iter()
        .filter(|c| c.chain_string().contains("Registered"))
        .collect();
    assert_eq!(twice.len(), REGISTERED_TWICE);
    assert!(twice.iter().all(|c| c.total_overhead() == 80));

    let nearest = stats.nearest_field_clusters(ProblemCategory::Collections);
    let qux = nearest
        .iter()
        .find(|c| c.chain_string() == "com.acme.Baz.qux->{ArrayList}")
        .unwrap();
    assert_eq!(qux.total_overhead(), 240);
    assert_eq!(qux.num_bad_objects(), 6);
}

#[test]
fn empty_maps_behind_a_list_form_one_cluster() {
    let stats = sample_heap().walk(Order::DepthFirst, 0);

    let full = stats.full_chain_clusters(ProblemCategory::Collections);
    assert_eq!(full.len(), 1);
    assert_eq!(full[0].total_overhead(), 120);
    assert_eq!(
        full[0].chain_string(),
        "Java local: @0x1->com.acme.Foo.bar->com.acme.Baz.qux->{ArrayList}"
    );
    match full[0].details() {
        ClusterDetails::Collections {
            entries,
            num_good_collections,
        } => {
            assert_eq!(*num_good_collections, 1);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].class.name(), "java.util.HashMap");
            assert_eq!(entries[0].kind, ProblemKind::Empty);
            assert_eq!(entries[0].num_instances, 3);
            assert_eq!(entries[0].overhead, 120);
        }
        other => panic!("unexpected details {:?}", other),
    }

    let nearest = stats.nearest_field_clusters(ProblemCategory::Collections);
    assert_eq!(nearest.len(), 1);
    assert_eq!(nearest[0].chain_string(), "com.acme.Baz.qux->{ArrayList}");
    assert_eq!(nearest[0].total_overhead(), 120);
    assert_eq!(nearest[0].num_bad_objects(), 3);
}

#[test]
fn duplicate_strings_are_clustered_per_container() {
    let stats = sample_heap().walk(Order::BreadthFirst, 0);
    let dups = stats.full_chain_clusters(ProblemCategory::DupStrings);
    assert_eq!(dups.len(), 2);
    let total: u64 = dups.iter().map(|c| c.total_overhead()).sum();
    assert_eq!(total, stats.total_overhead(ProblemCategory::DupStrings));
    assert!(dups.iter().all(|c| c.num_bad_objects() == 2));
}
