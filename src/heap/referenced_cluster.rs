//! Finalized, read-only clusters of problematic objects.
//!
//! A cluster gathers every problematic object reachable through one reference chain, for instance
//! `GC root -> A.b -> {ArrayList} -> C.d -> 100 empty HashMaps`. In the nearest-field view the
//! same objects are reported against `C.d` only.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::heap::combo_list::{ClassAndOvhdCombo, ClassAndSizeCombo};
use crate::heap::model::{short_name_for_popular_class, PrimitiveArray};
use crate::heap::object_to_int_map::SmallSet;
use crate::heap::ref_chain::ElementId;
use crate::utils::{as_comma_separated_list, remove_end_lines_and_add_quotes, NumFormatter};

/// Maximum depth used when rendering chains for ordering.
pub const CHAIN_STRING_MAX_DEPTH: usize = 100;

const MAX_LISTED_DUP_VALUES: usize = 10;
const MAX_DUP_STRING_DISPLAY_LEN: usize = 80;
const LINE_WRAP_LEN: usize = 70;

/// The five problem categories, in report order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProblemCategory {
    Collections = 0,
    DupStrings = 1,
    DupArrays = 2,
    WeakHashMaps = 3,
    HighSizeObjects = 4,
}

impl ProblemCategory {
    pub const ALL: [ProblemCategory; 5] = [
        ProblemCategory::Collections,
        ProblemCategory::DupStrings,
        ProblemCategory::DupArrays,
        ProblemCategory::WeakHashMaps,
        ProblemCategory::HighSizeObjects,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn title(self) -> &'static str {
        match self {
            ProblemCategory::Collections => "Problematic collections",
            ProblemCategory::DupStrings => "Duplicate strings",
            ProblemCategory::DupArrays => "Duplicate arrays",
            ProblemCategory::WeakHashMaps => "WeakHashMaps with back references",
            ProblemCategory::HighSizeObjects => "High size objects",
        }
    }
}

/// One duplicated value, the number of instances carrying it and their combined overhead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DupValueEntry<T> {
    pub value: T,
    pub num_instances: u64,
    pub overhead: u64,
}

impl<T> DupValueEntry<T> {
    pub fn overhead_splitter(&self) -> DupOverheadSplitter {
        DupOverheadSplitter::new(self.overhead, self.num_instances)
    }
}

/// Distributes the overhead of one duplicated value over its copies.
///
/// Every copy is charged `total / copies`, and the remainder is spread one byte at a time over
/// the first copies, so the charges always add up to `total`.
#[derive(Clone, Debug)]
pub struct DupOverheadSplitter {
    per_copy: u64,
    remainder: u64,
    copies_left: u64,
}

impl DupOverheadSplitter {
    pub fn new(total: u64, copies: u64) -> Self {
        if copies == 0 {
            return Self {
                per_copy: 0,
                remainder: 0,
                copies_left: 0,
            };
        }
        Self {
            per_copy: total / copies,
            remainder: total % copies,
            copies_left: copies,
        }
    }

    /// Overhead charged to the next copy, zero once every copy was charged.
    pub fn next_copy_overhead(&mut self) -> u64 {
        if self.copies_left == 0 {
            return 0;
        }
        self.copies_left -= 1;
        if self.remainder > 0 {
            self.remainder -= 1;
            self.per_copy + 1
        } else {
            self.per_copy
        }
    }
}

/// Per-category content of a finalized cluster.
#[derive(Clone, Debug)]
pub enum ClusterDetails {
    Collections {
        entries: Vec<ClassAndOvhdCombo>,
        num_good_collections: u64,
    },
    DupStrings {
        entries: Vec<DupValueEntry<Arc<str>>>,
        num_dup_backing_arrays: u64,
        num_non_dup_strings: u64,
    },
    DupArrays {
        entries: Vec<DupValueEntry<PrimitiveArray>>,
        num_non_dup_arrays: u64,
    },
    WeakHashMaps {
        num_instances: u64,
        col_classes: SmallSet<Arc<str>>,
        value_type_and_field_samples: SmallSet<Arc<str>>,
    },
    HighSizeObjects {
        entries: Vec<ClassAndSizeCombo>,
    },
}

#[derive(Clone, Debug)]
pub struct ReferencedObjCluster {
    referer: ElementId,
    chain: Box<str>,
    total_overhead: u64,
    details: ClusterDetails,
}

impl ReferencedObjCluster {
    /// `chain` is the rendering of `referer` as produced by
    /// `RefChainGraph::to_string_in_reverse_order` with [`CHAIN_STRING_MAX_DEPTH`].
    pub fn new(referer: ElementId, chain: String, total_overhead: u64, details: ClusterDetails) -> Self {
        Self {
            referer,
            chain: chain.into_boxed_str(),
            total_overhead,
            details,
        }
    }

    pub fn referer(&self) -> ElementId {
        self.referer
    }

    pub fn chain_string(&self) -> &str {
        &self.chain
    }

    pub fn total_overhead(&self) -> u64 {
        self.total_overhead
    }

    pub fn details(&self) -> &ClusterDetails {
        &self.details
    }

    pub fn category(&self) -> ProblemCategory {
        match self.details {
            ClusterDetails::Collections { .. } => ProblemCategory::Collections,
            ClusterDetails::DupStrings { .. } => ProblemCategory::DupStrings,
            ClusterDetails::DupArrays { .. } => ProblemCategory::DupArrays,
            ClusterDetails::WeakHashMaps { .. } => ProblemCategory::WeakHashMaps,
            ClusterDetails::HighSizeObjects { .. } => ProblemCategory::HighSizeObjects,
        }
    }

    /// Number of problematic objects; good objects on the same chain are not counted.
    pub fn num_bad_objects(&self) -> u64 {
        match &self.details {
            ClusterDetails::Collections { entries, .. } => {
                entries.iter().map(|e| e.num_instances).sum()
            }
            ClusterDetails::DupStrings { entries, .. } => {
                entries.iter().map(|e| e.num_instances).sum()
            }
            ClusterDetails::DupArrays { entries, .. } => {
                entries.iter().map(|e| e.num_instances).sum()
            }
            ClusterDetails::WeakHashMaps { num_instances, .. } => *num_instances,
            ClusterDetails::HighSizeObjects { entries } => {
                entries.iter().map(|e| e.num_instances).sum()
            }
        }
    }

    /// Overhead descending, then number of bad objects descending, then chain string.
    pub fn default_order(a: &ReferencedObjCluster, b: &ReferencedObjCluster) -> Ordering {
        b.total_overhead
            .cmp(&a.total_overhead)
            .then_with(|| b.num_bad_objects().cmp(&a.num_bad_objects()))
            .then_with(|| a.chain.cmp(&b.chain))
    }

    /// Brief human readable summary of the cluster content, without its reference chain.
    pub fn cluster_as_string(&self, nf: &dyn NumFormatter) -> String {
        match &self.details {
            ClusterDetails::Collections {
                entries,
                num_good_collections,
            } => {
                let mut buf = format!("{}:", nf.num_in_k_and_percent(self.total_overhead));
                let mut prev_class_name: Option<&str> = None;
                for entry in entries {
                    if prev_class_name != Some(entry.class.name()) {
                        buf.push(' ');
                        buf.push_str(&entry.class.human_friendly_name());
                        buf.push_str(": ");
                    } else {
                        buf.push_str(", ");
                    }
                    prev_class_name = Some(entry.class.name());
                    buf.push_str(&format!(
                        "{} of {} {}",
                        entry.num_instances,
                        entry.kind,
                        nf.num_in_k_and_percent(entry.overhead)
                    ));
                }
                if *num_good_collections > 0 {
                    buf.push_str(&format!(", {} good collections", num_good_collections));
                }
                buf
            }
            ClusterDetails::DupStrings {
                entries,
                num_dup_backing_arrays,
                num_non_dup_strings,
            } => {
                let mut buf = format!(
                    "{} {} dup strings ({} unique), {} dup backing arrays",
                    nf.num_in_k_and_percent(self.total_overhead),
                    self.num_bad_objects(),
                    entries.len(),
                    num_dup_backing_arrays
                );
                if *num_non_dup_strings > 0 {
                    buf.push_str(&format!(", {} nondup strings", num_non_dup_strings));
                }
                buf.push_str(":\n");
                let rendered = entries.iter().map(|e| {
                    (
                        e.num_instances,
                        remove_end_lines_and_add_quotes(&e.value, MAX_DUP_STRING_DISPLAY_LEN),
                    )
                });
                push_dup_values(&mut buf, rendered, entries, "strings");
                buf
            }
            ClusterDetails::DupArrays {
                entries,
                num_non_dup_arrays,
            } => {
                let mut buf = format!(
                    "{} {} dup arrays ({} unique)",
                    nf.num_in_k_and_percent(self.total_overhead),
                    self.num_bad_objects(),
                    entries.len()
                );
                if *num_non_dup_arrays > 0 {
                    buf.push_str(&format!(", {} nondup arrays", num_non_dup_arrays));
                }
                buf.push_str(":\n");
                let rendered = entries
                    .iter()
                    .map(|e| (e.num_instances, e.value.value_as_string()));
                push_dup_values(&mut buf, rendered, entries, "arrays");
                buf
            }
            ClusterDetails::WeakHashMaps {
                num_instances,
                col_classes,
                value_type_and_field_samples,
            } => {
                let classes: Vec<&str> = col_classes
                    .elements()
                    .iter()
                    .map(|c| short_name_for_popular_class(c))
                    .collect();
                format!(
                    "{} {} of {} have back refs from: {}",
                    nf.num_in_k_and_percent(self.total_overhead),
                    num_instances,
                    as_comma_separated_list(&classes),
                    as_comma_separated_list(value_type_and_field_samples.elements())
                )
            }
            ClusterDetails::HighSizeObjects { entries } => {
                let mut buf = format!("{}:", nf.num_in_k_and_percent(self.total_overhead));
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        buf.push(',');
                    }
                    buf.push_str(&format!(
                        " {}: {} instances {}",
                        entry.class.human_friendly_name(),
                        entry.num_instances,
                        nf.num_in_k_and_percent(entry.size)
                    ));
                }
                buf
            }
        }
    }
}

/// Lists the first duplicated values, wrapping lines, followed by a tail for the rest.
fn push_dup_values<T>(
    buf: &mut String,
    rendered: impl Iterator<Item = (u64, String)>,
    entries: &[DupValueEntry<T>],
    noun: &str,
) {
    let mut line_len = 0;
    let mut previous_len: Option<usize> = None;
    for (count, (num_instances, value)) in rendered.take(MAX_LISTED_DUP_VALUES).enumerate() {
        if let Some(prev) = previous_len {
            buf.push_str(", ");
            line_len += prev + 2;
            if line_len > LINE_WRAP_LEN {
                buf.push('\n');
                line_len = 0;
            }
        }
        previous_len = Some(value.chars().count());
        buf.push_str(&format!("{} of {}", num_instances, value));

        if count + 1 == MAX_LISTED_DUP_VALUES {
            let remaining = &entries[MAX_LISTED_DUP_VALUES..];
            let remaining_total: u64 = remaining.iter().map(|e| e.num_instances).sum();
            if remaining_total > 0 {
                buf.push_str(&format!(
                    "\n... and {} more {}, of which {} are unique",
                    remaining_total,
                    noun,
                    remaining.len()
                ));
            }
        }
    }
}
