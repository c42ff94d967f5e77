//! Path lookup over partial trees.
//!
//! Labels under a fork form a sorted run, so a lookup walks the run like a
//! binary search. The extra `Unknown` outcome exists because the run may
//! contain pruned gaps: a pruned sibling could hide the label we are looking
//! for, and reporting such a label as absent would let a malicious replica
//! prove absence of state it merely chose not to disclose.

use crate::{HashTree, Label};

/// The result of looking up a value at a path.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LookupResult<'tree> {
    /// The value is guaranteed to be absent from the original state tree.
    Absent,

    /// This partial tree does not carry enough information to tell whether
    /// the value is present.
    Unknown,

    /// The value at the path.
    Found(&'tree [u8]),

    /// The path ends on a fork or labeled node instead of a leaf; use
    /// [`HashTree::lookup_subtree`] to read subtrees.
    Error,
}

/// The result of looking up a subtree at a path.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SubtreeLookupResult<'tree> {
    /// The subtree is guaranteed to be absent from the original state tree.
    Absent,

    /// This partial tree does not carry enough information to tell whether
    /// the subtree is present.
    Unknown,

    /// The subtree rooted at the path.
    Found(&'tree HashTree),
}

// Outcome of searching one sorted label run for a label.
enum LabelLookup<'tree> {
    /// The label is provably absent: the run is fully disclosed around the
    /// position where the label would live.
    Absent,
    /// A pruned node could hide the label.
    Unknown,
    /// Every label in this subtree is smaller than the one searched for.
    Less,
    /// Every label in this subtree is greater than the one searched for.
    Greater,
    Found(&'tree HashTree),
}

fn find_label<'tree>(label: &Label, tree: &'tree HashTree) -> LabelLookup<'tree> {
    match tree {
        HashTree::Labeled(l, subtree) => match label.cmp(l) {
            std::cmp::Ordering::Greater => LabelLookup::Greater,
            std::cmp::Ordering::Equal => LabelLookup::Found(subtree),
            std::cmp::Ordering::Less => LabelLookup::Less,
        },
        HashTree::Fork(lr) => match find_label(label, &lr.0) {
            // The label is to the right of the whole left subtree. If the
            // right subtree says it is to its left, it falls in the fully
            // disclosed gap between the two.
            LabelLookup::Greater => match find_label(label, &lr.1) {
                LabelLookup::Less => LabelLookup::Absent,
                result => result,
            },
            // A pruned node in the left subtree could hide the label, so a
            // "to the left of everything" answer from the right subtree
            // must not be upgraded to a proof of absence.
            LabelLookup::Unknown => match find_label(label, &lr.1) {
                LabelLookup::Less => LabelLookup::Unknown,
                result => result,
            },
            result => result,
        },
        HashTree::Pruned(_) => LabelLookup::Unknown,
        HashTree::Empty | HashTree::Leaf(_) => LabelLookup::Absent,
    }
}

impl HashTree {
    /// Looks up the value stored at a path of labels.
    pub fn lookup_path(&self, path: &[Label]) -> LookupResult<'_> {
        match path.split_first() {
            None => match self {
                HashTree::Leaf(value) => LookupResult::Found(value),
                HashTree::Pruned(_) => LookupResult::Unknown,
                HashTree::Empty => LookupResult::Absent,
                HashTree::Fork(_) | HashTree::Labeled(_, _) => LookupResult::Error,
            },
            Some((first, rest)) => match find_label(first, self) {
                LabelLookup::Found(subtree) => subtree.lookup_path(rest),
                LabelLookup::Unknown => LookupResult::Unknown,
                LabelLookup::Absent | LabelLookup::Less | LabelLookup::Greater => {
                    LookupResult::Absent
                }
            },
        }
    }

    /// Looks up the subtree rooted at a path of labels.
    pub fn lookup_subtree(&self, path: &[Label]) -> SubtreeLookupResult<'_> {
        match path.split_first() {
            None => SubtreeLookupResult::Found(self),
            Some((first, rest)) => match find_label(first, self) {
                LabelLookup::Found(subtree) => subtree.lookup_subtree(rest),
                LabelLookup::Unknown => SubtreeLookupResult::Unknown,
                LabelLookup::Absent | LabelLookup::Less | LabelLookup::Greater => {
                    SubtreeLookupResult::Absent
                }
            },
        }
    }
}
