//! The agent-side view of a replica's certified state tree.
//!
//! A replica responds to read-state requests with a partial hash tree: the
//! requested paths are present as labeled subtrees and leaves, everything
//! else is replaced by `Pruned` nodes carrying only a digest. Recomputing
//! the root digest of such a tree and looking up paths in it are the two
//! operations certificate verification is built on.
//!
//! The encoding of trees on the wire is the CBOR array form
//! `[0] | [1, left, right] | [2, label, subtree] | [3, bytes] | [4, hash]`
//! defined by the interface specification; see the `Serialize` and
//! `Deserialize` impls in this crate.

use sha2::{Digest as _, Sha256};
use std::fmt;

mod encoding;
mod lookup;

#[cfg(test)]
mod arbitrary;

pub use lookup::{LookupResult, SubtreeLookupResult};

const DOMAIN_HASHTREE_LEAF: &str = "ic-hashtree-leaf";
const DOMAIN_HASHTREE_EMPTY_SUBTREE: &str = "ic-hashtree-empty";
const DOMAIN_HASHTREE_NODE: &str = "ic-hashtree-labeled";
const DOMAIN_HASHTREE_FORK: &str = "ic-hashtree-fork";

/// A SHA-256 digest of some tree content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = TreeHashError;

    fn try_from(bytes: &[u8]) -> Result<Self, TreeHashError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TreeHashError::InvalidDigestLength { actual: bytes.len() })?;
        Ok(Digest(arr))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeHashError {
    #[error("invalid digest length: expected 32 bytes, got {actual}")]
    InvalidDigestLength { actual: usize },
}

/// The label of an edge in the tree, an arbitrary blob.
///
/// Labels under a fork are sorted by their raw bytes; lookup relies on this
/// order to decide whether a label is provably absent.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(Vec<u8>);

impl Label {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl<T: AsRef<[u8]>> From<T> for Label {
    fn from(bytes: T) -> Self {
        Self(bytes.as_ref().to_vec())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print as UTF-8 when possible, as hex otherwise.
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                write!(f, "0x")?;
                self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A partial state tree as returned by a replica.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum HashTree {
    Empty,
    Fork(Box<(HashTree, HashTree)>),
    Labeled(Label, Box<HashTree>),
    Leaf(Vec<u8>),
    Pruned(Digest),
}

/// Create an empty tree.
#[inline]
pub fn empty() -> HashTree {
    HashTree::Empty
}

/// Create a fork of two subtrees.
#[inline]
pub fn fork(left: HashTree, right: HashTree) -> HashTree {
    HashTree::Fork(Box::new((left, right)))
}

/// Create a labeled subtree.
#[inline]
pub fn label<L: Into<Label>>(label: L, subtree: HashTree) -> HashTree {
    HashTree::Labeled(label.into(), Box::new(subtree))
}

/// Create a leaf holding a value.
#[inline]
pub fn leaf<V: Into<Vec<u8>>>(value: V) -> HashTree {
    HashTree::Leaf(value.into())
}

/// Create a pruned subtree holding only its digest.
#[inline]
pub fn pruned<D: Into<Digest>>(digest: D) -> HashTree {
    HashTree::Pruned(digest.into())
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }
}

// A SHA-256 state prefixed with the domain separator `byte(|tag|) . tag`.
struct Hasher(Sha256);

impl Hasher {
    fn for_domain(tag: &str) -> Self {
        debug_assert!(tag.len() < 256);
        let mut hasher = Sha256::new();
        hasher.update([tag.len() as u8]);
        hasher.update(tag.as_bytes());
        Self(hasher)
    }

    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

pub(crate) fn compute_leaf_digest(contents: &[u8]) -> Digest {
    let mut hasher = Hasher::for_domain(DOMAIN_HASHTREE_LEAF);
    hasher.update(contents);
    hasher.finalize()
}

pub(crate) fn compute_node_digest(label: &Label, subtree_digest: &Digest) -> Digest {
    let mut hasher = Hasher::for_domain(DOMAIN_HASHTREE_NODE);
    hasher.update(label.as_bytes());
    hasher.update(&subtree_digest.0);
    hasher.finalize()
}

pub(crate) fn compute_fork_digest(left_digest: &Digest, right_digest: &Digest) -> Digest {
    let mut hasher = Hasher::for_domain(DOMAIN_HASHTREE_FORK);
    hasher.update(&left_digest.0);
    hasher.update(&right_digest.0);
    hasher.finalize()
}

pub(crate) fn empty_subtree_digest() -> Digest {
    Hasher::for_domain(DOMAIN_HASHTREE_EMPTY_SUBTREE).finalize()
}

impl HashTree {
    /// Recomputes the root digest of the full tree this partial tree was
    /// derived from. Pruned nodes contribute their stored digest.
    pub fn digest(&self) -> Digest {
        match self {
            HashTree::Empty => empty_subtree_digest(),
            HashTree::Fork(lr) => compute_fork_digest(&lr.0.digest(), &lr.1.digest()),
            HashTree::Labeled(label, subtree) => compute_node_digest(label, &subtree.digest()),
            HashTree::Leaf(value) => compute_leaf_digest(value),
            HashTree::Pruned(digest) => *digest,
        }
    }
}
