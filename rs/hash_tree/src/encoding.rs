//! Serde encoding of trees in the interface-spec CBOR array form:
//!
//! ```text
//! hash-tree ::= [0] | [1, hash-tree, hash-tree] | [2, bytes, hash-tree]
//!             | [3, bytes] | [4, hash]
//! ```

use crate::{Digest, HashTree, Label};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::{ByteBuf, Bytes};
use std::fmt;

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = ByteBuf::deserialize(deserializer)?;
        Ok(Label::from(bytes.into_vec()))
    }
}

impl Serialize for HashTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HashTree::Empty => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(&0u8)?;
                seq.end()
            }
            HashTree::Fork(lr) => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&1u8)?;
                seq.serialize_element(&lr.0)?;
                seq.serialize_element(&lr.1)?;
                seq.end()
            }
            HashTree::Labeled(label, subtree) => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&2u8)?;
                seq.serialize_element(label)?;
                seq.serialize_element(subtree)?;
                seq.end()
            }
            HashTree::Leaf(value) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(&3u8)?;
                seq.serialize_element(Bytes::new(value))?;
                seq.end()
            }
            HashTree::Pruned(digest) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(&4u8)?;
                seq.serialize_element(Bytes::new(&digest.0))?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for HashTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SeqVisitor;

        impl<'de> Visitor<'de> for SeqVisitor {
            type Value = HashTree;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(
                    "a hash tree encoded as [0] | [1, tree, tree] | [2, bytes, tree] \
                     | [3, bytes] | [4, hash]",
                )
            }

            fn visit_seq<V: SeqAccess<'de>>(self, mut seq: V) -> Result<HashTree, V::Error> {
                let tag: u8 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;

                match tag {
                    0 => {
                        expect_end(&mut seq, 1, &self)?;
                        Ok(HashTree::Empty)
                    }
                    1 => {
                        let left: HashTree = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let right: HashTree = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        expect_end(&mut seq, 3, &self)?;
                        Ok(HashTree::Fork(Box::new((left, right))))
                    }
                    2 => {
                        let label: Label = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let subtree: HashTree = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        expect_end(&mut seq, 3, &self)?;
                        Ok(HashTree::Labeled(label, Box::new(subtree)))
                    }
                    3 => {
                        let value: ByteBuf = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        expect_end(&mut seq, 2, &self)?;
                        Ok(HashTree::Leaf(value.into_vec()))
                    }
                    4 => {
                        let digest: ByteBuf = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        expect_end(&mut seq, 2, &self)?;
                        let digest = Digest::try_from(digest.as_slice()).map_err(|_| {
                            de::Error::invalid_length(digest.len(), &"a 32-byte digest")
                        })?;
                        Ok(HashTree::Pruned(digest))
                    }
                    _ => Err(de::Error::custom(format!(
                        "unknown tag: {}, expected one of {{0, 1, 2, 3, 4}}",
                        tag
                    ))),
                }
            }
        }

        fn expect_end<'de, V: SeqAccess<'de>>(
            seq: &mut V,
            len: usize,
            expected: &dyn de::Expected,
        ) -> Result<(), V::Error> {
            if seq.next_element::<de::IgnoredAny>()?.is_some() {
                return Err(de::Error::invalid_length(len + 1, expected));
            }
            Ok(())
        }

        deserializer.deserialize_seq(SeqVisitor)
    }
}
