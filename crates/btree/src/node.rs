//! B-Tree node representation (CLRS-style: keys and values live in every
//! node, not just leaves).

use common::{PageId, RecordId};
use serde::{Deserialize, Serialize};
use types::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BTreeNode {
    pub is_leaf: bool,
    /// Sorted keys. A node with `n` keys has `n + 1` children when internal.
    pub keys: Vec<Vec<Value>>,
    pub values: Vec<RecordId>,
    pub children: Vec<PageId>,
}

impl BTreeNode {
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// A node is full once it holds `2D - 1` keys, per CLRS.
    pub fn is_full(&self, min_degree: usize) -> bool {
        self.keys.len() >= 2 * min_degree - 1
    }

    /// Index of the first key strictly greater than `key`.
    pub fn upper_bound(&self, key: &[Value]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }

    /// Index of `key` among this node's keys, if present.
    pub fn find(&self, key: &[Value]) -> Option<usize> {
        self.keys.iter().position(|k| k.as_slice() == key)
    }
}
