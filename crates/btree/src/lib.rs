//! Persistent B-Tree index (minimum degree `D`, default 3), routed entirely
//! through the buffer pool so it shares eviction and the write-ahead rule
//! with every other page consumer.

mod node;

pub use node::BTreeNode;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};
use buffer::BufferPool;
use catalog::IndexId;
use common::{DbError, DbResult, FileId, PageId, RecordId};
use storage::PAGE_SIZE;
use types::Value;

pub const DEFAULT_MIN_DEGREE: usize = 3;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// A persistent B-Tree index. Keys are `Vec<Value>` (composite keys
/// supported); values are `RecordId`s pointing into a heap table.
pub struct BTreeIndex {
    pub index_id: IndexId,
    pool: BufferPool,
    file_id: FileId,
    root_page_id: PageId,
    min_degree: usize,
}

impl BTreeIndex {
    /// Create a brand new index backed by `file_id`, with an empty root leaf.
    pub fn create(pool: BufferPool, file_id: FileId, index_id: IndexId) -> DbResult<Self> {
        Self::create_with_degree(pool, file_id, index_id, DEFAULT_MIN_DEGREE)
    }

    pub fn create_with_degree(
        pool: BufferPool,
        file_id: FileId,
        index_id: IndexId,
        min_degree: usize,
    ) -> DbResult<Self> {
        let mut index = Self {
            index_id,
            pool,
            file_id,
            root_page_id: PageId(0),
            min_degree,
        };
        let root = index.pool.new_page(index.file_id)?;
        index.root_page_id = root.page_id();
        drop(root);
        index.write_node(index.root_page_id, &BTreeNode::new_leaf())?;
        Ok(index)
    }

    /// Reopen an index whose root lives at page 0 of `file_id`.
    pub fn open(pool: BufferPool, file_id: FileId, index_id: IndexId) -> DbResult<Self> {
        Self::open_with_degree(pool, file_id, index_id, DEFAULT_MIN_DEGREE)
    }

    pub fn open_with_degree(
        pool: BufferPool,
        file_id: FileId,
        index_id: IndexId,
        min_degree: usize,
    ) -> DbResult<Self> {
        Ok(Self {
            index_id,
            pool,
            file_id,
            root_page_id: PageId(0),
            min_degree,
        })
    }

    /// Search for the `RecordId` stored at `key`, if present.
    pub fn search(&mut self, key: &[Value]) -> DbResult<Option<RecordId>> {
        self.search_from(self.root_page_id, key)
    }

    fn search_from(&mut self, page_id: PageId, key: &[Value]) -> DbResult<Option<RecordId>> {
        let node = self.read_node(page_id)?;
        let idx = node.upper_bound(key);
        if idx > 0 && node.keys[idx - 1].as_slice() == key {
            return Ok(Some(node.values[idx - 1]));
        }
        if node.is_leaf {
            return Ok(None);
        }
        self.search_from(node.children[idx], key)
    }

    /// Insert `key -> value`. Splits full nodes preemptively on the way down,
    /// per the classic CLRS algorithm.
    pub fn insert(&mut self, key: Vec<Value>, value: RecordId) -> DbResult<()> {
        let root = self.read_node(self.root_page_id)?;
        if root.is_full(self.min_degree) {
            let new_root_page = self.pool.new_page(self.file_id)?.page_id();
            let mut new_root = BTreeNode::new_leaf();
            new_root.is_leaf = false;
            new_root.children = vec![self.root_page_id];
            self.write_node(new_root_page, &new_root)?;
            self.split_child(new_root_page, 0)?;
            self.root_page_id = new_root_page;
        }
        self.insert_nonfull(self.root_page_id, key, value)
    }

    /// Split the full child at `children[i]` of `parent_page_id`, moving its
    /// median key up. Rewrites all three touched pages durably: the child's
    /// trimmed-left page, the new right-sibling page, and the parent.
    fn split_child(&mut self, parent_page_id: PageId, i: usize) -> DbResult<()> {
        let mut parent = self.read_node(parent_page_id)?;
        let child_page_id = parent.children[i];
        let mut child = self.read_node(child_page_id)?;
        let d = self.min_degree;

        let median_key = child.keys[d - 1].clone();
        let median_value = child.values[d - 1];

        // split_off(d) leaves `child` with the first `d` keys (the median at
        // index d-1 still attached); truncate drops it once captured above.
        let right_keys = child.keys.split_off(d);
        let right_values = child.values.split_off(d);
        child.keys.truncate(d - 1);
        child.values.truncate(d - 1);

        let right_children = if child.is_leaf {
            Vec::new()
        } else {
            child.children.split_off(d)
        };

        let sibling = BTreeNode {
            is_leaf: child.is_leaf,
            keys: right_keys,
            values: right_values,
            children: right_children,
        };

        let sibling_page_id = self.pool.new_page(self.file_id)?.page_id();
        parent.keys.insert(i, median_key);
        parent.values.insert(i, median_value);
        parent.children.insert(i + 1, sibling_page_id);

        self.write_node(child_page_id, &child)?;
        self.write_node(sibling_page_id, &sibling)?;
        self.write_node(parent_page_id, &parent)?;
        Ok(())
    }

    fn insert_nonfull(&mut self, page_id: PageId, key: Vec<Value>, value: RecordId) -> DbResult<()> {
        let mut node = self.read_node(page_id)?;
        let idx = node.upper_bound(&key);

        if node.is_leaf {
            if idx > 0 && node.keys[idx - 1] == key {
                return Err(DbError::Constraint(format!(
                    "duplicate key in unique index: {key:?}"
                )));
            }
            node.keys.insert(idx, key);
            node.values.insert(idx, value);
            self.write_node(page_id, &node)?;
            return Ok(());
        }

        let mut child_idx = idx;
        let child_page_id = node.children[child_idx];
        let child = self.read_node(child_page_id)?;
        if child.is_full(self.min_degree) {
            self.split_child(page_id, child_idx)?;
            let node = self.read_node(page_id)?;
            if key.as_slice() > node.keys[child_idx].as_slice() {
                child_idx += 1;
            }
            return self.insert_nonfull(node.children[child_idx], key, value);
        }

        self.insert_nonfull(child_page_id, key, value)
    }

    /// Leaf-only deletion. Returns `NotImplemented` if the key lives in an
    /// internal node (internal-node deletion is out of scope).
    pub fn delete(&mut self, key: &[Value]) -> DbResult<bool> {
        self.delete_from(self.root_page_id, key)
    }

    fn delete_from(&mut self, page_id: PageId, key: &[Value]) -> DbResult<bool> {
        let mut node = self.read_node(page_id)?;
        if let Some(idx) = node.find(key) {
            if !node.is_leaf {
                return Err(DbError::NotImplemented(
                    "deleting a key from an internal B-tree node".into(),
                ));
            }
            node.keys.remove(idx);
            node.values.remove(idx);
            self.write_node(page_id, &node)?;
            return Ok(true);
        }
        if node.is_leaf {
            return Ok(false);
        }
        let idx = node.upper_bound(key);
        self.delete_from(node.children[idx], key)
    }

    /// Full in-order scan, for index rebuilds and tests.
    pub fn scan_all(&mut self) -> DbResult<Vec<(Vec<Value>, RecordId)>> {
        let mut out = Vec::new();
        self.scan_node(self.root_page_id, &mut out)?;
        Ok(out)
    }

    fn scan_node(&mut self, page_id: PageId, out: &mut Vec<(Vec<Value>, RecordId)>) -> DbResult<()> {
        let node = self.read_node(page_id)?;
        if node.is_leaf {
            for (k, v) in node.keys.into_iter().zip(node.values) {
                out.push((k, v));
            }
            return Ok(());
        }
        for i in 0..node.keys.len() {
            self.scan_node(node.children[i], out)?;
            out.push((node.keys[i].clone(), node.values[i]));
        }
        self.scan_node(*node.children.last().unwrap(), out)
    }

    pub fn flush(&mut self) -> DbResult<()> {
        self.pool.flush_all()
    }

    fn read_node(&mut self, page_id: PageId) -> DbResult<BTreeNode> {
        let pinned = self.pool.fetch(self.file_id, page_id)?;
        pinned.with(|page| {
            let (node, _) = decode_from_slice(page.bytes(), bincode_config())
                .map_err(|e| DbError::Storage(format!("failed to decode btree node: {e}")))?;
            Ok(node)
        })
    }

    fn write_node(&mut self, page_id: PageId, node: &BTreeNode) -> DbResult<()> {
        let bytes = bincode::serde::encode_to_vec(node, bincode_config())
            .map_err(|e| DbError::Storage(format!("failed to encode btree node: {e}")))?;
        if bytes.len() > PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "btree node too large: {} bytes (max {PAGE_SIZE})",
                bytes.len()
            )));
        }
        let pinned = self.pool.fetch(self.file_id, page_id)?;
        pinned.with_mut(|page| -> DbResult<()> {
            let mut buffer = vec![0u8; PAGE_SIZE];
            encode_into_slice(node, &mut buffer, bincode_config())
                .map_err(|e| DbError::Storage(format!("failed to encode btree node: {e}")))?;
            page.write_at(0, &buffer)?;
            Ok(())
        })
    }
}

/// Ensures an index's dirty pages reach disk even if a caller forgets to
/// call `flush` explicitly. Without this, a `BTreeIndex` built on top of a
/// private, short-lived `BufferPool` (as `ExecutionContext::create_index_storage`
/// and `open_index_storage` build) would leave every write captive to that
/// pool's lifetime, and the next call's fresh `FileManager` would see a
/// file that never grew.
impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if let Err(err) = self.pool.flush_all() {
            tracing::error!(%err, index_id = self.index_id.0, "flush on btree index drop failed");
        }
    }
}
