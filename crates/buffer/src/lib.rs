//! Buffer pool manager: mediates every page access between the executor /
//! B-tree and the file layer, caching resident pages and enforcing the
//! write-ahead rule on dirty eviction.

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use common::{DbError, DbResult, FileId, PageId};
use hashbrown::HashMap;
use storage::{FileManager, Page};

/// Invoked before a dirty page is written back to disk, so the WAL can
/// guarantee its corresponding log records are already durable (the
/// write-ahead rule). The default buffer pool has no hook installed.
///
/// Receives the page's registered file name rather than its `FileId`: a
/// `FileId` is only dense and meaningful within this process's
/// `FileManager`, while the WAL record it backs needs to identify the file
/// across a restart.
pub type ForceRuleHook = Box<dyn Fn(&str, &Page) -> DbResult<()> + Send>;

#[derive(Default, Clone, Copy, Debug)]
pub struct BufferStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl BufferStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Frame {
    page: Page,
    /// Position in the LRU recency list; higher is more recent.
    recency: u64,
}

struct Inner {
    files: FileManager,
    frames: HashMap<(FileId, PageId), Frame>,
    capacity: usize,
    clock: u64,
    stats: BufferStats,
    force_rule: Option<ForceRuleHook>,
}

impl Inner {
    fn dirty_count(&self) -> usize {
        self.frames.values().filter(|f| f.page.is_dirty()).count()
    }

    fn touch(&mut self, key: (FileId, PageId)) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(frame) = self.frames.get_mut(&key) {
            frame.recency = clock;
        }
    }

    fn evict_one(&mut self) -> DbResult<()> {
        let victim = self
            .frames
            .iter()
            .filter(|(_, f)| !f.page.is_pinned())
            .min_by_key(|(_, f)| f.recency)
            .map(|(k, _)| *k);

        let Some(key) = victim else {
            return Err(DbError::Storage("BufferFull: no unpinned page to evict".into()));
        };

        let frame = self.frames.remove(&key).expect("victim key present");
        if frame.page.is_dirty() {
            if let Some(hook) = &self.force_rule {
                let name = self.files.file_name(key.0)?.to_string();
                hook(&name, &frame.page)?;
            }
            self.files.write_page(key.0, &frame.page)?;
        }
        self.stats.evictions += 1;
        Ok(())
    }

    fn insert_frame(&mut self, key: (FileId, PageId), page: Page) -> DbResult<()> {
        if self.frames.len() >= self.capacity && !self.frames.contains_key(&key) {
            self.evict_one()?;
        }
        self.clock += 1;
        let recency = self.clock;
        self.frames.insert(key, Frame { page, recency });
        Ok(())
    }
}

/// Scoped, pinned acquisition of a page. Unpins on drop, on every exit path.
pub struct PinnedPage {
    inner: Arc<Mutex<Inner>>,
    key: (FileId, PageId),
}

impl PinnedPage {
    /// Run a closure with shared access to the underlying page.
    pub fn with<R>(&self, f: impl FnOnce(&Page) -> R) -> R {
        let inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let frame = inner.frames.get(&self.key).expect("pinned page resident");
        f(&frame.page)
    }

    /// Run a closure with exclusive access to the underlying page.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let frame = inner
            .frames
            .get_mut(&self.key)
            .expect("pinned page resident");
        f(&mut frame.page)
    }

    pub fn page_id(&self) -> PageId {
        self.key.1
    }

    pub fn file_id(&self) -> FileId {
        self.key.0
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        if let Some(frame) = inner.frames.get_mut(&self.key) {
            frame.page.unpin();
        }
    }
}

/// Clone-able handle to a shared buffer pool. `fetch`/`new_page` return a
/// scoped [`PinnedPage`]; the page stays pinned for as long as that handle
/// is alive and is eligible for eviction again once it is dropped.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<Inner>>,
}

impl BufferPool {
    pub fn new(files: FileManager, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be > 0");
        Self {
            inner: Arc::new(Mutex::new(Inner {
                files,
                frames: HashMap::new(),
                capacity,
                clock: 0,
                stats: BufferStats::default(),
                force_rule: None,
            })),
        }
    }

    /// Install a callback invoked before any dirty page is written back,
    /// giving the WAL a chance to force its log records to disk first.
    pub fn set_force_rule_hook(&self, hook: ForceRuleHook) {
        self.inner.lock().expect("buffer pool mutex poisoned").force_rule = Some(hook);
    }

    /// Fetch a page, loading it from the file layer on a cache miss.
    pub fn fetch(&self, file_id: FileId, page_id: PageId) -> DbResult<PinnedPage> {
        let key = (file_id, page_id);
        {
            let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
            if inner.frames.contains_key(&key) {
                inner.stats.hits += 1;
                inner.touch(key);
                inner.frames.get_mut(&key).unwrap().page.pin();
                return Ok(PinnedPage {
                    inner: self.inner.clone(),
                    key,
                });
            }
        }

        let page = {
            let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
            let page = inner.files.read_page(file_id, page_id)?;
            inner.stats.misses += 1;
            page
        };

        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        inner.insert_frame(key, page)?;
        inner.frames.get_mut(&key).unwrap().page.pin();
        Ok(PinnedPage {
            inner: self.inner.clone(),
            key,
        })
    }

    /// Allocate a fresh page in `file_id` and return it pinned.
    pub fn new_page(&self, file_id: FileId) -> DbResult<PinnedPage> {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let page_id = inner.files.allocate_page(file_id)?;
        let mut page = Page::new(page_id);
        page.mark_dirty();
        let key = (file_id, page_id);
        inner.insert_frame(key, page)?;
        inner.frames.get_mut(&key).unwrap().page.pin();
        Ok(PinnedPage {
            inner: self.inner.clone(),
            key,
        })
    }

    /// Write every dirty resident page back to the file layer.
    pub fn flush_all(&self) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("buffer pool mutex poisoned");
        let dirty_keys: Vec<(FileId, PageId)> = inner
            .frames
            .iter()
            .filter(|(_, f)| f.page.is_dirty())
            .map(|(k, _)| *k)
            .collect();

        for key in dirty_keys {
            let (file_id, page) = {
                let frame = inner.frames.get(&key).expect("dirty key present");
                (key.0, frame.page.clone())
            };
            if let Some(hook) = &inner.force_rule {
                let name = inner.files.file_name(file_id)?.to_string();
                hook(&name, &page)?;
            }
            inner.files.write_page(file_id, &page)?;
            inner.frames.get_mut(&key).unwrap().page.mark_clean();
        }
        inner.files.sync_all()
    }

    pub fn stats(&self) -> BufferStats {
        self.inner.lock().expect("buffer pool mutex poisoned").stats
    }

    pub fn residency(&self) -> usize {
        self.inner.lock().expect("buffer pool mutex poisoned").frames.len()
    }

    pub fn dirty_pages(&self) -> usize {
        self.inner
            .lock()
            .expect("buffer pool mutex poisoned")
            .dirty_count()
    }
}

