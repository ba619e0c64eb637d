use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bincode::config::{self, Config as BincodeConfig};
use bincode::serde::{decode_from_slice, encode_into_slice, encode_to_vec};
use common::{DbError, DbResult, FileId, PageId, RecordId, Row};

pub const PAGE_SIZE: usize = 4096;
const HEADER_BYTES: usize = size_of::<PageHeader>();
const SLOT_BYTES: usize = size_of::<Slot>();

fn bincode_config() -> impl BincodeConfig {
    config::legacy()
}

/// A single `PAGE_SIZE`-byte buffer, with the pin/dirty bookkeeping the
/// buffer pool needs to decide what is safe to evict.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    data: Vec<u8>,
    pin_count: u32,
    dirty: bool,
}

impl Page {
    pub fn new(id: PageId) -> Self {
        let mut page = Self {
            id,
            data: vec![0u8; PAGE_SIZE],
            pin_count: 0,
            dirty: false,
        };
        page.write_header(&PageHeader::default())
            .expect("initialize page header");
        page
    }

    /// Construct a page from raw bytes read off disk (or zero-padded past EOF).
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            id,
            data,
            pin_count: 0,
            dirty: false,
        }
    }

    /// Read-only view of the page contents.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite `bytes.len()` bytes starting at `offset`, marking the page dirty.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> DbResult<()> {
        let end = offset + bytes.len();
        if end > PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "write_at({offset}, {} bytes) exceeds page bounds",
                bytes.len()
            )));
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.dirty = true;
        Ok(())
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) {
        self.pin_count = self.pin_count.saturating_sub(1);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn header(&self) -> DbResult<PageHeader> {
        let (header, read) = decode_from_slice(&self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::Storage(format!("read page header failed: {e}")))?;
        debug_assert_eq!(read, HEADER_BYTES);
        Ok(header)
    }

    fn write_header(&mut self, header: &PageHeader) -> DbResult<()> {
        let written = encode_into_slice(header, &mut self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::Storage(format!("write page header failed: {e}")))?;
        debug_assert_eq!(written, HEADER_BYTES);
        self.dirty = true;
        Ok(())
    }

    fn slot_offset(slot_idx: u16) -> usize {
        HEADER_BYTES + slot_idx as usize * SLOT_BYTES
    }

    fn read_slot(&self, slot_idx: u16) -> DbResult<Slot> {
        let start = Self::slot_offset(slot_idx);
        let end = start + SLOT_BYTES;
        if end > PAGE_SIZE {
            return Err(DbError::Storage(format!("slot {slot_idx} out of bounds")));
        }
        let (slot, read) = decode_from_slice(&self.data[start..end], bincode_config())
            .map_err(|e| DbError::Storage(format!("read slot failed: {e}")))?;
        debug_assert_eq!(read, SLOT_BYTES);
        Ok(slot)
    }

    fn write_slot(&mut self, slot_idx: u16, slot: &Slot) -> DbResult<()> {
        let start = Self::slot_offset(slot_idx);
        let end = start + SLOT_BYTES;
        if end > PAGE_SIZE {
            return Err(DbError::Storage(format!("slot {slot_idx} out of bounds")));
        }
        let written = encode_into_slice(slot, &mut self.data[start..end], bincode_config())
            .map_err(|e| DbError::Storage(format!("write slot failed: {e}")))?;
        debug_assert_eq!(written, SLOT_BYTES);
        self.dirty = true;
        Ok(())
    }

    fn free_space(&self) -> DbResult<usize> {
        let header = self.header()?;
        let slots_start = HEADER_BYTES + header.num_slots as usize * SLOT_BYTES;
        let free_offset = usize::from(header.free_offset);
        Ok(free_offset.saturating_sub(slots_start))
    }

    fn can_fit(&self, payload_len: usize) -> DbResult<bool> {
        let needed = payload_len + SLOT_BYTES;
        Ok(self.free_space()? >= needed)
    }

    fn append_tuple(&mut self, bytes: &[u8]) -> DbResult<u16> {
        if bytes.len() > u16::MAX as usize {
            return Err(DbError::Storage("row exceeds maximum tuple size".into()));
        }
        let mut header = self.header()?;
        if header.num_slots == u16::MAX {
            return Err(DbError::Storage("slot index overflow".into()));
        }
        if !self.can_fit(bytes.len())? {
            return Err(DbError::Storage("page full".into()));
        }
        let slot_idx = header.num_slots;
        let len = bytes.len() as u16;
        let new_free_offset = header.free_offset - len;
        self.data[new_free_offset as usize..header.free_offset as usize].copy_from_slice(bytes);

        let slot = Slot {
            offset: new_free_offset,
            len,
        };
        self.write_slot(slot_idx, &slot)?;

        header.num_slots += 1;
        header.free_offset = new_free_offset;
        self.write_header(&header)?;
        self.dirty = true;
        Ok(slot_idx)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PageHeader {
    pub num_slots: u16,
    pub free_offset: u16,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self {
            num_slots: 0,
            free_offset: PAGE_SIZE as u16,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Slot {
    pub offset: u16,
    pub len: u16,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct OpenFile {
    name: String,
    file: File,
    /// Next id `allocate_page` will hand out. Tracked in memory rather than
    /// re-derived from the file length on every call, since a page can be
    /// allocated (and handed to a caller) before it is ever written back —
    /// re-deriving from length would hand out the same id twice.
    next_page: u64,
}

impl OpenFile {
    fn new(name: String, file: File) -> DbResult<Self> {
        let next_page = file.metadata()?.len() / PAGE_SIZE as u64;
        Ok(Self {
            name,
            file,
            next_page,
        })
    }

    fn num_pages(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len() / PAGE_SIZE as u64)
    }
}

/// Owns every open file backing the database (table heaps, indexes, and the
/// WAL's own segment files go through the same primitive), keyed by a small
/// dense `FileId` handed out at `create_file`/`open_file` time.
pub struct FileManager {
    root: PathBuf,
    files: HashMap<FileId, OpenFile>,
    name_to_id: HashMap<String, FileId>,
    next_id: u64,
}

impl FileManager {
    pub fn new(root: impl Into<PathBuf>) -> DbResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            files: HashMap::new(),
            name_to_id: HashMap::new(),
            next_id: 1,
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create a new file (truncating any previous contents) and register it.
    pub fn create_file(&mut self, name: &str) -> DbResult<FileId> {
        let path = self.path_for(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.insert(id, OpenFile::new(name.to_string(), file)?);
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    /// Open an existing file, registering it if this is the first time it is
    /// seen this process. Creates the file on disk if it does not yet exist,
    /// matching the teacher's heap-file behavior of opening tables lazily.
    pub fn open_file(&mut self, name: &str) -> DbResult<FileId> {
        if let Some(id) = self.name_to_id.get(name) {
            return Ok(*id);
        }
        let path = self.path_for(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.insert(id, OpenFile::new(name.to_string(), file)?);
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    /// Remove a file from disk and forget it.
    pub fn delete_file(&mut self, name: &str) -> DbResult<()> {
        let id = self
            .name_to_id
            .remove(name)
            .ok_or_else(|| DbError::Storage(format!("file not found: {name}")))?;
        self.files.remove(&id);
        fs::remove_file(self.path_for(name))?;
        Ok(())
    }

    fn open_file_mut(&mut self, file_id: FileId) -> DbResult<&mut OpenFile> {
        self.files
            .get_mut(&file_id)
            .ok_or_else(|| DbError::Storage(format!("unknown file id {}", file_id.0)))
    }

    /// The registered name a `FileId` was opened or created under. Used by
    /// the write-ahead rule to log a restart-stable file identifier, since
    /// `FileId`s are only dense and meaningful within a single process's
    /// `FileManager` instance.
    pub fn file_name(&self, file_id: FileId) -> DbResult<&str> {
        self.files
            .get(&file_id)
            .map(|open| open.name.as_str())
            .ok_or_else(|| DbError::Storage(format!("unknown file id {}", file_id.0)))
    }

    /// Allocate the next dense page id for a file, without zero-filling it on
    /// disk. Drawn from an in-memory counter rather than the file's current
    /// length, so back-to-back allocations against the same `FileManager`
    /// hand out distinct ids even before the first one is written back.
    pub fn allocate_page(&mut self, file_id: FileId) -> DbResult<PageId> {
        let open = self.open_file_mut(file_id)?;
        let id = open.next_page;
        open.next_page += 1;
        Ok(PageId(id))
    }

    /// Number of pages physically present in the file on disk. Unlike
    /// `allocate_page`, this never advances the allocation counter — it's a
    /// read-only query, safe to call from code that just wants to know how
    /// far a file currently extends.
    pub fn page_count(&mut self, file_id: FileId) -> DbResult<u64> {
        let open = self.open_file_mut(file_id)?;
        open.num_pages()
    }

    /// Read a page. Page ids past end-of-file fail; ids within the file whose
    /// bytes were never explicitly written return zeros (short reads are
    /// padded to a full page).
    pub fn read_page(&mut self, file_id: FileId, page_id: PageId) -> DbResult<Page> {
        let open = self.open_file_mut(file_id)?;
        let num_pages = open.num_pages()?;
        if page_id.0 >= num_pages {
            return Err(DbError::Storage(format!(
                "page {} not found in file {}",
                page_id.0, open.name
            )));
        }
        let mut data = vec![0u8; PAGE_SIZE];
        open.file.seek(SeekFrom::Start(page_id.0 * PAGE_SIZE as u64))?;
        let read = open.file.read(&mut data)?;
        let _ = read; // short reads stay zero-padded
        Ok(Page::from_bytes(page_id, data))
    }

    /// Write a page, extending the file if `page_id` lies past its current end.
    pub fn write_page(&mut self, file_id: FileId, page: &Page) -> DbResult<()> {
        let open = self.open_file_mut(file_id)?;
        open.file
            .seek(SeekFrom::Start(page.id.0 * PAGE_SIZE as u64))?;
        open.file.write_all(page.bytes())?;
        Ok(())
    }

    /// Flush all prior `write_page` calls for a file to durable storage.
    pub fn sync(&mut self, file_id: FileId) -> DbResult<()> {
        let open = self.open_file_mut(file_id)?;
        open.file.flush()?;
        open.file.sync_all()?;
        Ok(())
    }

    /// Flush every open file.
    pub fn sync_all(&mut self) -> DbResult<()> {
        let ids: Vec<FileId> = self.files.keys().copied().collect();
        for id in ids {
            self.sync(id)?;
        }
        Ok(())
    }

    /// Drop all file handles, syncing first.
    pub fn close(&mut self) -> DbResult<()> {
        self.sync_all()?;
        self.files.clear();
        self.name_to_id.clear();
        Ok(())
    }
}

pub trait HeapTable {
    fn insert(&mut self, row: &Row) -> DbResult<RecordId>;
    fn get(&mut self, rid: RecordId) -> DbResult<Row>;
    fn update(&mut self, rid: RecordId, row: &Row) -> DbResult<()>;
    fn delete(&mut self, rid: RecordId) -> DbResult<()>;
}

/// Slotted-page heap file, the on-disk row store for a single table. Talks
/// directly to a [`FileManager`] rather than to its own raw `File`, so every
/// byte that reaches disk goes through the same file layer the WAL and
/// B-tree use.
#[derive(Debug)]
pub struct HeapFile {
    files: FileManager,
    file_id: FileId,
    pub table_id: u64,
}

impl HeapFile {
    pub fn open(path: &Path, table_id: u64) -> DbResult<Self> {
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .ok_or_else(|| DbError::Storage("heap file path has no file name".into()))?
            .to_string_lossy()
            .into_owned();
        let mut files = FileManager::new(root)?;
        let file_id = files.open_file(&name)?;
        Ok(Self {
            files,
            file_id,
            table_id,
        })
    }

    fn num_pages(&mut self) -> DbResult<u64> {
        self.files.page_count(self.file_id)
    }

    fn last_page_id(&mut self) -> DbResult<Option<PageId>> {
        let pages = self.num_pages()?;
        if pages == 0 {
            Ok(None)
        } else {
            Ok(Some(PageId(pages - 1)))
        }
    }

    fn allocate_page(&mut self) -> DbResult<Page> {
        let id = self.files.allocate_page(self.file_id)?;
        Ok(Page::new(id))
    }

    fn read_page(&mut self, page_id: PageId) -> DbResult<Page> {
        match self.files.read_page(self.file_id, page_id) {
            Ok(page) => Ok(page),
            Err(DbError::Storage(_)) => Ok(Page::new(page_id)),
            Err(other) => Err(other),
        }
    }

    fn write_page(&mut self, page: &Page) -> DbResult<()> {
        self.files.write_page(self.file_id, page)?;
        self.files.sync(self.file_id)
    }

    fn ensure_page_exists(&mut self, page_id: PageId) -> DbResult<()> {
        if page_id.0 >= self.num_pages()? {
            return Err(DbError::Storage(format!("page {} not allocated", page_id.0)));
        }
        Ok(())
    }

    /// Number of pages currently allocated to this heap file.
    pub fn page_count(&mut self) -> DbResult<u64> {
        self.num_pages()
    }

    /// Number of slots (live or tombstoned) recorded in a page's header.
    pub fn num_slots(&mut self, page_id: PageId) -> DbResult<u16> {
        self.ensure_page_exists(page_id)?;
        let page = self.read_page(page_id)?;
        Ok(page.header()?.num_slots)
    }

    /// Whether a slot has been tombstoned by a prior delete. Unlike `get`,
    /// this does not attempt to deserialize the slot's payload.
    pub fn slot_is_empty(&mut self, page_id: PageId, slot_idx: u16) -> DbResult<bool> {
        self.ensure_page_exists(page_id)?;
        let page = self.read_page(page_id)?;
        Ok(page.read_slot(slot_idx)?.is_empty())
    }
}

impl HeapTable for HeapFile {
    fn insert(&mut self, row: &Row) -> DbResult<RecordId> {
        let bytes = encode_to_vec(row, bincode_config())
            .map_err(|e| DbError::Storage(format!("serialize row failed: {e}")))?;

        let mut page = match self.last_page_id()? {
            Some(id) => self.read_page(id)?,
            None => self.allocate_page()?,
        };

        if !page.can_fit(bytes.len())? {
            page = self.allocate_page()?;
        }

        let slot = page.append_tuple(&bytes)?;
        self.write_page(&page)?;

        Ok(RecordId {
            page_id: PageId(page.id.0),
            slot,
        })
    }

    fn get(&mut self, rid: RecordId) -> DbResult<Row> {
        self.ensure_page_exists(rid.page_id)?;
        let page = self.read_page(rid.page_id)?;
        let header = page.header()?;
        if rid.slot >= header.num_slots {
            return Err(DbError::Storage(format!("invalid slot {}", rid.slot)));
        }
        let slot = page.read_slot(rid.slot)?;
        if slot.is_empty() {
            return Err(DbError::Storage("slot empty".into()));
        }
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        let (row, _) = decode_from_slice(&page.bytes()[start..end], bincode_config())
            .map_err(|e| DbError::Storage(format!("deserialize row failed: {e}")))?;
        Ok(row)
    }

    fn update(&mut self, rid: RecordId, row: &Row) -> DbResult<()> {
        self.delete(rid)?;
        self.insert(row)?;
        Ok(())
    }

    fn delete(&mut self, rid: RecordId) -> DbResult<()> {
        self.ensure_page_exists(rid.page_id)?;
        let mut page = self.read_page(rid.page_id)?;
        let header = page.header()?;
        if rid.slot >= header.num_slots {
            return Err(DbError::Storage(format!("invalid slot {}", rid.slot)));
        }
        let mut slot = page.read_slot(rid.slot)?;
        if slot.is_empty() {
            return Err(DbError::Storage("slot already empty".into()));
        }
        slot.len = 0;
        page.write_slot(rid.slot, &slot)?;
        self.write_page(&page)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
