pub mod codec;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::path::Path;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice, encode_to_vec};
use common::{DbError, DbResult, PageId, RecordId, Record, PAGE_SIZE};

/// Page 0 of every table file is reserved for catalog metadata; record
/// storage always starts at page 1.
pub const FIRST_DATA_PAGE: u64 = 1;

const HEADER_BYTES: usize = size_of::<PageHeader>();
const SLOT_BYTES: usize = size_of::<Slot>();

fn bincode_config() -> impl Config {
    config::legacy()
}

#[derive(Debug, Clone)]
pub struct Page {
    pub id: u64,
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(id: u64) -> Self {
        let mut page = Self {
            id,
            data: vec![0u8; PAGE_SIZE],
        };
        page.write_header(&PageHeader::default())
            .expect("initialize page header");
        page
    }

    /// A raw page carrying bytes that are not a slotted tuple area, such as
    /// page 0's encoded table metadata.
    pub fn from_bytes(id: u64, bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() > PAGE_SIZE {
            return Err(DbError::MetadataTooLarge(bytes.len(), PAGE_SIZE));
        }
        let mut data = vec![0u8; PAGE_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { id, data })
    }

    pub fn header(&self) -> DbResult<PageHeader> {
        let (header, read) = decode_from_slice(&self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("read page header failed: {e}")))?;
        debug_assert_eq!(read, HEADER_BYTES);
        Ok(header)
    }

    fn write_header(&mut self, header: &PageHeader) -> DbResult<()> {
        let written = encode_into_slice(header, &mut self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("write page header failed: {e}")))?;
        debug_assert_eq!(written, HEADER_BYTES);
        Ok(())
    }

    fn slot_offset(slot_idx: u16) -> usize {
        HEADER_BYTES + slot_idx as usize * SLOT_BYTES
    }

    pub fn read_slot(&self, slot_idx: u16) -> DbResult<Slot> {
        let start = Self::slot_offset(slot_idx);
        let end = start + SLOT_BYTES;
        if end > PAGE_SIZE {
            return Err(DbError::Invalid(format!("slot {slot_idx} out of bounds")));
        }
        let (slot, read) = decode_from_slice(&self.data[start..end], bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("read slot failed: {e}")))?;
        debug_assert_eq!(read, SLOT_BYTES);
        Ok(slot)
    }

    fn write_slot(&mut self, slot_idx: u16, slot: &Slot) -> DbResult<()> {
        let start = Self::slot_offset(slot_idx);
        let end = start + SLOT_BYTES;
        if end > PAGE_SIZE {
            return Err(DbError::Invalid(format!("slot {slot_idx} out of bounds")));
        }
        let written = encode_into_slice(slot, &mut self.data[start..end], bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("write slot failed: {e}")))?;
        debug_assert_eq!(written, SLOT_BYTES);
        Ok(())
    }

    fn free_space(&self) -> DbResult<usize> {
        let header = self.header()?;
        let slots_start = HEADER_BYTES + header.num_slots as usize * SLOT_BYTES;
        let free_offset = usize::from(header.free_offset);
        Ok(free_offset.saturating_sub(slots_start))
    }

    pub fn can_fit(&self, payload_len: usize) -> DbResult<bool> {
        let needed = payload_len + SLOT_BYTES;
        Ok(self.free_space()? >= needed)
    }

    /// Mark a slot's tuple as deleted without reclaiming its bytes. Callers
    /// that need the space back should follow with [`Page::compact`].
    pub fn delete_slot(&mut self, slot_idx: u16) -> DbResult<()> {
        let mut slot = self.read_slot(slot_idx)?;
        slot.len = 0;
        self.write_slot(slot_idx, &slot)
    }

    pub fn append_tuple(&mut self, bytes: &[u8]) -> DbResult<u16> {
        if bytes.len() > u16::MAX as usize {
            return Err(DbError::Invalid("record exceeds maximum tuple size".into()));
        }
        let mut header = self.header()?;
        if header.num_slots == u16::MAX {
            return Err(DbError::Invalid("slot index overflow".into()));
        }
        if !self.can_fit(bytes.len())? {
            return Err(DbError::Invalid("page full".into()));
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
        Ok(slot_idx)
    }

    /// Physically reclaim a deleted slot's bytes so repeated update/delete
    /// cycles on the same page do not leak space.
    pub fn compact(&mut self) -> DbResult<()> {
        let header = self.header()?;
        let mut live: Vec<(u16, Vec<u8>)> = Vec::new();
        for idx in 0..header.num_slots {
            let slot = self.read_slot(idx)?;
            if !slot.is_empty() {
                let start = slot.offset as usize;
                let end = start + slot.len as usize;
                live.push((idx, self.data[start..end].to_vec()));
            }
        }

        let mut fresh = Page::new(self.id);
        // Slot indices are reused as record-id handles outside this page, so
        // compaction must preserve each surviving slot's original index.
        let max_idx = live.iter().map(|(idx, _)| *idx).max();
        if let Some(max_idx) = max_idx {
            let mut header = fresh.header()?;
            header.num_slots = max_idx + 1;
            fresh.write_header(&header)?;
            for idx in 0..=max_idx {
                fresh.write_slot(idx, &Slot { offset: 0, len: 0 })?;
            }
        }
        for (idx, bytes) in live {
            let mut header = fresh.header()?;
            let new_free_offset = header.free_offset - bytes.len() as u16;
            fresh.data[new_free_offset as usize..header.free_offset as usize]
                .copy_from_slice(&bytes);
            fresh.write_slot(
                idx,
                &Slot {
                    offset: new_free_offset,
                    len: bytes.len() as u16,
                },
            )?;
            header.free_offset = new_free_offset;
            fresh.write_header(&header)?;
        }

        *self = fresh;
        Ok(())
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

pub trait HeapTable {
    fn insert(&mut self, record: &Record) -> DbResult<RecordId>;
    fn get(&mut self, rid: RecordId) -> DbResult<Record>;
    fn update(&mut self, rid: RecordId, record: &Record) -> DbResult<RecordId>;
    fn delete(&mut self, rid: RecordId) -> DbResult<()>;
}

/// A single table's backing file: page 0 is metadata, pages 1.. hold
/// slotted record tuples.
#[derive(Debug)]
pub struct HeapFile {
    file: File,
}

impl HeapFile {
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    fn file_len(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn num_pages(&self) -> DbResult<u64> {
        Ok(self.file_len()? / PAGE_SIZE as u64)
    }

    fn last_data_page_id(&self) -> DbResult<Option<u64>> {
        let pages = self.num_pages()?;
        if pages <= FIRST_DATA_PAGE {
            Ok(None)
        } else {
            Ok(Some(pages - 1))
        }
    }

    fn allocate_page(&self, id: u64) -> Page {
        Page::new(id)
    }

    pub fn read_page(&mut self, page_id: u64) -> DbResult<Page> {
        let mut page = Page::new(page_id);
        if page_id >= self.num_pages()? {
            return Ok(page);
        }

        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut page.data)?;
        Ok(page)
    }

    pub fn write_page(&mut self, page: &Page) -> DbResult<()> {
        self.file
            .seek(SeekFrom::Start(page.id * PAGE_SIZE as u64))?;
        self.file.write_all(&page.data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Write raw metadata bytes to page 0. Used by the owning `Table` to
    /// persist catalog metadata outside the slotted tuple format.
    pub fn write_metadata_page(&mut self, bytes: &[u8]) -> DbResult<()> {
        let page = Page::from_bytes(0, bytes)?;
        self.write_page(&page)
    }

    pub fn read_metadata_page(&mut self) -> DbResult<Page> {
        self.read_page(0)
    }

    fn ensure_data_page_exists(&self, page_id: u64) -> DbResult<()> {
        if page_id < FIRST_DATA_PAGE || page_id >= self.num_pages()? {
            return Err(DbError::NotFound(format!("page {page_id} not allocated")));
        }
        Ok(())
    }
}

impl HeapTable for HeapFile {
    fn insert(&mut self, record: &Record) -> DbResult<RecordId> {
        let bytes = encode_to_vec(record, bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("serialize record failed: {e}")))?;

        let mut page = match self.last_data_page_id()? {
            Some(id) => self.read_page(id)?,
            None => {
                let id = self.num_pages()?.max(FIRST_DATA_PAGE);
                self.allocate_page(id)
            }
        };

        if !page.can_fit(bytes.len())? {
            page = self.allocate_page(self.num_pages()?.max(page.id + 1));
        }

        let slot = page.append_tuple(&bytes)?;
        self.write_page(&page)?;

        Ok(RecordId {
            page_id: PageId(page.id),
            slot,
        })
    }

    fn get(&mut self, rid: RecordId) -> DbResult<Record> {
        self.ensure_data_page_exists(rid.page_id.0)?;
        let page = self.read_page(rid.page_id.0)?;
        let header = page.header()?;
        if rid.slot >= header.num_slots {
            return Err(DbError::NotFound(format!("invalid slot {}", rid.slot)));
        }
        let slot = page.read_slot(rid.slot)?;
        if slot.is_empty() {
            return Err(DbError::NotFound("record already deleted".into()));
        }
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        let (record, _) = decode_from_slice(&page.data[start..end], bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("deserialize record failed: {e}")))?;
        Ok(record)
    }

    fn update(&mut self, rid: RecordId, record: &Record) -> DbResult<RecordId> {
        self.delete(rid)?;
        self.insert(record)
    }

    fn delete(&mut self, rid: RecordId) -> DbResult<()> {
        self.ensure_data_page_exists(rid.page_id.0)?;
        let mut page = self.read_page(rid.page_id.0)?;
        let header = page.header()?;
        if rid.slot >= header.num_slots {
            return Err(DbError::NotFound(format!("invalid slot {}", rid.slot)));
        }
        let mut slot = page.read_slot(rid.slot)?;
        if slot.is_empty() {
            return Err(DbError::NotFound("record already deleted".into()));
        }
        slot.len = 0;
        page.write_slot(rid.slot, &slot)?;
        page.compact()?;
        self.write_page(&page)?;
        Ok(())
    }
}
