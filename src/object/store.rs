use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::object::types::{ObjectAttrs, ObjectId};

/// Persisted attribute state handed out by the store when an object is
/// materialized, and handed back (with the cached values) when it is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrHandle {
    pub object: ObjectId,
    pub attrs: ObjectAttrs,
    pub size: u64,
}

/// The on-disk side of the object layer: attribute handles and byte data.
///
/// Implementations synchronize their own internal state but rely on the
/// caller's range locks for data consistency.
pub trait ObjectStore: Send + Sync {
    /// Allocate a new on-disk object and return its number.
    fn allocate(&self, attrs: ObjectAttrs) -> io::Result<ObjectId>;

    fn attach(&self, object: ObjectId) -> io::Result<AttrHandle>;

    /// Write cached attributes back and drop the handle.
    fn release(&self, handle: AttrHandle);

    /// Free an object whose last link is gone.
    fn free(&self, object: ObjectId);

    /// Fill `buf` from `offset`. Bytes never written read as zero.
    fn read_at(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write_at(&self, object: ObjectId, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Discard everything at or past `size`.
    fn truncate(&self, object: ObjectId, size: u64) -> io::Result<()>;

    /// Zero `[offset, offset + len)` without changing the object's length.
    fn punch(&self, object: ObjectId, offset: u64, len: u64) -> io::Result<()>;
}

/// Block granularity of `MemStore` data. Only written blocks are stored, so
/// a write far past EOF costs one block.
const BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Default)]
struct MemObject {
    attrs: ObjectAttrs,
    size: u64,
    /// Written blocks by index. Missing blocks read as zero.
    blocks: BTreeMap<u64, Box<[u8]>>,
    /// End of the furthest byte written.
    extent: u64,
}

impl MemObject {
    fn with_data(attrs: ObjectAttrs, data: &[u8]) -> Self {
        let mut object = MemObject {
            attrs,
            size: data.len() as u64,
            ..MemObject::default()
        };
        object.write(0, data);
        object
    }

    fn read(&self, offset: u64, buf: &mut [u8]) {
        buf.fill(0);
        let end = offset.saturating_add(buf.len() as u64).min(self.extent);
        if offset >= end {
            return;
        }
        let first = offset / BLOCK_SIZE;
        let last = (end - 1) / BLOCK_SIZE;
        for (index, block) in self.blocks.range(first..=last) {
            let block_start = index * BLOCK_SIZE;
            let from = offset.max(block_start);
            let to = end.min(block_start + BLOCK_SIZE);
            let src = &block[(from - block_start) as usize..(to - block_start) as usize];
            buf[(from - offset) as usize..(to - offset) as usize].copy_from_slice(src);
        }
    }

    /// Caller guarantees `offset + data.len()` does not overflow.
    fn write(&mut self, offset: u64, data: &[u8]) {
        let mut pos = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let index = pos / BLOCK_SIZE;
            let within = (pos % BLOCK_SIZE) as usize;
            let n = rest.len().min(BLOCK_SIZE as usize - within);
            let block = self
                .blocks
                .entry(index)
                .or_insert_with(|| vec![0u8; BLOCK_SIZE as usize].into_boxed_slice());
            block[within..within + n].copy_from_slice(&rest[..n]);
            pos += n as u64;
            rest = &rest[n..];
        }
        self.extent = self.extent.max(pos);
    }

    fn truncate(&mut self, size: u64) {
        if size >= self.extent {
            return;
        }
        let kept = size.div_ceil(BLOCK_SIZE);
        self.blocks.split_off(&kept);
        let within = (size % BLOCK_SIZE) as usize;
        if within != 0 {
            if let Some(block) = self.blocks.get_mut(&(size / BLOCK_SIZE)) {
                block[within..].fill(0);
            }
        }
        self.extent = size;
    }

    fn punch(&mut self, offset: u64, len: u64) {
        let end = offset.saturating_add(len).min(self.extent);
        if offset >= end {
            return;
        }
        let first = offset / BLOCK_SIZE;
        let last = (end - 1) / BLOCK_SIZE;
        // Only visit blocks that exist; the range may span a huge hole.
        let touched: Vec<u64> = self.blocks.range(first..=last).map(|(i, _)| *i).collect();
        for index in touched {
            let block_start = index * BLOCK_SIZE;
            let from = offset.max(block_start);
            let to = end.min(block_start + BLOCK_SIZE);
            if to - from == BLOCK_SIZE {
                self.blocks.remove(&index);
            } else if let Some(block) = self.blocks.get_mut(&index) {
                block[(from - block_start) as usize..(to - block_start) as usize].fill(0);
            }
        }
    }
}

/// In-memory `ObjectStore` with attachment failure injection.
#[derive(Debug)]
pub struct MemStore {
    objects: DashMap<ObjectId, MemObject>,
    next_object: AtomicU64,
    attach_calls: AtomicU64,
    fail_attach: Mutex<HashSet<ObjectId>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore {
            objects: DashMap::new(),
            next_object: AtomicU64::new(1),
            attach_calls: AtomicU64::new(0),
            fail_attach: Mutex::new(HashSet::new()),
        }
    }

    /// Seed an object with a fixed number, as if it already existed on disk.
    pub fn insert(&self, object: ObjectId, attrs: ObjectAttrs, data: Vec<u8>) {
        self.objects.insert(object, MemObject::with_data(attrs, &data));
        self.next_object.fetch_max(object.0 + 1, Ordering::SeqCst);
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    /// Number of successful and failed `attach` calls so far.
    pub fn attach_calls(&self) -> u64 {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn fail_attach_for(&self, object: ObjectId) {
        self.fail_attach.lock().insert(object);
    }

    pub fn clear_attach_failure(&self, object: ObjectId) {
        self.fail_attach.lock().remove(&object);
    }

    /// Persisted size and attributes, as last written back by `release`.
    pub fn persisted(&self, object: ObjectId) -> Option<(ObjectAttrs, u64)> {
        self.objects
            .get(&object)
            .map(|o| (o.attrs.clone(), o.size))
    }

    /// Stored bytes up to the furthest write, holes zero-filled.
    pub fn data(&self, object: ObjectId) -> Option<Vec<u8>> {
        self.objects.get(&object).map(|o| {
            let mut buf = vec![0u8; o.extent as usize];
            o.read(0, &mut buf);
            buf
        })
    }

    /// Number of blocks holding written data.
    pub fn stored_blocks(&self, object: ObjectId) -> Option<usize> {
        self.objects.get(&object).map(|o| o.blocks.len())
    }

    fn not_found(object: ObjectId) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("{} not on disk", object))
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemStore {
    fn allocate(&self, attrs: ObjectAttrs) -> io::Result<ObjectId> {
        let object = ObjectId(self.next_object.fetch_add(1, Ordering::SeqCst));
        self.objects.insert(
            object,
            MemObject {
                attrs,
                ..MemObject::default()
            },
        );
        Ok(object)
    }

    fn attach(&self, object: ObjectId) -> io::Result<AttrHandle> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach.lock().contains(&object) {
            return Err(io::Error::other(format!(
                "injected attach failure for {}",
                object
            )));
        }
        let entry = self.objects.get(&object).ok_or_else(|| Self::not_found(object))?;
        Ok(AttrHandle {
            object,
            attrs: entry.attrs.clone(),
            size: entry.size,
        })
    }

    fn release(&self, handle: AttrHandle) {
        if let Some(mut entry) = self.objects.get_mut(&handle.object) {
            entry.attrs = handle.attrs;
            entry.size = handle.size;
        }
    }

    fn free(&self, object: ObjectId) {
        self.objects.remove(&object);
    }

    fn read_at(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let entry = self.objects.get(&object).ok_or_else(|| Self::not_found(object))?;
        entry.read(offset, buf);
        Ok(())
    }

    fn write_at(&self, object: ObjectId, offset: u64, data: &[u8]) -> io::Result<()> {
        if offset.checked_add(data.len() as u64).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write past end of addressable space",
            ));
        }
        let mut entry = self
            .objects
            .get_mut(&object)
            .ok_or_else(|| Self::not_found(object))?;
        entry.write(offset, data);
        Ok(())
    }

    fn truncate(&self, object: ObjectId, size: u64) -> io::Result<()> {
        let mut entry = self
            .objects
            .get_mut(&object)
            .ok_or_else(|| Self::not_found(object))?;
        entry.truncate(size);
        Ok(())
    }

    fn punch(&self, object: ObjectId, offset: u64, len: u64) -> io::Result<()> {
        let mut entry = self
            .objects
            .get_mut(&object)
            .ok_or_else(|| Self::not_found(object))?;
        entry.punch(offset, len);
        Ok(())
    }
}
