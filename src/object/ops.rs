use std::sync::Arc;

use crate::error::{CowfsError, Result};
use crate::object::bridge::ExternalHandle;
use crate::object::fs_object::FsObject;
use crate::object::mount::Op;
use crate::object::range_lock::{RangeMode, WHOLE_FILE};
use crate::object::types::{ObjectStat, SetAttr};

impl Op<'_> {
    /// Read up to `len` bytes at `offset`. Reads past end of file come back
    /// short (possibly empty), never as an error.
    pub fn read(&self, handle: ExternalHandle, offset: u64, len: u64) -> Result<Vec<u8>> {
        let obj = self.resolve(handle)?;

        let data = {
            let range = obj.range_locks().lock(offset, len, RangeMode::Shared);
            obj.verify()?;
            let n = obj.clamp_read(&range, offset, len);
            let mut buf = vec![0u8; n as usize];
            if n > 0 {
                self.mount.store.read_at(obj.id(), offset, &mut buf)?;
            }
            buf
        };

        // Outside the range lock: the timestamp subsystem comes back through
        // setattr.
        self.mount.stamp_atime(obj.id());
        Ok(data)
    }

    /// Write `data` at `offset`, extending the object if it ends past EOF.
    pub fn write(&self, handle: ExternalHandle, offset: u64, data: &[u8]) -> Result<usize> {
        let obj = self.resolve(handle)?;
        self.check_writable(&obj)?;
        if obj.flags().is_append_only() {
            return Err(CowfsError::PermissionDenied(obj.id()));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let len = data.len() as u64;
        let end = offset
            .checked_add(len)
            .filter(|end| *end < WHOLE_FILE)
            .ok_or(CowfsError::InvalidRange { offset, len })?;

        let range = obj.range_locks().lock(offset, len, RangeMode::Exclusive);
        obj.verify()?;
        self.mount.store.write_at(obj.id(), offset, data)?;
        obj.advance_size(&range, end);
        obj.bump_write_generation();
        obj.touch_mtime();
        drop(range);

        Ok(data.len())
    }

    /// Write `data` at the current end of file. Returns the offset written at.
    pub fn append(&self, handle: ExternalHandle, data: &[u8]) -> Result<u64> {
        let obj = self.resolve(handle)?;
        self.check_writable(&obj)?;
        let len = data.len() as u64;

        let range = obj.range_locks().lock_append(len, || obj.size());
        obj.verify()?;
        let offset = range.offset();
        match offset.checked_add(len) {
            Some(end) if end < WHOLE_FILE => {}
            _ => return Err(CowfsError::InvalidRange { offset, len }),
        }
        if !data.is_empty() {
            self.mount.store.write_at(obj.id(), offset, data)?;
            obj.advance_size(&range, offset + len);
            obj.bump_write_generation();
            obj.touch_mtime();
        }
        drop(range);

        Ok(offset)
    }

    /// Set the object's size, discarding data past it when shrinking.
    pub fn truncate(&self, handle: ExternalHandle, size: u64) -> Result<()> {
        let obj = self.resolve(handle)?;
        self.truncate_object(&obj, size)
    }

    /// Zero `[offset, offset + len)` without changing size.
    pub fn punch_hole(&self, handle: ExternalHandle, offset: u64, len: u64) -> Result<()> {
        let obj = self.resolve(handle)?;
        self.check_writable(&obj)?;
        if obj.flags().is_append_only() {
            return Err(CowfsError::PermissionDenied(obj.id()));
        }

        let range = obj.range_locks().lock(offset, len, RangeMode::Exclusive);
        obj.verify()?;
        // Nothing stored past EOF
        let n = obj.clamp_read(&range, offset, len);
        if n > 0 {
            self.mount.store.punch(obj.id(), offset, n)?;
            obj.bump_write_generation();
            obj.touch_mtime();
        }
        Ok(())
    }

    pub fn getattr(&self, handle: ExternalHandle) -> Result<ObjectStat> {
        let obj = self.resolve(handle)?;
        Ok(stat_of(&obj))
    }

    pub fn setattr(&self, handle: ExternalHandle, change: SetAttr) -> Result<ObjectStat> {
        let obj = self.resolve(handle)?;
        if self.mount.config().read_only {
            return Err(CowfsError::ReadOnly);
        }

        // An immutable object accepts nothing but a flag change that clears
        // the immutable bits.
        let current = obj.flags();
        let next = change.flags.unwrap_or(current);
        let touches_other = change.uid.is_some()
            || change.gid.is_some()
            || change.atime.is_some()
            || change.mtime.is_some()
            || change.document_id.is_some()
            || change.size.is_some();
        if current.is_immutable() && (next.is_immutable() || touches_other) {
            return Err(CowfsError::PermissionDenied(obj.id()));
        }

        if let Some(size) = change.size {
            self.truncate_object(&obj, size)?;
        }

        obj.update_attrs(|attrs| {
            if let Some(uid) = change.uid {
                attrs.uid = uid;
            }
            if let Some(gid) = change.gid {
                attrs.gid = gid;
            }
            if let Some(atime) = change.atime {
                attrs.atime = atime;
            }
            if let Some(mtime) = change.mtime {
                attrs.mtime = mtime;
            }
            if let Some(document_id) = change.document_id {
                attrs.document_id = document_id;
            }
            if let Some(flags) = change.flags {
                attrs.flags = flags;
            }
        });

        Ok(stat_of(&obj))
    }

    /// Drop one link. The on-disk object is freed when the object is torn
    /// down with no links left. Returns the remaining link count.
    pub fn remove(&self, handle: ExternalHandle) -> Result<u64> {
        let obj = self.resolve(handle)?;
        self.check_writable(&obj)?;
        let links = obj.update_attrs(|attrs| {
            attrs.links = attrs.links.saturating_sub(1);
            attrs.links
        });
        if links == 0 {
            obj.mark_unlinked();
        }
        Ok(links)
    }

    fn truncate_object(&self, obj: &Arc<FsObject>, size: u64) -> Result<()> {
        self.check_writable(obj)?;
        if size >= WHOLE_FILE {
            return Err(CowfsError::InvalidRange {
                offset: size,
                len: 0,
            });
        }

        let range = obj.range_locks().lock(0, WHOLE_FILE, RangeMode::Exclusive);
        obj.verify()?;
        let old = obj.size();
        if size < old {
            if obj.flags().is_append_only() {
                return Err(CowfsError::PermissionDenied(obj.id()));
            }
            self.mount.store.truncate(obj.id(), size)?;
        }
        obj.set_size(&range, size);
        if size != old {
            obj.bump_write_generation();
            obj.touch_mtime();
        }
        tracing::trace!("truncate {}: {} -> {}", obj.id(), old, size);
        Ok(())
    }

    fn check_writable(&self, obj: &FsObject) -> Result<()> {
        if self.mount.config().read_only {
            return Err(CowfsError::ReadOnly);
        }
        if obj.flags().is_immutable() {
            return Err(CowfsError::PermissionDenied(obj.id()));
        }
        Ok(())
    }
}

fn stat_of(obj: &FsObject) -> ObjectStat {
    ObjectStat {
        object: obj.id(),
        attrs: obj.attrs(),
        size: obj.size(),
        write_generation: obj.write_generation(),
    }
}
