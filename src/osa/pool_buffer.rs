use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::ptr::NonNull;

use crate::host::{SdhciError, SdhciResult};

/// Zero-initialised heap block with a caller-chosen alignment, released on
/// drop. Backs the staging regions and ADMA descriptor tables.
#[derive(Debug)]
pub struct PoolBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer owns its allocation exclusively.
unsafe impl Send for PoolBuffer {}
unsafe impl Sync for PoolBuffer {}

impl PoolBuffer {
    pub fn alloc_aligned(size: usize, align: usize) -> SdhciResult<Self> {
        if size == 0 {
            return Err(SdhciError::InvalidArgument);
        }
        let layout =
            Layout::from_size_align(size, align).map_err(|_| SdhciError::InvalidArgument)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(SdhciError::AllocationFailure)?;
        Ok(Self { ptr, layout })
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
