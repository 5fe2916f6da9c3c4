//! Object allocator - owns the memory behind engine objects
//!
//! Every allocation is zero-filled and tracked until it is released or the
//! allocator is dropped. Root-set allocations are never collected; class
//! objects registered with the host are allocated that way.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use alloc::vec::Vec;

use parking_lot::Mutex;

/// Runs the destructor of a value placed with [`ObjectAllocator::emplace`]
type DropGlue = unsafe fn(*mut u8);

unsafe fn drop_glue<T>(ptr: *mut u8) {
    core::ptr::drop_in_place(ptr as *mut T);
}

struct Allocation {
    ptr: NonNull<u8>,
    layout: Layout,
    root: bool,
    drop_glue: Option<DropGlue>,
}

impl Allocation {
    /// # Safety
    /// Must only be called once, with no outstanding references to the memory.
    unsafe fn release(self) {
        if let Some(glue) = self.drop_glue {
            glue(self.ptr.as_ptr());
        }
        alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout);
    }
}

/// Tracking allocator for engine objects
pub struct ObjectAllocator {
    allocations: Mutex<Vec<Allocation>>,
    used: AtomicUsize,
    capacity: usize,
}

// Safety: the allocation list is guarded by a mutex and the allocator never
// dereferences the memory it hands out except when releasing it
unsafe impl Send for ObjectAllocator {}
unsafe impl Sync for ObjectAllocator {}

impl ObjectAllocator {
    /// Create an allocator without a byte budget
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Create an allocator that refuses to hand out more than `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            allocations: Mutex::new(Vec::new()),
            used: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Allocate zeroed memory for an object.
    ///
    /// Zero sizes are rounded up to one byte so every object has a distinct
    /// address. Returns `None` for an invalid alignment or when the budget or
    /// the system allocator is exhausted.
    pub fn allocate_object(&self, size: usize, align: usize, root: bool) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size.max(1), align.max(1)).ok()?;
        self.track(layout, root, None)
    }

    /// Move a value into allocator-owned memory.
    ///
    /// The value is dropped when the allocation is released.
    pub fn emplace<T: Send + 'static>(&self, value: T, root: bool) -> Option<NonNull<T>> {
        let layout = Layout::new::<T>();
        let layout = Layout::from_size_align(layout.size().max(1), layout.align()).ok()?;
        let ptr = self.track(layout, root, Some(drop_glue::<T>))?.cast::<T>();

        unsafe {
            ptr.as_ptr().write(value);
        }
        Some(ptr)
    }

    fn track(&self, layout: Layout, root: bool, glue: Option<DropGlue>) -> Option<NonNull<u8>> {
        let size = layout.size();
        let reserved = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.capacity)
            })
            .is_ok();
        if !reserved {
            return None;
        }

        let Some(ptr) = NonNull::new(unsafe { alloc::alloc::alloc_zeroed(layout) }) else {
            self.used.fetch_sub(size, Ordering::AcqRel);
            return None;
        };

        self.allocations.lock().push(Allocation { ptr, layout, root, drop_glue: glue });
        Some(ptr)
    }

    /// Release a single allocation.
    ///
    /// Returns `false` if the pointer is not owned by this allocator.
    ///
    /// # Safety
    /// No references into the allocation may outlive this call.
    pub unsafe fn release(&self, ptr: *mut u8) -> bool {
        let allocation = {
            let mut allocations = self.allocations.lock();
            match allocations.iter().position(|a| a.ptr.as_ptr() == ptr) {
                Some(index) => allocations.swap_remove(index),
                None => return false,
            }
        };

        self.used.fetch_sub(allocation.layout.size(), Ordering::AcqRel);
        allocation.release();
        true
    }

    /// Check if a pointer is a live root-set allocation
    pub fn is_root(&self, ptr: *const u8) -> bool {
        self.allocations
            .lock()
            .iter()
            .any(|a| a.root && a.ptr.as_ptr() as *const u8 == ptr)
    }

    /// Check if a pointer is a live allocation of this allocator
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.allocations.lock().iter().any(|a| a.ptr.as_ptr() as *const u8 == ptr)
    }

    /// Number of live root-set allocations
    pub fn root_count(&self) -> usize {
        self.allocations.lock().iter().filter(|a| a.root).count()
    }

    /// Number of live allocations
    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().len()
    }

    /// Byte budget
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently handed out
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.capacity - self.used()
    }

    fn release_all(&self) {
        let allocations = core::mem::take(&mut *self.allocations.lock());
        for allocation in allocations {
            unsafe { allocation.release() };
        }
        self.used.store(0, Ordering::Release);
    }
}

impl Default for ObjectAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObjectAllocator {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl core::fmt::Debug for ObjectAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectAllocator")
            .field("allocations", &self.allocation_count())
            .field("used", &self.used())
            .finish()
    }
}
