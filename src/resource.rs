// The MIT License (MIT)

// Copyright (c) 2025 braid developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Pluggable memory resource for computation frames.
//!
//! Every frame allocation travels with a handle to the resource it came from
//! (`ResourceBox`), so deallocation never needs the construction environment
//! to still be alive. Frames of child computations routinely outlive the
//! environment value they were spawned with.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::{Arc, OnceLock};

pub trait MemoryResource: Send + Sync {
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// # Safety
    ///
    /// `ptr` must have come from `allocate` on the same resource with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

pub type ResourceHandle = Arc<dyn MemoryResource>;

/// The process-global allocator as a memory resource.
pub struct GlobalResource;

impl MemoryResource for GlobalResource {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        let ptr = unsafe { alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

pub fn default_resource() -> ResourceHandle {
    static DEFAULT: OnceLock<ResourceHandle> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(GlobalResource)).clone()
}

/// A box whose storage comes from a `MemoryResource`. The resource handle is
/// stored alongside the pointer so the storage can be returned without any
/// outside context.
pub struct ResourceBox<T> {
    ptr: NonNull<T>,
    resource: ResourceHandle,
}

unsafe impl<T: Send> Send for ResourceBox<T> {}
unsafe impl<T: Sync> Sync for ResourceBox<T> {}

impl<T> ResourceBox<T> {
    pub fn new_in(value: T, resource: &ResourceHandle) -> ResourceBox<T> {
        let layout = Layout::new::<T>();
        if layout.size() == 0 {
            // zero-sized values carry no storage
            std::mem::forget(value);
            return ResourceBox {
                ptr: NonNull::dangling(),
                resource: resource.clone(),
            };
        }
        let raw = resource.allocate(layout).cast::<T>();
        unsafe { raw.as_ptr().write(value) };
        ResourceBox {
            ptr: raw,
            resource: resource.clone(),
        }
    }

    pub fn as_ref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }

    pub fn as_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for ResourceBox<T> {
    fn drop(&mut self) {
        let layout = Layout::new::<T>();
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            if layout.size() != 0 {
                self.resource.deallocate(self.ptr.cast::<u8>(), layout);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingResource {
        live: AtomicUsize,
        total: AtomicUsize,
    }

    impl CountingResource {
        fn new() -> CountingResource {
            CountingResource {
                live: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
            }
        }
    }

    impl MemoryResource for CountingResource {
        fn allocate(&self, layout: Layout) -> NonNull<u8> {
            self.live.fetch_add(1, Ordering::AcqRel);
            self.total.fetch_add(1, Ordering::AcqRel);
            GlobalResource.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.fetch_sub(1, Ordering::AcqRel);
            GlobalResource.deallocate(ptr, layout);
        }
    }

    #[test]
    fn test_box_roundtrip() {
        let counting = Arc::new(CountingResource::new());
        let resource: ResourceHandle = counting.clone();
        {
            let mut boxed = ResourceBox::new_in(vec![1, 2, 3], &resource);
            boxed.as_mut().push(4);
            assert_eq!(boxed.as_ref(), &[1, 2, 3, 4]);
            assert_eq!(counting.live.load(Ordering::Acquire), 1);
        }
        assert_eq!(counting.live.load(Ordering::Acquire), 0);
        assert_eq!(counting.total.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_zero_sized_value() {
        let resource = default_resource();
        let boxed = ResourceBox::new_in((), &resource);
        assert_eq!(boxed.as_ref(), &());
    }
}
