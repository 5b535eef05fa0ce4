//! Arrays whose length is decided by a job that has not run yet.
//!
//! A [`DeferredArray`] starts as a zero-length placeholder. Jobs scheduled
//! now receive a [`DeferredView`] over it; the job that learns the real
//! length commits the storage later, and every view observes the committed
//! buffer because all of them share one backing record.

use crate::error::CollectionError;
use crate::job::{JobHandle, JobScheduler};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Where the storage of a deferred array comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorPolicy {
    /// Not a usable policy; creation fails.
    None,
    /// Lives for one frame.
    Temporary,
    /// Lives for a few frames.
    ScopedTemporary,
    /// Lives until disposed.
    Persistent,
}

/// How committed storage is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOptions {
    /// Every slot holds `T::default()`.
    ClearMemory,
    /// Slot contents are unspecified; the caller overwrites all of them.
    UninitializedMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Placeholder,
    Created,
    Disposed,
}

struct BufferInfo<T> {
    buffer: Vec<T>,
    state: DeferredState,
}

struct Shared<T> {
    info: RwLock<BufferInfo<T>>,
    allocator: AllocatorPolicy,
    initial_capacity: usize,
}

impl<T> Shared<T> {
    fn read(&self) -> RwLockReadGuard<'_, BufferInfo<T>> {
        self.info.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BufferInfo<T>> {
        self.info.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owning handle to a deferred array. Cloning yields another handle to the
/// same array, which is how jobs receive it.
pub struct DeferredArray<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DeferredArray<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> DeferredArray<T> {
    pub fn new(allocator: AllocatorPolicy) -> Result<Self, CollectionError> {
        Self::with_capacity(allocator, 0)
    }

    /// Create a placeholder that keeps `capacity` slots reserved across
    /// clears.
    pub fn with_capacity(allocator: AllocatorPolicy, capacity: usize) -> Result<Self, CollectionError> {
        if allocator == AllocatorPolicy::None {
            return Err(CollectionError::InvalidAllocator);
        }
        Ok(Self {
            shared: Arc::new(Shared {
                info: RwLock::new(BufferInfo {
                    buffer: Vec::with_capacity(capacity),
                    state: DeferredState::Placeholder,
                }),
                allocator,
                initial_capacity: capacity,
            }),
        })
    }

    pub fn allocator(&self) -> AllocatorPolicy {
        self.shared.allocator
    }

    pub fn state(&self) -> DeferredState {
        self.shared.read().state
    }

    pub fn len(&self) -> usize {
        self.shared.read().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A view that tracks this array through later commits.
    pub fn as_deferred_view(&self) -> DeferredView<T> {
        DeferredView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drop the current contents and return to the placeholder state.
    /// Storage beyond the initial capacity is released.
    pub fn clear(&self) {
        let mut info = self.shared.write();
        if info.state == DeferredState::Disposed {
            return;
        }
        info.buffer.clear();
        info.buffer.shrink_to(self.shared.initial_capacity);
        info.state = DeferredState::Placeholder;
    }

    /// Release the storage now. Every handle and view observes an empty,
    /// disposed array afterwards.
    pub fn dispose(self) {
        let mut info = self.shared.write();
        info.buffer = Vec::new();
        info.state = DeferredState::Disposed;
    }

    /// Release the storage once `deps` resolves, so jobs already reading
    /// through views keep valid data until then.
    pub fn dispose_async(self, scheduler: &JobScheduler, deps: &JobHandle) -> JobHandle
    where
        T: Send + Sync + 'static,
    {
        scheduler.schedule("dispose deferred array", deps, move || {
            trace!("releasing deferred array storage");
            self.dispose();
            Ok::<(), CollectionError>(())
        })
    }
}

impl<T: Clone + Default> DeferredArray<T> {
    /// Give the array its real length. Allowed once per clear cycle.
    ///
    /// With [`ArrayOptions::UninitializedMemory`] the previous allocation is
    /// reused and slot contents are unspecified.
    pub fn commit(&self, len: usize, options: ArrayOptions) -> Result<DeferredSliceMut<'_, T>, CollectionError> {
        let mut info = self.shared.write();
        match info.state {
            DeferredState::Created => return Err(CollectionError::AlreadyCreated),
            DeferredState::Disposed => return Err(CollectionError::Disposed),
            DeferredState::Placeholder => {}
        }

        match options {
            ArrayOptions::ClearMemory => info.buffer = vec![T::default(); len],
            ArrayOptions::UninitializedMemory => info.buffer.resize(len, T::default()),
        }
        info.state = DeferredState::Created;
        Ok(DeferredSliceMut { guard: info })
    }
}

/// Read-only view over a deferred array. Reads a zero-length slice until
/// the array is committed.
pub struct DeferredView<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DeferredView<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> DeferredView<T> {
    pub fn read(&self) -> DeferredSlice<'_, T> {
        DeferredSlice {
            guard: self.shared.read(),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.read().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest valid index, if any element is visible.
    pub fn max_index(&self) -> Option<usize> {
        self.len().checked_sub(1)
    }

    pub fn state(&self) -> DeferredState {
        self.shared.read().state
    }

    /// Whether two views (or a view and an array) share one backing record.
    pub fn same_array(&self, array: &DeferredArray<T>) -> bool {
        Arc::ptr_eq(&self.shared, &array.shared)
    }
}

/// Shared borrow of a deferred array's visible contents.
pub struct DeferredSlice<'a, T> {
    guard: RwLockReadGuard<'a, BufferInfo<T>>,
}

impl<T> Deref for DeferredSlice<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.guard.buffer
    }
}

/// Exclusive borrow of freshly committed storage.
pub struct DeferredSliceMut<'a, T> {
    guard: RwLockWriteGuard<'a, BufferInfo<T>>,
}

impl<T> Deref for DeferredSliceMut<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.guard.buffer
    }
}

impl<T> DerefMut for DeferredSliceMut<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.guard.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_allocator_is_rejected() {
        assert_eq!(
            DeferredArray::<u32>::new(AllocatorPolicy::None).err(),
            Some(CollectionError::InvalidAllocator)
        );
    }

    #[test]
    fn view_taken_before_commit_sees_committed_data() {
        let array = DeferredArray::<u32>::new(AllocatorPolicy::Persistent).unwrap();
        let view = array.as_deferred_view();
        assert!(view.is_empty());
        assert_eq!(view.max_index(), None);
        assert_eq!(view.state(), DeferredState::Placeholder);

        {
            let mut slots = array.commit(3, ArrayOptions::ClearMemory).unwrap();
            assert_eq!(&*slots, &[0, 0, 0]);
            slots.copy_from_slice(&[7, 8, 9]);
        }

        assert!(view.same_array(&array));
        assert_eq!(&*view.read(), &[7, 8, 9]);
        assert_eq!(view.max_index(), Some(2));
    }

    #[test]
    fn commit_is_allowed_once_per_cycle() {
        let array = DeferredArray::<u8>::new(AllocatorPolicy::Temporary).unwrap();
        drop(array.commit(1, ArrayOptions::ClearMemory).unwrap());
        assert_eq!(
            array.commit(1, ArrayOptions::ClearMemory).err(),
            Some(CollectionError::AlreadyCreated)
        );

        array.clear();
        assert_eq!(array.state(), DeferredState::Placeholder);
        assert!(array.as_deferred_view().is_empty());
        assert!(array.commit(2, ArrayOptions::UninitializedMemory).is_ok());
    }

    #[test]
    fn uninitialized_commit_has_requested_length() {
        let array = DeferredArray::<u64>::with_capacity(AllocatorPolicy::Persistent, 16).unwrap();
        drop(array.commit(10, ArrayOptions::ClearMemory).unwrap());
        array.clear();
        let slots = array.commit(4, ArrayOptions::UninitializedMemory).unwrap();
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn disposed_array_rejects_commits() {
        let array = DeferredArray::<u8>::new(AllocatorPolicy::Persistent).unwrap();
        let handle = array.clone();
        let view = array.as_deferred_view();
        array.dispose();
        assert_eq!(view.state(), DeferredState::Disposed);
        assert!(view.read().is_empty());
        assert_eq!(
            handle.commit(1, ArrayOptions::ClearMemory).err(),
            Some(CollectionError::Disposed)
        );
        handle.clear();
        assert_eq!(handle.state(), DeferredState::Disposed);
    }

    #[test]
    fn async_dispose_waits_for_dependencies() {
        let scheduler = JobScheduler::with_workers(1).unwrap();
        let array = DeferredArray::<u8>::new(AllocatorPolicy::Persistent).unwrap();
        drop(array.commit(2, ArrayOptions::ClearMemory).unwrap());
        let view = array.as_deferred_view();

        let gate = JobHandle::pending();
        let disposed = array.dispose_async(&scheduler, &gate);
        assert_eq!(view.len(), 2);
        assert_eq!(view.state(), DeferredState::Created);

        gate.resolve(Ok(()));
        disposed.wait().unwrap();
        assert_eq!(view.state(), DeferredState::Disposed);
    }
}
