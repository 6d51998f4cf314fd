//! Resource handles.
//!
//! A [`ResourceHandle`] is an opaque, value-copyable 64-bit identifier for a buffer, texture,
//! argument buffer or sampler. It carries no lifetime: ownership of the backing Vulkan object
//! lives exclusively in the registry that created it (see [`crate::registry`]).
use ash::vk::Handle;
use slotmap::new_key_type;
use std::{fmt, mem, ops::Deref};

bitflags::bitflags! {
    /// Flags attached to a [`ResourceHandle`] at creation time.
    pub struct ResourceFlags: u32 {
        /// The resource outlives a single frame; it is owned by the persistent registry.
        const PERSISTENT = 1 << 0;
        /// The resource is bound to a swapchain image (see `register_window_texture`).
        const WINDOW_HANDLE = 1 << 1;
        /// The resource uses Vulkan's managed-storage-equivalent (host-visible, non-coherent) memory.
        const MANAGED_STORAGE = 1 << 2;
        /// The resource has been written to at least once; its layout is no longer UNDEFINED.
        const INITIALISED = 1 << 3;
    }
}

/// The kind of object a [`ResourceHandle`] refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceClass {
    Buffer,
    Texture,
    ArgumentBuffer,
    Sampler,
}

new_key_type! {
    /// Opaque identifier for any resource known to a registry.
    ///
    /// Both the persistent and the transient registry share this key space: a [`ResourceHandle`]
    /// is only ever valid in the registry that minted it.
    pub struct ResourceId;
}

/// A value-copyable, opaque handle to a GPU resource.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceHandle {
    id: ResourceId,
    class: ResourceClass,
    flags: ResourceFlags,
}

impl ResourceHandle {
    pub(crate) fn new(id: ResourceId, class: ResourceClass, flags: ResourceFlags) -> Self {
        ResourceHandle { id, class, flags }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.contains(ResourceFlags::PERSISTENT)
    }

    pub fn is_window_handle(&self) -> bool {
        self.flags.contains(ResourceFlags::WINDOW_HANDLE)
    }

    pub(crate) fn mark_initialised(&mut self) {
        self.flags.insert(ResourceFlags::INITIALISED);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResourceHandle({:?}, {:?})", self.class, self.id)
    }
}

/// A wrapper around a Vulkan handle that panics if dropped while still non-null.
///
/// Forces call sites to explicitly destroy the underlying object (or [`take`](Self::take) it)
/// rather than letting it leak silently.
#[repr(transparent)]
pub struct UniqueHandle<T: Handle + Copy>(T);

impl<T: Handle + Copy> Drop for UniqueHandle<T> {
    fn drop(&mut self) {
        if self.0.as_raw() != 0 {
            panic!("non-null UniqueHandle was dropped");
        }
    }
}

impl<T: Handle + Copy + fmt::Debug> fmt::Debug for UniqueHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: Handle + Copy> Default for UniqueHandle<T> {
    fn default() -> Self {
        UniqueHandle::null()
    }
}

impl<T: Handle + Copy> UniqueHandle<T> {
    pub fn null() -> UniqueHandle<T> {
        UniqueHandle(Handle::from_raw(0))
    }

    pub fn new(inner: T) -> UniqueHandle<T> {
        UniqueHandle(inner)
    }

    pub fn get(&self) -> T {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.as_raw() == 0
    }

    /// Releases the handle to the caller, who becomes responsible for destroying it.
    pub fn take(&mut self) -> T {
        mem::replace(&mut self.0, T::from_raw(0))
    }
}

impl<T: Handle + Copy> Deref for UniqueHandle<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_flags_roundtrip() {
        let id = ResourceId::default();
        let h = ResourceHandle::new(
            id,
            ResourceClass::Texture,
            ResourceFlags::PERSISTENT | ResourceFlags::WINDOW_HANDLE,
        );
        assert!(h.is_persistent());
        assert!(h.is_window_handle());
        assert!(!h.flags().contains(ResourceFlags::INITIALISED));
    }

    #[test]
    #[should_panic]
    fn unique_handle_panics_if_leaked() {
        let h: UniqueHandle<ash::vk::Semaphore> =
            UniqueHandle::new(ash::vk::Semaphore::from_raw(1));
        drop(h);
    }

    #[test]
    fn unique_handle_take_avoids_panic() {
        let mut h: UniqueHandle<ash::vk::Semaphore> =
            UniqueHandle::new(ash::vk::Semaphore::from_raw(1));
        let _raw = h.take();
        drop(h);
    }
}
