//! Platform Module - Page Provisioning Interface
//!
//! The heap obtains every page through the `PageAllocator` trait and never
//! talks to the operating system directly. Two implementations ship with
//! the crate:
//!
//! - `OsPageAllocator` - anonymous mappings (mmap / VirtualAlloc)
//! - `BoundedPageAllocator` - wraps another provider and enforces a byte budget
//!
//! Embedders with their own virtual memory cage implement the trait
//! themselves. Memory handed out must be zero-filled.

pub mod bounded;
pub mod os;

pub use bounded::BoundedPageAllocator;
pub use os::OsPageAllocator;

use crate::error::Result;
use crate::util::Address;

/// Access permission of a page range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    NoAccess,
    Read,
    ReadWrite,
    ReadWriteExecute,
}

/// Opaque memory protection key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectionKey(pub u32);

/// Thread-local rights granted through a protection key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPermission {
    NoAccess,
    ReadOnly,
    ReadWrite,
}

/// Source of page-granular memory
///
/// # Thread Safety
///
/// Implementations are shared between the allocating threads and the
/// collector and must be `Send + Sync`.
pub trait PageAllocator: Send + Sync {
    /// Granularity of `allocate` and `free`
    fn allocate_page_size(&self) -> usize;

    /// Map `size` bytes aligned to `alignment` with `permission`
    ///
    /// `hint` is a preferred address and may be ignored. The returned range
    /// is zero-filled.
    fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address>;

    /// Change the permission of a previously allocated range
    fn set_permissions(&self, address: Address, size: usize, permission: Permission)
        -> Result<()>;

    /// Release a range returned by `allocate`
    fn free(&self, address: Address, size: usize) -> Result<()>;

    /// Optional memory protection key support
    fn protection_keys(&self) -> Option<&dyn ProtectionKeys> {
        None
    }
}

/// Memory protection key extension of a `PageAllocator`
pub trait ProtectionKeys: Send + Sync {
    /// Reserve a new key, or None when the hardware pool is exhausted
    fn allocate_key(&self) -> Option<ProtectionKey>;

    /// Change the calling thread's rights for every page tagged with `key`
    fn set_key_permissions(&self, key: ProtectionKey, permission: KeyPermission) -> Result<()>;

    /// Tag a range with `key`
    fn assign_key(&self, address: Address, size: usize, key: ProtectionKey) -> Result<()>;
}
