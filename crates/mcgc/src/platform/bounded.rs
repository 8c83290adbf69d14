//! Budgeted page provider

use super::{PageAllocator, Permission, ProtectionKeys};
use crate::error::{McgcError, Result};
use crate::util::{Address, AtomicUtils};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps another provider and refuses to exceed `limit` committed bytes
pub struct BoundedPageAllocator {
    inner: Arc<dyn PageAllocator>,
    limit: usize,
    committed: AtomicUsize,
}

impl BoundedPageAllocator {
    pub fn new(inner: Arc<dyn PageAllocator>, limit: usize) -> Self {
        Self {
            inner,
            limit,
            committed: AtomicUsize::new(0),
        }
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn reserve(&self, size: usize) -> Result<()> {
        let mut current = self.committed.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(size);
            if next > self.limit {
                return Err(McgcError::OutOfMemory {
                    requested: size,
                    available: self.limit.saturating_sub(current),
                });
            }
            match self.committed.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

impl PageAllocator for BoundedPageAllocator {
    fn allocate_page_size(&self) -> usize {
        self.inner.allocate_page_size()
    }

    fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address> {
        self.reserve(size)?;
        self.inner
            .allocate(hint, size, alignment, permission)
            .inspect_err(|_| {
                AtomicUtils::saturating_sub(&self.committed, size);
            })
    }

    fn set_permissions(&self, address: Address, size: usize, permission: Permission) -> Result<()> {
        self.inner.set_permissions(address, size, permission)
    }

    fn free(&self, address: Address, size: usize) -> Result<()> {
        self.inner.free(address, size)?;
        AtomicUtils::saturating_sub(&self.committed, size);
        Ok(())
    }

    fn protection_keys(&self) -> Option<&dyn ProtectionKeys> {
        self.inner.protection_keys()
    }
}
