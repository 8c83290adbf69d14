//! Operating-system page provider
//!
//! Unix uses `mmap`/`mprotect`/`munmap`, Windows uses
//! `VirtualAlloc`/`VirtualProtect`/`VirtualFree`. Alignment beyond the OS
//! granularity is obtained by over-reserving and trimming.

use super::{PageAllocator, Permission};
use crate::error::{McgcError, Result};
use crate::util::{Address, Alignment};

/// Anonymous-mapping page provider
#[derive(Debug, Clone)]
pub struct OsPageAllocator {
    page_size: usize,
}

impl OsPageAllocator {
    pub fn new() -> Self {
        Self {
            page_size: page_size::get(),
        }
    }
}

impl Default for OsPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for OsPageAllocator {
    fn allocate_page_size(&self) -> usize {
        self.page_size
    }

    fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address> {
        if size == 0 || !alignment.is_power_of_two() {
            return Err(McgcError::InvalidArgument(format!(
                "page allocation of {} bytes aligned to {}",
                size, alignment
            )));
        }
        let size = Alignment::align_up(size, self.page_size);
        let alignment = alignment.max(self.page_size);
        sys::allocate(hint, size, alignment, self.page_size, permission)
    }

    fn set_permissions(&self, address: Address, size: usize, permission: Permission) -> Result<()> {
        sys::protect(address, Alignment::align_up(size, self.page_size), permission)
    }

    fn free(&self, address: Address, size: usize) -> Result<()> {
        sys::release(address, Alignment::align_up(size, self.page_size))
    }
}

#[cfg(unix)]
mod sys {
    use super::*;
    use libc::{c_void, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};

    fn prot(permission: Permission) -> libc::c_int {
        match permission {
            Permission::NoAccess => PROT_NONE,
            Permission::Read => PROT_READ,
            Permission::ReadWrite => PROT_READ | PROT_WRITE,
            Permission::ReadWriteExecute => PROT_READ | PROT_WRITE | PROT_EXEC,
        }
    }

    pub(super) fn allocate(
        hint: Option<Address>,
        size: usize,
        alignment: usize,
        page_size: usize,
        permission: Permission,
    ) -> Result<Address> {
        let reserve = size + alignment - page_size;
        let hint = hint.unwrap_or(0) as *mut c_void;

        // SAFETY: anonymous private mapping, no fd involved.
        let base = unsafe {
            libc::mmap(hint, reserve, prot(permission), MAP_PRIVATE | MAP_ANONYMOUS, -1, 0)
        };
        if base == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            log::debug!("mmap of {} bytes failed: {}", reserve, err);
            return Err(McgcError::OutOfMemory {
                requested: size,
                available: 0,
            });
        }

        let base = base as usize;
        let aligned = Alignment::align_up(base, alignment);
        let prefix = aligned - base;
        let suffix = reserve - prefix - size;

        // SAFETY: both trimmed ranges lie inside the mapping just created.
        unsafe {
            if prefix > 0 {
                libc::munmap(base as *mut c_void, prefix);
            }
            if suffix > 0 {
                libc::munmap((aligned + size) as *mut c_void, suffix);
            }
        }
        Ok(aligned)
    }

    pub(super) fn protect(address: Address, size: usize, permission: Permission) -> Result<()> {
        // SAFETY: caller passes a range obtained from `allocate`.
        let rc = unsafe { libc::mprotect(address as *mut c_void, size, prot(permission)) };
        if rc != 0 {
            return Err(McgcError::PlatformFailure(format!(
                "mprotect({:#x}, {}) failed: {}",
                address,
                size,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    pub(super) fn release(address: Address, size: usize) -> Result<()> {
        // SAFETY: caller passes a range obtained from `allocate`.
        let rc = unsafe { libc::munmap(address as *mut c_void, size) };
        if rc != 0 {
            return Err(McgcError::PlatformFailure(format!(
                "munmap({:#x}, {}) failed: {}",
                address,
                size,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[cfg(windows)]
mod sys {
    use super::*;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY,
        PAGE_READWRITE,
    };

    fn prot(permission: Permission) -> PAGE_PROTECTION_FLAGS {
        match permission {
            Permission::NoAccess => PAGE_NOACCESS,
            Permission::Read => PAGE_READONLY,
            Permission::ReadWrite => PAGE_READWRITE,
            Permission::ReadWriteExecute => PAGE_EXECUTE_READWRITE,
        }
    }

    pub(super) fn allocate(
        hint: Option<Address>,
        size: usize,
        alignment: usize,
        _page_size: usize,
        permission: Permission,
    ) -> Result<Address> {
        let flags = MEM_RESERVE | MEM_COMMIT;
        let hint = hint.unwrap_or(0) as *const std::ffi::c_void;

        // SAFETY: plain reservation, the OS picks or validates the address.
        let base = unsafe { VirtualAlloc(hint, size, flags, prot(permission)) } as usize;
        if base != 0 && Alignment::is_aligned(base, alignment) {
            return Ok(base);
        }
        if base != 0 {
            // SAFETY: releasing the reservation made above.
            unsafe { VirtualFree(base as *mut _, 0, MEM_RELEASE) };
        }

        // Reserve a larger range to learn an aligned address, then map there.
        for _ in 0..3 {
            // SAFETY: as above.
            let reservation = unsafe {
                VirtualAlloc(std::ptr::null(), size + alignment, MEM_RESERVE, PAGE_NOACCESS)
            } as usize;
            if reservation == 0 {
                break;
            }
            // SAFETY: releasing the trial reservation.
            unsafe { VirtualFree(reservation as *mut _, 0, MEM_RELEASE) };
            let aligned = Alignment::align_up(reservation, alignment);
            // SAFETY: the range was free a moment ago; failure is handled.
            let base = unsafe {
                VirtualAlloc(aligned as *const _, size, flags, prot(permission))
            } as usize;
            if base != 0 {
                return Ok(base);
            }
        }

        Err(McgcError::OutOfMemory {
            requested: size,
            available: 0,
        })
    }

    pub(super) fn protect(address: Address, size: usize, permission: Permission) -> Result<()> {
        let mut old: PAGE_PROTECTION_FLAGS = 0;
        // SAFETY: caller passes a range obtained from `allocate`.
        let ok = unsafe { VirtualProtect(address as *const _, size, prot(permission), &mut old) };
        if ok == 0 {
            return Err(McgcError::PlatformFailure(format!(
                "VirtualProtect({:#x}, {}) failed",
                address, size
            )));
        }
        Ok(())
    }

    pub(super) fn release(address: Address, _size: usize) -> Result<()> {
        // SAFETY: caller passes a base returned by `allocate`.
        let ok = unsafe { VirtualFree(address as *mut _, 0, MEM_RELEASE) };
        if ok == 0 {
            return Err(McgcError::PlatformFailure(format!(
                "VirtualFree({:#x}) failed",
                address
            )));
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use super::*;
    use std::alloc::{self, Layout};

    pub(super) fn allocate(
        _hint: Option<Address>,
        size: usize,
        alignment: usize,
        _page_size: usize,
        _permission: Permission,
    ) -> Result<Address> {
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|e| McgcError::InvalidArgument(e.to_string()))?;
        // SAFETY: non-zero size checked by the caller.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(McgcError::OutOfMemory {
                requested: size,
                available: 0,
            });
        }
        Ok(ptr as Address)
    }

    pub(super) fn protect(_address: Address, _size: usize, _permission: Permission) -> Result<()> {
        Ok(())
    }

    pub(super) fn release(address: Address, size: usize) -> Result<()> {
        let layout = Layout::from_size_align(size, page_size::get())
            .map_err(|e| McgcError::InvalidArgument(e.to_string()))?;
        // SAFETY: matches the layout used by `allocate` for page-aligned requests.
        unsafe { alloc::dealloc(address as *mut u8, layout) };
        Ok(())
    }
}
