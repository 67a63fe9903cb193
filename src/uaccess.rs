//! User-space memory access for control-code payloads.

use axerrno::AxResult;

/// Address in the calling process's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPtr(pub usize);

impl UserPtr {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Pointer `off` bytes further on.
    #[inline]
    pub const fn add(self, off: usize) -> Self {
        Self(self.0.wrapping_add(off))
    }
}

/// Host glue copying between kernel buffers and user memory.
///
/// Both directions may fault; a failed copy leaves the request without side
/// effects on the device.
pub trait UserAccess {
    /// Fills `dst` from user memory at `src`.
    fn copy_from_user(&self, src: UserPtr, dst: &mut [u8]) -> AxResult;
    /// Copies `src` to user memory at `dst`.
    fn copy_to_user(&self, dst: UserPtr, src: &[u8]) -> AxResult;
}
