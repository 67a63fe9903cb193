//! Bus transport abstraction.
//!
//! A transport backend (AXI, PCI, SPI, ...) exposes the FPGA address space as
//! a flat window of single-word registers. The core never touches the bus
//! directly; every access goes through [`FlinkBusOps`].

use alloc::sync::Arc;

/// Width of a single transport access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Dword,
}

impl AccessWidth {
    /// Size of the access in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
        }
    }
}

impl TryFrom<usize> for AccessWidth {
    type Error = ();

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::Dword),
            _ => Err(()),
        }
    }
}

/// Bus operations a transport backend must provide.
///
/// Addresses are byte offsets into the device's address space. Reads from an
/// address outside the window must return zero and writes outside it must be
/// dropped; the backend does its own bounds checking. Implementors are
/// responsible for MMIO ordering on their architecture.
///
/// `address_space_size` is constant for the lifetime of the device.
pub trait FlinkBusOps: Send + Sync {
    /// Reads one byte.
    fn read8(&self, addr: u32) -> u8;
    /// Reads two bytes.
    fn read16(&self, addr: u32) -> u16;
    /// Reads four bytes.
    fn read32(&self, addr: u32) -> u32;
    /// Writes one byte.
    fn write8(&self, addr: u32, val: u8);
    /// Writes two bytes.
    fn write16(&self, addr: u32, val: u16);
    /// Writes four bytes.
    fn write32(&self, addr: u32, val: u32);
    /// Size of the address space in bytes.
    fn address_space_size(&self) -> u32;

    /// Reads a value of the given width, zero-extended to 32 bits.
    fn read(&self, addr: u32, width: AccessWidth) -> u32 {
        match width {
            AccessWidth::Byte => self.read8(addr) as u32,
            AccessWidth::Word => self.read16(addr) as u32,
            AccessWidth::Dword => self.read32(addr),
        }
    }

    /// Writes the low bits of `val` with the given width.
    fn write(&self, addr: u32, width: AccessWidth, val: u32) {
        match width {
            AccessWidth::Byte => self.write8(addr, val as u8),
            AccessWidth::Word => self.write16(addr, val as u16),
            AccessWidth::Dword => self.write32(addr, val),
        }
    }
}

/// A bus shared between several owners, e.g. a backend that also keeps a
/// handle for its own housekeeping registers.
impl<T: FlinkBusOps + ?Sized> FlinkBusOps for Arc<T> {
    fn read8(&self, addr: u32) -> u8 {
        (**self).read8(addr)
    }
    fn read16(&self, addr: u32) -> u16 {
        (**self).read16(addr)
    }
    fn read32(&self, addr: u32) -> u32 {
        (**self).read32(addr)
    }
    fn write8(&self, addr: u32, val: u8) {
        (**self).write8(addr, val)
    }
    fn write16(&self, addr: u32, val: u16) {
        (**self).write16(addr, val)
    }
    fn write32(&self, addr: u32, val: u32) {
        (**self).write32(addr, val)
    }
    fn address_space_size(&self) -> u32 {
        (**self).address_space_size()
    }
}
