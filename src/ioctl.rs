//! Control codes of the character device and their payloads.
//!
//! Payloads are exchanged as native-endian images of the C structures used by
//! the user library. Decoding and encoding go through the field offsets of the
//! `#[repr(C)]` mirrors below, never through raw pointer casts.

use core::mem::{offset_of, size_of};

use axerrno::{ax_err_type, AxError};

/// Control codes understood by [`FlinkFile::ioctl`](crate::FlinkFile::ioctl).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FlinkIoctl {
    SelectSubdevice = 0x10,
    SelectSubdeviceExcl = 0x11,
    ReadNofSubdevices = 0x12,
    ReadSubdeviceInfo = 0x13,
    ReadSingleBit = 0x14,
    WriteSingleBit = 0x15,
    SelectAndReadBit = 0x16,
    SelectAndWriteBit = 0x17,
    SelectAndRead = 0x18,
    SelectAndWrite = 0x19,
    RegisterIrq = 0x1A,
    UnregisterIrq = 0x1B,
    GetSignalOffset = 0x1C,
}

impl FlinkIoctl {
    const ALL: [Self; 13] = [
        Self::SelectSubdevice,
        Self::SelectSubdeviceExcl,
        Self::ReadNofSubdevices,
        Self::ReadSubdeviceInfo,
        Self::ReadSingleBit,
        Self::WriteSingleBit,
        Self::SelectAndReadBit,
        Self::SelectAndWriteBit,
        Self::SelectAndRead,
        Self::SelectAndWrite,
        Self::RegisterIrq,
        Self::UnregisterIrq,
        Self::GetSignalOffset,
    ];

    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for FlinkIoctl {
    type Error = AxError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or_else(|| ax_err_type!(InvalidInput, "unknown control code"))
    }
}

/// Payload of the single-bit control codes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoctlBitContainer {
    /// Register offset relative to the subdevice base.
    pub offset: u32,
    /// Bit index, 0..=31.
    pub bit: u8,
    /// Value to write, or the value read back.
    pub value: u8,
    /// Target subdevice of the select-and variants.
    pub subdevice: u8,
}

impl IoctlBitContainer {
    pub const SIZE: usize = size_of::<Self>();

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            offset: u32::from_ne_bytes(take(buf, offset_of!(Self, offset))),
            bit: buf[offset_of!(Self, bit)],
            value: buf[offset_of!(Self, value)],
            subdevice: buf[offset_of!(Self, subdevice)],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put(&mut buf, offset_of!(Self, offset), &self.offset.to_ne_bytes());
        buf[offset_of!(Self, bit)] = self.bit;
        buf[offset_of!(Self, value)] = self.value;
        buf[offset_of!(Self, subdevice)] = self.subdevice;
        buf
    }
}

/// Payload of `SELECT_AND_READ` / `SELECT_AND_WRITE`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoctlContainer {
    pub subdevice: u8,
    /// Register offset relative to the subdevice base.
    pub offset: u32,
    /// Transfer size in bytes: 1, 2 or 4.
    pub size: u8,
    /// User buffer holding (write) or receiving (read) the value.
    pub data: usize,
}

impl IoctlContainer {
    pub const SIZE: usize = size_of::<Self>();

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            subdevice: buf[offset_of!(Self, subdevice)],
            offset: u32::from_ne_bytes(take(buf, offset_of!(Self, offset))),
            size: buf[offset_of!(Self, size)],
            data: usize::from_ne_bytes(take(buf, offset_of!(Self, data))),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[offset_of!(Self, subdevice)] = self.subdevice;
        put(&mut buf, offset_of!(Self, offset), &self.offset.to_ne_bytes());
        buf[offset_of!(Self, size)] = self.size;
        put(&mut buf, offset_of!(Self, data), &self.data.to_ne_bytes());
        buf
    }
}

fn take<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

fn put(buf: &mut [u8], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}
