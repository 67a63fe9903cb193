//! Subdevice (FPGA function block) descriptors.
//!
//! Every function block in the FPGA address space starts with a main header
//! and a sub header, 16 bytes each:
//!
//! ```text
//! offset  size  meaning
//! 0x00    4     function word: [31:16] function id, [15:8] sub function id, [7:0] version
//! 0x04    4     memory size of the block in bytes, headers included
//! 0x08    4     number of channels
//! 0x0C    4     unique id
//! 0x10    4     status (block defined)
//! 0x14    4     config (block defined)
//! ```

use core::mem::{offset_of, size_of};

use crate::device::DeviceId;

/// Maximum number of subdevices per device.
pub const MAX_NOF_SUBDEVICES: usize = 256;

/// Size of the main header in bytes.
pub const MAIN_HEADER_SIZE: u32 = 16;
/// Size of the sub header in bytes.
pub const SUB_HEADER_SIZE: u32 = 16;

/// Header offset of the function word.
pub const SUBDEV_FUNCTION_OFFSET: u32 = 0x0000;
/// Header offset of the memory size.
pub const SUBDEV_SIZE_OFFSET: u32 = 0x0004;
/// Header offset of the channel count.
pub const SUBDEV_NOFCHANNELS_OFFSET: u32 = 0x0008;
/// Header offset of the unique id.
pub const SUBDEV_UNIQUE_ID_OFFSET: u32 = 0x000C;
/// Header offset of the status register.
pub const SUBDEV_STATUS_OFFSET: u32 = 0x0010;
/// Header offset of the config register.
pub const SUBDEV_CONFIG_OFFSET: u32 = 0x0014;

/// Function id of the info subdevice.
pub const INFO_FUNCTION_ID: u16 = 0x00;
/// Offset of the total memory length inside the info subdevice.
pub const INFO_TOTAL_MEM_OFFSET: u32 = MAIN_HEADER_SIZE + SUB_HEADER_SIZE;

/// Identity of a function block, decoded from the function word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionIdentity {
    pub function_id: u16,
    pub sub_function_id: u8,
    pub function_version: u8,
}

impl FunctionIdentity {
    /// Decodes the first header word of a block.
    #[inline]
    pub const fn from_word(word: u32) -> Self {
        Self {
            function_id: (word >> 16) as u16,
            sub_function_id: ((word >> 8) & 0xFF) as u8,
            function_version: (word & 0xFF) as u8,
        }
    }

    #[inline]
    pub const fn is_info(&self) -> bool {
        self.function_id == INFO_FUNCTION_ID
    }
}

/// Descriptor of one function block inside a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlinkSubdevice {
    /// Position inside the parent device, assigned when added.
    pub id: u8,
    pub function_id: u16,
    pub sub_function_id: u8,
    pub function_version: u8,
    /// Start of the block in the device address space.
    pub base_addr: u32,
    /// Size of the block in bytes, headers included.
    pub mem_size: u32,
    pub nof_channels: u32,
    pub unique_id: u32,
    /// Device this subdevice belongs to. Lookup aid only.
    pub parent: Option<DeviceId>,
}

impl FlinkSubdevice {
    /// Creates an unattached descriptor from decoded header fields.
    pub fn new(
        identity: FunctionIdentity,
        base_addr: u32,
        mem_size: u32,
        nof_channels: u32,
        unique_id: u32,
    ) -> Self {
        Self {
            function_id: identity.function_id,
            sub_function_id: identity.sub_function_id,
            function_version: identity.function_version,
            base_addr,
            mem_size,
            nof_channels,
            unique_id,
            ..Self::default()
        }
    }

    /// Resets the descriptor to all-zero, detached state.
    pub fn init(&mut self) {
        *self = Self::default();
    }

    pub fn identity(&self) -> FunctionIdentity {
        FunctionIdentity {
            function_id: self.function_id,
            sub_function_id: self.sub_function_id,
            function_version: self.function_version,
        }
    }

    /// First byte past the block.
    #[inline]
    pub fn end_addr(&self) -> u64 {
        self.base_addr as u64 + self.mem_size as u64
    }

    /// Whether the block is large enough to hold anything besides its headers.
    #[inline]
    pub fn has_valid_size(&self) -> bool {
        self.mem_size > MAIN_HEADER_SIZE + SUB_HEADER_SIZE
    }

    /// Public fields as handed to user space.
    pub fn info(&self) -> SubdeviceInfo {
        SubdeviceInfo {
            id: self.id,
            function_id: self.function_id,
            sub_function_id: self.sub_function_id,
            function_version: self.function_version,
            base_addr: self.base_addr,
            mem_size: self.mem_size,
            nof_channels: self.nof_channels,
            unique_id: self.unique_id,
        }
    }
}

/// User-space image of a subdevice, as returned by `READ_SUBDEVICE_INFO`.
///
/// The layout matches the C structure of the user library.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubdeviceInfo {
    pub id: u8,
    pub function_id: u16,
    pub sub_function_id: u8,
    pub function_version: u8,
    pub base_addr: u32,
    pub mem_size: u32,
    pub nof_channels: u32,
    pub unique_id: u32,
}

impl SubdeviceInfo {
    /// Size of the byte image.
    pub const SIZE: usize = size_of::<Self>();

    /// Native-endian byte image with zeroed padding.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[offset_of!(Self, id)] = self.id;
        put(&mut buf, offset_of!(Self, function_id), &self.function_id.to_ne_bytes());
        buf[offset_of!(Self, sub_function_id)] = self.sub_function_id;
        buf[offset_of!(Self, function_version)] = self.function_version;
        put(&mut buf, offset_of!(Self, base_addr), &self.base_addr.to_ne_bytes());
        put(&mut buf, offset_of!(Self, mem_size), &self.mem_size.to_ne_bytes());
        put(&mut buf, offset_of!(Self, nof_channels), &self.nof_channels.to_ne_bytes());
        put(&mut buf, offset_of!(Self, unique_id), &self.unique_id.to_ne_bytes());
        buf
    }
}

fn put(buf: &mut [u8], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}
