//! Subdevice discovery.
//!
//! Walks the device address space from offset 0, reading the header of each
//! function block and stepping over its window. The walk stops at the first
//! header whose size field is too small to describe a block, at the end of
//! the transport window, or at the end of the memory declared by the info
//! block, whichever comes first.

use crate::device::FlinkDevice;
use crate::subdevice::{
    FlinkSubdevice, FunctionIdentity, INFO_TOTAL_MEM_OFFSET, MAIN_HEADER_SIZE,
    MAX_NOF_SUBDEVICES, SUB_HEADER_SIZE, SUBDEV_FUNCTION_OFFSET, SUBDEV_NOFCHANNELS_OFFSET,
    SUBDEV_SIZE_OFFSET, SUBDEV_UNIQUE_ID_OFFSET,
};
use crate::transport::FlinkBusOps;

/// Reads the word at `off` into the header at `base`. `None` past 4 GiB.
fn header_word(bus: &dyn FlinkBusOps, base: u32, off: u32) -> Option<u32> {
    base.checked_add(off).map(|addr| bus.read32(addr))
}

/// Scans `dev` for subdevices and adds them. Returns the number added.
pub fn scan_for_subdevices(dev: &FlinkDevice) -> usize {
    let bus = dev.transport();
    let size = bus.address_space_size();
    if size == 0 {
        return 0;
    }

    let mut count = 0;
    let mut current: u32 = 0;
    let mut last: u32 = size - 1;

    debug!(
        "Scanning device {:?} for subdevices: {:#x}..={:#x}",
        dev.id(),
        current,
        last
    );

    while current < last && count < MAX_NOF_SUBDEVICES {
        let Some(function) = header_word(bus, current, SUBDEV_FUNCTION_OFFSET) else {
            break;
        };
        let Some(mem_size) = header_word(bus, current, SUBDEV_SIZE_OFFSET) else {
            break;
        };
        if mem_size <= MAIN_HEADER_SIZE + SUB_HEADER_SIZE {
            break;
        }
        let Some(nof_channels) = header_word(bus, current, SUBDEV_NOFCHANNELS_OFFSET) else {
            break;
        };
        let Some(unique_id) = header_word(bus, current, SUBDEV_UNIQUE_ID_OFFSET) else {
            break;
        };
        let identity = FunctionIdentity::from_word(function);

        let subdev = FlinkSubdevice::new(identity, current, mem_size, nof_channels, unique_id);
        if let Err(err) = dev.add_subdevice(subdev) {
            warn!("Subdevice at {:#x} rejected: {:?}", current, err);
            break;
        }
        count += 1;

        if identity.is_info() {
            let Some(total_mem) = header_word(bus, current, INFO_TOTAL_MEM_OFFSET) else {
                break;
            };
            // A zero total would wrap; treat it as "no memory beyond here".
            last = total_mem.saturating_sub(1);
            debug!("Info block declares {:#x} bytes of device memory", total_mem);
        }

        current = match current.checked_add(mem_size) {
            Some(next) => next,
            None => break,
        };
    }

    count
}
