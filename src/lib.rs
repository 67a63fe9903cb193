#![no_std]

//! # fLink Core
//!
//! This crate is the host-side core of the fLink FPGA interface. It discovers
//! the function blocks ("subdevices") of an FPGA, exposes each FPGA as one
//! character device and routes FPGA interrupts to subscribed user processes.
//! It is designed for `no_std` environments and uses the `alloc` crate for
//! dynamic memory allocation.
//!
//! ## Architecture
//!
//! The crate is organized into multiple layers:
//!
//! ### Transport
//! - [`FlinkBusOps`]: 8/16/32-bit register access supplied by a bus backend
//! - [`FlinkDeviceConfig`]: Window and IRQ parameters supplied by the backend
//!
//! ### Device Model
//! - [`FlinkDevice`]: One FPGA instance with its subdevice table
//! - [`FlinkSubdevice`]: Descriptor of one function block
//! - [`scan_for_subdevices`]: Header walk populating the subdevice table
//! - [`DeviceRegistry`]: Registration order, ids and `/dev/flink<N>` nodes
//! - [`DeviceLifecycle`]: State machine (Initialized/Registered/Removed)
//!
//! ### Request Plane
//! - [`FlinkFile`]: Per-open handle with subdevice selection and position
//! - [`FlinkIoctl`]: Control codes and their payload images
//!
//! ### Interrupt Routing
//! - [`IrqTable`]: One [`IrqRecord`] per FPGA IRQ line
//! - [`UserTask`]: Delivery target of user-space notifications
//! - [`IrqHost`]: Host interrupt controller glue
//!
//! ## Features
//!
//! - **Discovery**: Subdevices are found by walking fixed-offset headers,
//!   bounded by the transport window and the optional info block
//! - **Bit Access**: Single-bit read and read-modify-write on any subdevice
//! - **IRQ Fan-out**: One FPGA IRQ reaches every subscribed process
//! - **Statistics**: Per-device access and error counters
//!
//! ## Examples
//!
//! ### Registering a Device
//!
//! ```rust,ignore
//! use flink::{flink_registry, FlinkDevice, FlinkDeviceConfig};
//!
//! // Backend maps the AXI window and hands it over
//! let bus = Box::new(AxiBus::map(FlinkDeviceConfig::ZYNQ_AXI)?);
//! let dev = FlinkDevice::new_with_irq(bus, FlinkDeviceConfig::ZYNQ_AXI, irq_host);
//!
//! // Discovers subdevices and creates /dev/flink0
//! let dev = flink_registry().add_device(dev)?;
//! ```
//!
//! ### Serving Requests
//!
//! ```rust,ignore
//! use flink::{syscall_result, FlinkFile, UserPtr, Whence};
//!
//! let mut file = FlinkFile::open(flink_registry(), cdev)?;
//!
//! // ioctl(fd, SELECT_SUBDEVICE, &id)
//! let ret = syscall_result(file.ioctl(cmd, UserPtr(arg), &uaccess, &current_task));
//!
//! // lseek(fd, 0x10, SEEK_SET); read(fd, buf, 4)
//! file.llseek(0x10, Whence::Set)?;
//! let n = file.read(&uaccess, UserPtr(buf), 4);
//! ```
//!
//! ### Handling Interrupts
//!
//! ```rust,ignore
//! fn fpga_irq_handler(line: u32) {
//!     for id in flink_registry().list_devices() {
//!         if let Some(dev) = flink_registry().get_device(id) {
//!             dev.handle_irq(line);
//!         }
//!     }
//! }
//!
//! // On process exit
//! flink_registry().release_task(pid);
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod config;
mod device;
mod file;
mod ioctl;
mod irq;
mod lifecycle;
mod registry;
mod scan;
mod subdevice;
mod transport;
mod uaccess;

pub use config::FlinkDeviceConfig;
pub use device::{CdevId, CharDevBinding, DeviceId, DeviceStats, FlinkDevice};
pub use file::{syscall_result, FlinkFile, Whence};
pub use ioctl::{FlinkIoctl, IoctlBitContainer, IoctlContainer};
pub use irq::{IrqHost, IrqRecord, IrqReturn, IrqTable, Pid, UserTask};
pub use lifecycle::{DeviceLifecycle, DeviceState};
pub use registry::{flink_registry, CharDevHost, DeviceRegistry};
pub use scan::scan_for_subdevices;
pub use subdevice::{
    FlinkSubdevice, FunctionIdentity, SubdeviceInfo, INFO_FUNCTION_ID, INFO_TOTAL_MEM_OFFSET,
    MAIN_HEADER_SIZE, MAX_NOF_SUBDEVICES, SUB_HEADER_SIZE, SUBDEV_CONFIG_OFFSET,
    SUBDEV_FUNCTION_OFFSET, SUBDEV_NOFCHANNELS_OFFSET, SUBDEV_SIZE_OFFSET, SUBDEV_STATUS_OFFSET,
    SUBDEV_UNIQUE_ID_OFFSET,
};
pub use transport::{AccessWidth, FlinkBusOps};
pub use uaccess::{UserAccess, UserPtr};
