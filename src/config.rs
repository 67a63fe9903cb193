//! Device window and IRQ parameters.

use axerrno::{ax_err, AxResult};
use memory_addr::PhysAddr;

/// Parameters a transport backend hands to the core when it creates a device.
///
/// They come either from a device-tree node or from values hard-coded in the
/// transport module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlinkDeviceConfig {
    /// Physical base address of the FPGA window.
    pub base_addr: PhysAddr,
    /// Length of the window in bytes.
    pub length: u32,
    /// Number of FPGA IRQ lines. 0 disables the IRQ subsystem.
    pub nof_irqs: u32,
    /// Host IRQ line of logical IRQ 0.
    pub irq_offset: u32,
    /// User-visible signal number of logical IRQ 0.
    pub signal_offset: u32,
}

impl FlinkDeviceConfig {
    /// Hard-coded settings of the Zynq-7000 AXI design.
    pub const ZYNQ_AXI: Self = Self {
        base_addr: PhysAddr::from_usize(0x7aa0_0000),
        length: 0x9000,
        nof_irqs: 30,
        irq_offset: 55,
        signal_offset: 34,
    };

    /// A window without IRQ support.
    pub const fn new(base_addr: usize, length: u32) -> Self {
        Self {
            base_addr: PhysAddr::from_usize(base_addr),
            length,
            nof_irqs: 0,
            irq_offset: 0,
            signal_offset: 0,
        }
    }

    /// Enables `nof_irqs` IRQ lines starting at host line `irq_offset`,
    /// delivered to user space as `signal_offset + n`.
    pub const fn with_irqs(mut self, nof_irqs: u32, irq_offset: u32, signal_offset: u32) -> Self {
        self.nof_irqs = nof_irqs;
        self.irq_offset = irq_offset;
        self.signal_offset = signal_offset;
        self
    }

    pub const fn irqs_enabled(&self) -> bool {
        self.nof_irqs != 0
    }

    /// Checks that the window is not empty and that no IRQ or signal number
    /// overflows.
    pub fn validate(&self) -> AxResult {
        if self.length == 0 {
            return ax_err!(InvalidInput, "empty FPGA window");
        }
        if self.irq_offset.checked_add(self.nof_irqs).is_none() {
            return ax_err!(InvalidInput, "IRQ offset overflows");
        }
        if self.signal_offset.checked_add(self.nof_irqs).is_none() {
            return ax_err!(InvalidInput, "signal offset overflows");
        }
        Ok(())
    }
}
