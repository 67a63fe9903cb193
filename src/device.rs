//! Device (FPGA instance) record.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;
use axerrno::{ax_err, ax_err_type, AxResult};
use spin::RwLock;

use crate::config::FlinkDeviceConfig;
use crate::irq::{IrqHost, IrqReturn, IrqTable, Pid, UserTask};
use crate::lifecycle::{DeviceLifecycle, DeviceState};
use crate::subdevice::{FlinkSubdevice, MAX_NOF_SUBDEVICES};
use crate::transport::{AccessWidth, FlinkBusOps};

/// Unique identifier of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

/// Identifier of the character-device node bound to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CdevId(pub u32);

/// Binding between a device and its `/dev/flink<N>` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharDevBinding {
    pub cdev: CdevId,
    pub name: String,
}

/// Statistics for transport accesses made on behalf of user requests.
#[derive(Debug, Default)]
pub struct DeviceStats {
    /// Total number of register reads.
    pub read_count: AtomicU64,
    /// Total number of register writes.
    pub write_count: AtomicU64,
    /// Total number of rejected requests.
    pub error_count: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn reads(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn writes(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

/// One FPGA instance.
///
/// Aggregates the transport, the discovered subdevices, the IRQ routing
/// table and the character-device binding. Created by a transport backend,
/// then handed to [`DeviceRegistry::add_device`](crate::DeviceRegistry::add_device).
///
/// # Concurrency
///
/// The subdevice table is written during discovery and teardown only and is
/// read-only in between. IRQ state is fixed at construction.
pub struct FlinkDevice {
    id: Option<DeviceId>,
    transport: Box<dyn FlinkBusOps>,
    config: FlinkDeviceConfig,
    subdevices: RwLock<ArrayVec<FlinkSubdevice, MAX_NOF_SUBDEVICES>>,
    /// `None` when the IRQ subsystem is disabled.
    irq: Option<IrqTable>,
    cdev: RwLock<Option<CharDevBinding>>,
    lifecycle: DeviceLifecycle,
    stats: DeviceStats,
}

impl FlinkDevice {
    /// Creates a device without IRQ support.
    pub fn new(transport: Box<dyn FlinkBusOps>, config: FlinkDeviceConfig) -> Self {
        Self {
            id: None,
            transport,
            config: FlinkDeviceConfig {
                nof_irqs: 0,
                ..config
            },
            subdevices: RwLock::new(ArrayVec::new()),
            irq: None,
            cdev: RwLock::new(None),
            lifecycle: DeviceLifecycle::new(),
            stats: DeviceStats::new(),
        }
    }

    /// Creates a device and requests its IRQ lines from `host`.
    ///
    /// If the lines cannot be obtained the device is still created, with the
    /// IRQ subsystem disabled.
    pub fn new_with_irq(
        transport: Box<dyn FlinkBusOps>,
        config: FlinkDeviceConfig,
        host: Arc<dyn IrqHost>,
    ) -> Self {
        let mut dev = Self::new(transport, config);
        if !config.irqs_enabled() {
            return dev;
        }
        match IrqTable::request(&config, host) {
            Ok(table) => {
                dev.config.nof_irqs = table.nof_irqs();
                dev.irq = Some(table);
            }
            Err(err) => {
                error!("IRQ setup failed ({:?}), IRQ subsystem disabled", err);
            }
        }
        dev
    }

    /// Device id, assigned on registration.
    #[inline]
    pub fn id(&self) -> Option<DeviceId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: DeviceId) {
        self.id = Some(id);
    }

    #[inline]
    pub fn transport(&self) -> &dyn FlinkBusOps {
        self.transport.as_ref()
    }

    /// Configuration as in effect: `nof_irqs` is 0 when IRQs are disabled.
    #[inline]
    pub fn config(&self) -> &FlinkDeviceConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    #[inline]
    pub(crate) fn lifecycle(&self) -> &DeviceLifecycle {
        &self.lifecycle
    }

    #[inline]
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    // ---- subdevices ----

    pub fn nof_subdevices(&self) -> usize {
        self.subdevices.read().len()
    }

    /// Looks up a subdevice by id.
    pub fn subdevice(&self, id: u8) -> Option<FlinkSubdevice> {
        self.subdevices.read().get(id as usize).copied()
    }

    /// Snapshot of all subdevices, in id order.
    pub fn subdevices(&self) -> Vec<FlinkSubdevice> {
        self.subdevices.read().iter().copied().collect()
    }

    /// Appends a subdevice, assigning it the next id.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the window holds nothing besides its headers or
    ///   does not start above the previous window.
    /// - `NoMemory` if the table is full.
    pub fn add_subdevice(&self, mut subdev: FlinkSubdevice) -> AxResult<u8> {
        if !subdev.has_valid_size() {
            return ax_err!(InvalidInput, "subdevice window too small");
        }

        let mut table = self.subdevices.write();
        if let Some(last) = table.last() {
            if (subdev.base_addr as u64) < last.end_addr() {
                return ax_err!(InvalidInput, "subdevice window overlaps its predecessor");
            }
        }

        subdev.id = table.len() as u8;
        subdev.parent = self.id;
        table
            .try_push(subdev)
            .map_err(|_| ax_err_type!(NoMemory, "subdevice table full"))?;

        debug!(
            "Subdevice {} added to device {:?}: function {:#x}/{:#x}/{:#x}, base {:#x}, size {:#x}, {} channel(s)",
            subdev.id,
            self.id,
            subdev.function_id,
            subdev.sub_function_id,
            subdev.function_version,
            subdev.base_addr,
            subdev.mem_size,
            subdev.nof_channels
        );
        Ok(subdev.id)
    }

    /// Detaches a subdevice. Later subdevices move down one id.
    pub fn remove_subdevice(&self, id: u8) -> Option<FlinkSubdevice> {
        let mut table = self.subdevices.write();
        if id as usize >= table.len() {
            return None;
        }
        let mut removed = table.remove(id as usize);
        for (i, sub) in table.iter_mut().enumerate().skip(id as usize) {
            sub.id = i as u8;
        }
        removed.parent = None;
        debug!("Subdevice {} removed from device {:?}", id, self.id);
        Some(removed)
    }

    // ---- character device ----

    pub fn cdev(&self) -> Option<CdevId> {
        self.cdev.read().as_ref().map(|b| b.cdev)
    }

    /// Node name, e.g. `flink0`.
    pub fn node_name(&self) -> Option<String> {
        self.cdev.read().as_ref().map(|b| b.name.clone())
    }

    pub(crate) fn bind_cdev(&self, binding: CharDevBinding) {
        *self.cdev.write() = Some(binding);
    }

    pub(crate) fn unbind_cdev(&self) -> Option<CharDevBinding> {
        self.cdev.write().take()
    }

    // ---- register access ----

    /// Reads a register of `subdev`. `offset` is relative to its base.
    pub fn read_reg(&self, subdev: &FlinkSubdevice, offset: u32, width: AccessWidth) -> u32 {
        let addr = subdev.base_addr.wrapping_add(offset);
        let val = self.transport.read(addr, width);
        self.stats.record_read();
        trace!(
            "read  dev {:?} sub {} addr {:#x} ({:?}) -> {:#x}",
            self.id, subdev.id, addr, width, val
        );
        val
    }

    /// Writes a register of `subdev`. `offset` is relative to its base.
    pub fn write_reg(&self, subdev: &FlinkSubdevice, offset: u32, width: AccessWidth, val: u32) {
        let addr = subdev.base_addr.wrapping_add(offset);
        trace!(
            "write dev {:?} sub {} addr {:#x} ({:?}) <- {:#x}",
            self.id, subdev.id, addr, width, val
        );
        self.transport.write(addr, width, val);
        self.stats.record_write();
    }

    // ---- IRQs ----

    #[inline]
    pub fn irq_table(&self) -> Option<&IrqTable> {
        self.irq.as_ref()
    }

    /// Number of IRQ lines; 0 when the IRQ subsystem is disabled.
    #[inline]
    pub fn nof_irqs(&self) -> u32 {
        self.irq.as_ref().map_or(0, IrqTable::nof_irqs)
    }

    fn irqs(&self) -> AxResult<&IrqTable> {
        self.irq
            .as_ref()
            .ok_or_else(|| ax_err_type!(OperationNotPermitted, "IRQ subsystem disabled"))
    }

    /// User-visible signal number of logical IRQ 0.
    pub fn signal_offset(&self) -> AxResult<u32> {
        Ok(self.irqs()?.signal_offset())
    }

    /// Subscribes `task` to logical IRQ `irq_nr`; returns the signal number
    /// it will receive.
    pub fn register_irq(&self, irq_nr: u32, task: &Arc<dyn UserTask>) -> AxResult<u32> {
        self.irqs()?.register(irq_nr, task)
    }

    /// Drops the subscription of `pid` to logical IRQ `irq_nr`.
    pub fn unregister_irq(&self, irq_nr: u32, pid: Pid) -> AxResult {
        self.irqs()?.unregister(irq_nr, pid)
    }

    /// Drops every subscription of an exiting process.
    pub fn release_task(&self, pid: Pid) -> usize {
        self.irq.as_ref().map_or(0, |t| t.release_task(pid))
    }

    /// Entry point for the host's IRQ handler.
    #[inline]
    pub fn handle_irq(&self, line: u32) -> IrqReturn {
        match &self.irq {
            Some(table) => table.handle_irq(line),
            None => IrqReturn::None,
        }
    }
}

impl Drop for FlinkDevice {
    fn drop(&mut self) {
        // Host lines go first so the dispatcher cannot run on a dying table.
        drop(self.irq.take());
        self.subdevices.get_mut().clear();
        debug!("Device {:?} deleted", self.id);
    }
}

impl core::fmt::Debug for FlinkDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlinkDevice")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("nof_subdevices", &self.nof_subdevices())
            .field("irq", &self.irq)
            .field("cdev", &self.cdev())
            .finish()
    }
}
