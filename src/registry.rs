//! Process-wide registry of fLink devices.
//!
//! The registry is mutated only from probe/remove paths. The request plane
//! looks devices up by their character-device binding when a node is opened.

use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use axerrno::{ax_err, ax_err_type, AxResult};
use spin::{Once, RwLock};

use crate::device::{CdevId, CharDevBinding, DeviceId, FlinkDevice};
use crate::irq::Pid;
use crate::scan::scan_for_subdevices;

/// Host glue publishing device nodes.
pub trait CharDevHost: Send + Sync {
    /// Creates the node `name` for `cdev`.
    fn create_node(&self, cdev: CdevId, name: &str) -> AxResult;
    /// Destroys the node of `cdev`.
    fn destroy_node(&self, cdev: CdevId);
}

/// Device registry.
///
/// Registration order fixes device ids. Each registered device gets the next
/// character-device minor and a node named `flink<minor>`.
///
/// # Concurrency
///
/// The device list sits behind a read-write lock: lookups run concurrently,
/// probe/remove take it exclusively.
pub struct DeviceRegistry {
    /// Registered devices in registration order.
    devices: RwLock<Vec<Arc<FlinkDevice>>>,

    /// Counter for generating device ids.
    next_id: AtomicUsize,

    /// Counter for character-device minors.
    next_minor: AtomicU32,

    node_host: Option<Arc<dyn CharDevHost>>,
}

impl DeviceRegistry {
    /// Creates a registry that keeps node bindings as bookkeeping only.
    pub const fn new() -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            next_minor: AtomicU32::new(0),
            node_host: None,
        }
    }

    /// Creates a registry that publishes nodes through `host`.
    pub fn with_node_host(host: Arc<dyn CharDevHost>) -> Self {
        Self {
            node_host: Some(host),
            ..Self::new()
        }
    }

    fn next_device_id(&self) -> DeviceId {
        DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a device.
    ///
    /// Assigns its id, adds it to the registry, discovers its subdevices and
    /// then creates its character node. A device without subdevices is still
    /// registered. A failure to publish the node is logged; the device stays
    /// registered without a binding.
    ///
    /// # Errors
    ///
    /// `BadState` if the device was registered before.
    pub fn add_device(&self, mut device: FlinkDevice) -> AxResult<Arc<FlinkDevice>> {
        if !device.lifecycle().begin_registered() {
            return ax_err!(BadState, "device already registered");
        }

        let id = self.next_device_id();
        device.set_id(id);
        let device = Arc::new(device);

        self.devices.write().push(Arc::clone(&device));

        let nof_subdevices = scan_for_subdevices(&device);
        info!(
            "{} subdevice(s) added to device {} at {:#x}",
            nof_subdevices,
            id.0,
            device.config().base_addr.as_usize()
        );

        let cdev = CdevId(self.next_minor.fetch_add(1, Ordering::Relaxed));
        let name = format!("flink{}", cdev.0);
        let published = match &self.node_host {
            Some(host) => host.create_node(cdev, &name),
            None => Ok(()),
        };
        match published {
            Ok(()) => {
                info!("Device {} available as {}", id.0, name);
                device.bind_cdev(CharDevBinding { cdev, name });
            }
            Err(err) => error!("Creating node {} failed: {:?}", name, err),
        }

        Ok(device)
    }

    /// Removes a device from the registry and tears down its node.
    ///
    /// The returned reference is typically the last one held by the
    /// transport; dropping it deletes the device.
    ///
    /// # Errors
    ///
    /// `NotFound` if no device has this id.
    pub fn remove_device(&self, id: DeviceId) -> AxResult<Arc<FlinkDevice>> {
        let device = {
            let mut devices = self.devices.write();
            let pos = devices
                .iter()
                .position(|d| d.id() == Some(id))
                .ok_or_else(|| ax_err_type!(NotFound, "device not found"))?;
            devices.remove(pos)
        };

        if !device.lifecycle().mark_removed() {
            return ax_err!(BadState, "device is not registered");
        }

        if let Some(binding) = device.unbind_cdev() {
            if let Some(host) = &self.node_host {
                host.destroy_node(binding.cdev);
            }
            info!("Node {} destroyed", binding.name);
        }
        info!("Device {} removed", id.0);

        Ok(device)
    }

    /// Gets a device by its id.
    pub fn get_device(&self, id: DeviceId) -> Option<Arc<FlinkDevice>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.id() == Some(id))
            .cloned()
    }

    /// Gets the device bound to a character node.
    pub fn get_device_by_cdev(&self, cdev: CdevId) -> Option<Arc<FlinkDevice>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.cdev() == Some(cdev))
            .cloned()
    }

    /// Lists all registered device ids.
    pub fn list_devices(&self) -> Vec<DeviceId> {
        self.devices.read().iter().filter_map(|d| d.id()).collect()
    }

    /// Gets the number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Drops every IRQ subscription of an exiting process, on all devices.
    pub fn release_task(&self, pid: Pid) -> usize {
        let devices: Vec<Arc<FlinkDevice>> = self.devices.read().clone();
        devices.iter().map(|d| d.release_task(pid)).sum()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: Once<DeviceRegistry> = Once::new();

/// The process-wide registry used by transport modules.
pub fn flink_registry() -> &'static DeviceRegistry {
    GLOBAL_REGISTRY.call_once(DeviceRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlinkDeviceConfig;
    use crate::lifecycle::DeviceState;
    use crate::transport::mock::MockBus;
    use alloc::boxed::Box;
    use alloc::string::String;
    use axerrno::AxError;
    use spin::Mutex;

    #[derive(Default)]
    struct MockNodes {
        nodes: Mutex<Vec<(CdevId, String)>>,
        destroyed: Mutex<Vec<CdevId>>,
        fail: bool,
    }

    impl CharDevHost for MockNodes {
        fn create_node(&self, cdev: CdevId, name: &str) -> AxResult {
            if self.fail {
                return ax_err!(NoMemory, "no minors left");
            }
            self.nodes.lock().push((cdev, String::from(name)));
            Ok(())
        }

        fn destroy_node(&self, cdev: CdevId) {
            self.destroyed.lock().push(cdev);
        }
    }

    fn device() -> FlinkDevice {
        FlinkDevice::new(
            Box::new(MockBus::with_two_blocks()),
            FlinkDeviceConfig::new(0, 0x10000),
        )
    }

    #[test]
    fn test_registry_add_and_lookup() {
        let nodes = Arc::new(MockNodes::default());
        let registry = DeviceRegistry::with_node_host(nodes.clone());

        let a = registry.add_device(device()).unwrap();
        let b = registry.add_device(device()).unwrap();
        assert_eq!(a.id(), Some(DeviceId(0)));
        assert_eq!(b.id(), Some(DeviceId(1)));
        assert_eq!(registry.device_count(), 2);
        assert_eq!(registry.list_devices(), alloc::vec![DeviceId(0), DeviceId(1)]);

        assert_eq!(a.state(), DeviceState::Registered);
        assert_eq!(a.nof_subdevices(), 2);
        assert_eq!(a.node_name().as_deref(), Some("flink0"));
        assert_eq!(b.node_name().as_deref(), Some("flink1"));
        assert_eq!(nodes.nodes.lock().len(), 2);

        let found = registry.get_device_by_cdev(CdevId(1)).unwrap();
        assert!(Arc::ptr_eq(&found, &b));
        assert!(registry.get_device(DeviceId(0)).is_some());
        assert!(registry.get_device(DeviceId(7)).is_none());
        assert!(registry.get_device_by_cdev(CdevId(9)).is_none());
    }

    #[test]
    fn test_registry_removal() {
        let nodes = Arc::new(MockNodes::default());
        let registry = DeviceRegistry::with_node_host(nodes.clone());
        let dev = registry.add_device(device()).unwrap();
        let id = dev.id().unwrap();
        drop(dev);

        let removed = registry.remove_device(id).unwrap();
        assert_eq!(removed.state(), DeviceState::Removed);
        assert_eq!(removed.cdev(), None);
        assert_eq!(*nodes.destroyed.lock(), alloc::vec![CdevId(0)]);
        assert_eq!(registry.device_count(), 0);

        assert_eq!(registry.remove_device(id).unwrap_err(), AxError::NotFound);
    }

    #[test]
    fn test_registry_node_failure_keeps_device() {
        let nodes = Arc::new(MockNodes {
            fail: true,
            ..MockNodes::default()
        });
        let registry = DeviceRegistry::with_node_host(nodes);
        let dev = registry.add_device(device()).unwrap();
        assert_eq!(dev.cdev(), None);
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_registry_without_node_host() {
        let registry = DeviceRegistry::new();
        let dev = registry.add_device(device()).unwrap();
        assert_eq!(dev.cdev(), Some(CdevId(0)));
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(core::ptr::eq(flink_registry(), flink_registry()));
    }
}
