//! Request plane: per-open handle of a `/dev/flink<N>` node.
//!
//! A handle remembers the selected subdevice and a stream position. The
//! positional calls access one register of the selected subdevice at the
//! stream position; the control codes cover selection, queries, bit access,
//! one-shot cross-subdevice access and IRQ subscriptions.
//!
//! Bit writes are read-modify-write sequences. They are not atomic against
//! other writers of the same register, on this handle or any other.

use alloc::sync::Arc;

use axerrno::{ax_err, ax_err_type, AxError, AxResult, LinuxError};

use crate::device::{CdevId, FlinkDevice};
use crate::ioctl::{FlinkIoctl, IoctlBitContainer, IoctlContainer};
use crate::irq::UserTask;
use crate::registry::DeviceRegistry;
use crate::subdevice::{FlinkSubdevice, SubdeviceInfo};
use crate::transport::AccessWidth;
use crate::uaccess::{UserAccess, UserPtr};

/// Reference point of [`FlinkFile::llseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the subdevice window.
    Set,
    /// From the current position.
    Cur,
    /// From the end of the subdevice window (`mem_size`).
    End,
}

impl TryFrom<u32> for Whence {
    type Error = AxError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(ax_err_type!(InvalidInput, "unknown whence")),
        }
    }
}

/// Converts a request result to the host syscall convention: the value on
/// success, the negated errno on failure.
pub fn syscall_result(res: AxResult<usize>) -> isize {
    match res {
        Ok(val) => val as isize,
        Err(err) => -(LinuxError::from(err).code() as isize),
    }
}

/// State of one open handle.
pub struct FlinkFile {
    device: Arc<FlinkDevice>,
    current: Option<u8>,
    pos: i64,
}

impl FlinkFile {
    /// Opens a handle on `device` with no subdevice selected.
    pub fn new(device: Arc<FlinkDevice>) -> Self {
        debug!("Device {:?} opened", device.id());
        Self {
            device,
            current: None,
            pos: 0,
        }
    }

    /// Opens the node bound to `cdev`.
    pub fn open(registry: &DeviceRegistry, cdev: CdevId) -> AxResult<Self> {
        let device = registry
            .get_device_by_cdev(cdev)
            .ok_or_else(|| ax_err_type!(NotFound, "no device bound to this node"))?;
        Ok(Self::new(device))
    }

    /// Closes the handle. IRQ subscriptions are per process and survive it.
    pub fn close(self) {
        debug!("Device {:?} closed", self.device.id());
    }

    #[inline]
    pub fn device(&self) -> &Arc<FlinkDevice> {
        &self.device
    }

    /// Id of the selected subdevice.
    #[inline]
    pub fn current_subdevice(&self) -> Option<u8> {
        self.current
    }

    #[inline]
    pub fn position(&self) -> i64 {
        self.pos
    }

    fn lookup(&self, id: u8) -> AxResult<FlinkSubdevice> {
        self.device
            .subdevice(id)
            .ok_or_else(|| ax_err_type!(InvalidInput, "subdevice id out of range"))
    }

    fn selected(&self) -> AxResult<FlinkSubdevice> {
        match self.current {
            Some(id) => self.lookup(id),
            None => ax_err!(InvalidInput, "no subdevice selected"),
        }
    }

    /// Selects subdevice `id` for the following requests.
    ///
    /// An exclusive selection is accepted like a shared one; exclusivity is
    /// not enforced. A failed selection keeps the previous one.
    pub fn select_subdevice(&mut self, id: u8, exclusive: bool) -> AxResult {
        self.lookup(id)?;
        self.current = Some(id);
        debug!(
            "Device {:?}: subdevice {} selected{}",
            self.device.id(),
            id,
            if exclusive { " (exclusive)" } else { "" }
        );
        Ok(())
    }

    /// Reads one register of the selected subdevice at the stream position
    /// into the user buffer `buf`.
    ///
    /// Returns the number of bytes transferred: `size` on success, 0 if
    /// nothing is selected, `size` is not 1, 2 or 4, the position lies beyond
    /// the window or the copy faults.
    pub fn read(&self, ua: &dyn UserAccess, buf: UserPtr, size: usize) -> usize {
        let Some((sub, offset, width)) = self.positional(size) else {
            return 0;
        };
        let val = self.device.read_reg(&sub, offset, width);
        match ua.copy_to_user(buf, &val.to_le_bytes()[..size]) {
            Ok(()) => size,
            Err(_) => {
                self.device.stats().record_error();
                0
            }
        }
    }

    /// Writes one register of the selected subdevice at the stream position
    /// from the user buffer `buf`. Mirrors [`read`](Self::read).
    pub fn write(&self, ua: &dyn UserAccess, buf: UserPtr, size: usize) -> usize {
        let Some((sub, offset, width)) = self.positional(size) else {
            return 0;
        };
        let mut raw = [0u8; 4];
        if ua.copy_from_user(buf, &mut raw[..size]).is_err() {
            self.device.stats().record_error();
            return 0;
        }
        self.device
            .write_reg(&sub, offset, width, u32::from_le_bytes(raw));
        size
    }

    fn positional(&self, size: usize) -> Option<(FlinkSubdevice, u32, AccessWidth)> {
        let width = AccessWidth::try_from(size).ok()?;
        let sub = self.device.subdevice(self.current?)?;
        let offset = u32::try_from(self.pos).ok()?;
        if offset > sub.mem_size {
            return None;
        }
        Some((sub, offset, width))
    }

    /// Moves the stream position. [`Whence::End`] is relative to the
    /// selected subdevice's `mem_size`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if nothing is selected or the new position would be
    /// negative.
    pub fn llseek(&mut self, off: i64, whence: Whence) -> AxResult<i64> {
        let sub = self.selected()?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => self.pos,
            Whence::End => sub.mem_size as i64,
        };
        let pos = base
            .checked_add(off)
            .filter(|p| *p >= 0)
            .ok_or_else(|| ax_err_type!(InvalidInput, "invalid seek position"))?;
        self.pos = pos;
        debug!("Device {:?}: new position {:#x}", self.device.id(), pos);
        Ok(pos)
    }

    /// Reads bit `bit` of the register at `offset` of the selected subdevice.
    pub fn read_bit(&self, offset: u32, bit: u8) -> AxResult<u8> {
        let sub = self.selected()?;
        self.bit_read(&sub, offset, bit)
    }

    /// Sets (`value != 0`) or clears bit `bit` of the register at `offset` of
    /// the selected subdevice.
    pub fn write_bit(&self, offset: u32, bit: u8, value: u8) -> AxResult {
        let sub = self.selected()?;
        self.bit_write(&sub, offset, bit, value)
    }

    /// [`read_bit`](Self::read_bit) on subdevice `id`, leaving the selection
    /// untouched.
    pub fn select_and_read_bit(&self, id: u8, offset: u32, bit: u8) -> AxResult<u8> {
        let sub = self.lookup(id)?;
        self.bit_read(&sub, offset, bit)
    }

    /// [`write_bit`](Self::write_bit) on subdevice `id`, leaving the selection
    /// untouched.
    pub fn select_and_write_bit(&self, id: u8, offset: u32, bit: u8, value: u8) -> AxResult {
        let sub = self.lookup(id)?;
        self.bit_write(&sub, offset, bit, value)
    }

    fn bit_read(&self, sub: &FlinkSubdevice, offset: u32, bit: u8) -> AxResult<u8> {
        let mask = bit_mask(bit)?;
        let word = self.device.read_reg(sub, offset, AccessWidth::Dword);
        Ok((word & mask != 0) as u8)
    }

    fn bit_write(&self, sub: &FlinkSubdevice, offset: u32, bit: u8, value: u8) -> AxResult {
        let mask = bit_mask(bit)?;
        let word = self.device.read_reg(sub, offset, AccessWidth::Dword);
        let word = if value != 0 { word | mask } else { word & !mask };
        self.device.write_reg(sub, offset, AccessWidth::Dword, word);
        Ok(())
    }

    /// One-shot read of `size` bytes at `offset` of subdevice `id` into the
    /// user buffer `data`. Returns the number of bytes transferred.
    pub fn select_and_read(
        &self,
        ua: &dyn UserAccess,
        id: u8,
        offset: u32,
        size: usize,
        data: UserPtr,
    ) -> AxResult<usize> {
        let (sub, width) = self.one_shot(id, offset, size, data)?;
        let val = self.device.read_reg(&sub, offset, width);
        ua.copy_to_user(data, &val.to_le_bytes()[..size])
            .map_err(|_| ax_err_type!(InvalidInput, "copy to user failed"))?;
        Ok(size)
    }

    /// One-shot write of `size` bytes from the user buffer `data` to `offset`
    /// of subdevice `id`. Returns the number of bytes transferred.
    pub fn select_and_write(
        &self,
        ua: &dyn UserAccess,
        id: u8,
        offset: u32,
        size: usize,
        data: UserPtr,
    ) -> AxResult<usize> {
        let (sub, width) = self.one_shot(id, offset, size, data)?;
        let mut raw = [0u8; 4];
        ua.copy_from_user(data, &mut raw[..size])
            .map_err(|_| ax_err_type!(InvalidInput, "copy from user failed"))?;
        self.device
            .write_reg(&sub, offset, width, u32::from_le_bytes(raw));
        Ok(size)
    }

    fn one_shot(
        &self,
        id: u8,
        offset: u32,
        size: usize,
        data: UserPtr,
    ) -> AxResult<(FlinkSubdevice, AccessWidth)> {
        let sub = self.lookup(id)?;
        if offset > sub.mem_size {
            return ax_err!(InvalidInput, "offset beyond subdevice window");
        }
        if data.is_null() {
            return ax_err!(InvalidInput, "null data pointer");
        }
        let width = AccessWidth::try_from(size)
            .map_err(|_| ax_err_type!(InvalidInput, "unsupported transfer size"))?;
        Ok((sub, width))
    }

    /// Executes control code `cmd` with argument pointer `arg` on behalf of
    /// `task`.
    ///
    /// Returns the value handed back to user space as the call result:
    /// the signal number for `REGISTER_IRQ` and `GET_SIGNAL_OFFSET`, the
    /// transfer size for `SELECT_AND_READ`/`SELECT_AND_WRITE`, 0 otherwise.
    pub fn ioctl(
        &mut self,
        cmd: u32,
        arg: UserPtr,
        ua: &dyn UserAccess,
        task: &Arc<dyn UserTask>,
    ) -> AxResult<usize> {
        let res = self.dispatch_ioctl(cmd, arg, ua, task);
        if res.is_err() {
            self.device.stats().record_error();
        }
        res
    }

    fn dispatch_ioctl(
        &mut self,
        cmd: u32,
        arg: UserPtr,
        ua: &dyn UserAccess,
        task: &Arc<dyn UserTask>,
    ) -> AxResult<usize> {
        match FlinkIoctl::try_from(cmd)? {
            FlinkIoctl::SelectSubdevice => {
                let id = read_user::<1>(ua, arg)?[0];
                self.select_subdevice(id, false)?;
                Ok(0)
            }
            FlinkIoctl::SelectSubdeviceExcl => {
                let id = read_user::<1>(ua, arg)?[0];
                self.select_subdevice(id, true)?;
                Ok(0)
            }
            FlinkIoctl::ReadNofSubdevices => {
                // The table holds at most 256 entries; a full table reads as 0.
                let nof = self.device.nof_subdevices() as u8;
                write_user(ua, arg, &[nof])?;
                Ok(0)
            }
            FlinkIoctl::ReadSubdeviceInfo => {
                let id = read_user::<1>(ua, arg)?[0];
                let info: SubdeviceInfo = self.lookup(id)?.info();
                write_user(ua, arg, &info.to_bytes())?;
                Ok(0)
            }
            FlinkIoctl::ReadSingleBit => {
                let mut c = read_bit_container(ua, arg)?;
                c.value = self.read_bit(c.offset, c.bit)?;
                write_user(ua, arg, &c.to_bytes())?;
                Ok(0)
            }
            FlinkIoctl::WriteSingleBit => {
                let c = read_bit_container(ua, arg)?;
                self.write_bit(c.offset, c.bit, c.value)?;
                Ok(0)
            }
            FlinkIoctl::SelectAndReadBit => {
                let mut c = read_bit_container(ua, arg)?;
                c.value = self.select_and_read_bit(c.subdevice, c.offset, c.bit)?;
                write_user(ua, arg, &c.to_bytes())?;
                Ok(0)
            }
            FlinkIoctl::SelectAndWriteBit => {
                let c = read_bit_container(ua, arg)?;
                self.select_and_write_bit(c.subdevice, c.offset, c.bit, c.value)?;
                Ok(0)
            }
            FlinkIoctl::SelectAndRead => {
                let c = read_container(ua, arg)?;
                self.select_and_read(ua, c.subdevice, c.offset, c.size as usize, UserPtr(c.data))
            }
            FlinkIoctl::SelectAndWrite => {
                let c = read_container(ua, arg)?;
                self.select_and_write(ua, c.subdevice, c.offset, c.size as usize, UserPtr(c.data))
            }
            FlinkIoctl::RegisterIrq => {
                let irq_nr = u32::from_ne_bytes(read_user::<4>(ua, arg)?);
                let signal = self.device.register_irq(irq_nr, task)?;
                Ok(signal as usize)
            }
            FlinkIoctl::UnregisterIrq => {
                let irq_nr = u32::from_ne_bytes(read_user::<4>(ua, arg)?);
                self.device.unregister_irq(irq_nr, task.pid())?;
                Ok(0)
            }
            FlinkIoctl::GetSignalOffset => {
                let offset = self.device.signal_offset()?;
                write_user(ua, arg, &offset.to_ne_bytes())?;
                Ok(offset as usize)
            }
        }
    }
}

impl core::fmt::Debug for FlinkFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlinkFile")
            .field("device", &self.device.id())
            .field("current", &self.current)
            .field("pos", &self.pos)
            .finish()
    }
}

fn bit_mask(bit: u8) -> AxResult<u32> {
    1u32.checked_shl(bit as u32)
        .ok_or_else(|| ax_err_type!(InvalidInput, "bit index out of range"))
}

fn read_user<const N: usize>(ua: &dyn UserAccess, src: UserPtr) -> AxResult<[u8; N]> {
    let mut buf = [0u8; N];
    ua.copy_from_user(src, &mut buf)
        .map_err(|_| ax_err_type!(InvalidInput, "copy from user failed"))?;
    Ok(buf)
}

fn write_user(ua: &dyn UserAccess, dst: UserPtr, src: &[u8]) -> AxResult {
    ua.copy_to_user(dst, src)
        .map_err(|_| ax_err_type!(InvalidInput, "copy to user failed"))
}

fn read_bit_container(ua: &dyn UserAccess, src: UserPtr) -> AxResult<IoctlBitContainer> {
    read_user::<{ IoctlBitContainer::SIZE }>(ua, src).map(|b| IoctlBitContainer::from_bytes(&b))
}

fn read_container(ua: &dyn UserAccess, src: UserPtr) -> AxResult<IoctlContainer> {
    read_user::<{ IoctlContainer::SIZE }>(ua, src).map(|b| IoctlContainer::from_bytes(&b))
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::vec;

    use super::*;
    use crate::config::FlinkDeviceConfig;
    use crate::irq::mock::{MockIrqHost, MockTask};
    use crate::transport::mock::MockBus;
    use crate::uaccess::mock::MockUser;

    fn setup() -> (Arc<MockBus>, FlinkFile) {
        let bus = Arc::new(MockBus::with_two_blocks());
        let registry = DeviceRegistry::new();
        let dev = registry
            .add_device(FlinkDevice::new(
                Box::new(bus.clone()),
                FlinkDeviceConfig::new(0, 0x10000),
            ))
            .unwrap();
        (bus, FlinkFile::new(dev))
    }

    fn task(pid: u32) -> Arc<dyn UserTask> {
        Arc::new(MockTask::new(pid))
    }

    #[test]
    fn test_positional_read_is_little_endian() {
        let (bus, mut file) = setup();
        let ua = MockUser::new(0x100);
        bus.poke32(0x40, 0xDEAD_BEEF);

        file.select_subdevice(1, false).unwrap();
        file.llseek(0x10, Whence::Set).unwrap();
        assert_eq!(file.read(&ua, ua.ptr(0), 4), 4);
        assert_eq!(ua.load(0, 4), vec![0xEF, 0xBE, 0xAD, 0xDE]);

        assert_eq!(file.read(&ua, ua.ptr(8), 2), 2);
        assert_eq!(ua.load(8, 2), vec![0xEF, 0xBE]);
        assert_eq!(file.read(&ua, ua.ptr(12), 1), 1);
        assert_eq!(ua.load(12, 1), vec![0xEF]);
        // Reads do not move the position.
        assert_eq!(file.position(), 0x10);
    }

    #[test]
    fn test_positional_read_rejects() {
        let (bus, mut file) = setup();
        let ua = MockUser::new(0x100);

        // Nothing selected
        assert_eq!(file.read(&ua, ua.ptr(0), 4), 0);

        file.select_subdevice(0, false).unwrap();
        assert_eq!(file.read(&ua, ua.ptr(0), 3), 0);
        assert_eq!(file.read(&ua, ua.ptr(0), 8), 0);

        file.llseek(0x1000, Whence::Set).unwrap();
        let before = bus.reads.lock().len();
        assert_eq!(file.read(&ua, ua.ptr(0), 4), 0);
        assert_eq!(bus.reads.lock().len(), before);

        // Faulting destination
        file.llseek(0, Whence::Set).unwrap();
        assert_eq!(file.read(&ua, UserPtr(0x10), 4), 0);
        assert_eq!(file.device().stats().errors(), 1);
    }

    #[test]
    fn test_positional_write() {
        let (bus, mut file) = setup();
        let ua = MockUser::new(0x100);
        ua.store(0, &[0x78, 0x56, 0x34, 0x12]);

        file.select_subdevice(1, false).unwrap();
        file.llseek(0x18, Whence::Set).unwrap();
        assert_eq!(file.write(&ua, ua.ptr(0), 4), 4);
        assert_eq!(bus.peek32(0x48), 0x1234_5678);
        assert_eq!(file.write(&ua, ua.ptr(0), 1), 1);
        assert_eq!(bus.writes.lock().last(), Some(&(0x48, 0x78)));
        assert_eq!(file.write(&ua, ua.ptr(0), 5), 0);
    }

    #[test]
    fn test_llseek() {
        let (_bus, mut file) = setup();
        assert_eq!(file.llseek(0, Whence::Set), Err(AxError::InvalidInput));

        file.select_subdevice(1, false).unwrap();
        assert_eq!(file.llseek(0x10, Whence::Set), Ok(0x10));
        assert_eq!(file.llseek(4, Whence::Cur), Ok(0x14));
        assert_eq!(file.llseek(-4, Whence::End), Ok(0x2C));
        assert_eq!(file.llseek(-0x40, Whence::Cur), Err(AxError::InvalidInput));
        assert_eq!(file.position(), 0x2C);
        assert_eq!(Whence::try_from(3), Err(AxError::InvalidInput));
    }

    #[test]
    fn test_select_keeps_previous_on_failure() {
        let (_bus, mut file) = setup();
        file.select_subdevice(1, false).unwrap();
        assert_eq!(file.select_subdevice(2, false), Err(AxError::InvalidInput));
        assert_eq!(file.current_subdevice(), Some(1));
        file.select_subdevice(0, true).unwrap();
        assert_eq!(file.current_subdevice(), Some(0));
    }

    #[test]
    fn test_bit_write_sets_and_clears() {
        let (bus, mut file) = setup();
        file.select_subdevice(1, false).unwrap();

        file.write_bit(0x14, 3, 1).unwrap();
        assert_eq!(bus.writes.lock().last(), Some(&(0x44, 0x0000_0008)));
        assert_eq!(file.read_bit(0x14, 3), Ok(1));
        assert_eq!(file.read_bit(0x14, 2), Ok(0));

        file.write_bit(0x14, 3, 0).unwrap();
        assert_eq!(bus.peek32(0x44), 0);
        assert_eq!(file.write_bit(0x14, 32, 1), Err(AxError::InvalidInput));
    }

    #[test]
    fn test_bit_ops_need_selection() {
        let (_bus, file) = setup();
        assert_eq!(file.read_bit(0x10, 0), Err(AxError::InvalidInput));
        assert_eq!(file.write_bit(0x10, 0, 1), Err(AxError::InvalidInput));
        // The select-and variants do not.
        assert_eq!(file.select_and_write_bit(1, 0x10, 0, 1), Ok(()));
        assert_eq!(file.select_and_read_bit(1, 0x10, 0), Ok(1));
        assert_eq!(file.current_subdevice(), None);
    }

    #[test]
    fn test_ioctl_select_and_info() {
        let (_bus, mut file) = setup();
        let ua = MockUser::new(0x100);
        let t = task(1);

        ua.store(0, &[1]);
        assert_eq!(file.ioctl(0x10, ua.ptr(0), &ua, &t), Ok(0));
        assert_eq!(file.current_subdevice(), Some(1));

        assert_eq!(file.ioctl(0x12, ua.ptr(0), &ua, &t), Ok(0));
        assert_eq!(ua.load(0, 1), vec![2]);

        ua.store(0, &[1]);
        assert_eq!(file.ioctl(0x13, ua.ptr(0), &ua, &t), Ok(0));
        let info = file.device().subdevice(1).unwrap().info();
        assert_eq!(ua.load(0, SubdeviceInfo::SIZE), info.to_bytes().to_vec());

        ua.store(0, &[9]);
        assert_eq!(file.ioctl(0x13, ua.ptr(0), &ua, &t), Err(AxError::InvalidInput));
        assert_eq!(file.ioctl(0x99, ua.ptr(0), &ua, &t), Err(AxError::InvalidInput));
        assert_eq!(file.ioctl(0x10, UserPtr::NULL, &ua, &t), Err(AxError::InvalidInput));
        assert_eq!(file.device().stats().errors(), 3);
    }

    #[test]
    fn test_ioctl_bit_containers() {
        let (bus, mut file) = setup();
        let ua = MockUser::new(0x100);
        let t = task(1);
        let c = IoctlBitContainer {
            offset: 0x14,
            bit: 5,
            value: 1,
            subdevice: 1,
        };

        ua.store(0, &c.to_bytes());
        assert_eq!(file.ioctl(0x17, ua.ptr(0), &ua, &t), Ok(0));
        assert_eq!(bus.peek32(0x44), 1 << 5);

        let probe = IoctlBitContainer { value: 0, ..c };
        ua.store(0, &probe.to_bytes());
        assert_eq!(file.ioctl(0x16, ua.ptr(0), &ua, &t), Ok(0));
        let mut raw = [0u8; IoctlBitContainer::SIZE];
        raw.copy_from_slice(&ua.load(0, IoctlBitContainer::SIZE));
        assert_eq!(IoctlBitContainer::from_bytes(&raw).value, 1);

        file.select_subdevice(1, false).unwrap();
        let clear = IoctlBitContainer { value: 0, ..c };
        ua.store(0, &clear.to_bytes());
        assert_eq!(file.ioctl(0x15, ua.ptr(0), &ua, &t), Ok(0));
        assert_eq!(bus.peek32(0x44), 0);

        ua.store(0, &probe.to_bytes());
        assert_eq!(file.ioctl(0x14, ua.ptr(0), &ua, &t), Ok(0));
        assert_eq!(ua.load(5, 1), vec![0]);
    }

    #[test]
    fn test_ioctl_select_and_read_write() {
        let (bus, mut file) = setup();
        let ua = MockUser::new(0x100);
        let t = task(1);
        bus.poke32(0x40, 0xDEAD_BEEF);

        let c = IoctlContainer {
            subdevice: 1,
            offset: 0x10,
            size: 4,
            data: ua.ptr(0x80).0,
        };
        ua.store(0, &c.to_bytes());
        assert_eq!(file.ioctl(0x18, ua.ptr(0), &ua, &t), Ok(4));
        assert_eq!(ua.load(0x80, 4), vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(file.current_subdevice(), None);

        ua.store(0x80, &[0x11, 0x22]);
        let w = IoctlContainer { size: 2, offset: 0x18, ..c };
        ua.store(0, &w.to_bytes());
        assert_eq!(file.ioctl(0x19, ua.ptr(0), &ua, &t), Ok(2));
        assert_eq!(bus.peek32(0x48), 0x2211);

        for bad in [
            IoctlContainer { subdevice: 7, ..c },
            IoctlContainer { offset: 0x31, ..c },
            IoctlContainer { size: 3, ..c },
            IoctlContainer { data: 0, ..c },
        ] {
            ua.store(0, &bad.to_bytes());
            assert_eq!(file.ioctl(0x18, ua.ptr(0), &ua, &t), Err(AxError::InvalidInput));
        }
    }

    #[test]
    fn test_ioctl_irq() {
        let host = Arc::new(MockIrqHost::default());
        let registry = DeviceRegistry::new();
        let dev = registry
            .add_device(FlinkDevice::new_with_irq(
                Box::new(MockBus::with_two_blocks()),
                FlinkDeviceConfig::new(0, 0x10000).with_irqs(4, 55, 34),
                host,
            ))
            .unwrap();
        let mut file = FlinkFile::new(dev);
        let ua = MockUser::new(0x100);
        let t = task(42);

        ua.store(0, &2u32.to_ne_bytes());
        assert_eq!(file.ioctl(0x1A, ua.ptr(0), &ua, &t), Ok(36));
        assert_eq!(file.ioctl(0x1A, ua.ptr(0), &ua, &t), Err(AxError::InvalidInput));
        assert_eq!(file.ioctl(0x1B, ua.ptr(0), &ua, &t), Ok(0));
        assert_eq!(file.ioctl(0x1B, ua.ptr(0), &ua, &t), Err(AxError::InvalidInput));

        ua.store(0, &4u32.to_ne_bytes());
        assert_eq!(file.ioctl(0x1A, ua.ptr(0), &ua, &t), Err(AxError::InvalidInput));

        assert_eq!(file.ioctl(0x1C, ua.ptr(8), &ua, &t), Ok(34));
        assert_eq!(ua.load(8, 4), 34u32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_ioctl_irq_disabled() {
        let (_bus, mut file) = setup();
        let ua = MockUser::new(0x100);
        let t = task(1);
        assert_eq!(
            file.ioctl(0x1A, ua.ptr(0), &ua, &t),
            Err(AxError::OperationNotPermitted)
        );
        assert_eq!(
            file.ioctl(0x1C, ua.ptr(0), &ua, &t),
            Err(AxError::OperationNotPermitted)
        );
        // EPERM
        assert_eq!(syscall_result(file.ioctl(0x1A, ua.ptr(0), &ua, &t)), -1);
    }

    #[test]
    fn test_open_by_cdev() {
        let registry = DeviceRegistry::new();
        registry
            .add_device(FlinkDevice::new(
                Box::new(MockBus::with_two_blocks()),
                FlinkDeviceConfig::new(0, 0x10000),
            ))
            .unwrap();
        let file = FlinkFile::open(&registry, CdevId(0)).unwrap();
        assert_eq!(file.current_subdevice(), None);
        file.close();
        assert_eq!(
            FlinkFile::open(&registry, CdevId(3)).unwrap_err(),
            AxError::NotFound
        );
    }

    #[test]
    fn test_syscall_result() {
        assert_eq!(syscall_result(Ok(36)), 36);
        assert_eq!(syscall_result(Err(AxError::InvalidInput)), -22);
        assert_eq!(syscall_result(Err(AxError::OperationNotPermitted)), -1);
        assert_eq!(syscall_result(Err(AxError::NoMemory)), -12);
    }
}
