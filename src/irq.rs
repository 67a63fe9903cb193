//! FPGA interrupt routing.
//!
//! Each device owns one [`IrqRecord`] per FPGA IRQ line. A record holds the
//! set of user tasks subscribed to the line; when the host delivers the line
//! the dispatcher posts the record's signal number to every subscriber.
//!
//! ```text
//!  host IRQ line (irq_offset + n)
//!        │
//!        ▼
//! ┌─────────────┐  handle_irq()   ┌─────────────┐  send_signal(signal_offset + n)
//! │  IrqTable   │ ──────────────> │ IrqRecord n │ ─────────────────────────────> tasks
//! └─────────────┘                 └─────────────┘
//! ```
//!
//! # Locking
//!
//! A record has two exclusions:
//! - `subscribers` is the IRQ-time lock. The dispatcher takes only this one.
//!   Request context takes it only with local interrupts masked (see
//!   [`IrqHost::local_irq_save`]), so the dispatcher can never interrupt a
//!   holder on the same CPU. It is held just long enough to swap in a
//!   prepared list, so nothing is ever allocated while it is held.
//! - `ioctl_lock` serialises subscribe/unsubscribe against each other. Both
//!   locks are held to mutate the list.
//!
//! The dispatcher never blocks, never allocates and never touches
//! `ioctl_lock`.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use axerrno::{ax_err, ax_err_type, AxResult};
use spin::Mutex;

use crate::config::FlinkDeviceConfig;

/// Identifier of a user-space process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

/// A user-space process that can receive asynchronous notifications.
///
/// Records keep only weak references. The dispatcher upgrades them for the
/// duration of a delivery, so if a task's last strong reference goes away
/// concurrently its destructor may run in IRQ context. Hosts must call
/// [`FlinkDevice::release_task`](crate::FlinkDevice::release_task) (or the
/// registry's) before dropping the final reference of an exiting process.
pub trait UserTask: Send + Sync {
    fn pid(&self) -> Pid;

    /// Queues `signal` for delivery to the process.
    ///
    /// Called from IRQ context: must not block or allocate.
    fn send_signal(&self, signal: u32);
}

/// Host interrupt controller glue.
///
/// After a successful `request_irq` the host calls
/// [`FlinkDevice::handle_irq`](crate::FlinkDevice::handle_irq) whenever the
/// line fires and keeps the line masked until it returns.
pub trait IrqHost: Send + Sync {
    fn request_irq(&self, line: u32) -> AxResult;
    fn free_irq(&self, line: u32);

    /// Masks interrupts on the local CPU and returns the previous state.
    ///
    /// Must nest: a save inside a saved section returns "masked".
    fn local_irq_save(&self) -> usize;

    /// Restores the state returned by the matching
    /// [`local_irq_save`](Self::local_irq_save).
    fn local_irq_restore(&self, flags: usize);
}

/// Local interrupts stay masked while this is alive.
struct IrqSaveGuard<'a> {
    host: &'a dyn IrqHost,
    flags: usize,
}

impl<'a> IrqSaveGuard<'a> {
    fn new(host: &'a dyn IrqHost) -> Self {
        let flags = host.local_irq_save();
        Self { host, flags }
    }
}

impl Drop for IrqSaveGuard<'_> {
    fn drop(&mut self) {
        self.host.local_irq_restore(self.flags);
    }
}

/// Result of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The line did not belong to this record, or nobody listens.
    None,
    /// Every subscriber has been notified.
    Handled,
}

#[derive(Clone)]
struct Subscriber {
    pid: Pid,
    task: Weak<dyn UserTask>,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "irq-debug")] {
        #[inline(always)]
        fn trace_dispatch(line: u32, signal: u32, subscribers: usize) {
            trace!("IRQ {} -> signal {} to {} task(s)", line, signal, subscribers);
        }
    } else {
        #[inline(always)]
        fn trace_dispatch(_line: u32, _signal: u32, _subscribers: usize) {}
    }
}

/// Subscription state of one FPGA IRQ line.
///
/// Idle while `signal_count == 0`, bound otherwise.
pub struct IrqRecord {
    irq_nr: u32,
    irq_nr_with_offset: u32,
    signal_nr_with_offset: u32,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Always equals `subscribers.len()`; written only under `subscribers`.
    signal_count: AtomicU32,
    ioctl_lock: Mutex<()>,
    dispatched: AtomicU64,
    host: Arc<dyn IrqHost>,
}

impl IrqRecord {
    fn new(irq_nr: u32, irq_offset: u32, signal_offset: u32, host: Arc<dyn IrqHost>) -> Self {
        Self {
            irq_nr,
            irq_nr_with_offset: irq_offset + irq_nr,
            signal_nr_with_offset: signal_offset + irq_nr,
            subscribers: Mutex::new(Vec::new()),
            signal_count: AtomicU32::new(0),
            ioctl_lock: Mutex::new(()),
            dispatched: AtomicU64::new(0),
            host,
        }
    }

    /// Runs `f` on the subscriber list from request context.
    fn with_subscribers<R>(&self, f: impl FnOnce(&mut Vec<Subscriber>) -> R) -> R {
        let _irq = IrqSaveGuard::new(self.host.as_ref());
        let mut list = self.subscribers.lock();
        f(&mut list)
    }

    #[cfg(test)]
    pub(crate) fn is_list_locked(&self) -> bool {
        self.subscribers.is_locked()
    }

    /// Logical IRQ number.
    #[inline]
    pub fn irq_nr(&self) -> u32 {
        self.irq_nr
    }

    /// Host IRQ line.
    #[inline]
    pub fn irq_nr_with_offset(&self) -> u32 {
        self.irq_nr_with_offset
    }

    /// Signal number delivered to subscribers.
    #[inline]
    pub fn signal_nr_with_offset(&self) -> u32 {
        self.signal_nr_with_offset
    }

    #[inline]
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.signal_count() != 0
    }

    /// Number of dispatches that reached at least one subscriber.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Pids of the current subscribers, in subscription order.
    pub fn subscriber_pids(&self) -> Vec<Pid> {
        self.with_subscribers(|list| list.iter().map(|s| s.pid).collect())
    }

    /// Adds `task` to the subscriber set and returns the signal number it
    /// will receive.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the task's process is already subscribed.
    /// - `NoMemory` if the new list cannot be allocated.
    pub fn subscribe(&self, task: &Arc<dyn UserTask>) -> AxResult<u32> {
        let _serial = self.ioctl_lock.lock();
        let pid = task.pid();

        let len = self.with_subscribers(|list| {
            if list.iter().any(|s| s.pid == pid) {
                None
            } else {
                Some(list.len())
            }
        });
        let Some(len) = len else {
            return ax_err!(InvalidInput, "process already subscribed to this IRQ");
        };

        // Writers are serialised by `ioctl_lock`, so the list cannot change
        // between the check above and the swap below.
        let mut next: Vec<Subscriber> = Vec::new();
        next.try_reserve_exact(len + 1)
            .map_err(|_| ax_err_type!(NoMemory, "subscriber allocation failed"))?;

        let entry = Subscriber {
            pid,
            task: Arc::downgrade(task),
        };
        let old = self.with_subscribers(move |list| {
            next.extend(list.iter().cloned());
            next.push(entry);
            let old = core::mem::replace(list, next);
            self.signal_count.store(list.len() as u32, Ordering::Release);
            old
        });
        drop(old);

        debug!(
            "IRQ {} (line {}): pid {} subscribed, signal {}",
            self.irq_nr, self.irq_nr_with_offset, pid.0, self.signal_nr_with_offset
        );
        Ok(self.signal_nr_with_offset)
    }

    /// Removes the subscription of `pid`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the line is idle or `pid` is not subscribed.
    pub fn unsubscribe(&self, pid: Pid) -> AxResult {
        let _serial = self.ioctl_lock.lock();

        if self.signal_count() == 0 {
            return ax_err!(InvalidInput, "IRQ has no subscribers");
        }
        if !self.detach(pid) {
            return ax_err!(InvalidInput, "process is not subscribed to this IRQ");
        }

        debug!(
            "IRQ {} (line {}): pid {} unsubscribed",
            self.irq_nr, self.irq_nr_with_offset, pid.0
        );
        Ok(())
    }

    /// Drops the subscription of `pid` if there is one. Used when a process
    /// exits without unsubscribing.
    pub fn release(&self, pid: Pid) -> bool {
        let _serial = self.ioctl_lock.lock();
        self.detach(pid)
    }

    /// Caller holds `ioctl_lock`.
    fn detach(&self, pid: Pid) -> bool {
        let removed = self.with_subscribers(|list| {
            let pos = list.iter().position(|s| s.pid == pid)?;
            let removed = list.remove(pos);
            self.signal_count.store(list.len() as u32, Ordering::Release);
            Some(removed)
        });
        removed.is_some()
    }

    /// IRQ-time dispatcher.
    ///
    /// Posts the record's signal to every live subscriber. Tasks that have
    /// already exited are skipped. Runs with the line masked by the host.
    pub fn dispatch(&self, line: u32) -> IrqReturn {
        if line != self.irq_nr_with_offset {
            return IrqReturn::None;
        }

        let subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return IrqReturn::None;
        }

        trace_dispatch(line, self.signal_nr_with_offset, subscribers.len());
        for sub in subscribers.iter() {
            if let Some(task) = sub.task.upgrade() {
                task.send_signal(self.signal_nr_with_offset);
            }
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        IrqReturn::Handled
    }
}

impl core::fmt::Debug for IrqRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqRecord")
            .field("irq_nr", &self.irq_nr)
            .field("irq_nr_with_offset", &self.irq_nr_with_offset)
            .field("signal_nr_with_offset", &self.signal_nr_with_offset)
            .field("signal_count", &self.signal_count())
            .finish()
    }
}

/// The IRQ records of one device, one per logical line, plus the host lines
/// they hold.
///
/// Dropping the table frees every host line before the records go away, so
/// the dispatcher cannot be re-entered on a dead record.
pub struct IrqTable {
    irq_offset: u32,
    signal_offset: u32,
    records: Vec<IrqRecord>,
    host: Arc<dyn IrqHost>,
}

impl IrqTable {
    /// Builds the records for `config` and requests every host line.
    ///
    /// On failure all lines obtained so far are released again.
    pub fn request(config: &FlinkDeviceConfig, host: Arc<dyn IrqHost>) -> AxResult<Self> {
        config.validate()?;
        if !config.irqs_enabled() {
            return ax_err!(InvalidInput, "no IRQ lines configured");
        }

        let mut records = Vec::new();
        records
            .try_reserve_exact(config.nof_irqs as usize)
            .map_err(|_| ax_err_type!(NoMemory, "IRQ table allocation failed"))?;
        for irq_nr in 0..config.nof_irqs {
            records.push(IrqRecord::new(
                irq_nr,
                config.irq_offset,
                config.signal_offset,
                host.clone(),
            ));
        }

        for (n, record) in records.iter().enumerate() {
            if let Err(err) = host.request_irq(record.irq_nr_with_offset) {
                error!(
                    "Failed to request host IRQ {}: {:?}",
                    record.irq_nr_with_offset, err
                );
                for obtained in &records[..n] {
                    host.free_irq(obtained.irq_nr_with_offset);
                }
                return Err(err);
            }
        }

        debug!(
            "Requested {} IRQ line(s) from {}, signals from {}",
            config.nof_irqs, config.irq_offset, config.signal_offset
        );

        Ok(Self {
            irq_offset: config.irq_offset,
            signal_offset: config.signal_offset,
            records,
            host,
        })
    }

    #[inline]
    pub fn nof_irqs(&self) -> u32 {
        self.records.len() as u32
    }

    #[inline]
    pub fn irq_offset(&self) -> u32 {
        self.irq_offset
    }

    #[inline]
    pub fn signal_offset(&self) -> u32 {
        self.signal_offset
    }

    /// Record of logical IRQ `irq_nr`.
    pub fn record(&self, irq_nr: u32) -> AxResult<&IrqRecord> {
        self.records
            .get(irq_nr as usize)
            .ok_or_else(|| ax_err_type!(InvalidInput, "IRQ number out of range"))
    }

    pub fn records(&self) -> &[IrqRecord] {
        &self.records
    }

    /// Subscribes `task` to logical IRQ `irq_nr`. Returns the signal number.
    pub fn register(&self, irq_nr: u32, task: &Arc<dyn UserTask>) -> AxResult<u32> {
        self.record(irq_nr)?.subscribe(task)
    }

    /// Unsubscribes `pid` from logical IRQ `irq_nr`.
    pub fn unregister(&self, irq_nr: u32, pid: Pid) -> AxResult {
        self.record(irq_nr)?.unsubscribe(pid)
    }

    /// Drops every subscription of `pid`. Returns how many were dropped.
    pub fn release_task(&self, pid: Pid) -> usize {
        self.records.iter().filter(|r| r.release(pid)).count()
    }

    /// Routes host line `line` to its record.
    pub fn handle_irq(&self, line: u32) -> IrqReturn {
        match line.checked_sub(self.irq_offset) {
            Some(irq_nr) => match self.records.get(irq_nr as usize) {
                Some(record) => record.dispatch(line),
                None => IrqReturn::None,
            },
            None => IrqReturn::None,
        }
    }
}

impl Drop for IrqTable {
    fn drop(&mut self) {
        for record in &self.records {
            self.host.free_irq(record.irq_nr_with_offset);
        }
        debug!("Freed {} IRQ line(s) from {}", self.records.len(), self.irq_offset);
    }
}

impl core::fmt::Debug for IrqTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqTable")
            .field("nof_irqs", &self.nof_irqs())
            .field("irq_offset", &self.irq_offset)
            .field("signal_offset", &self.signal_offset)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use alloc::sync::{Arc, Weak};
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use axerrno::{ax_err, AxResult};
    use spin::Mutex;

    use super::{IrqHost, IrqReturn, IrqTable, Pid, UserTask};

    pub struct MockTask {
        pub pid: Pid,
        pub signals: Mutex<Vec<u32>>,
    }

    impl MockTask {
        pub fn new(pid: u32) -> Self {
            Self {
                pid: Pid(pid),
                signals: Mutex::new(Vec::new()),
            }
        }

        pub fn received(&self) -> Vec<u32> {
            self.signals.lock().clone()
        }
    }

    impl UserTask for MockTask {
        fn pid(&self) -> Pid {
            self.pid
        }

        fn send_signal(&self, signal: u32) {
            self.signals.lock().push(signal);
        }
    }

    /// Single-CPU interrupt controller.
    ///
    /// Lines raised while local interrupts are masked stay pending until the
    /// matching restore.
    #[derive(Default)]
    pub struct MockIrqHost {
        pub requested: Mutex<Vec<u32>>,
        pub freed: Mutex<Vec<u32>>,
        pub fail_line: Option<u32>,
        pub masked: AtomicBool,
        pub saves: AtomicUsize,
        /// Raised on every `local_irq_save`, i.e. inside the critical section.
        pub raise_on_save: Option<u32>,
        pub pending: Mutex<Vec<u32>>,
        pub delivered: Mutex<Vec<(u32, IrqReturn)>>,
        table: Mutex<Option<Weak<IrqTable>>>,
    }

    impl MockIrqHost {
        pub fn failing_at(line: u32) -> Self {
            Self {
                fail_line: Some(line),
                ..Self::default()
            }
        }

        pub fn raising_on_save(line: u32) -> Self {
            Self {
                raise_on_save: Some(line),
                ..Self::default()
            }
        }

        /// Routes delivered lines to `table`.
        pub fn attach(&self, table: &Arc<IrqTable>) {
            *self.table.lock() = Some(Arc::downgrade(table));
        }

        pub fn raise(&self, line: u32) {
            if self.masked.load(Ordering::SeqCst) {
                self.pending.lock().push(line);
            } else {
                self.deliver(line);
            }
        }

        fn deliver(&self, line: u32) {
            let table = self.table.lock().clone();
            let Some(table) = table.and_then(|t| t.upgrade()) else {
                return;
            };
            // On a real CPU this would spin forever.
            assert!(
                table.records().iter().all(|r| !r.is_list_locked()),
                "IRQ {} delivered while a subscriber list is held",
                line
            );
            let ret = table.handle_irq(line);
            self.delivered.lock().push((line, ret));
        }
    }

    impl IrqHost for MockIrqHost {
        fn request_irq(&self, line: u32) -> AxResult {
            if self.fail_line == Some(line) {
                return ax_err!(ResourceBusy, "line in use");
            }
            self.requested.lock().push(line);
            Ok(())
        }

        fn free_irq(&self, line: u32) {
            self.freed.lock().push(line);
        }

        fn local_irq_save(&self) -> usize {
            let was_masked = self.masked.swap(true, Ordering::SeqCst);
            self.saves.fetch_add(1, Ordering::SeqCst);
            if let Some(line) = self.raise_on_save {
                self.raise(line);
            }
            was_masked as usize
        }

        fn local_irq_restore(&self, flags: usize) {
            if flags != 0 {
                return;
            }
            self.masked.store(false, Ordering::SeqCst);
            let pending = core::mem::take(&mut *self.pending.lock());
            for line in pending {
                self.deliver(line);
            }
        }
    }
}
