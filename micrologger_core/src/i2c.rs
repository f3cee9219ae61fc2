//! Connection lifecycle shared by every I2C peripheral.
//!
//! An `I2cLink` owns the address, status, error and counters of one device.
//! Device drivers implement [`I2cDevice`] to supply their `read`/`write`
//! transactions; the trait's `dispatch` and `poll` provide the common
//! connect / retry / error semantics on top.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use micrologger_traits::{BusFault, Clock, I2cBus};
use tracing::{debug, warn};

use crate::error::I2cError;
use crate::timer::Timer;

/// The bus shared by all peripherals; each transaction holds the lock for
/// exactly its duration.
pub type SharedBus = Arc<Mutex<dyn I2cBus + Send>>;

/// Clock shared by links and the scheduler.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Connect,
    Disconnect,
    Read,
    Write,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkCounters {
    pub connections: u32,
    pub reads: u32,
    pub writes: u32,
    pub errors: u32,
    pub connect_errors: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub max_response: Duration,
    pub poll_interval_ms: u64,
    pub auto_connect: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            max_response: Duration::from_millis(200),
            poll_interval_ms: 1000,
            auto_connect: true,
        }
    }
}

/// Point-in-time view of one link, for health reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHealth {
    pub name: &'static str,
    pub address: u8,
    pub status: LinkStatus,
    pub error: Option<I2cError>,
    pub counters: LinkCounters,
}

pub struct I2cLink {
    bus: SharedBus,
    clock: SharedClock,
    address: u8,
    name: &'static str,
    status: LinkStatus,
    error: Option<I2cError>,
    counters: LinkCounters,
    settings: LinkSettings,
    poll: Timer,
}

impl std::fmt::Debug for I2cLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cLink")
            .field("name", &self.name)
            .field("address", &format_args!("0x{:02x}", self.address))
            .field("status", &self.status)
            .field("error", &self.error)
            .field("counters", &self.counters)
            .finish()
    }
}

impl I2cLink {
    pub fn new(
        bus: SharedBus,
        clock: SharedClock,
        address: u8,
        name: &'static str,
        settings: LinkSettings,
    ) -> Self {
        Self {
            bus,
            clock,
            address,
            name,
            status: LinkStatus::Disconnected,
            error: None,
            counters: LinkCounters::default(),
            settings,
            poll: Timer::armed_at(0),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == LinkStatus::Connected
    }

    pub fn error(&self) -> Option<I2cError> {
        self.error
    }

    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    pub fn health(&self) -> DeviceHealth {
        DeviceHealth {
            name: self.name,
            address: self.address,
            status: self.status,
            error: self.error,
            counters: self.counters,
        }
    }

    pub fn auto_connect(&self) -> bool {
        self.settings.auto_connect
    }

    pub fn set_auto_connect(&mut self, on: bool, now_ms: u64) {
        self.settings.auto_connect = on;
        if on && !self.poll.running() {
            self.poll.start(now_ms, 0);
        }
    }

    /// Run one bus transaction under the bus lock. A fault is reported as
    /// `failure`, unless the bus timed out or the call overran the response
    /// budget, which is `BusDamaged`.
    pub fn transfer<R>(
        &self,
        failure: I2cError,
        f: impl FnOnce(&mut dyn I2cBus, u8) -> Result<R, BusFault>,
    ) -> Result<R, I2cError> {
        let started = self.clock.now();
        let result = {
            let mut guard = self.bus.lock().map_err(|_| I2cError::BusDamaged)?;
            f(&mut *guard, self.address)
        };
        let elapsed = self.clock.now().saturating_duration_since(started);
        match result {
            Err(BusFault::Timeout) => Err(I2cError::BusDamaged),
            _ if elapsed > self.settings.max_response => {
                warn!(
                    device = self.name,
                    address = self.address,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "i2c response over budget"
                );
                Err(I2cError::BusDamaged)
            }
            Err(fault) => {
                debug!(device = self.name, address = self.address, %fault, "i2c transaction failed");
                Err(failure)
            }
            Ok(v) => Ok(v),
        }
    }

    /// Address-only probe.
    pub fn probe(&self) -> Result<(), I2cError> {
        self.transfer(I2cError::FailedConnect, |bus, a| bus.write(a, &[]))
    }

    pub fn disconnect(&mut self) {
        if self.status == LinkStatus::Connected {
            debug!(device = self.name, address = self.address, "i2c disconnected");
        }
        self.status = LinkStatus::Disconnected;
    }

    /// Record a successful `action`: the device is connected and any error
    /// is cleared.
    pub fn succeeded(&mut self, action: LinkAction) {
        match action {
            LinkAction::Connect => self.counters.connections += 1,
            LinkAction::Read => self.counters.reads += 1,
            LinkAction::Write => self.counters.writes += 1,
            LinkAction::Disconnect => return,
        }
        if self.status == LinkStatus::Disconnected {
            debug!(device = self.name, address = self.address, "i2c connected");
        }
        self.status = LinkStatus::Connected;
        self.error = None;
    }

    /// Record a failed `action`. Returns true when the failure tore the
    /// connection down.
    pub fn failed(&mut self, action: LinkAction, error: I2cError) -> bool {
        self.counters.errors += 1;
        if action == LinkAction::Connect {
            self.counters.connect_errors += 1;
        }
        if self.error != Some(error) {
            warn!(device = self.name, address = self.address, %error, "i2c error");
        }
        self.error = Some(error);
        if error.disconnects() {
            self.disconnect();
            true
        } else {
            false
        }
    }

    /// True when the auto-connect poll is due.
    pub fn poll_due(&mut self, now_ms: u64) -> bool {
        self.settings.auto_connect && self.poll.fire_periodic(now_ms, self.settings.poll_interval_ms)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        if self.settings.auto_connect {
            self.poll.deadline()
        } else {
            None
        }
    }
}

/// A peripheral on top of an [`I2cLink`].
pub trait I2cDevice {
    fn link(&self) -> &I2cLink;
    fn link_mut(&mut self) -> &mut I2cLink;

    /// Push the driver's desired state to the chip.
    fn write(&mut self) -> Result<(), I2cError>;

    /// Refresh the driver's view of the chip; doubles as a liveness probe.
    fn read(&mut self) -> Result<(), I2cError>;

    /// Forget the chip-side state after a disconnect; the chip may have
    /// power-cycled.
    fn reset(&mut self) {}

    /// Whether the chip is known to hold the desired state.
    fn in_sync(&self) -> bool {
        true
    }

    /// Run `action`, updating counters, status and error. Reads and writes
    /// on a disconnected device reconnect first.
    fn dispatch(&mut self, action: LinkAction) -> Result<(), I2cError> {
        if matches!(action, LinkAction::Read | LinkAction::Write) && !self.link().is_connected() {
            self.dispatch(LinkAction::Connect)?;
        }
        let outcome = match action {
            LinkAction::Connect => self.link().probe(),
            LinkAction::Disconnect => {
                self.link_mut().disconnect();
                self.reset();
                return Ok(());
            }
            LinkAction::Read => self.read(),
            LinkAction::Write => self.write(),
        };
        match outcome {
            Ok(()) => {
                self.link_mut().succeeded(action);
                Ok(())
            }
            Err(e) => {
                if self.link_mut().failed(action, e) {
                    self.reset();
                }
                Err(e)
            }
        }
    }

    fn connect(&mut self) -> Result<(), I2cError> {
        self.dispatch(LinkAction::Connect)
    }

    /// Tear down and connect again.
    fn reconnect(&mut self) -> Result<(), I2cError> {
        self.dispatch(LinkAction::Disconnect)?;
        self.dispatch(LinkAction::Connect)?;
        self.sync()
    }

    /// Write the desired state if the chip is not known to hold it.
    fn sync(&mut self) -> Result<(), I2cError> {
        if self.in_sync() {
            Ok(())
        } else {
            self.dispatch(LinkAction::Write)
        }
    }

    /// Auto-connect poll: reconnect (and resync) when disconnected, probe
    /// with a read when connected.
    fn poll(&mut self, now_ms: u64) {
        if !self.link_mut().poll_due(now_ms) {
            return;
        }
        let result = if self.link().is_connected() {
            self.dispatch(LinkAction::Read).and_then(|()| self.sync())
        } else {
            self.dispatch(LinkAction::Connect).and_then(|()| self.sync())
        };
        if let Err(e) = result {
            debug!(device = self.link().name(), error = %e, "i2c poll failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micrologger_hardware::{SimBus, SimDevice};
    use micrologger_traits::ManualClock;

    struct Probe {
        link: I2cLink,
        resets: u32,
    }

    impl I2cDevice for Probe {
        fn link(&self) -> &I2cLink {
            &self.link
        }
        fn link_mut(&mut self) -> &mut I2cLink {
            &mut self.link
        }
        fn write(&mut self) -> Result<(), I2cError> {
            self.link.transfer(I2cError::FailedWrite, |bus, a| bus.write(a, &[0]))
        }
        fn read(&mut self) -> Result<(), I2cError> {
            let mut b = [0u8];
            self.link.transfer(I2cError::FailedRead, |bus, a| bus.read(a, &mut b))
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn setup() -> (Arc<Mutex<SimBus>>, ManualClock, Probe) {
        let bus = Arc::new(Mutex::new(SimBus::new().with_device(0x2E, SimDevice::rheostat(0x7F))));
        let clock = ManualClock::new();
        let link = I2cLink::new(
            bus.clone(),
            Arc::new(clock.clone()),
            0x2E,
            "probe",
            LinkSettings::default(),
        );
        (bus, clock, Probe { link, resets: 0 })
    }

    #[test]
    fn nack_on_connect_is_failed_connect() {
        let (bus, _clock, mut dev) = setup();
        bus.lock().unwrap().inject_fault(0x2E, BusFault::Nack);
        assert_eq!(dev.connect(), Err(I2cError::FailedConnect));
        assert_eq!(dev.link().status(), LinkStatus::Disconnected);
        assert_eq!(dev.link().counters().connect_errors, 1);
        assert_eq!(dev.resets, 1);
        dev.connect().unwrap();
        assert_eq!(dev.link().error(), None);
        assert_eq!(dev.link().counters().connections, 1);
    }

    #[test]
    fn slow_response_is_bus_damaged() {
        let (bus, clock, mut dev) = setup();
        bus.lock().unwrap().set_latency(clock.clone(), Duration::from_millis(250));
        assert_eq!(dev.connect(), Err(I2cError::BusDamaged));
        bus.lock().unwrap().set_latency(clock, Duration::from_millis(150));
        assert!(dev.connect().is_ok());
    }

    #[test]
    fn read_on_disconnected_device_connects_first() {
        let (_bus, _clock, mut dev) = setup();
        dev.dispatch(LinkAction::Read).unwrap();
        let c = dev.link().counters();
        assert_eq!((c.connections, c.reads), (1, 1));
        assert!(dev.link().is_connected());
    }

    #[test]
    fn failed_write_disconnects_and_resets() {
        let (bus, _clock, mut dev) = setup();
        dev.connect().unwrap();
        bus.lock().unwrap().inject_fault(0x2E, BusFault::Nack);
        assert_eq!(dev.dispatch(LinkAction::Write), Err(I2cError::FailedWrite));
        assert!(!dev.link().is_connected());
        assert_eq!(dev.resets, 1);
        assert_eq!(dev.link().counters().errors, 1);
    }

    #[test]
    fn check_mismatch_keeps_connection() {
        let (_bus, _clock, mut dev) = setup();
        dev.connect().unwrap();
        assert!(!dev.link_mut().failed(LinkAction::Write, I2cError::FailedCheck));
        assert!(dev.link().is_connected());
        assert_eq!(dev.link().error(), Some(I2cError::FailedCheck));
    }

    #[test]
    fn poll_runs_on_interval_only() {
        let (bus, clock, mut dev) = setup();
        dev.poll(0);
        assert!(dev.link().is_connected());
        let before = bus.lock().unwrap().transactions();
        dev.poll(500);
        assert_eq!(bus.lock().unwrap().transactions(), before);
        clock.advance_ms(1000);
        dev.poll(1000);
        assert_eq!(dev.link().counters().reads, 1);
        dev.link_mut().set_auto_connect(false, 1000);
        dev.poll(5000);
        assert_eq!(dev.link().counters().reads, 1);
        assert_eq!(dev.link().next_deadline(), None);
    }
}
