//! I2C transport contract.
//!
//! Controllers never talk to the bus directly. They go through an
//! [`I2cRegisterDevice`], which owns the read/write buffers, arming state and
//! keep-alive traffic for one device on one port. Implementations must perform
//! each call as a complete register transaction.

use std::time::{Duration, Instant};

/// Failure reported by an [`I2cRegisterDevice`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The device did not acknowledge an access to the register.
    #[error("device did not acknowledge register {0:#04x}")]
    Nack(u8),
    /// The transaction did not complete in time.
    #[error("transport timed out")]
    Timeout,
    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,
    /// Any other I/O failure.
    #[error("transport I/O failure: {0}")]
    Io(String),
}

/// An I2C device address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct I2cAddr(u8);

impl I2cAddr {
    /// Creates an address from its 7-bit form.
    #[must_use]
    pub const fn create_7bit(addr: u8) -> Self {
        Self(addr & 0x7F)
    }

    /// Creates an address from its 8-bit (shifted) form.
    #[must_use]
    pub const fn create_8bit(addr: u8) -> Self {
        Self(addr >> 1)
    }

    /// The 7-bit address.
    #[must_use]
    pub const fn get_7bit(self) -> u8 {
        self.0
    }

    /// The 8-bit (shifted) address.
    #[must_use]
    pub const fn get_8bit(self) -> u8 {
        self.0 << 1
    }
}

/// How a transport should service a read window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// Read the window once, then stop.
    OnlyOnce,
    /// Re-read only when a read is requested, avoiding needless
    /// switches between read and write mode.
    Balanced,
    /// Read the window continuously.
    Repeat,
}

/// A contiguous block of registers a transport keeps cached for reading.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadWindow {
    /// First register of the window.
    pub ireg_first: u8,
    /// Number of registers.
    pub creg: u8,
    /// Servicing policy.
    pub mode: ReadMode,
}

impl ReadWindow {
    /// Creates a window over `creg` registers starting at `ireg_first`.
    #[must_use]
    pub const fn new(ireg_first: u8, creg: u8, mode: ReadMode) -> Self {
        Self {
            ireg_first,
            creg,
            mode,
        }
    }

    /// Whether the window covers every register of `[ireg, ireg + creg)`.
    #[must_use]
    pub const fn contains(&self, ireg: u8, creg: u8) -> bool {
        let first = self.ireg_first as u16;
        let max = first + self.creg as u16;
        let ireg = ireg as u16;
        ireg >= first && ireg + creg as u16 <= max
    }
}

/// Keep-alive transaction issued when the bus has been idle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatAction {
    /// Re-issue the most recent write, if there was one.
    pub rewrite_last_written: bool,
    /// Re-read the most recent read window, if there was one.
    pub read_previous: bool,
    /// Fall back to reading this window.
    pub read_window: Option<ReadWindow>,
}

/// Keep-alive configuration for a device that times out when the bus is quiet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// What to send.
    pub action: HeartbeatAction,
    /// Maximum idle time before a heartbeat is due.
    pub interval: Duration,
}

/// Tracks bus activity to decide when a heartbeat is owed.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatTimer {
    interval: Duration,
    last_activity: Instant,
}

impl HeartbeatTimer {
    /// Starts a timer that considers the bus active now.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_activity: Instant::now(),
        }
    }

    /// Records bus activity at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Whether the bus has been idle for at least one interval at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= self.interval
    }

    /// The configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

/// Register-level access to one I2C device.
///
/// Only `read`, `write`, `is_armed`, `engage` and `disengage` are mandatory; the
/// remaining hooks tune transports that support them.
pub trait I2cRegisterDevice {
    /// Reads `buffer.len()` registers starting at `ireg`.
    ///
    /// # Errors
    /// Returns a `TransportError` if the transaction fails.
    fn read(&mut self, ireg: u8, buffer: &mut [u8]) -> Result<(), TransportError>;

    /// Writes `data` to consecutive registers starting at `ireg`.
    ///
    /// # Errors
    /// Returns a `TransportError` if the transaction fails.
    fn write(&mut self, ireg: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Whether the device is connected and communicating.
    fn is_armed(&self) -> bool;

    /// Attaches the transport to its port.
    fn engage(&mut self);

    /// Detaches the transport from its port.
    fn disengage(&mut self);

    /// Reads a single register.
    ///
    /// # Errors
    /// Returns a `TransportError` if the transaction fails.
    fn read8(&mut self, ireg: u8) -> Result<u8, TransportError> {
        let mut buffer = [0u8; 1];
        self.read(ireg, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Writes a single register.
    ///
    /// # Errors
    /// Returns a `TransportError` if the transaction fails.
    fn write8(&mut self, ireg: u8, value: u8) -> Result<(), TransportError> {
        self.write(ireg, &[value])
    }

    /// Points the transport at the controller's bus address.
    fn set_i2c_address(&mut self, _addr: I2cAddr) {}

    /// Configures keep-alive traffic.
    fn set_heartbeat(&mut self, _heartbeat: Heartbeat) {}

    /// Configures the register block cached for reads.
    fn set_read_window(&mut self, _window: ReadWindow) {}

    /// Allows adjacent queued writes to be merged into one transaction.
    fn enable_write_coalescing(&mut self, _enable: bool) {}

    /// Blocks until all queued writes have reached the device.
    ///
    /// # Errors
    /// Returns a `TransportError` if a queued write failed.
    fn wait_for_write_completions(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Releases the transport.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i2c_addr_forms() {
        let addr = I2cAddr::create_8bit(0x02);
        assert_eq!(addr.get_7bit(), 0x01);
        assert_eq!(addr.get_8bit(), 0x02);
        assert_eq!(I2cAddr::create_7bit(0x01), addr);
    }

    #[test]
    fn test_read_window_contains() {
        let window = ReadWindow::new(0x40, 0x16, ReadMode::Balanced);
        assert!(window.contains(0x40, 1));
        assert!(window.contains(0x54, 2));
        assert!(!window.contains(0x55, 2));
        assert!(!window.contains(0x3F, 1));
    }

    #[test]
    fn test_heartbeat_timer() {
        let start = Instant::now();
        let mut timer = HeartbeatTimer::new(Duration::from_millis(100));
        timer.touch(start);
        assert!(!timer.is_due(start + Duration::from_millis(99)));
        assert!(timer.is_due(start + Duration::from_millis(100)));
        timer.touch(start + Duration::from_millis(150));
        assert!(!timer.is_due(start + Duration::from_millis(200)));
        // a clock reading before the last activity is never due
        assert!(!timer.is_due(start));
    }
}
