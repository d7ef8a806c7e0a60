//! Engagement and hooking shared by the legacy controllers.
//!
//! A controller is *engaged* when the user wants it connected to its device
//! and *hooked* when it actually is. Hooking follows engagement whenever the
//! transport is armed; disarming the transport unhooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use crate::Result;
use crate::config::ControllerConfig;
use crate::device::DeviceKind;
use crate::transport::{
    Heartbeat, HeartbeatAction, I2cRegisterDevice, ReadMode, ReadWindow, TransportError,
};

/// Cross-thread request to abandon a blocking wait.
///
/// The flag is sticky: it stays raised until [`clear`](Self::clear) so the
/// interrupted caller can observe it after the wait returns.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Raises the flag.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag is raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lowers the flag.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a polling wait ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition became true.
    Arrived,
    /// The transport disarmed; the device is gone.
    Disarmed,
    /// The controller was disengaged; its I/O no longer reaches the device.
    Disengaged,
    /// Another thread raised the [`Interrupt`].
    Interrupted,
    /// The configured timeout elapsed.
    TimedOut,
}

impl WaitOutcome {
    /// Whether the condition was actually reached.
    #[must_use]
    pub const fn arrived(self) -> bool {
        matches!(self, Self::Arrived)
    }
}

/// A transport together with the engagement state of its controller.
#[derive(Debug)]
pub(crate) struct Link<B> {
    bus: B,
    engaged: bool,
    hooked: bool,
    hardware_initialized: bool,
    interrupt: Interrupt,
}

impl<B: I2cRegisterDevice> Link<B> {
    pub(crate) fn new(bus: B) -> Self {
        Self {
            bus,
            // engaged from the start for compatibility with controllers that never call engage()
            engaged: true,
            hooked: false,
            hardware_initialized: false,
            interrupt: Interrupt::default(),
        }
    }

    pub(crate) fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.bus.is_armed()
    }

    pub(crate) const fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub(crate) const fn is_hooked(&self) -> bool {
        self.hooked
    }

    pub(crate) fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Writes one register unless the controller is disengaged.
    pub(crate) fn write8(&mut self, ireg: u8, value: u8) -> Result<()> {
        if self.engaged {
            trace!(ireg, value, "write8");
            self.bus.write8(ireg, value)?;
        }
        Ok(())
    }

    /// Writes a register block unless the controller is disengaged.
    pub(crate) fn write(&mut self, ireg: u8, data: &[u8]) -> Result<()> {
        if self.engaged {
            trace!(ireg, ?data, "write");
            self.bus.write(ireg, data)?;
        }
        Ok(())
    }

    /// Reads one register, or 0 when disengaged.
    pub(crate) fn read8(&mut self, ireg: u8) -> Result<u8> {
        if self.engaged {
            Ok(self.bus.read8(ireg)?)
        } else {
            Ok(0)
        }
    }

    /// Reads a register block, or zeros when disengaged.
    pub(crate) fn read(&mut self, ireg: u8, buffer: &mut [u8]) -> Result<()> {
        if self.engaged {
            self.bus.read(ireg, buffer)?;
        } else {
            buffer.fill(0);
        }
        Ok(())
    }

    /// Polls `arrived` until it reports true.
    ///
    /// Gives up early when the transport disarms, the controller is
    /// disengaged, the interrupt is raised or the configured timeout expires.
    /// Between polls the thread yields, or sleeps if a poll interval is
    /// configured. Transport errors from the predicate propagate.
    pub(crate) fn wait_until<F>(
        &mut self,
        config: &ControllerConfig,
        mut arrived: F,
    ) -> core::result::Result<WaitOutcome, TransportError>
    where
        F: FnMut(&mut B) -> core::result::Result<bool, TransportError>,
    {
        let deadline = config.mode_switch_timeout.map(|t| Instant::now() + t);
        loop {
            if !self.bus.is_armed() {
                return Ok(WaitOutcome::Disarmed);
            }
            if !self.engaged {
                return Ok(WaitOutcome::Disengaged);
            }
            if self.interrupt.is_interrupted() {
                return Ok(WaitOutcome::Interrupted);
            }
            if arrived(&mut self.bus)? {
                return Ok(WaitOutcome::Arrived);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(WaitOutcome::TimedOut);
            }
            match config.poll_interval {
                Some(interval) => thread::sleep(interval),
                None => thread::yield_now(),
            }
        }
    }
}

/// Applies the address, keep-alive, read window and write coalescing a
/// controller of `kind` needs from its transport.
pub(crate) fn configure_transport<B: I2cRegisterDevice>(bus: &mut B, kind: DeviceKind) {
    let info = kind.info();
    debug!(
        device = info.name,
        addr = info.i2c_addr.get_8bit(),
        "configuring transport"
    );
    bus.set_i2c_address(info.i2c_addr);
    bus.set_heartbeat(Heartbeat {
        action: HeartbeatAction {
            rewrite_last_written: true,
            read_previous: true,
            read_window: Some(ReadWindow::new(
                info.heartbeat_register,
                1,
                ReadMode::OnlyOnce,
            )),
        },
        interval: info.heartbeat_interval,
    });
    bus.enable_write_coalescing(true);
    bus.set_read_window(info.read_window);
}

/// Lifecycle shared by the motor and servo controllers.
///
/// Implementors supply the device-specific hook, unhook and hardware
/// initialisation steps; the provided methods keep hooking in line with
/// engagement and arming.
pub(crate) trait LegacyController {
    type Bus: I2cRegisterDevice;

    fn link(&mut self) -> &mut Link<Self::Bus>;

    fn do_hook(&mut self);

    fn do_unhook(&mut self);

    fn initialize_hardware(&mut self) -> Result<()>;

    fn float_hardware(&mut self) -> Result<()>;

    fn engage(&mut self) -> Result<()> {
        debug!("engage");
        self.link().engaged = true;
        self.adjust_hooking_to_match_engagement()
    }

    fn disengage(&mut self) -> Result<()> {
        debug!("disengage");
        self.link().engaged = false;
        self.adjust_hooking_to_match_engagement()
    }

    /// Called once construction is complete, and whenever the transport arms.
    fn controller_now_armed(&mut self) -> Result<()> {
        if self.link().is_armed() {
            self.adjust_hooking_to_match_engagement()
        } else {
            Ok(())
        }
    }

    fn controller_now_disarmed(&mut self) {
        if self.link().hooked {
            self.unhook();
        }
    }

    fn adjust_hooking_to_match_engagement(&mut self) -> Result<()> {
        let (hooked, engaged) = {
            let link = self.link();
            (link.hooked, link.engaged)
        };
        if !hooked && engaged {
            self.hook()?;
        } else if hooked && !engaged {
            self.unhook();
        }
        Ok(())
    }

    fn hook(&mut self) -> Result<()> {
        debug!("hook");
        self.do_hook();
        self.link().hooked = true;
        self.initialize_hardware_if_necessary()
    }

    fn unhook(&mut self) {
        debug!("unhook");
        self.do_unhook();
        self.link().hooked = false;
    }

    fn initialize_hardware_if_necessary(&mut self) -> Result<()> {
        let link = self.link();
        if !link.hardware_initialized && link.is_armed() {
            link.hardware_initialized = true;
            self.initialize_hardware()?;
        }
        Ok(())
    }

    /// Stops the outputs, lets go of the device and closes the transport.
    fn close(&mut self) -> Result<()> {
        if self.link().engaged {
            self.float_hardware()?;
            self.disengage()?;
        }
        self.link().bus.close();
        Ok(())
    }
}
