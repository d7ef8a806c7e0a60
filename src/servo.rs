//! HiTechnic NXT servo controller.
//!
//! Six position channels share a single PWM enable register. Setting a
//! position turns PWM on; disabling PWM invalidates every commanded position
//! so the next command is always written.

use parking_lot::Mutex;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::controller::{Interrupt, LegacyController, Link, configure_transport};
use crate::device::{DeviceInfo, DeviceKind};
use crate::enums::PwmStatus;
use crate::helpers::{servo_position_from_byte, servo_position_to_byte};
use crate::last_known::LastKnown;
use crate::transport::I2cRegisterDevice;
use crate::{Error, Result};

const SERVO_INFO: &DeviceInfo = DeviceKind::NxtServoController.info();

/// First valid servo channel.
pub const SERVO_FIRST: u8 = SERVO_INFO.first_channel;
/// Last valid servo channel.
pub const SERVO_LAST: u8 = SERVO_INFO.last_channel;
const SERVO_MAX: usize = SERVO_LAST as usize + 1;

/// Register map. Index 0 is unused so channels index directly.
pub mod reg {
    /// Position byte per channel.
    pub const SERVO_POSITION: [u8; 7] = [0, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47];
    /// PWM control register.
    pub const PWM: u8 = 0x48;

    /// Drive the servos; the controller times out without bus traffic.
    pub const PWM_ENABLE: u8 = 0x00;
    /// Drive the servos with the controller's timeout disabled.
    pub const PWM_ENABLE_WITHOUT_TIMEOUT: u8 = 0xAA;
    /// Stop driving the servos.
    pub const PWM_DISABLE: u8 = 0xFF;
}

#[derive(Debug)]
struct ServoState<B> {
    link: Link<B>,
    commanded_positions: [LastKnown<u8>; SERVO_MAX],
    last_known_pwm_enabled: LastKnown<bool>,
}

/// Driver for one HiTechnic NXT servo controller.
#[derive(Debug)]
pub struct ServoController<B> {
    state: Mutex<ServoState<B>>,
}

fn validate_servo(servo: u8) -> Result<usize> {
    if (SERVO_FIRST..=SERVO_LAST).contains(&servo) {
        Ok(usize::from(servo))
    } else {
        Err(Error::InvalidChannel {
            kind: SERVO_INFO.channel_kind,
            channel: servo,
            first: SERVO_FIRST,
            last: SERVO_LAST,
        })
    }
}

impl<B: I2cRegisterDevice> ServoController<B> {
    /// Wraps `bus`, configures its keep-alive and read window, and hooks to
    /// the device if the transport is already armed.
    ///
    /// # Errors
    /// Returns a transport error if initialising the hardware fails.
    pub fn new(mut bus: B, config: ControllerConfig) -> Result<Self> {
        configure_transport(&mut bus, DeviceKind::NxtServoController);
        let mut state = ServoState {
            link: Link::new(bus),
            commanded_positions: core::array::from_fn(|_| {
                LastKnown::with_freshness(config.cache_freshness)
            }),
            last_known_pwm_enabled: LastKnown::with_freshness(config.cache_freshness),
        };
        state.controller_now_armed()?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Static description of this controller.
    #[must_use]
    pub const fn device_kind(&self) -> DeviceKind {
        DeviceKind::NxtServoController
    }

    /// Handle shared with the controller's waits. The servo controller never
    /// blocks, so raising it only affects code sharing the handle.
    #[must_use]
    pub fn interrupt_handle(&self) -> Interrupt {
        self.state.lock().link.interrupt().clone()
    }

    /// Asks for the controller to be connected to its device.
    ///
    /// # Errors
    /// Returns a transport error if initialising the hardware fails.
    pub fn engage(&self) -> Result<()> {
        self.state.lock().engage()
    }

    /// Asks for the controller to be detached from its device.
    ///
    /// # Errors
    /// Returns a transport error from the detach sequence.
    pub fn disengage(&self) -> Result<()> {
        self.state.lock().disengage()
    }

    /// Whether the user wants the controller connected.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.state.lock().link.is_engaged()
    }

    /// Whether the controller is presently connected.
    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.state.lock().link.is_hooked()
    }

    /// Notifies the controller that its transport armed.
    ///
    /// # Errors
    /// Returns a transport error if initialising the hardware fails.
    pub fn on_armed(&self) -> Result<()> {
        self.state.lock().controller_now_armed()
    }

    /// Notifies the controller that its transport disarmed.
    pub fn on_disarmed(&self) {
        self.state.lock().controller_now_disarmed();
    }

    /// Disables PWM, detaches and closes the transport.
    ///
    /// # Errors
    /// Returns a transport error if disabling PWM fails.
    pub fn close(&self) -> Result<()> {
        self.state.lock().close()
    }

    /// Releases the servos before a new program runs.
    ///
    /// # Errors
    /// Returns a transport error if disabling PWM fails.
    pub fn reset_device_configuration_for_op_mode(&self) -> Result<()> {
        self.state.lock().float_hardware()
    }

    /// Turns on the servo outputs.
    ///
    /// # Errors
    /// Returns a transport error if the write fails.
    pub fn pwm_enable(&self) -> Result<()> {
        self.state.lock().pwm_enable()
    }

    /// Turns off the servo outputs.
    ///
    /// # Errors
    /// Returns a transport error if the write fails.
    pub fn pwm_disable(&self) -> Result<()> {
        self.state.lock().pwm_disable()
    }

    /// PWM state as reported by the controller.
    ///
    /// # Errors
    /// Returns a transport error if the read fails.
    pub fn pwm_status(&self) -> Result<PwmStatus> {
        let b = self.state.lock().link.read8(reg::PWM)?;
        Ok(PwmStatus::from_byte(b))
    }

    /// Commands a position in `[0.0, 1.0]`; out-of-range values are clipped.
    /// Enables PWM when the command changes.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel`, `Error::InvalidPosition` for NaN or
    /// infinite positions, or a transport error.
    pub fn set_servo_position(&self, servo: u8, position: f64) -> Result<()> {
        let s = validate_servo(servo)?;
        let b_position = servo_position_to_byte(position)?;

        let mut state = self.state.lock();
        if state.commanded_positions[s].is_value(&b_position) {
            return Ok(());
        }
        state.link.write8(reg::SERVO_POSITION[s], b_position)?;
        state.pwm_enable()?;
        // recorded only once the device has both the position and PWM
        state.commanded_positions[s].set_value(Some(b_position));
        Ok(())
    }

    /// The last commanded position, or `None` if the channel was never
    /// commanded. Never touches the hardware.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel.
    pub fn servo_position(&self, servo: u8) -> Result<Option<f64>> {
        let s = validate_servo(servo)?;
        let state = self.state.lock();
        Ok(state.commanded_positions[s]
            .raw_value()
            .map(servo_position_from_byte))
    }
}

impl<B: I2cRegisterDevice> ServoState<B> {
    fn pwm_enable(&mut self) -> Result<()> {
        if self.last_known_pwm_enabled.is_value(&true) {
            return Ok(());
        }
        debug!("pwm enable");
        self.link.write8(reg::PWM, reg::PWM_ENABLE)?;
        self.last_known_pwm_enabled.set_value(Some(true));
        Ok(())
    }

    fn pwm_disable(&mut self) -> Result<()> {
        if self.last_known_pwm_enabled.is_value(&false) {
            return Ok(());
        }
        debug!("pwm disable");
        self.link.write8(reg::PWM, reg::PWM_DISABLE)?;
        self.last_known_pwm_enabled.set_value(Some(false));
        for commanded in &mut self.commanded_positions {
            commanded.invalidate();
        }
        Ok(())
    }
}

impl<B: I2cRegisterDevice> LegacyController for ServoState<B> {
    type Bus = B;

    fn link(&mut self) -> &mut Link<B> {
        &mut self.link
    }

    fn do_hook(&mut self) {
        self.link.bus().engage();
    }

    fn do_unhook(&mut self) {
        self.link.bus().disengage();
    }

    fn initialize_hardware(&mut self) -> Result<()> {
        self.pwm_disable()
    }

    fn float_hardware(&mut self) -> Result<()> {
        self.pwm_disable()
    }
}
