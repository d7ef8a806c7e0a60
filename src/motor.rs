//! HiTechnic NXT DC motor controller.
//!
//! Each of the two channels has a power byte, a mode register and a pair of
//! 32-bit encoder registers (target and current). Writes are suppressed when
//! the cached register already holds the value, and run-mode changes are
//! completed lazily: [`MotorController::set_motor_mode`] only writes the mode
//! byte, and the next operation on that channel waits for the controller to
//! report the new mode. Switching several channels back to back therefore
//! overlaps their transitions.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::controller::{Interrupt, LegacyController, Link, configure_transport};
use crate::device::{DeviceInfo, DeviceKind};
use crate::enums::{CHANNEL_MODE_MASK_SELECTION, MotorType, RunMode, ZeroPowerBehavior};
use crate::helpers::{
    encoder_from_bytes, encoder_to_bytes, power_from_byte, power_to_byte, voltage_from_bytes,
};
use crate::last_known::LastKnown;
use crate::transport::{I2cRegisterDevice, TransportError};
use crate::{Error, POWER_FLOAT, Result};

const MOTOR_INFO: &DeviceInfo = DeviceKind::NxtDcMotorController.info();

/// First valid motor channel.
pub const MOTOR_FIRST: u8 = MOTOR_INFO.first_channel;
/// Last valid motor channel.
pub const MOTOR_LAST: u8 = MOTOR_INFO.last_channel;
const MOTOR_MAX: usize = MOTOR_LAST as usize + 1;

/// Register map. Index 0 is unused so channels index directly.
pub mod reg {
    /// Power byte per channel.
    pub const MOTOR_POWER: [u8; 3] = [0, 0x45, 0x46];
    /// Mode register per channel.
    pub const MOTOR_MODE: [u8; 3] = [0, 0x44, 0x47];
    /// Target encoder value per channel, 4 bytes big-endian.
    pub const MOTOR_TARGET_ENCODER: [u8; 3] = [0, 0x40, 0x48];
    /// Current encoder value per channel, 4 bytes big-endian.
    pub const MOTOR_CURRENT_ENCODER: [u8; 3] = [0, 0x4C, 0x50];
    /// Battery voltage, 2 bytes.
    pub const BATTERY_VOLTAGE: u8 = 0x54;
    /// Width of an encoder register.
    pub const ENCODER_LEN: usize = 4;
}

#[derive(Debug)]
struct MotorProperties {
    // values we could read back from the controller
    last_known_power_byte: LastKnown<i8>,
    last_known_target_position: LastKnown<i32>,
    last_known_mode: LastKnown<RunMode>,

    // authoritative here
    zero_power_behavior: ZeroPowerBehavior,
    mode_switch_completion_needed: bool,
    prev_run_mode: Option<RunMode>,
    prev_power: f64,
    motor_type: MotorType,
}

impl MotorProperties {
    fn new(config: &ControllerConfig) -> Self {
        Self {
            last_known_power_byte: LastKnown::with_freshness(config.cache_freshness),
            last_known_target_position: LastKnown::with_freshness(config.cache_freshness),
            last_known_mode: LastKnown::with_freshness(config.cache_freshness),
            zero_power_behavior: ZeroPowerBehavior::Brake,
            mode_switch_completion_needed: false,
            prev_run_mode: None,
            prev_power: 0.0,
            motor_type: MotorType::Unspecified,
        }
    }
}

#[derive(Debug)]
struct MotorState<B> {
    link: Link<B>,
    motors: [MotorProperties; MOTOR_MAX],
    config: ControllerConfig,
}

/// Driver for one HiTechnic NXT DC motor controller.
///
/// Every method locks the whole controller, so calls on different channels
/// serialise against each other just as they would on the shared bus.
#[derive(Debug)]
pub struct MotorController<B> {
    state: Mutex<MotorState<B>>,
}

fn validate_motor(motor: u8) -> Result<usize> {
    if (MOTOR_FIRST..=MOTOR_LAST).contains(&motor) {
        Ok(usize::from(motor))
    } else {
        Err(Error::InvalidChannel {
            kind: MOTOR_INFO.channel_kind,
            channel: motor,
            first: MOTOR_FIRST,
            last: MOTOR_LAST,
        })
    }
}

fn read_encoder<B: I2cRegisterDevice>(
    bus: &mut B,
    ireg: u8,
) -> core::result::Result<i32, TransportError> {
    let mut bytes = [0u8; reg::ENCODER_LEN];
    bus.read(ireg, &mut bytes)?;
    Ok(encoder_from_bytes(bytes))
}

fn read_encoder_via<B: I2cRegisterDevice>(link: &mut Link<B>, ireg: u8) -> Result<i32> {
    let mut bytes = [0u8; reg::ENCODER_LEN];
    link.read(ireg, &mut bytes)?;
    Ok(encoder_from_bytes(bytes))
}

impl<B: I2cRegisterDevice> MotorController<B> {
    /// Wraps `bus`, configures its keep-alive and read window, and hooks to
    /// the device if the transport is already armed.
    ///
    /// # Errors
    /// Returns a transport error if initialising the hardware fails.
    pub fn new(mut bus: B, config: ControllerConfig) -> Result<Self> {
        configure_transport(&mut bus, DeviceKind::NxtDcMotorController);
        let mut state = MotorState {
            link: Link::new(bus),
            motors: core::array::from_fn(|_| MotorProperties::new(&config)),
            config,
        };
        state.controller_now_armed()?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Static description of this controller.
    #[must_use]
    pub const fn device_kind(&self) -> DeviceKind {
        DeviceKind::NxtDcMotorController
    }

    /// Handle that abandons a blocked mode-switch wait from another thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> Interrupt {
        self.state.lock().link.interrupt().clone()
    }

    // ---------------------------------------------------------------------
    // Lifecycle

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

    /// Floats the motors, detaches and closes the transport.
    ///
    /// # Errors
    /// Returns a transport error if floating the motors fails.
    pub fn close(&self) -> Result<()> {
        self.state.lock().close()
    }

    /// Restores the power-on configuration before a new program runs: floats
    /// all motors, selects [`RunMode::RunWithoutEncoder`], brakes at zero and
    /// forgets all cached registers.
    ///
    /// # Errors
    /// Returns a transport error if any register access fails.
    pub fn reset_device_configuration_for_op_mode(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.float_hardware()?;
        for m in usize::from(MOTOR_FIRST)..MOTOR_MAX {
            state.set_motor_mode(m, RunMode::RunWithoutEncoder)?;
        }
        for m in usize::from(MOTOR_FIRST)..MOTOR_MAX {
            state.finish_mode_switch_if_necessary(m)?;
        }
        state.brake_all_at_zero();
        state.forget_last_known();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Configuration

    /// Records the motor attached to `motor`.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel.
    pub fn set_motor_type(&self, motor: u8, motor_type: MotorType) -> Result<()> {
        let m = validate_motor(motor)?;
        self.state.lock().motors[m].motor_type = motor_type;
        Ok(())
    }

    /// The motor attached to `motor`.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel.
    pub fn motor_type(&self, motor: u8) -> Result<MotorType> {
        let m = validate_motor(motor)?;
        Ok(self.state.lock().motors[m].motor_type)
    }

    // ---------------------------------------------------------------------
    // Run mode

    /// Requests a run-mode change.
    ///
    /// Returns as soon as the mode byte is written; the transition is
    /// completed by the next operation on this channel.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn set_motor_mode(&self, motor: u8, mode: RunMode) -> Result<()> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.set_motor_mode(m, mode)
    }

    /// The current run mode.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn motor_mode(&self, motor: u8) -> Result<RunMode> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.cached_or_queried_run_mode(m)
    }

    // ---------------------------------------------------------------------
    // Power

    /// Sets motor power in `[-1.0, 1.0]`; out-of-range values are clipped.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel`, `Error::InvalidPower` for NaN or
    /// infinite power, or a transport error.
    pub fn set_motor_power(&self, motor: u8, power: f64) -> Result<()> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.set_power(m, power)
    }

    /// The commanded power, from cache or from the controller.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn motor_power(&self, motor: u8) -> Result<f64> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.cached_or_queried_power(m)
    }

    /// Chooses between braking and floating at zero power. Takes effect
    /// immediately if the motor is currently stopped.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn set_motor_zero_power_behavior(
        &self,
        motor: u8,
        behavior: ZeroPowerBehavior,
    ) -> Result<()> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;

        if state.motors[m].zero_power_behavior != behavior {
            state.motors[m].zero_power_behavior = behavior;
            if state.cached_or_queried_power(m)? == 0.0 {
                state.motors[m].last_known_power_byte.invalidate();
                state.set_power(m, 0.0)?;
            }
        }
        Ok(())
    }

    /// The zero power behavior.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn motor_zero_power_behavior(&self, motor: u8) -> Result<ZeroPowerBehavior> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        Ok(state.motors[m].zero_power_behavior)
    }

    /// Lets the motor coast regardless of its zero power behavior.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn set_motor_power_float(&self, motor: u8) -> Result<()> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.set_power_float(m)
    }

    /// Whether the controller reports the motor as floating.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn motor_power_float(&self, motor: u8) -> Result<bool> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        let b_power = state.link.read8(reg::MOTOR_POWER[m])?;
        Ok(b_power as i8 == POWER_FLOAT)
    }

    // ---------------------------------------------------------------------
    // Position

    /// Sets the encoder target used by [`RunMode::RunToPosition`].
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn set_motor_target_position(&self, motor: u8, position: i32) -> Result<()> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.set_target_position(m, position)
    }

    /// The encoder target, read from the controller.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn motor_target_position(&self, motor: u8) -> Result<i32> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.query_target_position(m)
    }

    /// The current encoder count, read from the controller.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn motor_current_position(&self, motor: u8) -> Result<i32> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        state.query_current_position(m)
    }

    /// Whether the motor is still further than the busy threshold from its
    /// target.
    ///
    /// The controller's own busy bit lags a run-to-position command by up to
    /// 50 ms, so the answer is derived from the encoder registers instead.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannel` for an out-of-range channel, or a
    /// transport error.
    pub fn is_busy(&self, motor: u8) -> Result<bool> {
        let m = validate_motor(motor)?;
        let mut state = self.state.lock();
        state.finish_mode_switch_if_necessary(m)?;
        let target = state.query_target_position(m)?;
        let current = state.query_current_position(m)?;
        let distance = (i64::from(target) - i64::from(current)).abs();
        Ok(distance > i64::from(state.config.busy_threshold))
    }

    // ---------------------------------------------------------------------
    // Voltage sensor

    /// Battery voltage measured by the controller, in volts.
    ///
    /// # Errors
    /// Returns a transport error if the read fails.
    pub fn voltage(&self) -> Result<f64> {
        let mut state = self.state.lock();
        let mut bytes = [0u8; 2];
        state.link.read(reg::BATTERY_VOLTAGE, &mut bytes)?;
        Ok(voltage_from_bytes(bytes))
    }
}

impl<B: I2cRegisterDevice> MotorState<B> {
    fn brake_all_at_zero(&mut self) {
        for motor in &mut self.motors[usize::from(MOTOR_FIRST)..] {
            motor.zero_power_behavior = ZeroPowerBehavior::Brake;
        }
    }

    fn forget_last_known(&mut self) {
        for motor in &mut self.motors[usize::from(MOTOR_FIRST)..] {
            motor.last_known_mode.invalidate();
            motor.last_known_power_byte.invalidate();
            motor.last_known_target_position.invalidate();
        }
    }

    fn forget_last_known_powers(&mut self) {
        for motor in &mut self.motors[usize::from(MOTOR_FIRST)..] {
            motor.last_known_power_byte.invalidate();
        }
    }

    fn set_motor_mode(&mut self, m: usize, mode: RunMode) -> Result<()> {
        if self.motors[m].last_known_mode.is_value(&mode) {
            return Ok(());
        }
        let prev_mode = self.motors[m].last_known_mode.non_timed_value();
        let prev_power = self.cached_or_queried_power(m)?;

        debug!(motor = m, ?prev_mode, ?mode, "mode switch requested");
        // only the low five bits are writable and we only use the selection bits
        self.link.write8(reg::MOTOR_MODE[m], mode.to_byte())?;

        // a dropped write leaves nothing on the device to wait for
        let write_went_out = self.link.is_engaged();
        let motor = &mut self.motors[m];
        motor.last_known_mode.set_value(Some(mode));
        motor.mode_switch_completion_needed = write_went_out;
        motor.prev_run_mode = prev_mode;
        motor.prev_power = prev_power;
        Ok(())
    }

    fn query_run_mode(&mut self, m: usize) -> Result<RunMode> {
        let b = self.link.read8(reg::MOTOR_MODE[m])?;
        let mode = RunMode::from_byte(b);
        self.motors[m].last_known_mode.set_value(Some(mode));
        Ok(mode)
    }

    fn cached_or_queried_run_mode(&mut self, m: usize) -> Result<RunMode> {
        match self.motors[m].last_known_mode.non_timed_value() {
            Some(mode) => Ok(mode),
            None => self.query_run_mode(m),
        }
    }

    /// Blocks until a pending mode switch on `m` has taken effect on the
    /// controller, then restores the power the new mode needs.
    fn finish_mode_switch_if_necessary(&mut self, m: usize) -> Result<()> {
        if !self.motors[m].mode_switch_completion_needed {
            return Ok(());
        }

        let mode = self.cached_or_queried_run_mode(m)?;
        let prev_mode = self.motors[m].prev_run_mode;
        let config = self.config;

        let b_new_mode = mode.to_byte();
        let b_run_without_encoder = RunMode::RunWithoutEncoder.to_byte();
        let mode_reg = reg::MOTOR_MODE[m];
        let mut outcome = self.link.wait_until(&config, |bus| {
            let b_current = bus.read8(mode_reg)? & CHANNEL_MODE_MASK_SELECTION;
            // the controller may drop from reset straight back to run-without-encoder
            Ok(b_current == b_new_mode
                || (mode == RunMode::StopAndResetEncoder && b_current == b_run_without_encoder))
        })?;

        if mode == RunMode::StopAndResetEncoder {
            if outcome.arrived() {
                let position_reg = reg::MOTOR_CURRENT_ENCODER[m];
                outcome = self
                    .link
                    .wait_until(&config, |bus| Ok(read_encoder(bus, position_reg)? == 0))?;
            }
        } else if outcome.arrived() {
            self.restore_power_after_mode_switch(m, mode, prev_mode)?;
        }

        if outcome.arrived() {
            debug!(motor = m, ?mode, "mode switch complete");
        } else {
            warn!(motor = m, ?mode, ?outcome, "abandoned wait for mode switch");
        }

        // power writes are ignored while resetting, so whatever we believed
        // about power on either side of the switch is suspect
        self.forget_last_known_powers();
        self.motors[m].mode_switch_completion_needed = false;
        Ok(())
    }

    fn restore_power_after_mode_switch(
        &mut self,
        m: usize,
        mode: RunMode,
        prev_mode: Option<RunMode>,
    ) -> Result<()> {
        if mode.is_pid_mode() && !prev_mode.is_some_and(RunMode::is_pid_mode) {
            let mut prev_power = self.motors[m].prev_power;
            if mode == RunMode::RunToPosition {
                // direction comes from the target; run-to-position wants non-negative power
                prev_power = prev_power.abs();
            }
            self.motors[m].last_known_power_byte.invalidate();
            self.set_power(m, prev_power)?;
        } else if mode == RunMode::RunToPosition {
            let power = self.cached_or_queried_power(m)?;
            if power < 0.0 {
                self.set_power(m, power.abs())?;
            }
        }

        if prev_mode == Some(RunMode::StopAndResetEncoder) {
            // the raw byte survives invalidation; absent only after a full forget
            if let Some(b_power) = self.motors[m].last_known_power_byte.raw_value() {
                self.motors[m].last_known_power_byte.invalidate();
                self.set_power(m, power_from_byte(b_power))?;
            }
        }
        Ok(())
    }

    fn set_power(&mut self, m: usize, power: f64) -> Result<()> {
        let b_power = power_to_byte(power, self.motors[m].zero_power_behavior)?;
        self.set_power_byte(m, b_power)
    }

    fn set_power_byte(&mut self, m: usize, b_power: i8) -> Result<()> {
        if self.motors[m].last_known_power_byte.is_value(&b_power) {
            return Ok(());
        }
        self.link.write8(reg::MOTOR_POWER[m], b_power as u8)?;
        self.motors[m].last_known_power_byte.set_value(Some(b_power));
        Ok(())
    }

    fn set_power_float(&mut self, m: usize) -> Result<()> {
        self.link.write8(reg::MOTOR_POWER[m], POWER_FLOAT as u8)?;
        self.motors[m].last_known_power_byte.set_value(Some(POWER_FLOAT));
        Ok(())
    }

    fn query_power(&mut self, m: usize) -> Result<f64> {
        let b_power = self.link.read8(reg::MOTOR_POWER[m])? as i8;
        self.motors[m].last_known_power_byte.set_value(Some(b_power));
        Ok(power_from_byte(b_power))
    }

    fn cached_or_queried_power(&mut self, m: usize) -> Result<f64> {
        match self.motors[m].last_known_power_byte.non_timed_value() {
            Some(b_power) => Ok(power_from_byte(b_power)),
            None => self.query_power(m),
        }
    }

    fn set_target_position(&mut self, m: usize, position: i32) -> Result<()> {
        if self.motors[m].last_known_target_position.is_value(&position) {
            return Ok(());
        }
        self.link
            .write(reg::MOTOR_TARGET_ENCODER[m], &encoder_to_bytes(position))?;
        self.motors[m]
            .last_known_target_position
            .set_value(Some(position));
        Ok(())
    }

    fn query_target_position(&mut self, m: usize) -> Result<i32> {
        let position = read_encoder_via(&mut self.link, reg::MOTOR_TARGET_ENCODER[m])?;
        self.motors[m]
            .last_known_target_position
            .set_value(Some(position));
        Ok(position)
    }

    fn query_current_position(&mut self, m: usize) -> Result<i32> {
        read_encoder_via(&mut self.link, reg::MOTOR_CURRENT_ENCODER[m])
    }
}

impl<B: I2cRegisterDevice> LegacyController for MotorState<B> {
    type Bus = B;

    fn link(&mut self) -> &mut Link<B> {
        &mut self.link
    }

    fn do_hook(&mut self) {
        self.forget_last_known();
        self.link.bus().engage();
    }

    fn do_unhook(&mut self) {
        self.link.bus().disengage();
        self.forget_last_known();
    }

    fn initialize_hardware(&mut self) -> Result<()> {
        self.float_hardware()
    }

    fn float_hardware(&mut self) -> Result<()> {
        for m in usize::from(MOTOR_FIRST)..MOTOR_MAX {
            self.finish_mode_switch_if_necessary(m)?;
            self.set_power_float(m)?;
        }
        self.link.bus().wait_for_write_completions()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_motor() {
        assert_eq!(validate_motor(1), Ok(1));
        assert_eq!(validate_motor(2), Ok(2));
        assert!(matches!(
            validate_motor(0),
            Err(Error::InvalidChannel { channel: 0, first: 1, last: 2, .. })
        ));
        assert!(validate_motor(3).is_err());
    }

    #[test]
    fn test_register_maps_match_device_window() {
        let window = DeviceKind::NxtDcMotorController.info().read_window;
        for m in usize::from(MOTOR_FIRST)..MOTOR_MAX {
            assert!(window.contains(reg::MOTOR_POWER[m], 1));
            assert!(window.contains(reg::MOTOR_MODE[m], 1));
            assert!(window.contains(reg::MOTOR_TARGET_ENCODER[m], 4));
            assert!(window.contains(reg::MOTOR_CURRENT_ENCODER[m], 4));
        }
        assert!(window.contains(reg::BATTERY_VOLTAGE, 2));
    }
}
