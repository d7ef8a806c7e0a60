//! Register-level driver for **HiTechnic NXT** legacy DC motor and servo controllers.
//!
//! The controllers sit on a legacy I2C port and are driven purely through
//! register reads and writes. This crate keeps a last-known-value cache of
//! those registers to suppress redundant bus traffic, runs the DC motor
//! run-mode state machine (including the lazily completed mode switches the
//! firmware requires), and tracks whether each controller is engaged and
//! hooked to its device.
//!
//! The bus itself is abstracted behind [`I2cRegisterDevice`]; [`SimulatedBus`]
//! provides an in-memory implementation for tests and demos.
//!
//! ```
//! use hitechnic_nxt::{ControllerConfig, MotorController, RunMode, SimulatedBus};
//!
//! let bus = SimulatedBus::motor_controller();
//! let motors = MotorController::new(bus, ControllerConfig::default())?;
//! motors.set_motor_mode(1, RunMode::RunUsingEncoder)?;
//! motors.set_motor_power(1, 0.5)?;
//! assert_eq!(motors.motor_mode(1)?, RunMode::RunUsingEncoder);
//! # Ok::<(), hitechnic_nxt::Error>(())
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod enums;
mod errors;
pub mod helpers;
pub mod last_known;
pub mod motor;
pub mod servo;
pub mod sim;
pub mod transport;

pub use config::ControllerConfig;
pub use controller::{Interrupt, WaitOutcome};
pub use device::{DeviceInfo, DeviceKind};
pub use enums::{ChannelKind, MotorType, PwmStatus, RunMode, ZeroPowerBehavior};
pub use errors::Error;
pub use last_known::LastKnown;
pub use motor::MotorController;
pub use servo::ServoController;
pub use sim::SimulatedBus;
pub use transport::{I2cAddr, I2cRegisterDevice, TransportError};

/// Lowest motor power accepted by the API.
pub const API_POWER_MIN: f64 = -1.0;
/// Highest motor power accepted by the API.
pub const API_POWER_MAX: f64 = 1.0;

/// Power byte for full reverse.
pub const POWER_BYTE_MIN: i8 = -100;
/// Power byte for full forward.
pub const POWER_BYTE_MAX: i8 = 100;
/// Power byte for a stopped, braking motor.
pub const POWER_BRAKE: i8 = 0;
/// Power byte for a stopped, coasting motor.
pub const POWER_FLOAT: i8 = -128;

/// Lowest servo position accepted by the API.
pub const API_POSITION_MIN: f64 = 0.0;
/// Highest servo position accepted by the API.
pub const API_POSITION_MAX: f64 = 1.0;
/// Servo byte for [`API_POSITION_MIN`].
pub const SERVO_BYTE_MIN: f64 = 0.0;
/// Servo byte for [`API_POSITION_MAX`].
pub const SERVO_BYTE_MAX: f64 = 255.0;

/// Encoder ticks from target at which a motor is no longer busy.
pub const BUSY_THRESHOLD: i32 = 5;

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
