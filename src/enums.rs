use core::fmt;

/// Mask selecting the run-mode bits of a channel mode register.
pub const CHANNEL_MODE_MASK_SELECTION: u8 = 0x03;

const MODE_RUN_POWER_CONTROL_ONLY: u8 = 0x00;
const MODE_RUN_CONSTANT_SPEED: u8 = 0x01;
const MODE_RUN_TO_POSITION: u8 = 0x02;
const MODE_RESET: u8 = 0x03;

/// Motor run mode.
///
/// Each variant corresponds to exactly one of the four raw selection patterns
/// of the HiTechnic channel mode register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Open-loop power control.
    RunWithoutEncoder,
    /// Closed-loop constant speed.
    RunUsingEncoder,
    /// Closed-loop drive to the target encoder value.
    RunToPosition,
    /// Stop the motor and zero the encoder.
    StopAndResetEncoder,
}

impl RunMode {
    /// Whether the controller runs its PID loop in this mode.
    #[must_use]
    pub const fn is_pid_mode(self) -> bool {
        matches!(self, Self::RunUsingEncoder | Self::RunToPosition)
    }

    /// Raw selection bits written to the mode register.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::RunWithoutEncoder => MODE_RUN_POWER_CONTROL_ONLY,
            Self::RunUsingEncoder => MODE_RUN_CONSTANT_SPEED,
            Self::RunToPosition => MODE_RUN_TO_POSITION,
            Self::StopAndResetEncoder => MODE_RESET,
        }
    }

    /// Decodes a mode register value; bits outside the selection mask are ignored.
    #[must_use]
    pub const fn from_byte(flag: u8) -> Self {
        match flag & CHANNEL_MODE_MASK_SELECTION {
            MODE_RUN_CONSTANT_SPEED => Self::RunUsingEncoder,
            MODE_RUN_TO_POSITION => Self::RunToPosition,
            MODE_RESET => Self::StopAndResetEncoder,
            _ => Self::RunWithoutEncoder,
        }
    }
}

/// What a motor does when commanded to zero power.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ZeroPowerBehavior {
    /// Actively brake.
    #[default]
    Brake,
    /// Let the motor coast.
    Float,
}

/// PWM output state of a servo controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PwmStatus {
    /// Servos are driven.
    Enabled,
    /// Servos are unpowered.
    Disabled,
}

impl PwmStatus {
    /// Decodes the PWM register. Only `0xFF` means disabled.
    #[must_use]
    pub const fn from_byte(value: u8) -> Self {
        if value == 0xFF {
            Self::Disabled
        } else {
            Self::Enabled
        }
    }
}

/// Motor hardware attached to a channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum MotorType {
    /// Nothing configured.
    #[default]
    Unspecified,
    /// TETRIX DC gear motor.
    Tetrix,
    /// AndyMark NeveRest 20.
    NeveRest20,
    /// AndyMark NeveRest 40.
    NeveRest40,
    /// AndyMark NeveRest 60.
    NeveRest60,
}

impl MotorType {
    /// Encoder ticks per output shaft revolution.
    #[must_use]
    pub const fn ticks_per_rev(self) -> f64 {
        match self {
            Self::Unspecified => 28.0,
            Self::Tetrix => 1440.0,
            Self::NeveRest20 => 560.0,
            Self::NeveRest40 => 1120.0,
            Self::NeveRest60 => 1680.0,
        }
    }

    /// Free-running speed of the output shaft.
    #[must_use]
    pub const fn max_rpm(self) -> f64 {
        match self {
            Self::Unspecified => 6000.0,
            Self::Tetrix => 152.0,
            Self::NeveRest20 => 340.0,
            Self::NeveRest40 => 160.0,
            Self::NeveRest60 => 105.0,
        }
    }
}

/// The kind of port a channel number refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// DC motor port.
    Motor,
    /// Servo port.
    Servo,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Motor => "motor",
            Self::Servo => "servo",
        })
    }
}
