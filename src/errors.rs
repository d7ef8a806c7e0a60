use crate::enums::ChannelKind;
use crate::transport::TransportError;

/// Errors raised by the controller façades.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The channel lies outside the controller's `[first, last]` range.
    #[error("{kind} {channel} is invalid; valid {kind}s are {first}..{last}")]
    InvalidChannel {
        /// Whether a motor or a servo channel was addressed.
        kind: ChannelKind,
        /// The rejected channel.
        channel: u8,
        /// First valid channel.
        first: u8,
        /// Last valid channel.
        last: u8,
    },
    /// Motor power was NaN or infinite.
    #[error("illegal motor power {0}; must be in interval [-1.0, 1.0]")]
    InvalidPower(f64),
    /// Servo position was NaN or infinite.
    #[error("illegal servo position {0}; must be in interval [0.0, 1.0]")]
    InvalidPosition(f64),
    /// The underlying I2C transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    Config {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

impl Error {
    /// Short, static description of the error class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidChannel { .. } => "Invalid channel",
            Self::InvalidPower(_) => "Invalid motor power",
            Self::InvalidPosition(_) => "Invalid servo position",
            Self::Transport(_) => "Transport failure",
            Self::Config { .. } => "Invalid configuration",
        }
    }

    /// Whether the error was caused by the caller rather than the device.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidChannel { .. } | Self::InvalidPower(_) | Self::InvalidPosition(_)
        )
    }
}
