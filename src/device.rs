//! Static description of the supported legacy controllers.

use std::collections::HashMap;
use std::time::Duration;

use lazy_static::lazy_static;

use crate::enums::ChannelKind;
use crate::transport::{I2cAddr, ReadMode, ReadWindow};

/// A supported controller model.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// HiTechnic NXT DC motor controller.
    NxtDcMotorController,
    /// HiTechnic NXT servo controller.
    NxtServoController,
}

/// Fixed properties of a [`DeviceKind`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Tag used in robot configuration files.
    pub xml_tag: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// What the channels drive.
    pub channel_kind: ChannelKind,
    /// First valid channel.
    pub first_channel: u8,
    /// Last valid channel.
    pub last_channel: u8,
    /// Bus address of the controller.
    pub i2c_addr: I2cAddr,
    /// Idle time after which a keep-alive read is issued.
    pub heartbeat_interval: Duration,
    /// Register read by the keep-alive.
    pub heartbeat_register: u8,
    /// Register block kept cached by the transport.
    pub read_window: ReadWindow,
}

const MOTOR_CONTROLLER: DeviceInfo = DeviceInfo {
    xml_tag: "MotorController",
    name: "NXT DC Motor Controller",
    channel_kind: ChannelKind::Motor,
    first_channel: 1,
    last_channel: 2,
    i2c_addr: I2cAddr::create_8bit(0x02),
    heartbeat_interval: Duration::from_millis(2000),
    heartbeat_register: 0x4C,
    // target encoder of motor 1 through the battery voltage
    read_window: ReadWindow::new(0x40, 0x56 - 0x40, ReadMode::Balanced),
};

const SERVO_CONTROLLER: DeviceInfo = DeviceInfo {
    xml_tag: "ServoController",
    name: "NXT Servo Controller",
    channel_kind: ChannelKind::Servo,
    first_channel: 1,
    last_channel: 6,
    i2c_addr: I2cAddr::create_8bit(0x02),
    heartbeat_interval: Duration::from_millis(9000),
    heartbeat_register: 0x42,
    read_window: ReadWindow::new(0x40, 0x49 - 0x40, ReadMode::Balanced),
};

lazy_static! {
    static ref BY_XML_TAG: HashMap<&'static str, DeviceKind> = DeviceKind::ALL
        .iter()
        .map(|kind| (kind.info().xml_tag, *kind))
        .collect();
}

impl DeviceKind {
    /// Every supported controller.
    pub const ALL: [Self; 2] = [Self::NxtDcMotorController, Self::NxtServoController];

    /// Fixed properties of this controller.
    #[must_use]
    pub const fn info(self) -> &'static DeviceInfo {
        match self {
            Self::NxtDcMotorController => &MOTOR_CONTROLLER,
            Self::NxtServoController => &SERVO_CONTROLLER,
        }
    }

    /// Controllers own child devices in a configuration tree.
    #[must_use]
    pub const fn is_container(self) -> bool {
        match self {
            Self::NxtDcMotorController | Self::NxtServoController => true,
        }
    }

    /// Looks up a controller by its configuration tag.
    #[must_use]
    pub fn from_xml_tag(tag: &str) -> Option<Self> {
        BY_XML_TAG.get(tag).copied()
    }

    /// Number of channels.
    #[must_use]
    pub const fn channel_count(self) -> usize {
        let info = self.info();
        (info.last_channel - info.first_channel + 1) as usize
    }
}
