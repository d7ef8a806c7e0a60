use crate::enums::ZeroPowerBehavior;
use crate::{
    API_POSITION_MAX, API_POSITION_MIN, API_POWER_MAX, API_POWER_MIN, Error, POWER_BYTE_MAX,
    POWER_BYTE_MIN, POWER_FLOAT, SERVO_BYTE_MAX, SERVO_BYTE_MIN,
};

/// Volts per count of the 10-bit battery voltage reading.
pub const VOLTAGE_STEP_V: f64 = 0.020;

/// Clamps `value` into `[min, max]`.
#[must_use]
pub fn clip(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Linearly maps `value` from `[min_in, max_in]` onto `[min_out, max_out]`.
#[must_use]
pub fn scale(value: f64, min_in: f64, max_in: f64, min_out: f64, max_out: f64) -> f64 {
    let a = (max_out - min_out) / (max_in - min_in);
    let b = min_out - min_in * a;
    a * value + b
}

/// Converts an API motor power into the controller's power byte.
///
/// Power is clipped to `[-1.0, 1.0]`. Exactly zero power with
/// [`ZeroPowerBehavior::Float`] maps to [`POWER_FLOAT`]; everything else is
/// scaled onto `[-100, 100]`, truncating toward zero.
///
/// # Errors
/// Returns `Error::InvalidPower` for NaN or infinite power.
pub fn power_to_byte(power: f64, zero_power_behavior: ZeroPowerBehavior) -> Result<i8, Error> {
    if !power.is_finite() {
        return Err(Error::InvalidPower(power));
    }
    let power = clip(power, API_POWER_MIN, API_POWER_MAX);
    if power == 0.0 && zero_power_behavior == ZeroPowerBehavior::Float {
        return Ok(POWER_FLOAT);
    }
    let scaled = scale(
        power,
        API_POWER_MIN,
        API_POWER_MAX,
        f64::from(POWER_BYTE_MIN),
        f64::from(POWER_BYTE_MAX),
    );
    #[allow(clippy::cast_possible_truncation)]
    {
        Ok(scaled as i8)
    }
}

/// Converts a power byte back into API power. The float sentinel reads as zero.
#[must_use]
pub fn power_from_byte(b_power: i8) -> f64 {
    if b_power == POWER_FLOAT {
        return 0.0;
    }
    let power = scale(
        f64::from(b_power),
        f64::from(POWER_BYTE_MIN),
        f64::from(POWER_BYTE_MAX),
        API_POWER_MIN,
        API_POWER_MAX,
    );
    clip(power, API_POWER_MIN, API_POWER_MAX)
}

/// Converts an API servo position into the controller's position byte.
///
/// # Errors
/// Returns `Error::InvalidPosition` for NaN or infinite positions.
pub fn servo_position_to_byte(position: f64) -> Result<u8, Error> {
    if !position.is_finite() {
        return Err(Error::InvalidPosition(position));
    }
    let position = clip(position, API_POSITION_MIN, API_POSITION_MAX);
    let scaled = scale(
        position,
        API_POSITION_MIN,
        API_POSITION_MAX,
        SERVO_BYTE_MIN,
        SERVO_BYTE_MAX,
    );
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        Ok(scaled as u8)
    }
}

/// Converts a servo position byte back into API position.
#[must_use]
pub fn servo_position_from_byte(b_position: u8) -> f64 {
    scale(
        f64::from(b_position),
        SERVO_BYTE_MIN,
        SERVO_BYTE_MAX,
        API_POSITION_MIN,
        API_POSITION_MAX,
    )
}

/// Big-endian encoding of an encoder register.
#[must_use]
pub const fn encoder_to_bytes(position: i32) -> [u8; 4] {
    position.to_be_bytes()
}

/// Decodes a big-endian encoder register.
#[must_use]
pub const fn encoder_from_bytes(bytes: [u8; 4]) -> i32 {
    i32::from_be_bytes(bytes)
}

/// Decodes the battery voltage registers.
///
/// The high byte carries the upper eight bits of a 10-bit reading, the low
/// byte the remaining two in bits 0 and 1. One count is 20 mV.
#[must_use]
pub fn voltage_from_bytes(bytes: [u8; 2]) -> f64 {
    let ten_bits = (u16::from(bytes[0]) << 2) | u16::from(bytes[1] & 0x03);
    f64::from(ten_bits) * VOLTAGE_STEP_V
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_power_to_byte() {
        let brake = ZeroPowerBehavior::Brake;
        assert_eq!(power_to_byte(1.0, brake).unwrap(), 100);
        assert_eq!(power_to_byte(-1.0, brake).unwrap(), -100);
        assert_eq!(power_to_byte(0.5, brake).unwrap(), 50);
        assert_eq!(power_to_byte(0.333, brake).unwrap(), 33);
        assert_eq!(power_to_byte(-0.257, brake).unwrap(), -25);
    }

    #[test]
    fn test_power_to_byte_clips() {
        let brake = ZeroPowerBehavior::Brake;
        assert_eq!(power_to_byte(1.5, brake).unwrap(), 100);
        assert_eq!(power_to_byte(-2.0, brake).unwrap(), -100);
    }

    #[test]
    fn test_zero_power_sentinel() {
        assert_eq!(power_to_byte(0.0, ZeroPowerBehavior::Float).unwrap(), POWER_FLOAT);
        assert_eq!(power_to_byte(0.0, ZeroPowerBehavior::Brake).unwrap(), 0);
        assert_eq!(power_from_byte(POWER_FLOAT), 0.0);
    }

    #[test]
    fn test_power_rejects_non_finite() {
        let res = power_to_byte(f64::NAN, ZeroPowerBehavior::Brake);
        assert!(matches!(res, Err(Error::InvalidPower(p)) if p.is_nan()));
        assert!(power_to_byte(f64::INFINITY, ZeroPowerBehavior::Brake).is_err());
    }

    #[test]
    fn test_power_from_byte() {
        assert_eq!(power_from_byte(100), 1.0);
        assert_eq!(power_from_byte(-100), -1.0);
        assert_eq!(power_from_byte(50), 0.5);
        // out-of-range bytes are clipped
        assert_eq!(power_from_byte(127), 1.0);
    }

    #[test]
    fn test_servo_position_bytes() {
        assert_eq!(servo_position_to_byte(0.0).unwrap(), 0);
        assert_eq!(servo_position_to_byte(1.0).unwrap(), 255);
        assert_eq!(servo_position_to_byte(0.5).unwrap(), 127);
        assert_eq!(servo_position_to_byte(7.0).unwrap(), 255);
        assert!((servo_position_from_byte(255) - 1.0).abs() < 1e-12);
        assert!(servo_position_to_byte(f64::NAN).is_err());
    }

    #[test]
    fn test_encoder_bytes() {
        assert_eq!(encoder_to_bytes(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(encoder_from_bytes([0xFF, 0xFF, 0xFF, 0xFE]), -2);
    }

    #[test]
    fn test_voltage_from_bytes() {
        // 0x2D << 2 | 0x01 = 181 counts
        let volts = voltage_from_bytes([0x2D, 0x01]);
        assert!((volts - 3.62).abs() < 1e-9);
        // bits above the low two are ignored
        assert_eq!(voltage_from_bytes([0x00, 0xFC]), 0.0);
    }
}
