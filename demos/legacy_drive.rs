//! Drives a simulated HiTechnic NXT motor and servo controller.
//!
//! This example shows how to:
//! - Load controller tuning from the environment (`.env` is honoured)
//! - Reset encoders on both motors with overlapping mode switches
//! - Run a motor to a target position and wait until it is no longer busy
//! - Sweep a servo
//!
//! Set `RUST_LOG=hitechnic_nxt=debug` to watch mode switches and engagement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use hitechnic_nxt::motor::reg;
use hitechnic_nxt::{
    ControllerConfig, MotorController, MotorType, RunMode, ServoController, SimulatedBus,
};
use tracing_subscriber::EnvFilter;

/// Encoder ticks the simulated motor advances per step
const TICKS_PER_STEP: i32 = 40;

/// Target for the run-to-position move
const TARGET_TICKS: i32 = 1440;

fn main() -> Result<(), hitechnic_nxt::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ControllerConfig::from_env()?;
    println!("Config: {config:?}");

    // === Setup ===
    println!("\n=== Setup ===");

    let motor_bus = SimulatedBus::motor_controller()
        .with_mode_switch_latency(5)
        .with_encoder_reset_latency(3);
    // left over from a previous program
    for (motor, position) in [(1, 321), (2, -54)] {
        motor_bus.set_register(reg::MOTOR_MODE[motor], RunMode::RunUsingEncoder.to_byte());
        motor_bus.set_encoder(reg::MOTOR_CURRENT_ENCODER[motor], position);
    }
    let motors = MotorController::new(motor_bus.clone(), config)?;
    motors.set_motor_type(1, MotorType::Tetrix)?;
    motors.set_motor_type(2, MotorType::Tetrix)?;
    println!("Battery: {:.2} V", motors.voltage()?);

    // === Reset encoders ===
    println!("\n=== Reset Encoders ===");

    // both switches are in flight before either is waited for
    motors.set_motor_mode(1, RunMode::StopAndResetEncoder)?;
    motors.set_motor_mode(2, RunMode::StopAndResetEncoder)?;
    println!(
        "Positions: {} / {}",
        motors.motor_current_position(1)?,
        motors.motor_current_position(2)?
    );

    // === Run to position ===
    println!("\n=== Run To Position ===");

    let stop = Arc::new(AtomicBool::new(false));
    let plant = spawn_plant(motor_bus.clone(), Arc::clone(&stop));

    motors.set_motor_target_position(1, TARGET_TICKS)?;
    motors.set_motor_mode(1, RunMode::RunToPosition)?;
    motors.set_motor_power(1, 0.5)?;

    let start = Instant::now();
    while motors.is_busy(1)? {
        thread::sleep(Duration::from_millis(20));
    }
    println!(
        "Arrived at {} after {:?}",
        motors.motor_current_position(1)?,
        start.elapsed()
    );

    stop.store(true, Ordering::SeqCst);
    plant.join().ok();

    // === Servo sweep ===
    println!("\n=== Servo Sweep ===");

    let servos = ServoController::new(SimulatedBus::new(), config)?;
    for step in 0..=4 {
        let position = f64::from(step) / 4.0;
        servos.set_servo_position(1, position)?;
        println!(
            "Servo 1 -> {:.3} (pwm {:?})",
            servos.servo_position(1)?.unwrap_or(f64::NAN),
            servos.pwm_status()?
        );
        thread::sleep(Duration::from_millis(100));
    }

    // === Cleanup ===
    println!("\n=== Done ===");
    motors.close()?;
    servos.close()?;
    Ok(())
}

/// Moves motor 1's encoder toward its target while it has power.
fn spawn_plant(bus: SimulatedBus, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            let powered = bus.register(reg::MOTOR_POWER[1]) as i8;
            if powered > 0 {
                let target = bus.encoder(reg::MOTOR_TARGET_ENCODER[1]);
                let current = bus.encoder(reg::MOTOR_CURRENT_ENCODER[1]);
                let step = (target - current).clamp(-TICKS_PER_STEP, TICKS_PER_STEP);
                bus.set_encoder(reg::MOTOR_CURRENT_ENCODER[1], current + step);
            }
            thread::sleep(Duration::from_millis(10));
        }
    })
}
