//! In-memory stand-in for a legacy controller on the bus.
//!
//! [`SimulatedBus`] implements [`I2cRegisterDevice`] over a 256-register file
//! and records every transaction. Clones share state, so a test can keep one
//! handle for inspection while a controller owns another.
//!
//! With [`SimulatedBus::motor_controller`] the register file also behaves like
//! the DC motor firmware: mode writes take effect after a configurable number
//! of mode-register reads, resetting zeroes the encoder, and power writes are
//! ignored while a channel is resetting.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use crate::enums::{CHANNEL_MODE_MASK_SELECTION, RunMode};
use crate::helpers::{encoder_from_bytes, encoder_to_bytes};
use crate::motor::{MOTOR_FIRST, MOTOR_LAST, reg};
use crate::transport::{
    Heartbeat, HeartbeatTimer, I2cAddr, I2cRegisterDevice, ReadWindow, TransportError,
};

/// One bus transaction observed by the simulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    /// `len` registers read starting at `ireg`.
    Read {
        /// First register.
        ireg: u8,
        /// Number of registers.
        len: usize,
    },
    /// `data` written starting at `ireg`.
    Write {
        /// First register.
        ireg: u8,
        /// Bytes written.
        data: Vec<u8>,
    },
    /// A keep-alive issued by [`SimulatedBus::tick`].
    Heartbeat,
}

#[derive(Debug, Default, Clone, Copy)]
struct MotorChannel {
    // (mode byte, reads left before it applies)
    pending_mode: Option<(u8, u32)>,
    pending_reset_reads: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct MotorModel {
    mode_switch_latency: u32,
    encoder_reset_latency: u32,
    reset_returns_to_run_without_encoder: bool,
    channels: [MotorChannel; MOTOR_LAST as usize + 1],
}

#[derive(Debug)]
struct SimState {
    registers: [u8; 256],
    transactions: Vec<Transaction>,
    armed: bool,
    engaged: bool,
    closed: bool,
    i2c_addr: Option<I2cAddr>,
    heartbeat: Option<Heartbeat>,
    heartbeat_timer: Option<HeartbeatTimer>,
    last_write: Option<(u8, Vec<u8>)>,
    read_window: Option<ReadWindow>,
    write_coalescing: bool,
    write_completion_waits: usize,
    fail_next: Option<TransportError>,
    motor: Option<MotorModel>,
}

/// Simulated register device.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// A plain register file that is armed and not yet engaged.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                registers: [0; 256],
                transactions: Vec::new(),
                armed: true,
                engaged: false,
                closed: false,
                i2c_addr: None,
                heartbeat: None,
                heartbeat_timer: None,
                last_write: None,
                read_window: None,
                write_coalescing: false,
                write_completion_waits: 0,
                fail_next: None,
                motor: None,
            })),
        }
    }

    /// A register file that also models DC motor controller firmware. Mode
    /// writes apply immediately until latencies are configured.
    #[must_use]
    pub fn motor_controller() -> Self {
        let bus = Self::new();
        bus.state.lock().motor = Some(MotorModel {
            mode_switch_latency: 0,
            encoder_reset_latency: 0,
            reset_returns_to_run_without_encoder: false,
            channels: [MotorChannel::default(); MOTOR_LAST as usize + 1],
        });
        bus
    }

    /// Mode-register reads before a written mode becomes visible.
    #[must_use]
    pub fn with_mode_switch_latency(self, reads: u32) -> Self {
        if let Some(motor) = self.state.lock().motor.as_mut() {
            motor.mode_switch_latency = reads;
        }
        self
    }

    /// Encoder reads after a reset applies before the encoder reads zero.
    #[must_use]
    pub fn with_encoder_reset_latency(self, reads: u32) -> Self {
        if let Some(motor) = self.state.lock().motor.as_mut() {
            motor.encoder_reset_latency = reads;
        }
        self
    }

    /// Makes a channel drop back to run-without-encoder as soon as its reset
    /// applies, so the reset mode itself is never observed.
    #[must_use]
    pub fn with_reset_returning_to_run_without_encoder(self) -> Self {
        if let Some(motor) = self.state.lock().motor.as_mut() {
            motor.reset_returns_to_run_without_encoder = true;
        }
        self
    }

    /// Connects or disconnects the simulated device.
    pub fn set_armed(&self, armed: bool) {
        self.state.lock().armed = armed;
    }

    /// Whether a controller has engaged the transport.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.state.lock().engaged
    }

    /// Whether the transport was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Makes the next read or write fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().fail_next = Some(error);
    }

    /// Every transaction so far, oldest first.
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().transactions.clone()
    }

    /// Forgets the recorded transactions.
    pub fn clear_transactions(&self) {
        self.state.lock().transactions.clear();
    }

    /// Data of every write that started at `ireg`, oldest first.
    #[must_use]
    pub fn writes_to(&self, ireg: u8) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .transactions
            .iter()
            .filter_map(|t| match t {
                Transaction::Write { ireg: at, data } if *at == ireg => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of reads that started at `ireg`.
    #[must_use]
    pub fn reads_of(&self, ireg: u8) -> usize {
        self.state
            .lock()
            .transactions
            .iter()
            .filter(|t| matches!(t, Transaction::Read { ireg: at, .. } if *at == ireg))
            .count()
    }

    /// Raw register contents, bypassing the firmware model and the log.
    #[must_use]
    pub fn register(&self, ireg: u8) -> u8 {
        self.state.lock().registers[usize::from(ireg)]
    }

    /// Overwrites a register, bypassing the firmware model and the log.
    pub fn set_register(&self, ireg: u8, value: u8) {
        self.state.lock().registers[usize::from(ireg)] = value;
    }

    /// Overwrites a 32-bit encoder register.
    pub fn set_encoder(&self, ireg: u8, position: i32) {
        let mut state = self.state.lock();
        let at = usize::from(ireg);
        state.registers[at..at + reg::ENCODER_LEN].copy_from_slice(&encoder_to_bytes(position));
    }

    /// Reads a 32-bit encoder register without logging.
    #[must_use]
    pub fn encoder(&self, ireg: u8) -> i32 {
        let state = self.state.lock();
        let at = usize::from(ireg);
        let mut bytes = [0u8; reg::ENCODER_LEN];
        bytes.copy_from_slice(&state.registers[at..at + reg::ENCODER_LEN]);
        encoder_from_bytes(bytes)
    }

    /// The keep-alive configured by the controller.
    #[must_use]
    pub fn heartbeat(&self) -> Option<Heartbeat> {
        self.state.lock().heartbeat
    }

    /// The bus address configured by the controller.
    #[must_use]
    pub fn i2c_address(&self) -> Option<I2cAddr> {
        self.state.lock().i2c_addr
    }

    /// The read window configured by the controller.
    #[must_use]
    pub fn read_window(&self) -> Option<ReadWindow> {
        self.state.lock().read_window
    }

    /// Whether the controller enabled write coalescing.
    #[must_use]
    pub fn write_coalescing(&self) -> bool {
        self.state.lock().write_coalescing
    }

    /// How many times the controller waited for writes to complete.
    #[must_use]
    pub fn write_completion_waits(&self) -> usize {
        self.state.lock().write_completion_waits
    }

    /// Issues a keep-alive if the bus has been idle for a full interval at
    /// `now`. Returns whether one was sent.
    pub fn tick(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        let Some(heartbeat) = state.heartbeat else {
            return false;
        };
        if !state.armed || !state.engaged {
            return false;
        }
        if !state.heartbeat_timer.is_some_and(|timer| timer.is_due(now)) {
            return false;
        }

        state.transactions.push(Transaction::Heartbeat);
        if heartbeat.action.rewrite_last_written {
            if let Some((ireg, data)) = state.last_write.clone() {
                state.store(ireg, &data);
            }
        }
        if let Some(timer) = state.heartbeat_timer.as_mut() {
            timer.touch(now);
        }
        true
    }
}

impl SimState {
    fn begin(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        if let Some(timer) = self.heartbeat_timer.as_mut() {
            timer.touch(Instant::now());
        }
        Ok(())
    }

    fn motor_channel_of(ireg: u8, map: &[u8; 3]) -> Option<usize> {
        (usize::from(MOTOR_FIRST)..=usize::from(MOTOR_LAST)).find(|&m| map[m] == ireg)
    }

    fn mode_of(&self, m: usize) -> RunMode {
        RunMode::from_byte(self.registers[usize::from(reg::MOTOR_MODE[m])])
    }

    fn apply_mode(&mut self, m: usize, b_mode: u8) {
        let Some(mut motor) = self.motor else {
            return;
        };
        let at = usize::from(reg::MOTOR_MODE[m]);
        let selection = b_mode & CHANNEL_MODE_MASK_SELECTION;
        self.registers[at] = (self.registers[at] & !CHANNEL_MODE_MASK_SELECTION) | selection;

        if RunMode::from_byte(selection) == RunMode::StopAndResetEncoder {
            if motor.encoder_reset_latency == 0 {
                self.zero_encoder(m);
            } else {
                motor.channels[m].pending_reset_reads = Some(motor.encoder_reset_latency);
            }
            if motor.reset_returns_to_run_without_encoder {
                self.registers[at] = (self.registers[at] & !CHANNEL_MODE_MASK_SELECTION)
                    | RunMode::RunWithoutEncoder.to_byte();
            }
        }
        trace!(motor = m, mode = ?self.mode_of(m), "sim mode applied");
        self.motor = Some(motor);
    }

    fn zero_encoder(&mut self, m: usize) {
        let at = usize::from(reg::MOTOR_CURRENT_ENCODER[m]);
        self.registers[at..at + reg::ENCODER_LEN].fill(0);
    }

    fn before_register_read(&mut self, ireg: u8) {
        let Some(mut motor) = self.motor else {
            return;
        };
        if let Some(m) = Self::motor_channel_of(ireg, &reg::MOTOR_MODE) {
            if let Some((b_mode, reads_left)) = motor.channels[m].pending_mode {
                if reads_left <= 1 {
                    motor.channels[m].pending_mode = None;
                    self.motor = Some(motor);
                    self.apply_mode(m, b_mode);
                    return;
                }
                motor.channels[m].pending_mode = Some((b_mode, reads_left - 1));
            }
        }
        if let Some(m) = Self::motor_channel_of(ireg, &reg::MOTOR_CURRENT_ENCODER) {
            if let Some(reads_left) = motor.channels[m].pending_reset_reads {
                if reads_left <= 1 {
                    motor.channels[m].pending_reset_reads = None;
                    self.zero_encoder(m);
                } else {
                    motor.channels[m].pending_reset_reads = Some(reads_left - 1);
                }
            }
        }
        self.motor = Some(motor);
    }

    /// Applies a write to the register file through the firmware model.
    fn store(&mut self, ireg: u8, data: &[u8]) {
        for (offset, &value) in data.iter().enumerate() {
            let Some(at) = ireg.checked_add(u8::try_from(offset).unwrap_or(u8::MAX)) else {
                break;
            };
            self.store8(at, value);
        }
    }

    fn store8(&mut self, ireg: u8, value: u8) {
        if let Some(mut motor) = self.motor {
            if let Some(m) = Self::motor_channel_of(ireg, &reg::MOTOR_MODE) {
                if motor.mode_switch_latency == 0 {
                    self.apply_mode(m, value);
                } else {
                    motor.channels[m].pending_mode = Some((value, motor.mode_switch_latency));
                    self.motor = Some(motor);
                }
                return;
            }
            if let Some(m) = Self::motor_channel_of(ireg, &reg::MOTOR_POWER) {
                if self.mode_of(m) == RunMode::StopAndResetEncoder {
                    return;
                }
            }
        }
        self.registers[usize::from(ireg)] = value;
    }
}

impl I2cRegisterDevice for SimulatedBus {
    fn read(&mut self, ireg: u8, buffer: &mut [u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.begin()?;
        state.transactions.push(Transaction::Read {
            ireg,
            len: buffer.len(),
        });
        for (offset, slot) in buffer.iter_mut().enumerate() {
            let at = usize::from(ireg) + offset;
            if at >= state.registers.len() {
                return Err(TransportError::Nack(ireg));
            }
            // only the first byte of each register block triggers firmware reactions
            if offset == 0 {
                state.before_register_read(ireg);
            }
            *slot = state.registers[at];
        }
        Ok(())
    }

    fn write(&mut self, ireg: u8, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.begin()?;
        if usize::from(ireg) + data.len() > state.registers.len() {
            return Err(TransportError::Nack(ireg));
        }
        state.transactions.push(Transaction::Write {
            ireg,
            data: data.to_vec(),
        });
        state.last_write = Some((ireg, data.to_vec()));
        state.store(ireg, data);
        Ok(())
    }

    fn is_armed(&self) -> bool {
        let state = self.state.lock();
        state.armed && !state.closed
    }

    fn engage(&mut self) {
        self.state.lock().engaged = true;
    }

    fn disengage(&mut self) {
        self.state.lock().engaged = false;
    }

    fn set_i2c_address(&mut self, addr: I2cAddr) {
        self.state.lock().i2c_addr = Some(addr);
    }

    fn set_heartbeat(&mut self, heartbeat: Heartbeat) {
        let mut state = self.state.lock();
        state.heartbeat = Some(heartbeat);
        state.heartbeat_timer = Some(HeartbeatTimer::new(heartbeat.interval));
    }

    fn set_read_window(&mut self, window: ReadWindow) {
        self.state.lock().read_window = Some(window);
    }

    fn enable_write_coalescing(&mut self, enable: bool) {
        self.state.lock().write_coalescing = enable;
    }

    fn wait_for_write_completions(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.write_completion_waits += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.engaged = false;
    }
}
