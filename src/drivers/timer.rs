//! # Periodic timer driver (8253/8254 PIT, channel 0)
//!
//! Programs the interval timer for periodic interrupts and keeps the
//! monotonic tick count that backs `sleep` and uptime reporting. The tick
//! counter is a CPU-width atomic: mainline reads are single-word, so an
//! interrupt between the halves of a wider read cannot tear it.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::arch::{self, HwIo, PortIo};
use crate::interrupts::pic::PICS;

/// PIT input oscillator rate in Hz, fixed by the hardware.
pub const PIT_FREQUENCY: u32 = 1_193_182;

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;

/// Command byte: channel 0, lobyte/hibyte access, mode 3 (square wave),
/// binary counting.
const PIT_MODE_SQUARE_WAVE: u8 = 0x36;

/// Hardware line the PIT interrupts on.
const TIMER_IRQ_LINE: u8 = 0;

/// Owned timer state: the tick counter and the frequency it was armed
/// with. One process-wide instance lives in [`TIMER`]; tests construct
/// their own.
pub struct TimerState {
    ticks: AtomicUsize,
    frequency: AtomicU32,
}

static TIMER: TimerState = TimerState::new();

impl TimerState {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicUsize::new(0),
            frequency: AtomicU32::new(0),
        }
    }

    /// Divisor for the requested interrupt rate, clamped to the 16-bit
    /// range the hardware accepts. Frequency 0 clamps to the slowest
    /// valid rate instead of dividing by zero.
    fn divisor(frequency: u32) -> u16 {
        if frequency == 0 {
            return u16::MAX;
        }
        (PIT_FREQUENCY / frequency).clamp(1, u16::MAX as u32) as u16
    }

    /// Program channel 0 for periodic interrupts at `frequency` Hz. The
    /// hardware requires this exact order: mode/access command, then
    /// divisor low byte, then high byte.
    pub fn program<B: PortIo>(&self, bus: &mut B, frequency: u32) {
        self.frequency.store(frequency, Ordering::Relaxed);

        let divisor = Self::divisor(frequency);
        bus.write_u8(PIT_COMMAND, PIT_MODE_SQUARE_WAVE);
        bus.write_u8(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        bus.write_u8(PIT_CHANNEL0, (divisor >> 8) as u8);
    }

    /// IRQ0 callback: one interrupt, one tick. Wraps at the counter's
    /// native width; accepted behavior, not an error.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Whole seconds since init; 0 if the timer was never armed.
    pub fn uptime_seconds(&self) -> usize {
        let frequency = self.frequency.load(Ordering::Relaxed);
        if frequency == 0 {
            return 0;
        }
        self.ticks() / frequency as usize
    }

    /// Block the calling context for at least `ticks` timer periods,
    /// halting the CPU between interrupts. Any interrupt resumes the
    /// halt; the loop re-checks and may halt again. Not cancellable.
    pub fn sleep(&self, ticks: usize) {
        let target = self.ticks().wrapping_add(ticks);
        while self.ticks() < target {
            arch::halt();
        }
    }
}

/// Arm the timer: program the PIT divisor and unmask IRQ0.
///
/// Runs after `sti`, so the mask read-modify-write must hold the PIC lock
/// with interrupts disabled; the dispatch core takes the same lock for EOI.
pub fn init(frequency: u32) {
    TIMER.program(&mut HwIo, frequency);
    arch::without_interrupts(|| PICS.lock().clear_mask(TIMER_IRQ_LINE));
}

/// Invoked by the dispatch core for vector 32. Interrupt context only.
pub fn tick_callback() {
    TIMER.tick();
}

pub fn get_ticks() -> usize {
    TIMER.ticks()
}

pub fn get_uptime_seconds() -> usize {
    TIMER.uptime_seconds()
}

/// Blocking sleep on the global timer. See [`TimerState::sleep`].
pub fn sleep(ticks: usize) {
    TIMER.sleep(ticks);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingBus {
        writes: Vec<(u16, u8)>,
    }

    impl PortIo for RecordingBus {
        fn read_u8(&mut self, _port: u16) -> u8 {
            0
        }

        fn write_u8(&mut self, port: u16, value: u8) {
            self.writes.push((port, value));
        }

        fn read_u16(&mut self, _port: u16) -> u16 {
            0
        }

        fn write_u16(&mut self, _port: u16, _value: u16) {}
    }

    #[test]
    fn divisor_matches_oscillator_ratio() {
        assert_eq!(TimerState::divisor(100), (PIT_FREQUENCY / 100) as u16);
        assert_eq!(TimerState::divisor(1000), 1193);
    }

    #[test]
    fn divisor_clamps_to_valid_range() {
        // Too slow: divisor would overflow 16 bits.
        assert_eq!(TimerState::divisor(10), u16::MAX);
        // Too fast: divisor would round to 0.
        assert_eq!(TimerState::divisor(2_000_000), 1);
        // Never divide by zero.
        assert_eq!(TimerState::divisor(0), u16::MAX);
    }

    #[test]
    fn program_writes_command_then_divisor_low_then_high() {
        let timer = TimerState::new();
        let mut bus = RecordingBus { writes: Vec::new() };
        timer.program(&mut bus, 100);

        let divisor = PIT_FREQUENCY / 100;
        assert_eq!(
            bus.writes,
            vec![
                (PIT_COMMAND, PIT_MODE_SQUARE_WAVE),
                (PIT_CHANNEL0, (divisor & 0xFF) as u8),
                (PIT_CHANNEL0, (divisor >> 8) as u8),
            ]
        );
    }

    #[test]
    fn ticks_accumulate_and_convert_to_seconds() {
        let timer = TimerState::new();
        let mut bus = RecordingBus { writes: Vec::new() };
        timer.program(&mut bus, 100);

        for _ in 0..250 {
            timer.tick();
        }
        assert_eq!(timer.ticks(), 250);
        assert_eq!(timer.uptime_seconds(), 2);
    }

    #[test]
    fn uptime_is_zero_before_init() {
        let timer = TimerState::new();
        timer.tick();
        assert_eq!(timer.uptime_seconds(), 0);
    }
}
