//! # Common dispatch path
//!
//! The two narrow entry points the boot layer's vector stubs call after
//! saving CPU state. Exceptions funnel into the fatal diagnostic handler;
//! IRQs route to the device callbacks and are acknowledged here, exactly
//! once each, after the callback returns.
//!
//! Both entry points run in interrupt context: further maskable
//! interrupts are disabled for their whole duration, so the device
//! callbacks must not block or allocate.

use crate::drivers::{keyboard, timer};
use crate::interrupts::idt;
use crate::interrupts::pic::{IRQ_OFFSET, PICS};

/// Vector the timer tick arrives on (IRQ0 after remapping).
pub const TIMER_VECTOR: u32 = IRQ_OFFSET as u32;

/// Vector the keyboard scan code arrives on (IRQ1 after remapping).
pub const KEYBOARD_VECTOR: u32 = IRQ_OFFSET as u32 + 1;

/// Entry point for CPU exception vectors 0-31. Interrupts are already
/// disabled by the gate; there is no recoverable-exception path.
#[no_mangle]
pub extern "C" fn exception_dispatch(vector: u32, error_code: u32) -> ! {
    idt::handle_exception(vector, error_code)
}

/// Entry point for hardware IRQ vectors 32-47. Unrouted vectors are
/// acknowledged and otherwise ignored. EOI is sent after the device
/// callback returns; sending it earlier risks losing a fast repeat
/// interrupt.
#[no_mangle]
pub extern "C" fn irq_dispatch(vector: u32) {
    match vector {
        TIMER_VECTOR => timer::tick_callback(),
        KEYBOARD_VECTOR => keyboard::interrupt_callback(),
        _ => {}
    }

    let line = vector.saturating_sub(TIMER_VECTOR) as u8;
    PICS.lock().send_eoi(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::timer;

    #[test]
    fn timer_vector_routes_to_tick_callback() {
        let before = timer::get_ticks();
        irq_dispatch(TIMER_VECTOR);
        assert!(timer::get_ticks() > before);
    }

    #[test]
    fn driver_init_leaves_pic_lock_free_for_dispatch() {
        crate::drivers::timer::init(100);
        crate::drivers::keyboard::init();
        // Init must not return still holding the PIC lock; the very next
        // interrupt needs it for EOI.
        drop(PICS.lock());
        irq_dispatch(TIMER_VECTOR);
    }

    #[test]
    fn unrouted_vector_is_acknowledged_without_panicking() {
        // No handler installed for IRQ7; the EOI byte sequence itself is
        // covered by the pic module tests.
        irq_dispatch(TIMER_VECTOR + 7);
    }
}
