//! # kcore
//!
//! Interrupt and device-I/O core for a minimal 32-bit protected-mode
//! kernel: descriptor tables, 8259 PIC management, the exception/IRQ
//! dispatch path, and the interrupt-driven timer and keyboard drivers.
//!
//! The boot layer is expected to enter `kernel_main`-style code in
//! protected mode with a temporary GDT, register its display sink, call
//! [`init`] with its vector-stub trampolines, then bring up the drivers:
//!
//! ```ignore
//! kcore::console::register(vga_ops());
//! kcore::init(&stubs);
//! kcore::drivers::timer::init(100);
//! kcore::drivers::keyboard::init();
//! ```
//!
//! Everything else (shell, rendering, string utilities) lives outside
//! this crate.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod console;
pub mod drivers;
pub mod interrupts;

pub use interrupts::{VectorStub, VectorStubs};

/// One-shot bring-up: activate the GDT, build and load the IDT, remap
/// the PIC and enable interrupts. Drivers are armed separately by the
/// caller, in mainline context, after this returns.
pub fn init(stubs: &VectorStubs) {
    interrupts::init(stubs);
}
