//! # Interrupt infrastructure
//!
//! Everything needed to take the machine from "protected mode with a
//! borrowed boot GDT" to "live interrupt dispatch":
//!
//! - **gdt**: flat code/data segment table, built once and activated
//! - **idt**: 256 interrupt gates plus the fatal exception diagnostics
//! - **pic**: 8259 remap, mask management and interrupt acknowledgment
//! - **dispatch**: the `extern "C"` entry points the vector stubs call
//!
//! ## Vector layout
//!
//! | Vector | Type              | Routed to                    |
//! |--------|-------------------|------------------------------|
//! | 0-31   | CPU exceptions    | diagnostic handler (fatal)   |
//! | 32     | Timer (IRQ0)      | timer tick callback          |
//! | 33     | Keyboard (IRQ1)   | keyboard scancode callback   |
//! | 34-47  | Other IRQs        | acknowledged, ignored        |
//! | 48-255 | Unused            | zero gates                   |

pub mod dispatch;
pub mod gdt;
pub mod idt;
pub mod pic;

pub use idt::{VectorStub, VectorStubs};

/// Bring up both descriptor tables and the PIC, then enable interrupts.
/// `idt::init` owns the ordering: table load and PIC remap strictly
/// before `sti`.
pub fn init(stubs: &VectorStubs) {
    gdt::init();
    idt::init(stubs);
}
