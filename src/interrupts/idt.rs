//! # Interrupt Descriptor Table and exception diagnostics
//!
//! Builds the 256-gate IDT, activates it, and owns the fatal CPU-exception
//! report.
//!
//! ## Vector layout
//!
//! | Vector  | Contents                                  |
//! |---------|-------------------------------------------|
//! | 0-31    | CPU exception gates                       |
//! | 32-47   | Remapped hardware IRQ gates               |
//! | 48-255  | Zero gates (fault as unhandled if taken)  |
//!
//! The low-level vector stubs are opaque trampolines supplied by the boot
//! layer; they save CPU state and call into [`dispatch`]. Gates are
//! write-once at init and never touched again from mainline code.
//!
//! [`dispatch`]: crate::interrupts::dispatch

use core::fmt;
use core::mem::size_of;

use bitflags::bitflags;
use spin::Mutex;

use crate::arch::{self, TablePointer};
use crate::console;
use crate::interrupts::gdt::KERNEL_CODE_SELECTOR;
use crate::interrupts::pic::PICS;

const IDT_ENTRIES: usize = 256;

/// Number of CPU exception vectors.
pub const EXCEPTION_VECTORS: usize = 32;

/// Number of hardware IRQ lines behind the two PICs.
pub const IRQ_VECTORS: usize = 16;

/// Gate attributes: present, ring 0, 32-bit interrupt gate. Arriving
/// through an interrupt gate clears IF, so handlers never nest.
pub const GATE_KERNEL_INTERRUPT: u8 = 0x8E;

/// A vector-stub trampoline provided by the boot layer.
pub type VectorStub = unsafe extern "C" fn();

/// The full set of trampolines the boot layer hands us at init.
pub struct VectorStubs {
    /// Stubs for CPU exception vectors 0-31.
    pub exceptions: [VectorStub; EXCEPTION_VECTORS],
    /// Stubs for hardware IRQ vectors 32-47.
    pub irqs: [VectorStub; IRQ_VECTORS],
}

/// 8-byte interrupt gate, bit-exact hardware layout.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl GateDescriptor {
    /// The zero gate. Any vector left like this faults as an unhandled
    /// interrupt if it is ever delivered.
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    pub fn new(handler: usize, selector: u16, type_attr: u8) -> Self {
        let offset = handler as u32;
        Self {
            offset_low: (offset & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((offset >> 16) & 0xFFFF) as u16,
        }
    }

    pub fn offset(&self) -> u32 {
        let Self { offset_low, offset_high, .. } = *self;
        (offset_high as u32) << 16 | offset_low as u32
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn type_attr(&self) -> u8 {
        self.type_attr
    }

    pub fn is_missing(&self) -> bool {
        let Self { offset_low, selector, zero, type_attr, offset_high } = *self;
        offset_low == 0 && selector == 0 && zero == 0 && type_attr == 0 && offset_high == 0
    }
}

/// The 256-entry table itself.
#[repr(C, align(8))]
pub struct InterruptTable {
    entries: [GateDescriptor; IDT_ENTRIES],
}

impl InterruptTable {
    pub const fn new() -> Self {
        Self {
            entries: [GateDescriptor::missing(); IDT_ENTRIES],
        }
    }

    pub fn set_gate(&mut self, vector: u8, handler: usize, selector: u16, type_attr: u8) {
        self.entries[vector as usize] = GateDescriptor::new(handler, selector, type_attr);
    }

    pub fn entry(&self, vector: u8) -> GateDescriptor {
        self.entries[vector as usize]
    }

    /// Zero every gate, then point vectors 0-31 at the exception stubs and
    /// 32-47 at the IRQ stubs. Vectors 48-255 stay zero.
    pub fn install(&mut self, stubs: &VectorStubs) {
        self.entries = [GateDescriptor::missing(); IDT_ENTRIES];
        for (vector, stub) in stubs.exceptions.iter().enumerate() {
            self.set_gate(
                vector as u8,
                *stub as usize,
                KERNEL_CODE_SELECTOR,
                GATE_KERNEL_INTERRUPT,
            );
        }
        for (line, stub) in stubs.irqs.iter().enumerate() {
            self.set_gate(
                (EXCEPTION_VECTORS + line) as u8,
                *stub as usize,
                KERNEL_CODE_SELECTOR,
                GATE_KERNEL_INTERRUPT,
            );
        }
    }

    fn pointer(&self) -> TablePointer {
        TablePointer {
            limit: (size_of::<[GateDescriptor; IDT_ENTRIES]>() - 1) as u16,
            base: self.entries.as_ptr() as usize as u32,
        }
    }
}

static IDT: Mutex<InterruptTable> = Mutex::new(InterruptTable::new());

/// Build and activate the IDT, then bring up the PIC and enable
/// interrupts.
///
/// The ordering is a hard requirement: the table must be loaded and the
/// PIC remapped before `sti`, otherwise a hardware interrupt could fire
/// into an unmapped vector.
pub fn init(stubs: &VectorStubs) {
    {
        let mut idt = IDT.lock();
        idt.install(stubs);
        unsafe { arch::lidt(&idt.pointer()) };
    }
    PICS.lock().initialize();
    unsafe { arch::enable_interrupts() };
}

// --- CPU exception diagnostics -----------------------------------------

/// Exception names indexed by vector, per the Intel SDM.
static EXCEPTION_NAMES: [&str; EXCEPTION_VECTORS] = [
    "Division By Zero",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved",
    "x87 Floating-Point Exception",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
    "Virtualization Exception",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Security Exception",
    "Reserved",
];

const VECTOR_DIVIDE_ERROR: u32 = 0;
const VECTOR_INVALID_OPCODE: u32 = 6;
const VECTOR_GENERAL_PROTECTION: u32 = 13;
const VECTOR_PAGE_FAULT: u32 = 14;

bitflags! {
    /// Page fault error code pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultErrorCode: u32 {
        const PRESENT        = 1 << 0;
        const WRITE          = 1 << 1;
        const USER_MODE      = 1 << 2;
        const RESERVED_WRITE = 1 << 3;
    }
}

/// Terminal handler for CPU exceptions (vectors 0-31).
///
/// Writes a panic report through the console sink, then disables
/// interrupts and parks the CPU in a low-power wait. Never returns; no
/// exception is ever resumed or retried.
pub fn handle_exception(vector: u32, error_code: u32) -> ! {
    let fault_address = arch::read_cr2();
    let _ = write_exception_report(&mut console::Writer, vector, error_code, fault_address);
    unsafe { arch::disable_interrupts() };
    loop {
        arch::halt();
    }
}

/// Format the human-readable panic report. Split from [`handle_exception`]
/// so the report itself stays testable; `fault_address` is the CR2 value
/// and only meaningful for page faults.
pub fn write_exception_report(
    w: &mut dyn fmt::Write,
    vector: u32,
    error_code: u32,
    fault_address: u32,
) -> fmt::Result {
    writeln!(w, "\n")?;
    writeln!(w, "================== KERNEL PANIC ==================")?;

    let name = EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("Unknown");
    writeln!(w, "Exception: {}", name)?;
    writeln!(w, "Vector: {} (0x{:x})", vector, vector)?;
    writeln!(w, "Error Code: 0x{:x}", error_code)?;

    match vector {
        VECTOR_PAGE_FAULT => {
            let cause = PageFaultErrorCode::from_bits_truncate(error_code);
            writeln!(w, "\nPage Fault Details:")?;
            writeln!(w, "  Faulting Address: 0x{:x}", fault_address)?;
            let reason = if !cause.contains(PageFaultErrorCode::PRESENT) {
                "Page not present"
            } else if cause.contains(PageFaultErrorCode::WRITE) {
                "Write to read-only page"
            } else if cause.contains(PageFaultErrorCode::USER_MODE) {
                "User mode access to kernel page"
            } else if cause.contains(PageFaultErrorCode::RESERVED_WRITE) {
                "Reserved bit set"
            } else {
                "Unknown reason"
            };
            writeln!(w, "  Caused by: {}", reason)?;
        }
        VECTOR_GENERAL_PROTECTION => {
            writeln!(w, "\nGeneral Protection Fault Details:")?;
            writeln!(w, "  Segment Selector: 0x{:x}", error_code & 0xFFF8)?;
            let table = if error_code & 0x2 != 0 {
                "IDT"
            } else if error_code & 0x4 != 0 {
                "LDT"
            } else {
                "GDT"
            };
            writeln!(w, "  Table: {}", table)?;
            if error_code & 0x1 != 0 {
                writeln!(w, "  External event")?;
            }
        }
        VECTOR_DIVIDE_ERROR => {
            writeln!(w, "\nDivision by zero detected!")?;
            writeln!(w, "Check your arithmetic operations.")?;
        }
        VECTOR_INVALID_OPCODE => {
            writeln!(w, "\nInvalid or undefined instruction!")?;
            writeln!(w, "Possible causes:")?;
            writeln!(w, "  - Corrupted code")?;
            writeln!(w, "  - Jump to invalid address")?;
            writeln!(w, "  - Wrong CPU architecture")?;
        }
        _ => {}
    }

    writeln!(w)?;
    writeln!(w, "==================================================")?;
    writeln!(w, "The system has been halted to prevent damage.")?;
    writeln!(w, "Please reboot the system.")?;
    writeln!(w, "==================================================\n")?;
    Ok(())
}
