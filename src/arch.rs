//! Low-level x86 primitives: port I/O, interrupt flag control, descriptor
//! table loads and the idle halt.
//!
//! Everything that touches real hardware is gated on `target_arch = "x86"`;
//! on other architectures the same functions compile to inert fallbacks so
//! the crate and its hosted tests build anywhere.

/// Byte/word access to CPU I/O ports.
///
/// Device code is generic over this trait so tests can substitute a fake
/// bus that records writes and scripts reads. [`HwIo`] is the real thing.
pub trait PortIo {
    fn read_u8(&mut self, port: u16) -> u8;
    fn write_u8(&mut self, port: u16, value: u8);
    fn read_u16(&mut self, port: u16) -> u16;
    fn write_u16(&mut self, port: u16, value: u16);
}

/// Port access backed by the real `in`/`out` instructions.
#[derive(Debug, Clone, Copy)]
pub struct HwIo;

impl PortIo for HwIo {
    #[inline]
    fn read_u8(&mut self, port: u16) -> u8 {
        unsafe { inb(port) }
    }

    #[inline]
    fn write_u8(&mut self, port: u16, value: u8) {
        unsafe { outb(port, value) }
    }

    #[inline]
    fn read_u16(&mut self, port: u16) -> u16 {
        unsafe { inw(port) }
    }

    #[inline]
    fn write_u16(&mut self, port: u16, value: u16) {
        unsafe { outw(port, value) }
    }
}

/// Pseudo-descriptor consumed by `lgdt`/`lidt`: 16-bit limit, 32-bit base.
#[repr(C, packed)]
pub struct TablePointer {
    pub limit: u16,
    pub base: u32,
}

#[cfg(target_arch = "x86")]
pub unsafe fn outb(port: u16, value: u8) {
    core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nostack, preserves_flags));
}

#[cfg(target_arch = "x86")]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    core::arch::asm!("in al, dx", in("dx") port, out("al") value, options(nostack, preserves_flags));
    value
}

#[cfg(target_arch = "x86")]
pub unsafe fn outw(port: u16, value: u16) {
    core::arch::asm!("out dx, ax", in("dx") port, in("ax") value, options(nostack, preserves_flags));
}

#[cfg(target_arch = "x86")]
pub unsafe fn inw(port: u16) -> u16 {
    let value: u16;
    core::arch::asm!("in ax, dx", in("dx") port, out("ax") value, options(nostack, preserves_flags));
    value
}

/// Globally enable maskable interrupts (`sti`).
#[cfg(target_arch = "x86")]
pub unsafe fn enable_interrupts() {
    core::arch::asm!("sti", options(nostack, preserves_flags));
}

/// Globally disable maskable interrupts (`cli`).
#[cfg(target_arch = "x86")]
pub unsafe fn disable_interrupts() {
    core::arch::asm!("cli", options(nostack, preserves_flags));
}

#[cfg(target_arch = "x86")]
const EFLAGS_IF: u32 = 1 << 9;

/// Run `f` with maskable interrupts disabled, restoring the previous
/// interrupt-flag state afterwards.
///
/// Mainline code must wrap any acquisition of a lock that an interrupt
/// handler also takes; otherwise an interrupt arriving mid-critical-section
/// spins forever on a lock its own interruptee holds.
#[cfg(target_arch = "x86")]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let flags: u32;
    unsafe { core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(preserves_flags)) };
    let was_enabled = flags & EFLAGS_IF != 0;
    unsafe { disable_interrupts() };
    let result = f();
    if was_enabled {
        unsafe { enable_interrupts() };
    }
    result
}

/// Idle until the next interrupt (`hlt`). The only suspension mechanism the
/// blocking driver calls have; resumed by any hardware interrupt.
#[cfg(target_arch = "x86")]
pub fn halt() {
    unsafe { core::arch::asm!("hlt", options(nostack, preserves_flags)) };
}

/// Faulting linear address of the most recent page fault.
#[cfg(target_arch = "x86")]
pub fn read_cr2() -> u32 {
    let value: u32;
    unsafe { core::arch::asm!("mov {}, cr2", out(reg) value, options(nostack, preserves_flags)) };
    value
}

#[cfg(target_arch = "x86")]
pub unsafe fn lgdt(pointer: &TablePointer) {
    let pointer = pointer as *const TablePointer;
    core::arch::asm!("lgdt [{}]", in(reg) pointer, options(nostack, preserves_flags));
}

#[cfg(target_arch = "x86")]
pub unsafe fn lidt(pointer: &TablePointer) {
    let pointer = pointer as *const TablePointer;
    core::arch::asm!("lidt [{}]", in(reg) pointer, options(nostack, preserves_flags));
}

/// Reload all segment registers from the freshly loaded GDT. The code
/// segment can only be changed with a far control transfer, hence the
/// push/`retf` pair.
#[cfg(target_arch = "x86")]
pub unsafe fn load_segments(code_selector: u16, data_selector: u16) {
    core::arch::asm!(
        "mov ds, {data:x}",
        "mov es, {data:x}",
        "mov fs, {data:x}",
        "mov gs, {data:x}",
        "mov ss, {data:x}",
        "push {code:e}",
        "lea {scratch}, [2f]",
        "push {scratch}",
        "retf",
        "2:",
        data = in(reg) data_selector as u32,
        code = in(reg) code_selector as u32,
        scratch = out(reg) _,
        options(preserves_flags),
    );
}

// Hosted fallbacks. Port reads return 0, everything else is a no-op, so the
// hardware-facing paths still type-check and link in unit tests.

#[cfg(not(target_arch = "x86"))]
pub unsafe fn outb(_port: u16, _value: u8) {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn inb(_port: u16) -> u8 {
    0
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn outw(_port: u16, _value: u16) {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn inw(_port: u16) -> u16 {
    0
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn enable_interrupts() {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn disable_interrupts() {}

#[cfg(not(target_arch = "x86"))]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(not(target_arch = "x86"))]
pub fn halt() {
    core::hint::spin_loop();
}

#[cfg(not(target_arch = "x86"))]
pub fn read_cr2() -> u32 {
    0
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn lgdt(_pointer: &TablePointer) {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn lidt(_pointer: &TablePointer) {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn load_segments(_code_selector: u16, _data_selector: u16) {}

/// Short delay between PIC command writes; a write to the POST diagnostic
/// port is the traditional way to give old controllers time to settle.
pub fn io_wait<B: PortIo>(bus: &mut B) {
    bus.write_u8(0x80, 0);
}
