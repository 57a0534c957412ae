//! # Programmable Interrupt Controller (8259 PIC)
//!
//! Reprograms the two cascaded controllers away from the vector range the
//! CPU reserves for exceptions, and provides the mask/unmask/acknowledge
//! operations the drivers and dispatch core use.
//!
//! ## Vector remapping
//!
//! By default IRQ 0-15 conflict with CPU exception vectors 0-31, so the
//! initialization handshake moves them:
//! - master PIC: vectors 32-39 (IRQ 0-7)
//! - slave PIC:  vectors 40-47 (IRQ 8-15)
//!
//! After `initialize`, every line is masked except the cascade (IRQ2);
//! each driver unmasks its own line from its init routine.

use spin::Mutex;

use crate::arch::{self, HwIo, PortIo};

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

/// ICW1: start initialization, ICW4 follows.
const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
/// ICW3: master has a slave on IRQ2 / slave cascade identity is 2.
const ICW3_MASTER_CASCADE: u8 = 0x04;
const ICW3_SLAVE_IDENTITY: u8 = 0x02;
/// ICW4: 8086/88 mode.
const ICW4_8086: u8 = 0x01;
/// OCW2: non-specific end of interrupt.
const COMMAND_EOI: u8 = 0x20;

/// First vector delivered by the master PIC after remapping.
pub const IRQ_OFFSET: u8 = 32;

/// Boot mask policy: everything off except the cascade line (IRQ2).
const BOOT_MASK_MASTER: u8 = 0xFB;
const BOOT_MASK_SLAVE: u8 = 0xFF;

/// Both cascaded 8259 controllers, addressed through a [`PortIo`] bus.
pub struct ChainedPics<B: PortIo> {
    bus: B,
}

/// The controllers as wired on real hardware. Interrupt handlers take this
/// lock for EOI, so once interrupts are enabled mainline code may only
/// acquire it under [`crate::arch::without_interrupts`]; a tick landing
/// while mainline holds it would leave the handler spinning forever.
pub static PICS: Mutex<ChainedPics<HwIo>> = Mutex::new(ChainedPics::new(HwIo));

impl<B: PortIo> ChainedPics<B> {
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Run the four-step initialization-command-word handshake on both
    /// controllers, then apply the boot mask policy.
    ///
    /// The masks are read before the handshake and written back after it
    /// so a repeated init cannot lose caller-configured state; the boot
    /// policy is applied last.
    pub fn initialize(&mut self) {
        let saved_master = self.bus.read_u8(MASTER_DATA);
        let saved_slave = self.bus.read_u8(SLAVE_DATA);

        // ICW1: begin init, expect ICW4.
        self.bus.write_u8(MASTER_COMMAND, ICW1_INIT | ICW1_ICW4);
        arch::io_wait(&mut self.bus);
        self.bus.write_u8(SLAVE_COMMAND, ICW1_INIT | ICW1_ICW4);
        arch::io_wait(&mut self.bus);

        // ICW2: vector offsets.
        self.bus.write_u8(MASTER_DATA, IRQ_OFFSET);
        arch::io_wait(&mut self.bus);
        self.bus.write_u8(SLAVE_DATA, IRQ_OFFSET + 8);
        arch::io_wait(&mut self.bus);

        // ICW3: cascade wiring.
        self.bus.write_u8(MASTER_DATA, ICW3_MASTER_CASCADE);
        arch::io_wait(&mut self.bus);
        self.bus.write_u8(SLAVE_DATA, ICW3_SLAVE_IDENTITY);
        arch::io_wait(&mut self.bus);

        // ICW4: 8086 mode.
        self.bus.write_u8(MASTER_DATA, ICW4_8086);
        arch::io_wait(&mut self.bus);
        self.bus.write_u8(SLAVE_DATA, ICW4_8086);
        arch::io_wait(&mut self.bus);

        self.bus.write_u8(MASTER_DATA, saved_master);
        self.bus.write_u8(SLAVE_DATA, saved_slave);

        self.bus.write_u8(MASTER_DATA, BOOT_MASK_MASTER);
        self.bus.write_u8(SLAVE_DATA, BOOT_MASK_SLAVE);
    }

    /// Acknowledge a serviced interrupt. Lines 8-15 came through the
    /// slave, which needs its own EOI before the master's.
    pub fn send_eoi(&mut self, irq: u8) {
        if irq >= 8 {
            self.bus.write_u8(SLAVE_COMMAND, COMMAND_EOI);
        }
        self.bus.write_u8(MASTER_COMMAND, COMMAND_EOI);
    }

    /// Disable one hardware line, leaving every other mask bit untouched.
    pub fn set_mask(&mut self, irq: u8) {
        let (port, bit) = Self::mask_slot(irq);
        let value = self.bus.read_u8(port) | (1 << bit);
        self.bus.write_u8(port, value);
    }

    /// Enable one hardware line, leaving every other mask bit untouched.
    pub fn clear_mask(&mut self, irq: u8) {
        let (port, bit) = Self::mask_slot(irq);
        let value = self.bus.read_u8(port) & !(1 << bit);
        self.bus.write_u8(port, value);
    }

    fn mask_slot(irq: u8) -> (u16, u8) {
        if irq < 8 {
            (MASTER_DATA, irq)
        } else {
            (SLAVE_DATA, irq - 8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every port write and serves the two mask registers from
    /// shadow state, like the data ports on a real controller.
    struct FakeBus {
        writes: Vec<(u16, u8)>,
        master_mask: u8,
        slave_mask: u8,
    }

    impl FakeBus {
        fn new(master_mask: u8, slave_mask: u8) -> Self {
            Self {
                writes: Vec::new(),
                master_mask,
                slave_mask,
            }
        }
    }

    impl PortIo for FakeBus {
        fn read_u8(&mut self, port: u16) -> u8 {
            match port {
                MASTER_DATA => self.master_mask,
                SLAVE_DATA => self.slave_mask,
                _ => 0,
            }
        }

        fn write_u8(&mut self, port: u16, value: u8) {
            self.writes.push((port, value));
            match port {
                MASTER_DATA => self.master_mask = value,
                SLAVE_DATA => self.slave_mask = value,
                _ => {}
            }
        }

        fn read_u16(&mut self, _port: u16) -> u16 {
            0
        }

        fn write_u16(&mut self, _port: u16, _value: u16) {}
    }

    #[test]
    fn initialize_runs_full_icw_handshake_in_order() {
        let mut pics = ChainedPics::new(FakeBus::new(0xAA, 0x55));
        pics.initialize();

        let expected = [
            (MASTER_COMMAND, 0x11),
            (0x80, 0),
            (SLAVE_COMMAND, 0x11),
            (0x80, 0),
            (MASTER_DATA, 32),
            (0x80, 0),
            (SLAVE_DATA, 40),
            (0x80, 0),
            (MASTER_DATA, ICW3_MASTER_CASCADE),
            (0x80, 0),
            (SLAVE_DATA, ICW3_SLAVE_IDENTITY),
            (0x80, 0),
            (MASTER_DATA, ICW4_8086),
            (0x80, 0),
            (SLAVE_DATA, ICW4_8086),
            (0x80, 0),
            // Saved masks restored, then the boot policy applied.
            (MASTER_DATA, 0xAA),
            (SLAVE_DATA, 0x55),
            (MASTER_DATA, BOOT_MASK_MASTER),
            (SLAVE_DATA, BOOT_MASK_SLAVE),
        ];
        assert_eq!(pics.bus.writes, expected);
    }

    #[test]
    fn initialize_leaves_only_cascade_unmasked() {
        let mut pics = ChainedPics::new(FakeBus::new(0, 0));
        pics.initialize();
        assert_eq!(pics.bus.master_mask, 0b1111_1011);
        assert_eq!(pics.bus.slave_mask, 0xFF);
    }

    #[test]
    fn eoi_goes_to_master_only_for_low_lines() {
        let mut pics = ChainedPics::new(FakeBus::new(0, 0));
        pics.send_eoi(3);
        assert_eq!(pics.bus.writes, vec![(MASTER_COMMAND, COMMAND_EOI)]);
    }

    #[test]
    fn eoi_goes_to_both_controllers_for_slave_lines() {
        let mut pics = ChainedPics::new(FakeBus::new(0, 0));
        pics.send_eoi(10);
        assert_eq!(
            pics.bus.writes,
            vec![(SLAVE_COMMAND, COMMAND_EOI), (MASTER_COMMAND, COMMAND_EOI)]
        );
    }

    #[test]
    fn mask_round_trip_restores_original_byte() {
        let mut pics = ChainedPics::new(FakeBus::new(0xB8, 0x21));
        pics.set_mask(5);
        assert_eq!(pics.bus.master_mask, 0xB8 | 0x20);
        pics.clear_mask(5);
        assert_eq!(pics.bus.master_mask, 0xB8);
        // Slave state never touched.
        assert_eq!(pics.bus.slave_mask, 0x21);
    }

    #[test]
    fn slave_lines_rebase_the_bit_index() {
        let mut pics = ChainedPics::new(FakeBus::new(0, 0xF0));
        pics.clear_mask(12);
        assert_eq!(pics.bus.slave_mask, 0xE0);
        pics.set_mask(12);
        assert_eq!(pics.bus.slave_mask, 0xF0);
    }

    #[test]
    fn clear_mask_only_touches_requested_line() {
        let mut pics = ChainedPics::new(FakeBus::new(0xFB, 0xFF));
        pics.clear_mask(0);
        assert_eq!(pics.bus.master_mask, 0xFA);
        pics.clear_mask(1);
        assert_eq!(pics.bus.master_mask, 0xF8);
    }
}
