//! # PS/2 keyboard driver
//!
//! Decodes set-1 scan codes into ASCII using modifier state, feeds a
//! lock-free ring buffer, and echoes to the display sink.
//!
//! Two execution contexts touch this module:
//! - the interrupt handler (the only producer) reads the scan code,
//!   updates modifier state and pushes decoded characters;
//! - mainline code (the only consumer) polls `has_data` or blocks in
//!   `getchar`.
//!
//! The split read/write cursors of [`CharQueue`] make that pairing safe
//! without a lock: each side only ever advances its own cursor. When the
//! buffer is full, new characters are silently dropped; the producer
//! never overwrites unread data and the hardware cannot be throttled.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::arch::{self, HwIo, PortIo};
use crate::console;
use crate::interrupts::pic::PICS;

const KEYBOARD_DATA_PORT: u16 = 0x60;

/// Hardware line the keyboard controller interrupts on.
const KEYBOARD_IRQ_LINE: u8 = 1;

const BUFFER_SIZE: usize = 256;

/// Key release scan codes have the high bit set.
const RELEASE_BIT: u8 = 0x80;

const SC_LSHIFT_PRESS: u8 = 0x2A;
const SC_RSHIFT_PRESS: u8 = 0x36;
const SC_LSHIFT_RELEASE: u8 = 0xAA;
const SC_RSHIFT_RELEASE: u8 = 0xB6;
const SC_CTRL_PRESS: u8 = 0x1D;
const SC_CTRL_RELEASE: u8 = 0x9D;
const SC_ALT_PRESS: u8 = 0x38;
const SC_ALT_RELEASE: u8 = 0xB8;
const SC_CAPS_LOCK: u8 = 0x3A;

/// US QWERTY scan code to ASCII, unshifted. Index = scan code, 0 =
/// unmapped.
static KEYMAP_BASE: [u8; 128] = [
    0, 0, b'1', b'2', b'3', b'4', b'5', b'6', // 0x00-0x07
    b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t', // 0x08-0x0F
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', // 0x10-0x17
    b'o', b'p', b'[', b']', b'\n', 0, b'a', b's', // 0x18-0x1F
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', // 0x20-0x27
    b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v', // 0x28-0x2F
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', // 0x30-0x37
    0, b' ', 0, 0, 0, 0, 0, 0, // 0x38-0x3F
    0, 0, 0, 0, 0, 0, 0, b'7', // 0x40-0x47
    b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1', // 0x48-0x4F
    b'2', b'3', b'0', b'.', 0, 0, 0, 0, // 0x50-0x57
    0, 0, 0, 0, 0, 0, 0, 0, // 0x58-0x5F
    0, 0, 0, 0, 0, 0, 0, 0, // 0x60-0x67
    0, 0, 0, 0, 0, 0, 0, 0, // 0x68-0x6F
    0, 0, 0, 0, 0, 0, 0, 0, // 0x70-0x77
    0, 0, 0, 0, 0, 0, 0, 0, // 0x78-0x7F
];

/// Same table with shift held.
static KEYMAP_SHIFT: [u8; 128] = [
    0, 0, b'!', b'@', b'#', b'$', b'%', b'^', // 0x00-0x07
    b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t', // 0x08-0x0F
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', // 0x10-0x17
    b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S', // 0x18-0x1F
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', // 0x20-0x27
    b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V', // 0x28-0x2F
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', // 0x30-0x37
    0, b' ', 0, 0, 0, 0, 0, 0, // 0x38-0x3F
    0, 0, 0, 0, 0, 0, 0, b'7', // 0x40-0x47
    b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1', // 0x48-0x4F
    b'2', b'3', b'0', b'.', 0, 0, 0, 0, // 0x50-0x57
    0, 0, 0, 0, 0, 0, 0, 0, // 0x58-0x5F
    0, 0, 0, 0, 0, 0, 0, 0, // 0x60-0x67
    0, 0, 0, 0, 0, 0, 0, 0, // 0x68-0x6F
    0, 0, 0, 0, 0, 0, 0, 0, // 0x70-0x77
    0, 0, 0, 0, 0, 0, 0, 0, // 0x78-0x7F
];

bitflags! {
    /// Held-key and toggle state. Mutated only inside the interrupt
    /// handler; mainline readers get a lock-free snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT     = 1 << 0;
        const CTRL      = 1 << 1;
        const ALT       = 1 << 2;
        const CAPS_LOCK = 1 << 3;
    }
}

/// Single-producer single-consumer ring of decoded characters. Full when
/// advancing the write cursor would collide with the read cursor, i.e.
/// one slot is always sacrificed.
pub struct CharQueue {
    slots: UnsafeCell<[u8; BUFFER_SIZE]>,
    /// Write cursor, advanced only by the interrupt handler.
    head: AtomicUsize,
    /// Read cursor, advanced only by `getchar`.
    tail: AtomicUsize,
}

// Safety: only one producer (the keyboard ISR) stores through `slots`, at
// an index the consumer cannot read until the release-store of `head`
// publishes it; the mirror-image argument covers `tail`.
unsafe impl Sync for CharQueue {}

impl CharQueue {
    pub const fn new() -> Self {
        Self {
            slots: UnsafeCell::new([0; BUFFER_SIZE]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Producer side. Returns false when the queue was full and the byte
    /// was dropped.
    pub fn push(&self, byte: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % BUFFER_SIZE;
        if next == self.tail.load(Ordering::Acquire) {
            return false;
        }
        unsafe { (*self.slots.get())[head] = byte };
        self.head.store(next, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = unsafe { (*self.slots.get())[tail] };
        self.tail.store((tail + 1) % BUFFER_SIZE, Ordering::Release);
        Some(byte)
    }

    pub fn has_data(&self) -> bool {
        self.tail.load(Ordering::Relaxed) != self.head.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + BUFFER_SIZE - tail) % BUFFER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        !self.has_data()
    }

    fn reset(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }
}

/// Owned keyboard state: the character queue plus modifier flags. One
/// process-wide instance lives in [`KEYBOARD`]; tests construct their
/// own.
pub struct KeyboardState {
    queue: CharQueue,
    /// `Modifiers` bits. Atomic rather than locked so a mainline read can
    /// never block the interrupt handler (or vice versa).
    modifiers: AtomicU8,
}

static KEYBOARD: KeyboardState = KeyboardState::new();

impl KeyboardState {
    pub const fn new() -> Self {
        Self {
            queue: CharQueue::new(),
            modifiers: AtomicU8::new(0),
        }
    }

    /// Run one scan code through the modifier state machine and the
    /// translation tables. Returns the decoded ASCII byte for a mapped
    /// key press, `None` for modifier transitions, releases and unmapped
    /// codes.
    pub fn decode(&self, scancode: u8) -> Option<u8> {
        // Only the interrupt handler mutates the flags, so a plain
        // load-modify-store cannot race with another writer.
        let mut modifiers = self.modifiers();
        let decoded = match scancode {
            SC_LSHIFT_PRESS | SC_RSHIFT_PRESS => {
                modifiers.insert(Modifiers::SHIFT);
                None
            }
            SC_LSHIFT_RELEASE | SC_RSHIFT_RELEASE => {
                modifiers.remove(Modifiers::SHIFT);
                None
            }
            SC_CTRL_PRESS => {
                modifiers.insert(Modifiers::CTRL);
                None
            }
            SC_CTRL_RELEASE => {
                modifiers.remove(Modifiers::CTRL);
                None
            }
            SC_ALT_PRESS => {
                modifiers.insert(Modifiers::ALT);
                None
            }
            SC_ALT_RELEASE => {
                modifiers.remove(Modifiers::ALT);
                None
            }
            SC_CAPS_LOCK => {
                modifiers.toggle(Modifiers::CAPS_LOCK);
                None
            }
            // Releases of regular keys are dropped silently.
            _ if scancode & RELEASE_BIT != 0 => None,
            _ => {
                let key = (scancode & 0x7F) as usize;
                let ascii = if modifiers.contains(Modifiers::SHIFT) {
                    KEYMAP_SHIFT[key]
                } else {
                    let ascii = KEYMAP_BASE[key];
                    // Caps lock only affects letters, and only without
                    // shift.
                    if modifiers.contains(Modifiers::CAPS_LOCK) && ascii.is_ascii_lowercase() {
                        ascii.to_ascii_uppercase()
                    } else {
                        ascii
                    }
                };
                if ascii == 0 {
                    None
                } else {
                    Some(ascii)
                }
            }
        };
        self.modifiers.store(modifiers.bits(), Ordering::Relaxed);
        decoded
    }

    /// Full interrupt-side pipeline for one scan code: decode, buffer,
    /// echo. Dropped characters (queue full) are still echoed, matching
    /// the no-backpressure contract.
    pub fn handle_scancode(&self, scancode: u8) {
        if let Some(ascii) = self.decode(scancode) {
            self.queue.push(ascii);
            if ascii == 0x08 {
                console::backspace();
            } else {
                console::put_char(ascii);
            }
        }
    }

    pub fn has_data(&self) -> bool {
        self.queue.has_data()
    }

    /// Block until a character is available, then return it. Each halt is
    /// resumed only by a hardware interrupt; not cancellable.
    pub fn getchar(&self) -> u8 {
        loop {
            if let Some(byte) = self.queue.pop() {
                return byte;
            }
            crate::arch::halt();
        }
    }

    /// Lock-free snapshot of the modifier flags; safe from any context.
    pub fn modifiers(&self) -> Modifiers {
        Modifiers::from_bits_truncate(self.modifiers.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        self.queue.reset();
        self.modifiers.store(0, Ordering::Relaxed);
    }
}

/// Reset cursors and modifier state, then unmask IRQ1.
///
/// Runs after `sti` (typically with the timer already firing), so the mask
/// read-modify-write must hold the PIC lock with interrupts disabled.
pub fn init() {
    KEYBOARD.reset();
    arch::without_interrupts(|| PICS.lock().clear_mask(KEYBOARD_IRQ_LINE));
}

/// Invoked by the dispatch core for vector 33. Interrupt context only:
/// reads the scan code from the controller and runs it through the
/// global keyboard state.
pub fn interrupt_callback() {
    let scancode = HwIo.read_u8(KEYBOARD_DATA_PORT);
    KEYBOARD.handle_scancode(scancode);
}

/// True iff a decoded character is waiting. Idempotent; never advances
/// the read cursor.
pub fn has_data() -> bool {
    KEYBOARD.has_data()
}

/// Blocking read of the next decoded character.
pub fn getchar() -> u8 {
    KEYBOARD.getchar()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SC_A_PRESS: u8 = 0x1E;
    const SC_A_RELEASE: u8 = 0x9E;
    const SC_ONE_PRESS: u8 = 0x02;
    const SC_BACKSPACE_PRESS: u8 = 0x0E;

    #[test]
    fn plain_press_maps_to_lowercase() {
        let kbd = KeyboardState::new();
        assert_eq!(kbd.decode(SC_A_PRESS), Some(b'a'));
    }

    #[test]
    fn shift_sequence_yields_single_uppercase_char() {
        let kbd = KeyboardState::new();
        for sc in [SC_LSHIFT_PRESS, SC_A_PRESS, SC_A_RELEASE, SC_LSHIFT_RELEASE] {
            kbd.handle_scancode(sc);
        }
        assert_eq!(kbd.queue.len(), 1);
        assert_eq!(kbd.queue.pop(), Some(b'A'));
    }

    #[test]
    fn caps_lock_uppercases_letters_only() {
        let kbd = KeyboardState::new();
        kbd.handle_scancode(SC_CAPS_LOCK);
        assert_eq!(kbd.decode(SC_A_PRESS), Some(b'A'));
        assert_eq!(kbd.decode(SC_ONE_PRESS), Some(b'1'));

        // Toggling again restores lowercase.
        kbd.handle_scancode(SC_CAPS_LOCK);
        assert_eq!(kbd.decode(SC_A_PRESS), Some(b'a'));
    }

    #[test]
    fn shift_wins_over_caps_lock_table() {
        let kbd = KeyboardState::new();
        kbd.handle_scancode(SC_CAPS_LOCK);
        kbd.handle_scancode(SC_LSHIFT_PRESS);
        // Shifted table is used as-is; '1' becomes '!'.
        assert_eq!(kbd.decode(SC_ONE_PRESS), Some(b'!'));
    }

    #[test]
    fn releases_and_unmapped_codes_leave_buffer_unchanged() {
        let kbd = KeyboardState::new();
        // Release of a regular key, an unmapped press (F1 = 0x3B), and an
        // unmapped release.
        for sc in [SC_A_RELEASE, 0x3B, 0xBB] {
            kbd.handle_scancode(sc);
        }
        assert!(!kbd.has_data());
        assert!(kbd.queue.is_empty());
    }

    #[test]
    fn round_trip_preserves_press_order() {
        let kbd = KeyboardState::new();
        // "hi" followed by enter.
        for sc in [0x23u8, 0x17, 0x1C] {
            kbd.handle_scancode(sc);
        }
        assert_eq!(kbd.getchar(), b'h');
        assert_eq!(kbd.getchar(), b'i');
        assert_eq!(kbd.getchar(), b'\n');
        assert!(!kbd.has_data());
    }

    #[test]
    fn has_data_is_idempotent() {
        let kbd = KeyboardState::new();
        kbd.handle_scancode(SC_A_PRESS);
        for _ in 0..16 {
            assert!(kbd.has_data());
        }
        assert_eq!(kbd.queue.len(), 1);
    }

    #[test]
    fn full_buffer_drops_new_chars_but_modifiers_still_update() {
        let kbd = KeyboardState::new();
        for _ in 0..BUFFER_SIZE - 1 {
            assert!(kbd.queue.push(b'x'));
        }
        // Queue is now full: capacity - 1 usable slots.
        assert!(!kbd.queue.push(b'y'));

        kbd.handle_scancode(SC_LSHIFT_PRESS);
        kbd.handle_scancode(SC_A_PRESS);

        assert!(kbd.modifiers().contains(Modifiers::SHIFT));
        assert_eq!(kbd.queue.len(), BUFFER_SIZE - 1);
        for _ in 0..BUFFER_SIZE - 1 {
            assert_eq!(kbd.queue.pop(), Some(b'x'));
        }
        assert_eq!(kbd.queue.pop(), None);
    }

    #[test]
    fn modifier_snapshots_never_block_the_decoder() {
        let kbd = KeyboardState::new();
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                for _ in 0..10_000 {
                    let _ = kbd.modifiers();
                }
            });
            for _ in 0..1_000 {
                kbd.handle_scancode(SC_LSHIFT_PRESS);
                kbd.handle_scancode(SC_A_PRESS);
                kbd.handle_scancode(SC_LSHIFT_RELEASE);
            }
            reader.join().unwrap();
        });
        assert!(!kbd.modifiers().contains(Modifiers::SHIFT));
    }

    #[test]
    fn queue_reports_length_across_wraparound() {
        let queue = CharQueue::new();
        for round in 0..3 {
            for i in 0..200u8 {
                assert!(queue.push(i), "round {}", round);
            }
            for i in 0..200u8 {
                assert_eq!(queue.pop(), Some(i));
            }
            assert_eq!(queue.len(), 0);
            assert!(queue.is_empty());
        }
    }

    mod echo {
        use super::*;
        use std::sync::Mutex as StdMutex;

        static CAPTURE: StdMutex<Vec<u8>> = StdMutex::new(Vec::new());

        fn capture_put(byte: u8) {
            CAPTURE.lock().unwrap().push(byte);
        }

        fn capture_backspace() {
            CAPTURE.lock().unwrap().push(0x7F);
        }

        #[test]
        fn presses_echo_through_console_sink() {
            console::register(console::ConsoleOps {
                put_char: capture_put,
                backspace: capture_backspace,
            });
            CAPTURE.lock().unwrap().clear();

            let kbd = KeyboardState::new();
            kbd.handle_scancode(SC_A_PRESS);
            kbd.handle_scancode(SC_BACKSPACE_PRESS);

            let seen = CAPTURE.lock().unwrap().clone();
            assert!(seen.contains(&b'a'));
            // Backspace routes to the cursor-retreat operation.
            assert!(seen.contains(&0x7F));
        }
    }
}
