//! # Global Descriptor Table
//!
//! Builds the three-entry flat-model GDT (null, kernel code, kernel data)
//! and activates it, replacing whatever temporary table the boot loader
//! left behind.
//!
//! ## Layout
//!
//! | Index | Selector | Descriptor                              |
//! |-------|----------|-----------------------------------------|
//! | 0     | 0x00     | Null (required by the CPU)              |
//! | 1     | 0x08     | Code: base 0, limit 4 GiB, ring 0       |
//! | 2     | 0x10     | Data: base 0, limit 4 GiB, ring 0       |
//!
//! Both live segments span the full 32-bit address space with 4 KiB
//! granularity, so segmentation is effectively disabled. The table is
//! built at compile time and never mutated after `init` loads it.

use core::mem::size_of;

use crate::arch::{self, TablePointer};

/// Kernel code segment selector (GDT index 1, ring 0).
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Kernel data segment selector (GDT index 2, ring 0).
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

const GDT_ENTRIES: usize = 3;

/// Access byte: present, ring 0, code segment, executable, readable.
const ACCESS_KERNEL_CODE: u8 = 0x9A;

/// Access byte: present, ring 0, data segment, writable.
const ACCESS_KERNEL_DATA: u8 = 0x92;

/// Granularity byte high nibble: 4 KiB granularity, 32-bit operands.
const GRANULARITY_FLAT_32: u8 = 0xC0;

/// 8-byte segment descriptor, bit-exact hardware layout.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SegmentDescriptor {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl SegmentDescriptor {
    /// The all-zero descriptor required at index 0.
    pub const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    /// Build a descriptor from a 32-bit base, 20-bit limit, access byte and
    /// granularity flags. The limit's high nibble shares a byte with the
    /// granularity flags.
    pub const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (granularity & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    pub fn access(&self) -> u8 {
        self.access
    }

    pub fn granularity(&self) -> u8 {
        self.granularity
    }

    pub fn limit_low(&self) -> u16 {
        self.limit_low
    }

    pub fn is_null(&self) -> bool {
        let Self { limit_low, base_low, base_mid, access, granularity, base_high } = *self;
        limit_low == 0
            && base_low == 0
            && base_mid == 0
            && access == 0
            && granularity == 0
            && base_high == 0
    }
}

#[repr(C, align(8))]
struct SegmentTable {
    entries: [SegmentDescriptor; GDT_ENTRIES],
}

static GDT: SegmentTable = SegmentTable {
    entries: [
        SegmentDescriptor::null(),
        SegmentDescriptor::new(0, 0xFFFFF, ACCESS_KERNEL_CODE, GRANULARITY_FLAT_32),
        SegmentDescriptor::new(0, 0xFFFFF, ACCESS_KERNEL_DATA, GRANULARITY_FLAT_32),
    ],
};

/// Load the GDT and reload every segment register from it. After this call
/// the boot-time table is unreachable; all further code runs under
/// [`KERNEL_CODE_SELECTOR`] / [`KERNEL_DATA_SELECTOR`].
pub fn init() {
    let pointer = TablePointer {
        limit: (size_of::<SegmentTable>() - 1) as u16,
        base: GDT.entries.as_ptr() as usize as u32,
    };
    unsafe {
        arch::lgdt(&pointer);
        arch::load_segments(KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR);
    }
}
