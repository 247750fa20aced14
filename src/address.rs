//! Page/offset address encoding for the two DataFlash page-size generations.
//!
//! DataFlash chips do not use linear byte addresses. The 24-bit address sent
//! after an opcode is split into a page field and a byte-offset field, and the
//! position of the split depends on the page size of the chip: 9 offset bits
//! for 264-byte pages, 11 offset bits for 1056-byte pages.

/// Page-size variant of a chip, selected at the type level through
/// [`PageGeometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageSize {
    /// 264-byte pages.
    B264,
    /// 1056-byte pages.
    B1056,
}

impl PageSize {
    /// Maps a page size in bytes to its variant.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is neither 264 nor 1056.
    #[track_caller]
    pub fn from_bytes(bytes: usize) -> PageSize {
        match bytes {
            264 => PageSize::B264,
            1056 => PageSize::B1056,
            _ => panic!("unsupported DataFlash page size: {}", bytes),
        }
    }

    /// Size of a page in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            PageSize::B264 => Page264::PAGE_SIZE,
            PageSize::B1056 => Page1056::PAGE_SIZE,
        }
    }
}

/// Trait for defining the page layout of a flash.
///
/// Implemented by [`Page264`] and [`Page1056`]; the driver is generic over it
/// so the bit packing is resolved at compile time.
pub trait PageGeometry {
    /// The page size in bytes.
    const PAGE_SIZE: usize;
    /// Number of address bits holding the byte offset.
    const OFFSET_BITS: u32;
    /// Runtime tag of this geometry.
    const VARIANT: PageSize;

    /// Packs `page` and `offset` into the three address bytes following an
    /// opcode. Both are expected to be in range already.
    fn encode(page: u32, offset: u32) -> [u8; 3];

    /// Packs a block number for the block erase command.
    fn encode_block(block: u32) -> [u8; 3];
}

/// Layout of chips with 264-byte pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page264;

/// Layout of chips with 1056-byte pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page1056;

impl PageGeometry for Page264 {
    const PAGE_SIZE: usize = 264;
    const OFFSET_BITS: u32 = 9;
    const VARIANT: PageSize = PageSize::B264;

    fn encode(page: u32, offset: u32) -> [u8; 3] {
        [
            (page >> 7) as u8,
            ((page << 1) as u8) | ((offset >> 8) & 0x1) as u8,
            offset as u8,
        ]
    }

    fn encode_block(block: u32) -> [u8; 3] {
        [(block >> 4) as u8, (block << 4) as u8, 0]
    }
}

impl PageGeometry for Page1056 {
    const PAGE_SIZE: usize = 1056;
    const OFFSET_BITS: u32 = 11;
    const VARIANT: PageSize = PageSize::B1056;

    fn encode(page: u32, offset: u32) -> [u8; 3] {
        [
            (page >> 5) as u8,
            ((page << 3) as u8) | ((offset >> 8) & 0x7) as u8,
            offset as u8,
        ]
    }

    fn encode_block(block: u32) -> [u8; 3] {
        [(block >> 2) as u8, (block << 6) as u8, 0]
    }
}
