use bitflags::bitflags;

bitflags! {
    /// Status register bits (first byte of the status read).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// The device finished its last internal operation.
        const READY = 1 << 7;
        /// The last compare found a difference between page and buffer.
        const COMPARE_MISMATCH = 1 << 6;
        /// The 4 density bits.
        const DENSITY = 0b0011_1100;
        /// Sector protection is enabled.
        const PROTECT = 1 << 1;
        /// The chip is configured for binary (power of two) page sizes.
        const PAGE_SIZE_BINARY = 1 << 0;
    }
}

impl Status {
    /// The density code reported by the chip.
    pub fn density(self) -> u8 {
        (self.bits() & Self::DENSITY.bits()) >> 2
    }
}

bitflags! {
    /// Second status byte, only returned by chips with an extended status
    /// register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusExt: u8 {
        /// Mirror of [`Status::READY`].
        const READY = 1 << 7;
        /// The last program or erase failed.
        const PROGRAM_ERROR = 1 << 5;
        /// Sector lockdown is enabled.
        const SECTOR_LOCKDOWN = 1 << 3;
        /// A program through buffer 2 is suspended.
        const PROGRAM_SUSPEND_2 = 1 << 2;
        /// A program through buffer 1 is suspended.
        const PROGRAM_SUSPEND_1 = 1 << 1;
        /// A sector erase is suspended.
        const ERASE_SUSPEND = 1 << 0;
    }
}
