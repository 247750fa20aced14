use core::fmt::{self, Debug, Display};
use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// The error type used by this library.
///
/// This can encapsulate a transport error, and adds its own protocol errors
/// on top of that.
///
/// Invalid arguments that can only come from a programming mistake (a buffer
/// number other than 1 or 2, an unknown page size) are not represented here;
/// they panic instead.
#[non_exhaustive]
pub enum Error<E> {
    /// A transfer on the underlying bus failed.
    ///
    /// A command may have been sent partially, so the contents of the on-chip
    /// buffers and of the addressed page should be considered unknown.
    Transport(E),

    /// A page, offset or block number lies outside the device.
    ///
    /// Nothing was sent to the device.
    OutOfRange,

    /// The device flagged a failed program or erase in the extended status
    /// register.
    ProgramErase,

    /// A page did not compare equal to the erased pattern.
    NotErased,

    /// The device did not report ready within the configured number of
    /// status polls.
    Timeout,

    /// An erase range did not start and end on page boundaries.
    Misaligned,
}

impl<E> Error<E> {
    /// Returns `true` if the device itself reported a program, erase or
    /// verify fault.
    pub fn is_data_fault(&self) -> bool {
        matches!(self, Error::ProgramErase | Error::NotErased)
    }
}

impl<E: Debug> Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Error::Transport({:?})", e),
            Error::OutOfRange => f.write_str("Error::OutOfRange"),
            Error::ProgramErase => f.write_str("Error::ProgramErase"),
            Error::NotErased => f.write_str("Error::NotErased"),
            Error::Timeout => f.write_str("Error::Timeout"),
            Error::Misaligned => f.write_str("Error::Misaligned"),
        }
    }
}

impl<E: Display> Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::OutOfRange => f.write_str("address out of range"),
            Error::ProgramErase => f.write_str("program or erase failed"),
            Error::NotErased => f.write_str("page is not erased"),
            Error::Timeout => f.write_str("device stayed busy"),
            Error::Misaligned => f.write_str("range not aligned to pages"),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E: defmt::Format> defmt::Format for Error<E> {
    fn format(&self, f: defmt::Formatter<'_>) {
        match self {
            Error::Transport(e) => defmt::write!(f, "Error::Transport({})", e),
            Error::OutOfRange => defmt::write!(f, "Error::OutOfRange"),
            Error::ProgramErase => defmt::write!(f, "Error::ProgramErase"),
            Error::NotErased => defmt::write!(f, "Error::NotErased"),
            Error::Timeout => defmt::write!(f, "Error::Timeout"),
            Error::Misaligned => defmt::write!(f, "Error::Misaligned"),
        }
    }
}

impl<E: Debug> NorFlashError for Error<E> {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::OutOfRange => NorFlashErrorKind::OutOfBounds,
            Error::Misaligned => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}
