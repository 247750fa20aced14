//! The bus seam between the driver and the hardware.

use embedded_hal_async::spi::{Operation, SpiDevice};

/// How the data phase of a transfer should be moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferMode {
    /// Use DMA for the data phase.
    Dma,
    /// Move the data phase by polled (or interrupt driven) register access.
    Polled,
}

impl TransferMode {
    /// Picks [`TransferMode::Dma`] when `use_dma` is set.
    pub fn from_dma(use_dma: bool) -> Self {
        if use_dma {
            TransferMode::Dma
        } else {
            TransferMode::Polled
        }
    }
}

/// Data phase of a transfer, following the command bytes.
#[derive(Debug)]
pub enum Data<'a> {
    /// Command only.
    None,
    /// Clock in bytes after the command.
    Read(&'a mut [u8]),
    /// Clock out bytes after the command.
    Write(&'a [u8]),
}

/// A chip-select framed exchange with one flash chip.
///
/// One call is one assertion of the chip select: the command bytes are
/// sent, then the data phase runs, then the chip is deselected.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Error of the underlying bus.
    type Error;

    /// Runs a single command/data exchange.
    async fn transfer(
        &mut self,
        command: &[u8],
        data: Data<'_>,
        mode: TransferMode,
    ) -> Result<(), Self::Error>;
}

/// [`Transport`] over an `embedded-hal-async` [`SpiDevice`].
///
/// The transfer mode is only a hint here: HAL implementations of
/// `SpiDevice` decide on DMA use by themselves.
#[derive(Debug)]
pub struct SpiTransport<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice<u8>> SpiTransport<SPI> {
    /// Wraps an SPI device. The device must be configured for SPI mode 0 or 3.
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Gives back the SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice<u8>> Transport for SpiTransport<SPI> {
    type Error = SPI::Error;

    async fn transfer(
        &mut self,
        command: &[u8],
        data: Data<'_>,
        _mode: TransferMode,
    ) -> Result<(), Self::Error> {
        match data {
            Data::None => {
                self.spi
                    .transaction(&mut [Operation::Write(command)])
                    .await
            }
            Data::Read(buf) => {
                self.spi
                    .transaction(&mut [Operation::Write(command), Operation::Read(buf)])
                    .await
            }
            Data::Write(buf) => {
                self.spi
                    .transaction(&mut [Operation::Write(command), Operation::Write(buf)])
                    .await
            }
        }
    }
}
