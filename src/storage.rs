//! [`embedded_storage_async`] NOR flash interface on top of [`Flash`].
//!
//! Byte offsets are split into page and in-page offset with the chip's page
//! size, so a 1056-byte page chip exposes `page_count * 1056` bytes.
//! Writes go through buffer 1 and program without erase, which gives the
//! usual NOR semantics of only clearing bits.

use crate::address::PageGeometry;
use crate::error::Error;
use crate::series45::{Buffer, ContinuousRead, Flash};
use crate::transport::Transport;
use core::fmt::Debug;
use embedded_hal_async::delay::DelayNs;
use embedded_storage::nor_flash::ErrorType;
use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

impl<T, D, G> Flash<T, D, G>
where
    T: Transport,
    D: DelayNs,
    G: PageGeometry,
{
    fn check_span(&self, offset: u32, len: usize) -> Result<(), Error<T::Error>> {
        match (offset as usize).checked_add(len) {
            Some(end) if end <= self.chip_size() => Ok(()),
            _ => Err(Error::OutOfRange),
        }
    }
}

impl<T, D, G> ErrorType for Flash<T, D, G>
where
    T: Transport,
    T::Error: Debug,
{
    type Error = Error<T::Error>;
}

impl<T, D, G> ReadNorFlash for Flash<T, D, G>
where
    T: Transport,
    T::Error: Debug,
    D: DelayNs,
    G: PageGeometry,
{
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_span(offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }
        let page = offset / G::PAGE_SIZE as u32;
        let in_page = offset % G::PAGE_SIZE as u32;
        self.continuous_read(ContinuousRead::HighFrequency, page, in_page, bytes)
            .await
    }

    fn capacity(&self) -> usize {
        self.chip_size()
    }
}

impl<T, D, G> NorFlash for Flash<T, D, G>
where
    T: Transport,
    T::Error: Debug,
    D: DelayNs,
    G: PageGeometry,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = G::PAGE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to || to as usize > self.chip_size() {
            return Err(Error::OutOfRange);
        }
        if from as usize % G::PAGE_SIZE != 0 || to as usize % G::PAGE_SIZE != 0 {
            return Err(Error::Misaligned);
        }
        let first = from / G::PAGE_SIZE as u32;
        let last = to / G::PAGE_SIZE as u32;
        for page in first..last {
            self.page_erase(page).await?;
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_span(offset, bytes.len())?;

        let mut offset = offset as usize;
        let mut bytes = bytes;
        while !bytes.is_empty() {
            let page = (offset / G::PAGE_SIZE) as u32;
            let in_page = offset % G::PAGE_SIZE;
            let len = bytes.len().min(G::PAGE_SIZE - in_page);

            self.load_buf(Buffer::One, page).await?;
            self.write_buf(Buffer::One, in_page as u32, &bytes[..len])
                .await?;
            self.store_buf(Buffer::One, page, false).await?;

            offset += len;
            bytes = &bytes[len..];
        }
        Ok(())
    }
}
