//! Data integrity self-test.
//!
//! Every page gets pseudo-random payload words followed by the page number
//! and a CRC-16/CCITT of everything before it, all little endian:
//!
//! ```text
//! | payload ... | page: u16 | crc: u16 |
//! ```
//!
//! Pages are read back in both DMA and polled mode, which catches transfer
//! mode bugs in the bus driver as well as flash faults.

use crate::address::PageGeometry;
use crate::error::Error;
use crate::series45::{Buffer, Flash};
use crate::transport::Transport;
use core::fmt::{self, Debug, Display};
use crc::{Crc, CRC_16_IBM_3740};
use embedded_hal_async::delay::DelayNs;

const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Largest supported page.
const MAX_PAGE_SIZE: usize = 1056;

/// Why a self-test stopped.
pub enum SelfTestError<E> {
    /// A flash operation on `page` failed.
    Flash { page: u32, error: Error<E> },
    /// `page` holds the data of another page.
    PageNumber { page: u32 },
    /// The checksum of `page` does not match.
    Crc { page: u32 },
}

impl<E: Debug> Debug for SelfTestError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfTestError::Flash { page, error } => {
                write!(f, "SelfTestError::Flash {{ page: {}, error: {:?} }}", page, error)
            }
            SelfTestError::PageNumber { page } => {
                write!(f, "SelfTestError::PageNumber {{ page: {} }}", page)
            }
            SelfTestError::Crc { page } => write!(f, "SelfTestError::Crc {{ page: {} }}", page),
        }
    }
}

impl<E: Display> Display for SelfTestError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfTestError::Flash { page, error } => write!(f, "page {}: {}", page, error),
            SelfTestError::PageNumber { page } => write!(f, "page {}: numbering error", page),
            SelfTestError::Crc { page } => write!(f, "page {}: CRC error", page),
        }
    }
}

fn fill_page(buf: &mut [u8], page: u32, next_word: &mut impl FnMut() -> u16) {
    let len = buf.len();
    for word in buf[..len - 4].chunks_exact_mut(2) {
        word.copy_from_slice(&next_word().to_le_bytes());
    }
    buf[len - 4..len - 2].copy_from_slice(&(page as u16).to_le_bytes());
    let crc = CRC_CCITT.checksum(&buf[..len - 2]);
    buf[len - 2..].copy_from_slice(&crc.to_le_bytes());
}

fn check_page<E>(buf: &[u8], page: u32) -> Result<(), SelfTestError<E>> {
    let len = buf.len();
    let number = u16::from_le_bytes([buf[len - 4], buf[len - 3]]);
    if number != page as u16 {
        return Err(SelfTestError::PageNumber { page });
    }
    let crc = u16::from_le_bytes([buf[len - 2], buf[len - 1]]);
    if crc != CRC_CCITT.checksum(&buf[..len - 2]) {
        return Err(SelfTestError::Crc { page });
    }
    Ok(())
}

impl<T, D, G> Flash<T, D, G>
where
    T: Transport,
    D: DelayNs,
    G: PageGeometry,
{
    /// Writes every page with fresh test data `cycles` times, verifying each
    /// page right after writing it and the whole chip at the end of a cycle.
    ///
    /// `next_word` supplies the payload, typically from a random number
    /// generator. Destroys the chip contents. The DMA setting is restored
    /// afterwards.
    pub async fn rw_test(
        &mut self,
        cycles: u32,
        mut next_word: impl FnMut() -> u16,
    ) -> Result<(), SelfTestError<T::Error>> {
        info!("{}: write test", self.config().label.unwrap_or("dataflash"));
        let use_dma = self.use_dma();
        let mut result = Ok(());
        for cycle in 0..cycles {
            info!("test cycle {}", cycle + 1);
            result = self.rw_cycle(&mut next_word).await;
            if result.is_err() {
                break;
            }
        }
        self.set_use_dma(use_dma);
        match &result {
            Ok(()) => info!("write test done"),
            Err(_) => warn!("write test error"),
        }
        result
    }

    /// Verifies data written by an earlier [`Flash::rw_test`] `cycles`
    /// times, in DMA and polled mode. The DMA setting is restored afterwards.
    pub async fn ro_test(&mut self, cycles: u32) -> Result<(), SelfTestError<T::Error>> {
        info!("{}: read test", self.config().label.unwrap_or("dataflash"));
        let use_dma = self.use_dma();
        let mut buf = [0u8; MAX_PAGE_SIZE];
        let mut result = Ok(());
        for cycle in 0..cycles {
            info!("test cycle {}", cycle + 1);
            result = self.verify_all_modes(&mut buf[..G::PAGE_SIZE]).await;
            if result.is_err() {
                break;
            }
        }
        self.set_use_dma(use_dma);
        match &result {
            Ok(()) => info!("read test done"),
            Err(_) => warn!("read test error"),
        }
        result
    }

    async fn rw_cycle(
        &mut self,
        next_word: &mut impl FnMut() -> u16,
    ) -> Result<(), SelfTestError<T::Error>> {
        let mut buf = [0u8; MAX_PAGE_SIZE];
        let buf = &mut buf[..G::PAGE_SIZE];

        debug!("writing pages");
        for page in 0..self.page_count() {
            fill_page(buf, page, next_word);
            let flash_error = |error| SelfTestError::Flash { page, error };
            self.page_erase(page).await.map_err(flash_error)?;
            self.check_page_erased(page).await.map_err(flash_error)?;
            self.write_mem(Buffer::One, page, 0, buf)
                .await
                .map_err(flash_error)?;

            self.set_use_dma(true);
            self.verify_page(page, buf).await?;
            self.set_use_dma(false);
            self.verify_page(page, buf).await?;

            if (page + 1) % 500 == 0 {
                debug!("{} pages done", page + 1);
            }
        }
        debug!("{} pages written", self.page_count());

        self.verify_all_modes(buf).await
    }

    async fn verify_all_modes(&mut self, buf: &mut [u8]) -> Result<(), SelfTestError<T::Error>> {
        debug!("reading pages (DMA)");
        self.set_use_dma(true);
        self.verify_all(buf).await?;
        debug!("reading pages (no DMA)");
        self.set_use_dma(false);
        self.verify_all(buf).await
    }

    async fn verify_all(&mut self, buf: &mut [u8]) -> Result<(), SelfTestError<T::Error>> {
        for page in 0..self.page_count() {
            self.verify_page(page, buf).await?;
            if (page + 1) % 1000 == 0 {
                debug!("{} pages done", page + 1);
            }
        }
        debug!("{} pages tested", self.page_count());
        Ok(())
    }

    async fn verify_page(&mut self, page: u32, buf: &mut [u8]) -> Result<(), SelfTestError<T::Error>> {
        buf.fill(0);
        self.read_mem(page, 0, buf)
            .await
            .map_err(|error| SelfTestError::Flash { page, error })?;
        let result = check_page(buf, page);
        if result.is_err() {
            warn!("page {} corrupt (DMA {})", page, self.use_dma());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Page1056, Page264};
    use crate::series45::Config;
    use crate::sim::{RecordingDelay, Sim, SimError};
    use crate::transport::TransferMode;
    use futures_lite::future::block_on;

    type TestFlash<G> = Flash<Sim<G>, RecordingDelay, G>;

    fn flash<G: PageGeometry>(pages: u32) -> TestFlash<G> {
        Flash::new(
            Sim::new(pages as usize),
            RecordingDelay::default(),
            Config::new(pages, pages / 8),
        )
    }

    fn counter() -> impl FnMut() -> u16 {
        let mut n: u16 = 0x1234;
        move || {
            n = n.wrapping_mul(31).wrapping_add(7);
            n
        }
    }

    #[test]
    fn test_page_layout() {
        let mut buf = [0u8; 264];
        fill_page(&mut buf, 0x0102, &mut counter());
        assert_eq!(&buf[260..262], [0x02, 0x01]);
        assert!(check_page::<()>(&buf, 0x0102).is_ok());
        assert!(matches!(check_page::<()>(&buf, 3), Err(SelfTestError::PageNumber { page: 3 })));
        buf[17] ^= 0x04;
        assert!(matches!(check_page::<()>(&buf, 0x0102), Err(SelfTestError::Crc { page: 0x0102 })));
    }

    #[test]
    fn test_crc_ccitt() {
        // CRC-16/CCITT-FALSE check value.
        assert_eq!(CRC_CCITT.checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_rw_then_ro() {
        let mut flash: TestFlash<Page264> = flash(8);
        flash.set_use_dma(true);
        block_on(async {
            flash.rw_test(2, counter()).await.unwrap();
            flash.ro_test(1).await.unwrap();
        });
        assert!(flash.use_dma());

        let sim = flash.transport_mut();
        let reads: Vec<_> = sim.log.iter().filter(|t| t.opcode() == 0xD2).collect();
        // Per cycle: two reads per written page plus two full passes.
        // Then one read-only cycle of two passes.
        assert_eq!(reads.len(), 2 * (8 * 2 + 8 * 2) + 8 * 2);
        assert!(reads.iter().any(|t| t.mode == TransferMode::Dma));
        assert!(reads.iter().any(|t| t.mode == TransferMode::Polled));
    }

    #[test]
    fn test_ro_detects_corruption() {
        let mut flash: TestFlash<Page1056> = flash(8);
        block_on(flash.rw_test(1, counter())).unwrap();

        flash.transport_mut().page_mut(5)[100] ^= 0x10;
        let result = block_on(flash.ro_test(1));
        assert!(matches!(result, Err(SelfTestError::Crc { page: 5 })));

        let copy = flash.transport_mut().page(1).to_vec();
        flash.transport_mut().page_mut(2).copy_from_slice(&copy);
        let result = block_on(flash.ro_test(1));
        assert!(matches!(result, Err(SelfTestError::PageNumber { page: 2 })));
    }

    #[test]
    fn test_rw_reports_erase_fault() {
        let mut flash: TestFlash<Page264> = flash(8);
        flash.transport_mut().stuck_bits.push((4, 0));
        let result = block_on(flash.rw_test(1, counter()));
        assert!(matches!(
            result,
            Err(SelfTestError::Flash { page: 4, error: Error::NotErased })
        ));
        assert!(!flash.use_dma());
    }

    #[test]
    fn test_rw_reports_transport_fault() {
        let mut flash: TestFlash<Page264> = flash(8);
        flash.transport_mut().fail_from = Some(0);
        let result = block_on(flash.rw_test(1, counter()));
        assert!(matches!(
            result,
            Err(SelfTestError::Flash { page: 0, error: Error::Transport(SimError) })
        ));
    }
}
