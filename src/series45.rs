//! Driver for 45-series (AT45DB) SPI DataFlash chips.
//!
//! DataFlash chips differ from the common 25-series flashes in two ways: they
//! are addressed by page and byte offset instead of by linear address, and
//! they have two on-chip SRAM buffers of one page each that can be loaded
//! from, compared with and programmed into main memory.

use crate::address::{PageGeometry, PageSize};
use crate::error::Error;
use crate::status::{Status, StatusExt};
use crate::transport::{Data, TransferMode, Transport};
use core::fmt;
use core::marker::PhantomData;
use embedded_hal_async::delay::DelayNs;
use futures_lite::future::yield_now;

/// Page erase time (tPE), also waited for after program-with-erase commands.
const PAGE_ERASE_TIME_MS: u32 = 15;
/// Block erase time (tBE).
const BLOCK_ERASE_TIME_MS: u32 = 45;
/// Page erase and program time (tEP) of a read-modify-write.
const ERASE_PROGRAM_TIME_MS: u32 = 17;
/// Status poll interval while a chip erase is running.
const CHIP_ERASE_CHECK_TIME_MS: u32 = 500;

/// Size of the chunks of `0xFF` written into buffer 2 before an erase check.
const ERASED_FILL_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    /// Read the status register (one or two bytes).
    ReadStatus = 0xD7,
    /// Read manufacturer and device ID.
    ReadId = 0x9F,
    /// Main memory page read, bypassing the buffers.
    PageRead = 0xD2,
    /// Continuous array read, up to 85 MHz.
    ArrayReadHighFreq = 0x0B,
    /// Continuous array read with two dummy bytes, highest frequency.
    ArrayReadHighestFreq = 0x1B,
    /// Continuous array read, low frequency.
    ArrayReadLowFreq = 0x03,
    /// Continuous array read, low power.
    ArrayReadLowPower = 0x01,
    Buffer1Read = 0xD4,
    Buffer2Read = 0xD6,
    Buffer1Write = 0x84,
    Buffer2Write = 0x87,
    /// Buffer to main memory page program with built-in erase.
    Buffer1ToPageErase = 0x83,
    Buffer2ToPageErase = 0x86,
    /// Buffer to main memory page program without built-in erase.
    Buffer1ToPage = 0x88,
    Buffer2ToPage = 0x89,
    /// Main memory page program through buffer, with built-in erase.
    PageProgBuffer1 = 0x82,
    PageProgBuffer2 = 0x85,
    /// Main memory page to buffer transfer.
    PageToBuffer1 = 0x53,
    PageToBuffer2 = 0x55,
    /// Main memory page to buffer 2 compare.
    CompareBuffer2 = 0x61,
    /// Read-modify-write through buffer.
    ReadModifyWrite1 = 0x58,
    ReadModifyWrite2 = 0x59,
    PageErase = 0x81,
    BlockErase = 0x50,
    DeepPowerDown = 0xB9,
    UltraDeepPowerDown = 0x79,
    ResumeFromDeepPowerDown = 0xAB,
}

/// Chip erase is a fixed four byte sequence.
const CHIP_ERASE: [u8; 4] = [0xC7, 0x94, 0x80, 0x9A];
/// Page size configuration sequence; the last byte selects the page size.
const CONFIGURE_PAGE_SIZE: [u8; 3] = [0x3D, 0x2A, 0x80];

/// One of the two on-chip SRAM buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Buffer {
    /// Buffer 1.
    One,
    /// Buffer 2. Also used by [`Flash::check_page_erased`].
    Two,
}

impl Buffer {
    /// Selects a buffer by its datasheet number.
    ///
    /// # Panics
    ///
    /// Panics if `number` is not 1 or 2.
    #[track_caller]
    pub fn from_number(number: u8) -> Buffer {
        match number {
            1 => Buffer::One,
            2 => Buffer::Two,
            _ => panic!("invalid DataFlash buffer number: {}", number),
        }
    }

    /// The datasheet number of this buffer.
    pub fn number(self) -> u8 {
        match self {
            Buffer::One => 1,
            Buffer::Two => 2,
        }
    }

    fn pick(self, one: Opcode, two: Opcode) -> Opcode {
        match self {
            Buffer::One => one,
            Buffer::Two => two,
        }
    }
}

/// Continuous array read flavours, trading clock speed against power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContinuousRead {
    /// Opcode `0x0B`, one dummy byte.
    HighFrequency,
    /// Opcode `0x1B`, two dummy bytes.
    HighestFrequency,
    /// Opcode `0x03`, no dummy bytes.
    LowFrequency,
    /// Opcode `0x01`, no dummy bytes.
    LowPower,
}

impl ContinuousRead {
    fn opcode(self) -> Opcode {
        match self {
            ContinuousRead::HighFrequency => Opcode::ArrayReadHighFreq,
            ContinuousRead::HighestFrequency => Opcode::ArrayReadHighestFreq,
            ContinuousRead::LowFrequency => Opcode::ArrayReadLowFreq,
            ContinuousRead::LowPower => Opcode::ArrayReadLowPower,
        }
    }

    fn dummy_bytes(self) -> usize {
        match self {
            ContinuousRead::HighFrequency => 1,
            ContinuousRead::HighestFrequency => 2,
            ContinuousRead::LowFrequency | ContinuousRead::LowPower => 0,
        }
    }
}

/// Power saving modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDown {
    /// Deep power-down, left with [`Flash::wake`].
    Deep,
    /// Ultra-deep power-down. Buffer contents are lost.
    UltraDeep,
}

/// Page size configuration stored in the chip's non-volatile register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageConfig {
    /// Power of two pages (256 or 1024 bytes).
    Binary,
    /// Standard DataFlash pages (264 or 1056 bytes).
    DataFlash,
}

/// Manufacturer and device identification.
pub struct Identification {
    /// Data collected
    /// - First byte is the JEDEC manufacturer ID
    /// - The trailing bytes are the family/density and sub code bytes.
    bytes: [u8; 3],

    /// Length of the extended device information that follows.
    edi_len: u8,
}

impl Identification {
    /// Build an Identification from the four bytes returned by the ID command.
    pub fn from_id_bytes(buf: [u8; 4]) -> Identification {
        Self {
            bytes: [buf[0], buf[1], buf[2]],
            edi_len: buf[3],
        }
    }

    /// The JEDEC manufacturer code for this chip.
    pub fn mfr_code(&self) -> u8 {
        self.bytes[0]
    }

    /// The manufacturer-specific device ID for this chip.
    pub fn device_id(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// Family code, `0b001` for DataFlash.
    pub fn family_code(&self) -> u8 {
        self.bytes[1] >> 5
    }

    /// Density code of the chip.
    pub fn density_code(&self) -> u8 {
        self.bytes[1] & 0x1F
    }

    /// Number of extended device information bytes the chip offers.
    pub fn extended_info_len(&self) -> u8 {
        self.edi_len
    }

    /// Whether this is an Atmel/Adesto DataFlash part.
    pub fn is_dataflash(&self) -> bool {
        self.mfr_code() == 0x1F && self.family_code() == 0b001
    }
}

impl fmt::Debug for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identification")
            .field(&format_args!("{:02X?}", self.bytes))
            .finish()
    }
}

/// Chip configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of pages in main memory.
    pub page_count: u32,
    /// Number of 8-page blocks.
    pub block_count: u32,
    /// Move data phases with DMA. Status reads never use DMA.
    pub use_dma: bool,
    /// Read the two byte status register and report program/erase errors.
    pub extended_status: bool,
    /// Give up waiting for ready after this many status polls.
    ///
    /// `None` waits forever, which is what the chip protocol itself
    /// prescribes. A bound turns a disconnected or dead chip into
    /// [`Error::Timeout`] instead of a hang.
    pub max_polls: Option<u32>,
    /// Name used in log messages.
    pub label: Option<&'static str>,
}

impl Config {
    /// Configuration for a chip with `page_count` pages in `block_count`
    /// blocks, plain status, no DMA and unbounded polling.
    pub const fn new(page_count: u32, block_count: u32) -> Self {
        Config {
            page_count,
            block_count,
            use_dma: false,
            extended_status: false,
            max_polls: None,
            label: None,
        }
    }

    /// Sets [`Config::use_dma`].
    pub const fn with_dma(mut self, use_dma: bool) -> Self {
        self.use_dma = use_dma;
        self
    }

    /// Sets [`Config::extended_status`].
    pub const fn with_extended_status(mut self, extended_status: bool) -> Self {
        self.extended_status = extended_status;
        self
    }

    /// Bounds status polling, see [`Config::max_polls`].
    pub const fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Sets the name used in log messages.
    pub const fn with_label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

/// How to pace status polls.
#[derive(Debug, Clone, Copy)]
enum Pacing {
    /// Yield to the executor between polls.
    Yield,
    /// Poll back to back.
    Tight,
    /// Sleep before every poll.
    Interval(u32),
}

/// Fault bits seen on any poll of one wait.
#[derive(Debug, Default, Clone, Copy)]
struct Latched {
    program_error: bool,
    compare_mismatch: bool,
}

/// Driver for 45-series SPI DataFlash chips.
///
/// # Type Parameters
///
/// * **`T`**: The [`Transport`] the chip is attached to.
/// * **`D`**: Delay provider for the datasheet wait times.
/// * **`G`**: The [`PageGeometry`] of the chip.
///
/// The driver is not internally synchronized. All operations take
/// `&mut self`; callers sharing one chip wrap it in a mutex.
pub struct Flash<T, D, G> {
    transport: T,
    delay: D,
    config: Config,
    /// Buffer 2 is known to hold all `0xFF`.
    buffer2_clean: bool,
    _geometry: PhantomData<G>,
}

impl<T, D, G> Flash<T, D, G>
where
    T: Transport,
    D: DelayNs,
    G: PageGeometry,
{
    /// Creates a new DataFlash driver.
    ///
    /// # Parameters
    ///
    /// * **`transport`**: The bus the chip sits on.
    /// * **`delay`**: Delay provider.
    /// * **`config`**: Size and behaviour of the chip.
    pub fn new(transport: T, delay: D, config: Config) -> Self {
        Flash {
            transport,
            delay,
            config,
            buffer2_clean: false,
            _geometry: PhantomData,
        }
    }

    /// Destroys the driver and gives back the transport and delay.
    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }

    /// Access to the transport, for sharing the bus with other code.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The configuration the driver was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the size of a page in bytes.
    pub fn page_size(&self) -> usize {
        G::PAGE_SIZE
    }

    /// Page size as a runtime value.
    pub fn page_size_variant(&self) -> PageSize {
        G::VARIANT
    }

    /// Number of pages in main memory.
    pub fn page_count(&self) -> u32 {
        self.config.page_count
    }

    /// Number of 8-page blocks.
    pub fn block_count(&self) -> u32 {
        self.config.block_count
    }

    /// Get the size of the flash chip in bytes.
    pub fn chip_size(&self) -> usize {
        self.config.page_count as usize * G::PAGE_SIZE
    }

    /// Whether data phases currently use DMA.
    pub fn use_dma(&self) -> bool {
        self.config.use_dma
    }

    /// Switches data phases between DMA and polled transfers.
    pub fn set_use_dma(&mut self, use_dma: bool) {
        self.config.use_dma = use_dma;
    }

    /// Whether buffer 2 is known to hold the erased pattern.
    pub fn is_buffer2_clean(&self) -> bool {
        self.buffer2_clean
    }

    fn label(&self) -> &'static str {
        self.config.label.unwrap_or("dataflash")
    }

    fn mode(&self) -> TransferMode {
        TransferMode::from_dma(self.config.use_dma)
    }

    /// Every path that changes the contents of an SRAM buffer goes through
    /// here.
    fn buffer_written(&mut self, buffer: Buffer) {
        if buffer == Buffer::Two {
            self.buffer2_clean = false;
        }
    }

    fn check_page(&self, page: u32) -> Result<(), Error<T::Error>> {
        if page >= self.config.page_count {
            warn!("{}: page {} out of range", self.label(), page);
            return Err(Error::OutOfRange);
        }
        Ok(())
    }

    fn check_offset(&self, offset: u32) -> Result<(), Error<T::Error>> {
        if offset as usize >= G::PAGE_SIZE {
            warn!("{}: offset {} out of range", self.label(), offset);
            return Err(Error::OutOfRange);
        }
        Ok(())
    }

    /// Validated page/offset address.
    fn address(&self, page: u32, offset: u32) -> Result<[u8; 3], Error<T::Error>> {
        self.check_page(page)?;
        self.check_offset(offset)?;
        Ok(G::encode(page, offset))
    }

    async fn command(
        &mut self,
        cmd: &[u8],
        data: Data<'_>,
        mode: TransferMode,
    ) -> Result<(), Error<T::Error>> {
        self.transport
            .transfer(cmd, data, mode)
            .await
            .map_err(Error::Transport)
    }

    async fn read_status_bytes(&mut self, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        let cmd = [Opcode::ReadStatus as u8];
        self.command(&cmd, Data::Read(buf), TransferMode::Polled)
            .await
    }

    /// Reads the status register.
    pub async fn read_status(&mut self) -> Result<Status, Error<T::Error>> {
        let mut buf = [0u8; 1];
        self.read_status_bytes(&mut buf).await?;
        Ok(Status::from_bits_truncate(buf[0]))
    }

    /// Reads both bytes of the extended status register.
    pub async fn read_status_ext(&mut self) -> Result<(Status, StatusExt), Error<T::Error>> {
        let mut buf = [0u8; 2];
        self.read_status_bytes(&mut buf).await?;
        Ok((
            Status::from_bits_truncate(buf[0]),
            StatusExt::from_bits_truncate(buf[1]),
        ))
    }

    /// Reads the manufacturer/device identification.
    pub async fn read_id(&mut self) -> Result<Identification, Error<T::Error>> {
        let mut buf = [0u8; 4];
        let cmd = [Opcode::ReadId as u8];
        self.command(&cmd, Data::Read(&mut buf), TransferMode::Polled)
            .await?;
        Ok(Identification::from_id_bytes(buf))
    }

    async fn poll(&mut self, pacing: Pacing) -> Result<Latched, Error<T::Error>> {
        let mut latched = Latched::default();
        let mut polls: u32 = 0;

        loop {
            if let Some(max) = self.config.max_polls {
                if polls >= max {
                    warn!("{}: still busy after {} polls", self.label(), polls);
                    return Err(Error::Timeout);
                }
            }
            match pacing {
                Pacing::Yield if polls > 0 => yield_now().await,
                Pacing::Interval(ms) => self.delay.delay_ms(ms).await,
                _ => {}
            }
            polls += 1;

            let status = if self.config.extended_status {
                let (status, ext) = self.read_status_ext().await?;
                latched.program_error |= ext.contains(StatusExt::PROGRAM_ERROR);
                status
            } else {
                self.read_status().await?
            };
            latched.compare_mismatch |= status.contains(Status::COMPARE_MISMATCH);

            if status.contains(Status::READY) {
                return Ok(latched);
            }
        }
    }

    fn program_result(&self, latched: Latched) -> Result<(), Error<T::Error>> {
        if latched.program_error {
            warn!("{}: program/erase error", self.label());
            return Err(Error::ProgramErase);
        }
        Ok(())
    }

    /// Waits until the chip reports ready, yielding between polls.
    ///
    /// With extended status enabled, a program/erase error seen on any poll
    /// is reported as [`Error::ProgramErase`].
    pub async fn wait_ready(&mut self) -> Result<(), Error<T::Error>> {
        let latched = self.poll(Pacing::Yield).await?;
        self.program_result(latched)
    }

    /// Reads main memory into `buf`, starting at `offset` in `page`,
    /// bypassing both buffers.
    ///
    /// Reading past the end of the page wraps around to its start.
    pub async fn read_mem(
        &mut self,
        page: u32,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, offset)?;
        trace!("{}: read page {} offset {} len {}", self.label(), page, offset, buf.len());

        let cmd = [
            Opcode::PageRead as u8,
            addr[0],
            addr[1],
            addr[2],
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        let mode = self.mode();
        self.command(&cmd, Data::Read(buf), mode).await
    }

    /// Writes `data` into `buffer` at `offset`, then erases `page` and
    /// programs the buffer into it.
    pub async fn write_mem(
        &mut self,
        buffer: Buffer,
        page: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, offset)?;
        trace!("{}: write page {} offset {} len {}", self.label(), page, offset, data.len());

        let opcode = buffer.pick(Opcode::PageProgBuffer1, Opcode::PageProgBuffer2);
        let cmd = [opcode as u8, addr[0], addr[1], addr[2]];
        self.buffer_written(buffer);
        let mode = self.mode();
        self.command(&cmd, Data::Write(data), mode).await?;

        self.delay.delay_ms(PAGE_ERASE_TIME_MS).await;
        self.wait_ready().await
    }

    /// Reads `buffer` into `buf`, starting at `offset`.
    pub async fn read_buf(
        &mut self,
        buffer: Buffer,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), Error<T::Error>> {
        self.check_offset(offset)?;
        let addr = G::encode(0, offset);

        let opcode = buffer.pick(Opcode::Buffer1Read, Opcode::Buffer2Read);
        let cmd = [opcode as u8, addr[0], addr[1], addr[2], 0xFF];
        let mode = self.mode();
        self.command(&cmd, Data::Read(buf), mode).await
    }

    /// Writes `data` into `buffer`, starting at `offset`.
    pub async fn write_buf(
        &mut self,
        buffer: Buffer,
        offset: u32,
        data: &[u8],
    ) -> Result<(), Error<T::Error>> {
        self.check_offset(offset)?;
        let addr = G::encode(0, offset);

        let opcode = buffer.pick(Opcode::Buffer1Write, Opcode::Buffer2Write);
        let cmd = [opcode as u8, addr[0], addr[1], addr[2]];
        self.buffer_written(buffer);
        let mode = self.mode();
        self.command(&cmd, Data::Write(data), mode).await
    }

    /// Programs `buffer` into `page`, erasing the page first if `erase` is
    /// set.
    pub async fn store_buf(
        &mut self,
        buffer: Buffer,
        page: u32,
        erase: bool,
    ) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, 0)?;
        trace!("{}: store buffer {} to page {}", self.label(), buffer.number(), page);

        let opcode = match erase {
            true => buffer.pick(Opcode::Buffer1ToPageErase, Opcode::Buffer2ToPageErase),
            false => buffer.pick(Opcode::Buffer1ToPage, Opcode::Buffer2ToPage),
        };
        let cmd = [opcode as u8, addr[0], addr[1], addr[2]];
        self.buffer_written(buffer);
        let mode = self.mode();
        self.command(&cmd, Data::None, mode).await?;

        if erase {
            self.delay.delay_ms(PAGE_ERASE_TIME_MS).await;
        }
        self.wait_ready().await
    }

    /// Loads `page` from main memory into `buffer`.
    pub async fn load_buf(&mut self, buffer: Buffer, page: u32) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, 0)?;
        trace!("{}: load page {} to buffer {}", self.label(), page, buffer.number());

        let opcode = buffer.pick(Opcode::PageToBuffer1, Opcode::PageToBuffer2);
        let cmd = [opcode as u8, addr[0], addr[1], addr[2]];
        self.buffer_written(buffer);
        let mode = self.mode();
        self.command(&cmd, Data::None, mode).await?;

        // A transfer takes microseconds and cannot fail.
        self.poll(Pacing::Tight).await?;
        Ok(())
    }

    /// Erases a single page.
    pub async fn page_erase(&mut self, page: u32) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, 0)?;
        trace!("{}: erase page {}", self.label(), page);

        let cmd = [Opcode::PageErase as u8, addr[0], addr[1], addr[2]];
        let mode = self.mode();
        self.command(&cmd, Data::None, mode).await?;

        self.delay.delay_ms(PAGE_ERASE_TIME_MS).await;
        self.wait_ready().await
    }

    /// Erases a block of eight pages.
    pub async fn block_erase(&mut self, block: u32) -> Result<(), Error<T::Error>> {
        if block >= self.config.block_count {
            warn!("{}: block {} out of range", self.label(), block);
            return Err(Error::OutOfRange);
        }
        trace!("{}: erase block {}", self.label(), block);

        let addr = G::encode_block(block);
        let cmd = [Opcode::BlockErase as u8, addr[0], addr[1], addr[2]];
        let mode = self.mode();
        self.command(&cmd, Data::None, mode).await?;

        self.delay.delay_ms(BLOCK_ERASE_TIME_MS).await;
        self.wait_ready().await
    }

    /// Erases the memory chip fully.
    ///
    /// Warning: Full erase operations take tens of seconds on the larger
    /// parts. The status is checked every 500 ms.
    pub async fn chip_erase(&mut self) -> Result<(), Error<T::Error>> {
        debug!("{}: chip erase", self.label());

        let mode = self.mode();
        self.command(&CHIP_ERASE, Data::None, mode).await?;

        let latched = self
            .poll(Pacing::Interval(CHIP_ERASE_CHECK_TIME_MS))
            .await?;
        self.program_result(latched)
    }

    /// Checks that `page` holds only `0xFF`.
    ///
    /// Buffer 2 is filled with `0xFF` unless it is already known to hold
    /// that pattern, then compared against the page by the chip itself.
    /// Returns [`Error::NotErased`] if the chip signalled a mismatch on any
    /// status poll.
    pub async fn check_page_erased(&mut self, page: u32) -> Result<(), Error<T::Error>> {
        self.check_page(page)?;
        let mode = self.mode();

        if !self.buffer2_clean {
            trace!("{}: filling buffer 2", self.label());
            let pattern = [0xFF; ERASED_FILL_CHUNK];
            let mut offset = 0;
            while offset < G::PAGE_SIZE {
                let len = ERASED_FILL_CHUNK.min(G::PAGE_SIZE - offset);
                let addr = G::encode(0, offset as u32);
                let cmd = [Opcode::Buffer2Write as u8, addr[0], addr[1], addr[2]];
                self.command(&cmd, Data::Write(&pattern[..len]), mode)
                    .await?;
                offset += len;
            }
            self.buffer2_clean = true;
        }

        let addr = G::encode(page, 0);
        let cmd = [Opcode::CompareBuffer2 as u8, addr[0], addr[1], addr[2]];
        self.command(&cmd, Data::None, mode).await?;

        let latched = self.poll(Pacing::Tight).await?;
        self.program_result(latched)?;
        if latched.compare_mismatch {
            warn!("{}: page {} not erased", self.label(), page);
            return Err(Error::NotErased);
        }
        Ok(())
    }

    /// Erases and verifies pages `start..=end`, one page at a time.
    ///
    /// Stops at the first failing page. Pages before it stay erased.
    pub async fn section_erase(&mut self, start: u32, end: u32) -> Result<(), Error<T::Error>> {
        if start >= end || start.saturating_add(2) > self.config.page_count || end >= self.config.page_count {
            warn!("{}: bad section {}..={}", self.label(), start, end);
            return Err(Error::OutOfRange);
        }
        debug!("{}: erase section {}..={}", self.label(), start, end);

        for page in start..=end {
            self.page_erase(page).await?;
            self.check_page_erased(page).await?;
        }
        Ok(())
    }

    /// Writes `data` at `offset` in `page` without disturbing the other
    /// bytes of the page.
    ///
    /// The chip loads the page into `buffer`, merges the data and programs
    /// the page back with erase, all in one command.
    pub async fn read_mod_write(
        &mut self,
        buffer: Buffer,
        page: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, offset)?;
        trace!("{}: rmw page {} offset {} len {}", self.label(), page, offset, data.len());

        let opcode = buffer.pick(Opcode::ReadModifyWrite1, Opcode::ReadModifyWrite2);
        let cmd = [opcode as u8, addr[0], addr[1], addr[2]];
        self.buffer_written(buffer);
        let mode = self.mode();
        self.command(&cmd, Data::Write(data), mode).await?;

        self.delay.delay_ms(ERASE_PROGRAM_TIME_MS).await;
        self.wait_ready().await
    }

    /// Reads main memory sequentially from `offset` in `page`, continuing
    /// into the following pages.
    pub async fn continuous_read(
        &mut self,
        read: ContinuousRead,
        page: u32,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), Error<T::Error>> {
        let addr = self.address(page, offset)?;
        trace!("{}: continuous read page {} offset {} len {}", self.label(), page, offset, buf.len());

        let cmd = [read.opcode() as u8, addr[0], addr[1], addr[2], 0xFF, 0xFF];
        let len = 4 + read.dummy_bytes();
        let mode = self.mode();
        self.command(&cmd[..len], Data::Read(buf), mode).await
    }

    /// Puts the chip into a power-down mode.
    pub async fn power_down(&mut self, power_down: PowerDown) -> Result<(), Error<T::Error>> {
        debug!("{}: power down", self.label());
        let cmd = match power_down {
            PowerDown::Deep => [Opcode::DeepPowerDown as u8],
            PowerDown::UltraDeep => [Opcode::UltraDeepPowerDown as u8],
        };
        self.command(&cmd, Data::None, TransferMode::Polled).await
    }

    /// Brings the chip back from power-down.
    ///
    /// Any chip select pulse ends ultra-deep power-down, so the same command
    /// serves both modes. Buffer contents do not survive ultra-deep
    /// power-down.
    pub async fn wake(&mut self) -> Result<(), Error<T::Error>> {
        debug!("{}: wake", self.label());
        let cmd = [Opcode::ResumeFromDeepPowerDown as u8];
        self.buffer_written(Buffer::Two);
        self.command(&cmd, Data::None, TransferMode::Polled).await
    }

    /// Writes the page size configuration.
    ///
    /// The new size takes effect after a power cycle. This driver only
    /// addresses the DataFlash layouts, so a chip switched to
    /// [`PageConfig::Binary`] needs a different driver afterwards.
    pub async fn set_page_size(&mut self, config: PageConfig) -> Result<(), Error<T::Error>> {
        debug!("{}: set page size", self.label());
        let last = match config {
            PageConfig::Binary => 0xA6,
            PageConfig::DataFlash => 0xA7,
        };
        let cmd = [
            CONFIGURE_PAGE_SIZE[0],
            CONFIGURE_PAGE_SIZE[1],
            CONFIGURE_PAGE_SIZE[2],
            last,
        ];
        self.command(&cmd, Data::None, TransferMode::Polled).await
    }
}

impl<T, D, G> fmt::Debug for Flash<T, D, G>
where
    G: PageGeometry,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flash")
            .field("page_size", &G::PAGE_SIZE)
            .field("config", &self.config)
            .field("buffer2_clean", &self.buffer2_clean)
            .finish()
    }
}
