//! An in-memory DataFlash used by the unit tests.
//!
//! Decodes the command bytes the driver sends, keeps main memory and both
//! SRAM buffers, reports busy for a configurable number of status polls and
//! can inject transport failures, program errors and bits that refuse to
//! erase.

#![allow(dead_code)]

use crate::address::PageGeometry;
use crate::status::{Status, StatusExt};
use crate::transport::{Data, TransferMode, Transport};
use core::marker::PhantomData;
use embedded_hal_async::delay::DelayNs;

/// Error returned by the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

/// One recorded transfer.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub command: Vec<u8>,
    pub data_len: usize,
    pub mode: TransferMode,
}

impl Transfer {
    pub fn opcode(&self) -> u8 {
        self.command[0]
    }
}

pub struct Sim<G> {
    pub memory: Vec<u8>,
    pub buffers: [Vec<u8>; 2],
    pub log: Vec<Transfer>,
    /// Status polls reported busy after each program/erase/compare.
    pub busy_polls: u32,
    /// Never report ready.
    pub stuck_busy: bool,
    /// Program and erase operations flag an error.
    pub fail_program: bool,
    /// Error and mismatch bits are only visible while the chip is busy.
    pub transient_faults: bool,
    /// Transfers with this index or higher fail.
    pub fail_from: Option<usize>,
    /// Byte positions (page, offset) that stay 0x00 after an erase.
    pub stuck_bits: Vec<(usize, usize)>,
    /// Value of the density bits in the status register.
    pub density: u8,
    busy_left: u32,
    compare_mismatch: bool,
    program_error: bool,
    _geometry: PhantomData<G>,
}

impl<G: PageGeometry> Sim<G> {
    pub fn new(pages: usize) -> Self {
        Sim {
            memory: vec![0xFF; pages * G::PAGE_SIZE],
            buffers: [vec![0xFF; G::PAGE_SIZE], vec![0xFF; G::PAGE_SIZE]],
            log: Vec::new(),
            busy_polls: 2,
            stuck_busy: false,
            fail_program: false,
            transient_faults: false,
            fail_from: None,
            stuck_bits: Vec::new(),
            density: 0b1111,
            busy_left: 0,
            compare_mismatch: false,
            program_error: false,
            _geometry: PhantomData,
        }
    }

    pub fn page(&self, page: usize) -> &[u8] {
        &self.memory[page * G::PAGE_SIZE..(page + 1) * G::PAGE_SIZE]
    }

    pub fn page_mut(&mut self, page: usize) -> &mut [u8] {
        &mut self.memory[page * G::PAGE_SIZE..(page + 1) * G::PAGE_SIZE]
    }

    /// Opcodes of all recorded transfers, status reads excluded.
    pub fn opcodes(&self) -> Vec<u8> {
        self.log
            .iter()
            .map(Transfer::opcode)
            .filter(|op| *op != 0xD7)
            .collect()
    }

    /// Commands of all recorded transfers, status reads excluded.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.log
            .iter()
            .filter(|t| t.opcode() != 0xD7)
            .map(|t| t.command.clone())
            .collect()
    }

    pub fn status_reads(&self) -> usize {
        self.log.iter().filter(|t| t.opcode() == 0xD7).count()
    }

    fn decode(bytes: &[u8]) -> (usize, usize) {
        let raw = (bytes[0] as usize) << 16 | (bytes[1] as usize) << 8 | bytes[2] as usize;
        let mask = (1 << G::OFFSET_BITS) - 1;
        (raw >> G::OFFSET_BITS, raw & mask)
    }

    fn start_busy(&mut self) {
        self.busy_left = self.busy_polls;
    }

    fn erase_page(&mut self, page: usize) {
        self.page_mut(page).fill(0xFF);
        for (p, offset) in self.stuck_bits.clone() {
            if p == page {
                self.page_mut(p)[offset] = 0x00;
            }
        }
        self.program_error = self.fail_program;
    }

    fn program_page(&mut self, buffer: usize, page: usize) {
        let data = self.buffers[buffer].clone();
        for (cell, byte) in self.page_mut(page).iter_mut().zip(data) {
            *cell &= byte;
        }
        self.program_error = self.fail_program;
    }

    fn write_buffer(&mut self, buffer: usize, offset: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.buffers[buffer][(offset + i) % G::PAGE_SIZE] = *byte;
        }
    }

    fn status(&mut self, buf: &mut [u8]) {
        let busy = self.stuck_busy || self.busy_left > 0;
        self.busy_left = self.busy_left.saturating_sub(1);
        let visible = busy || !self.transient_faults;

        let mut status = Status::from_bits_truncate(self.density << 2);
        let mut ext = StatusExt::empty();
        if !busy {
            status |= Status::READY;
            ext |= StatusExt::READY;
        }
        if self.compare_mismatch && visible {
            status |= Status::COMPARE_MISMATCH;
        }
        if self.program_error && visible {
            ext |= StatusExt::PROGRAM_ERROR;
        }
        if let Some(byte) = buf.get_mut(0) {
            *byte = status.bits();
        }
        if let Some(byte) = buf.get_mut(1) {
            *byte = ext.bits();
        }
    }
}

fn buffer_of(opcode: u8, two: &[u8]) -> usize {
    if two.contains(&opcode) {
        1
    } else {
        0
    }
}

impl<G: PageGeometry> Transport for Sim<G> {
    type Error = SimError;

    async fn transfer(
        &mut self,
        command: &[u8],
        data: Data<'_>,
        mode: TransferMode,
    ) -> Result<(), Self::Error> {
        let data_len = match &data {
            Data::None => 0,
            Data::Read(buf) => buf.len(),
            Data::Write(buf) => buf.len(),
        };
        self.log.push(Transfer {
            command: command.to_vec(),
            data_len,
            mode,
        });
        if matches!(self.fail_from, Some(n) if self.log.len() > n) {
            return Err(SimError);
        }

        let opcode = command[0];
        let ps = G::PAGE_SIZE;
        match (opcode, data) {
            (0xD7, Data::Read(buf)) => self.status(buf),
            (0x9F, Data::Read(buf)) => {
                let id = [0x1F, 0x28, 0x00, 0x01];
                for (b, v) in buf.iter_mut().zip(id) {
                    *b = v;
                }
            }
            (0xD2, Data::Read(buf)) => {
                let (page, offset) = Self::decode(&command[1..4]);
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = self.memory[page * ps + (offset + i) % ps];
                }
            }
            (0x0B | 0x1B | 0x03 | 0x01, Data::Read(buf)) => {
                let (page, offset) = Self::decode(&command[1..4]);
                let start = page * ps + offset;
                let total = self.memory.len();
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = self.memory[(start + i) % total];
                }
            }
            (0xD4 | 0xD6, Data::Read(buf)) => {
                let buffer = buffer_of(opcode, &[0xD6]);
                let (_, offset) = Self::decode(&command[1..4]);
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = self.buffers[buffer][(offset + i) % ps];
                }
            }
            (0x84 | 0x87, Data::Write(buf)) => {
                let (_, offset) = Self::decode(&command[1..4]);
                self.write_buffer(buffer_of(opcode, &[0x87]), offset, buf);
            }
            (0x82 | 0x85, Data::Write(buf)) => {
                let buffer = buffer_of(opcode, &[0x85]);
                let (page, offset) = Self::decode(&command[1..4]);
                self.write_buffer(buffer, offset, buf);
                self.erase_page(page);
                self.program_page(buffer, page);
                self.start_busy();
            }
            (0x83 | 0x86, _) => {
                let (page, _) = Self::decode(&command[1..4]);
                self.erase_page(page);
                self.program_page(buffer_of(opcode, &[0x86]), page);
                self.start_busy();
            }
            (0x88 | 0x89, _) => {
                let (page, _) = Self::decode(&command[1..4]);
                self.program_page(buffer_of(opcode, &[0x89]), page);
                self.start_busy();
            }
            (0x53 | 0x55, _) => {
                let (page, _) = Self::decode(&command[1..4]);
                let contents = self.page(page).to_vec();
                self.buffers[buffer_of(opcode, &[0x55])] = contents;
                self.start_busy();
            }
            (0x58 | 0x59, Data::Write(buf)) => {
                let buffer = buffer_of(opcode, &[0x59]);
                let (page, offset) = Self::decode(&command[1..4]);
                self.buffers[buffer] = self.page(page).to_vec();
                self.write_buffer(buffer, offset, buf);
                self.erase_page(page);
                self.program_page(buffer, page);
                self.start_busy();
            }
            (0x81, _) => {
                let (page, _) = Self::decode(&command[1..4]);
                self.erase_page(page);
                self.start_busy();
            }
            (0x50, _) => {
                let (first, _) = Self::decode(&command[1..4]);
                for page in first..first + 8 {
                    self.erase_page(page);
                }
                self.start_busy();
            }
            (0xC7, _) if command == [0xC7, 0x94, 0x80, 0x9A] => {
                for page in 0..self.memory.len() / ps {
                    self.erase_page(page);
                }
                self.start_busy();
            }
            (0x60 | 0x61, _) => {
                let buffer = buffer_of(opcode, &[0x61]);
                let (page, _) = Self::decode(&command[1..4]);
                self.compare_mismatch = self.page(page) != &self.buffers[buffer][..];
                self.start_busy();
            }
            _ => {}
        }
        Ok(())
    }
}

/// Delay provider that returns immediately and records what was asked.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub ms: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, ms: u32) {
        self.ms.push(ms);
    }
}
