//! An `embedded-hal-async` driver for AT45-series SPI DataFlash chips.
//!
//! Supports both page-size generations: chips with 264-byte pages and chips
//! with 1056-byte pages. The page size is a type parameter of [`Flash`], so
//! the address encoding is fixed at compile time.
//!
//! Beyond plain page reads and writes the driver exposes the DataFlash
//! specific features: the two on-chip SRAM buffers, buffer/page compare for
//! erase verification, read-modify-write, continuous array reads and the
//! power-down modes. [`Flash`] also implements the
//! [`embedded_storage_async::nor_flash`] traits.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(spi: impl embedded_hal_async::spi::SpiDevice,
//! #                  delay: impl embedded_hal_async::delay::DelayNs) {
//! use dataflash_async::{Buffer, Config, Flash, Page1056, SpiTransport};
//!
//! // AT45DB641E: 8192 pages of 1056 bytes in 1024 blocks.
//! let config = Config::new(8192, 1024).with_extended_status(true);
//! let mut flash: Flash<_, _, Page1056> = Flash::new(SpiTransport::new(spi), delay, config);
//!
//! flash.section_erase(10, 11).await.unwrap();
//! flash.write_mem(Buffer::One, 10, 0, b"hello").await.unwrap();
//!
//! let mut buf = [0u8; 5];
//! flash.read_mem(10, 0, &mut buf).await.unwrap();
//! # }
//! ```
//!
//! # Features
//!
//! * `defmt`: log through [`defmt`](https://docs.rs/defmt).

#![cfg_attr(not(test), no_std)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

// This must go first so the macros are visible in the other modules.
mod fmt;

pub mod address;
mod error;
pub mod selftest;
pub mod series45;
#[cfg(test)]
mod sim;
pub mod status;
mod storage;
pub mod transport;

pub use crate::address::{Page1056, Page264, PageGeometry, PageSize};
pub use crate::error::Error;
pub use crate::series45::{Buffer, Config, ContinuousRead, Flash, PageConfig, PowerDown};
pub use crate::status::{Status, StatusExt};
pub use crate::transport::{SpiTransport, Transport};
