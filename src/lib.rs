//! Driver for the Winbond W25Q128 serial NOR flash (16 MiB, 256-byte pages,
//! 4 KiB sectors).
//!
//! Refer to datasheet:
//! https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
//!
//! The driver talks to the chip through an [`embedded_hal::spi::SpiBus`] and
//! owns the chip-select line as an [`embedded_hal::digital::OutputPin`], so a
//! single bus transaction can be kept open across several calls (see
//! [`ReadStream`] and [`WriteStream`]). Every wait on the chip's
//! write-in-progress bit is bounded by the timeouts in [`Config`].
//!
//! ```ignore
//! let mut flash = FlashDriver::new(spi, cs, delay)?;
//! flash.sector_erase(0x1000)?;
//! flash.write(0x1000, b"hello")?;
//! let mut buf = [0u8; 5];
//! flash.read(0x1000, &mut buf)?;
//! ```
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod address;
mod async_comms;
mod comms;
mod config;
mod error;
mod pending;
mod storage;
mod stream;
mod traits;

pub use address::PageAddress;
pub use async_comms::AsyncFlashDriver;
pub use comms::{FlashDriver, Opcode, Status};
pub use config::Config;
pub use error::{Error, ErrorKind};
pub use pending::{Pending, PendingOperation};
pub use stream::{ReadStream, WriteStream};
pub use traits::{AsyncHardwareFlashDevice, HardwareFlashDevice};

/// Total size of the array in bytes.
pub const CAPACITY: u32 = 16 * 1024 * 1024;
/// Program granularity. A single Page Program never crosses a page boundary.
pub const PAGE_SIZE: u32 = 256;
pub const N_PAGES: u32 = CAPACITY / PAGE_SIZE;
/// Smallest erase granularity.
pub const SECTOR_SIZE: u32 = PAGE_SIZE * 16;
pub const N_SECTORS: u32 = CAPACITY / SECTOR_SIZE;
/// Largest number of bytes fetched by one Read Data transaction in
/// [`FlashDriver::read`].
pub const READ_CHUNK_SIZE: usize = 1024;
/// JEDEC manufacturer ID reported by Winbond parts.
pub const WINBOND_MANUFACTURER_ID: u8 = 0xEF;
