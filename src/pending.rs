//! Non-blocking program and erase.
//!
//! `begin_*` sends the instruction and returns at once with a [`Pending`]
//! handle. The handle borrows the driver, so nothing else can be sent to the
//! chip until it is waited for or dropped. The blocking operations on
//! [`FlashDriver`] are `begin_*` followed by [`Pending::wait`].
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::address::{check_range, check_sector, command_and_address, space_in_page};
use crate::comms::{DriverError, FlashDriver, Opcode};
use crate::config::Config;

/// What a [`Pending`] handle is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PendingOperation {
    /// `len` bytes programmed at `address`, never crossing a page boundary.
    PageProgram { address: u32, len: usize },
    SectorErase { address: u32 },
    ChipErase,
}

impl PendingOperation {
    /// Bytes handed to the chip; zero for erases.
    pub fn len(&self) -> usize {
        match self {
            PendingOperation::PageProgram { len, .. } => *len,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn timeout_us(&self, config: &Config) -> u32 {
        match self {
            PendingOperation::PageProgram { .. } => config.page_program_timeout_us,
            PendingOperation::SectorErase { .. } => config.sector_erase_timeout_us,
            PendingOperation::ChipErase => config.chip_erase_timeout_us,
        }
    }
}

/// A program or erase the chip may still be working on.
///
/// Dropping the handle without waiting is allowed: the driver then waits for
/// the operation before the next instruction it sends.
#[must_use = "the chip may still be busy; call `wait` or poll `is_busy`"]
pub struct Pending<'a, SPI, CS, D> {
    driver: &'a mut FlashDriver<SPI, CS, D>,
    operation: PendingOperation,
}

impl<'a, SPI, CS, D> Pending<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn operation(&self) -> PendingOperation {
        self.operation
    }

    /// Reads the status register once.
    pub fn is_busy(&mut self) -> Result<bool, DriverError<SPI, CS>> {
        self.driver.is_busy()
    }

    /// Blocks until the chip is idle, bounded by the operation's timeout in
    /// [`Config`], then clears the write enable latch.
    pub fn wait(self) -> Result<(), DriverError<SPI, CS>> {
        self.driver.settle()
    }
}

impl<SPI, CS, D> FlashDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Starts programming `data` at `addr` without waiting for completion.
    ///
    /// Only the bytes up to the end of the page containing `addr` are sent;
    /// [`PendingOperation::len`] tells how many. Empty `data` sends nothing.
    pub fn begin_page_program(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> Result<Pending<'_, SPI, CS, D>, DriverError<SPI, CS>> {
        let len = data.len().min(space_in_page(addr));
        check_range(addr, len)?;
        self.settle()?;

        let operation = PendingOperation::PageProgram { address: addr, len };
        if len > 0 {
            let header = command_and_address(Opcode::PageProg, addr);
            self.start(operation, &header, &data[..len])?;
        }
        Ok(Pending {
            driver: self,
            operation,
        })
    }

    /// Starts erasing the sector at `addr` without waiting for completion.
    pub fn begin_sector_erase(
        &mut self,
        addr: u32,
    ) -> Result<Pending<'_, SPI, CS, D>, DriverError<SPI, CS>> {
        check_sector(addr)?;
        self.settle()?;

        let operation = PendingOperation::SectorErase { address: addr };
        let header = command_and_address(Opcode::SectorErase, addr);
        self.start(operation, &header, &[])?;
        Ok(Pending {
            driver: self,
            operation,
        })
    }

    /// Starts a chip erase without waiting for completion.
    pub fn begin_chip_erase(&mut self) -> Result<Pending<'_, SPI, CS, D>, DriverError<SPI, CS>> {
        self.settle()?;

        let operation = PendingOperation::ChipErase;
        self.start(operation, &[Opcode::ChipErase as u8], &[])?;
        Ok(Pending {
            driver: self,
            operation,
        })
    }
}
