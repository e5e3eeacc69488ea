//! Transactions held open across several calls.
//!
//! A stream keeps chip select asserted from `init_stream_*` until `close`
//! (or until it is dropped), so the caller can pull or push bytes without
//! sizing a buffer up front.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::address::{check_range, command_and_address, space_in_page};
use crate::comms::{DriverError, FlashDriver, Opcode};
use crate::error::Error;
use crate::pending::PendingOperation;

/// An open Read Data transaction.
///
/// The chip advances its address after every byte; the stream refuses to read
/// past the end of the array rather than letting the chip wrap to 0.
pub struct ReadStream<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    driver: &'a mut FlashDriver<SPI, CS, D>,
    next: u32,
    open: bool,
}

/// An open Page Program transaction.
///
/// Bytes are accepted only up to the end of the page the stream started in;
/// anything beyond would wrap around inside that page on the chip.
pub struct WriteStream<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    driver: &'a mut FlashDriver<SPI, CS, D>,
    start: u32,
    written: usize,
    open: bool,
}

impl<SPI, CS, D> FlashDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Opens a Read Data transaction at `addr`.
    pub fn init_stream_read(
        &mut self,
        addr: impl Into<u32>,
    ) -> Result<ReadStream<'_, SPI, CS, D>, DriverError<SPI, CS>> {
        let addr = addr.into();
        check_range(addr, 0)?;
        self.settle()?;
        self.open_stream(&command_and_address(Opcode::Read, addr))?;
        Ok(ReadStream {
            driver: self,
            next: addr,
            open: true,
        })
    }

    /// Sets the write enable latch and opens a Page Program transaction at
    /// `addr`.
    pub fn init_stream_write(
        &mut self,
        addr: impl Into<u32>,
    ) -> Result<WriteStream<'_, SPI, CS, D>, DriverError<SPI, CS>> {
        let addr = addr.into();
        check_range(addr, 0)?;
        self.settle()?;
        self.write_enable()?;
        self.outstanding = Some(PendingOperation::PageProgram {
            address: addr,
            len: 0,
        });
        self.open_stream(&command_and_address(Opcode::PageProg, addr))?;
        Ok(WriteStream {
            driver: self,
            start: addr,
            written: 0,
            open: true,
        })
    }

    fn open_stream(&mut self, header: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        self.select()?;
        if let Err(err) = self.spi.write(header) {
            // CS is never left low behind a failed transfer.
            let _ = self.deselect();
            return Err(Error::Spi(err));
        }
        Ok(())
    }

    /// Flushes the bus and raises chip select, reporting the first failure.
    fn close_stream(&mut self) -> Result<(), DriverError<SPI, CS>> {
        let flushed = self.spi.flush();
        self.deselect()?;
        flushed.map_err(Error::Spi)
    }
}

impl<'a, SPI, CS, D> ReadStream<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Address of the next byte the chip will return.
    pub fn address(&self) -> u32 {
        self.next
    }

    pub fn read_byte(&mut self) -> Result<u8, DriverError<SPI, CS>> {
        let mut value = [0u8; 1];
        self.read(&mut value)?;
        Ok(value[0])
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), DriverError<SPI, CS>> {
        check_range(self.next, buf.len())?;
        self.driver.spi.read(buf).map_err(Error::Spi)?;
        self.next += buf.len() as u32;
        Ok(())
    }

    /// Ends the transaction and waits until the chip reports idle.
    pub fn close(mut self) -> Result<(), DriverError<SPI, CS>> {
        self.open = false;
        self.driver.close_stream()?;
        let timeout = self.driver.config.page_program_timeout_us;
        self.driver.wait_while_busy(timeout)
    }
}

impl<'a, SPI, CS, D> Drop for ReadStream<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    fn drop(&mut self) {
        if self.open {
            let _ = self.driver.close_stream();
        }
    }
}

impl<'a, SPI, CS, D> WriteStream<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Bytes that still fit before the page boundary.
    pub fn remaining(&self) -> usize {
        space_in_page(self.start) - self.written
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), DriverError<SPI, CS>> {
        self.write(&[value])
    }

    /// Sends `data`, or nothing at all with [`Error::OutOfBounds`] if it
    /// does not fit in [`WriteStream::remaining`].
    pub fn write(&mut self, data: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        if data.len() > self.remaining() {
            return Err(Error::OutOfBounds);
        }
        self.driver.spi.write(data).map_err(Error::Spi)?;
        self.written += data.len();
        self.driver.outstanding = Some(PendingOperation::PageProgram {
            address: self.start,
            len: self.written,
        });
        Ok(())
    }

    /// Ends the transaction, which starts the program, then waits for it and
    /// clears the write enable latch.
    pub fn close(mut self) -> Result<(), DriverError<SPI, CS>> {
        self.open = false;
        self.driver.close_stream()?;
        self.driver.settle()
    }
}

impl<'a, SPI, CS, D> Drop for WriteStream<'a, SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    fn drop(&mut self) {
        if self.open {
            let _ = self.driver.close_stream();
        }
    }
}
