// Refer to datasheet:
// https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use core::fmt::Debug;

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, SpiBus};

use crate::address::{check_range, command_and_address, Chunks};
use crate::config::Config;
use crate::error::Error;
use crate::pending::PendingOperation;
use crate::traits::HardwareFlashDevice;

pub(crate) type DriverError<SPI, CS> =
    Error<<SPI as spi::ErrorType>::Error, <CS as digital::ErrorType>::Error>;

/// Blocking W25Q128 driver.
///
/// Owns the SPI bus, the chip-select line and a delay source for its whole
/// lifetime; [`FlashDriver::release`] hands them back.
///
/// After [`FlashDriver::power_down`] the chip ignores everything except
/// [`FlashDriver::release_power_down`]. The driver cannot observe that state,
/// so every power-down must be matched by a release before any other call.
pub struct FlashDriver<SPI, CS, D> {
    pub(crate) spi: SPI,
    pub(crate) cs: CS,
    pub(crate) delay: D,
    pub(crate) config: Config,
    /// Program or erase that was started but not yet waited for.
    pub(crate) outstanding: Option<PendingOperation>,
}

impl<SPI, CS, D> Debug for FlashDriver<SPI, CS, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashDriver")
            .field("config", &self.config)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

/// Instruction set used by the driver.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Clear the write enable latch.
    WriteDisable = 0x04,
    PageProg = 0x02,
    /// Read the 8-bit status register 1.
    ReadStatus = 0x05,
    Read = 0x03,
    SectorErase = 0x20,
    ChipErase = 0xC7,
    PowerDown = 0xB9,
    ReleasePowerDown = 0xAB,
    /// Read the 8-bit manufacturer and device IDs.
    ReadMfDId = 0x90,
}

bitflags! {
    /// Status register 1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Erase or write in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 block protection bits.
        const PROT = 0b0001_1100;
        /// Top/bottom protect.
        const TB = 1 << 5;
        /// Sector/block protect.
        const SEC = 1 << 6;
        /// **S**tatus **R**egister **P**rotect bit.
        const SRP = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Status({=u8:#04x})", self.bits())
    }
}

impl<SPI, CS, D> HardwareFlashDevice for FlashDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = DriverError<SPI, CS>;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        FlashDriver::read(self, addr, buf)
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        FlashDriver::sector_erase(self, addr)
    }

    /// Data running past the end of the page continues in the next page
    /// rather than wrapping around inside it.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        FlashDriver::write(self, addr, data)
    }

    fn chip_erase(&mut self) -> Result<(), Self::Error> {
        FlashDriver::chip_erase(self)
    }
}

impl<SPI, CS, D> FlashDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Binds the driver with the datasheet timing in [`Config::default`].
    pub fn new(spi: SPI, cs: CS, delay: D) -> Result<Self, DriverError<SPI, CS>> {
        Self::with_config(spi, cs, delay, Config::default())
    }

    /// Parks chip select high, wakes the chip from power-down and clears the
    /// write enable latch.
    pub fn with_config(
        spi: SPI,
        cs: CS,
        delay: D,
        config: Config,
    ) -> Result<Self, DriverError<SPI, CS>> {
        let mut this = Self {
            spi,
            cs,
            delay,
            config,
            outstanding: None,
        };
        this.deselect()?;
        this.release_power_down()?;
        this.write_disable()?;
        let status = this.read_status()?;
        debug!("Initial status: {:?}", status);
        Ok(this)
    }

    /// Gives back the bus, the chip-select line and the delay.
    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// From datasheet section 8.2.6 (Read Data (03h))
    /// Reads one byte at `addr`, then waits until the chip reports idle.
    pub fn read_byte(&mut self, addr: impl Into<u32>) -> Result<u8, DriverError<SPI, CS>> {
        let addr = addr.into();
        check_range(addr, 1)?;
        self.settle()?;

        let mut value = [0u8; 1];
        self.command_with_response(&command_and_address(Opcode::Read, addr), &mut value)?;
        self.wait_while_busy(self.config.page_program_timeout_us)?;
        Ok(value[0])
    }

    /// Reads flash contents into `buf`, starting at `addr`.
    ///
    /// The read is split into transactions of at most
    /// [`READ_CHUNK_SIZE`](crate::READ_CHUNK_SIZE) bytes, each with its own
    /// instruction and address. An empty `buf` does not touch the bus.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DriverError<SPI, CS>> {
        check_range(addr, buf.len())?;
        self.settle()?;

        for (chunk_addr, range) in Chunks::read(addr, buf.len()) {
            self.command_with_response(
                &command_and_address(Opcode::Read, chunk_addr),
                &mut buf[range],
            )?;
        }
        Ok(())
    }

    /// Programs a single byte and blocks until the chip is done.
    pub fn write_byte(
        &mut self,
        addr: impl Into<u32>,
        value: u8,
    ) -> Result<(), DriverError<SPI, CS>> {
        self.begin_page_program(addr.into(), &[value])?.wait()
    }

    /// Programs `data` starting at `addr`, one write-enable / Page Program /
    /// wait / write-disable cycle per page touched.
    ///
    /// The target range must have been erased: programming only clears bits.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        check_range(addr, data.len())?;
        for (chunk_addr, range) in Chunks::program(addr, data.len()) {
            self.begin_page_program(chunk_addr, &data[range])?.wait()?;
        }
        Ok(())
    }

    /// From datasheet section 8.2.13
    /// Programs at most the rest of the page containing `addr` and blocks
    /// until done. Returns how many bytes of `data` were programmed; the
    /// caller re-issues the remainder at the next page.
    pub fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<usize, DriverError<SPI, CS>> {
        let pending = self.begin_page_program(addr, data)?;
        let len = pending.operation().len();
        pending.wait()?;
        Ok(len)
    }

    /// Sector erase (see datasheet 8.2.15)
    /// Sets the 4 KiB sector starting at `addr` to all 1s (FFh). `addr` must
    /// be sector aligned.
    pub fn sector_erase(&mut self, addr: u32) -> Result<(), DriverError<SPI, CS>> {
        self.begin_sector_erase(addr)?.wait()
    }

    /// Chip Erase (see datasheet 8.2.18)
    /// Can take up to [`Config::chip_erase_timeout_us`].
    pub fn chip_erase(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.begin_chip_erase()?.wait()
    }

    /// Power-down (see datasheet 8.2.33)
    /// Waits for any operation in flight, then sends B9h and honors tDP.
    /// Only [`FlashDriver::release_power_down`] is accepted afterwards.
    pub fn power_down(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.settle()?;
        self.wait_while_busy(self.config.wake_timeout_us)?;
        self.command(&[Opcode::PowerDown as u8])?;
        self.delay.delay_us(self.config.power_down_delay_us);
        Ok(())
    }

    /// Release Power-down (see datasheet 8.2.34)
    /// Sends ABh, waits tRES1 and then until the status register reads idle.
    pub fn release_power_down(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.command(&[Opcode::ReleasePowerDown as u8])?;
        self.delay.delay_us(self.config.release_power_down_delay_us);
        self.wait_while_busy(self.config.wake_timeout_us)
    }

    /// Manufacturer ID (90h). Winbond parts answer
    /// [`WINBOND_MANUFACTURER_ID`](crate::WINBOND_MANUFACTURER_ID).
    pub fn manufacturer_id(&mut self) -> Result<u8, DriverError<SPI, CS>> {
        self.settle()?;
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReadMfDId as u8, 0, 0, 0], &mut response)?;
        Ok(response[0])
    }

    /// Manufacturer and device ID (90h), in that order.
    pub fn manufacturer_device_id(&mut self) -> Result<[u8; 2], DriverError<SPI, CS>> {
        self.settle()?;
        let mut response = [0u8; 2];
        self.command_with_response(&[Opcode::ReadMfDId as u8, 0, 0, 0], &mut response)?;
        Ok(response)
    }

    /// Reads the status register once. An operation left outstanding is
    /// still settled, write disable included, by the next call that needs it.
    pub fn is_busy(&mut self) -> Result<bool, DriverError<SPI, CS>> {
        Ok(self.read_status()?.contains(Status::BUSY))
    }

    pub fn is_write_enabled(&mut self) -> Result<bool, DriverError<SPI, CS>> {
        Ok(self.read_status()?.contains(Status::WEL))
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<Status, DriverError<SPI, CS>> {
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReadStatus as u8], &mut response)?;

        Ok(Status::from_bits_truncate(response[0]))
    }

    /// Polls the status register until BUSY clears, giving up with
    /// [`Error::Timeout`] once `timeout_us` has elapsed.
    ///
    /// Every poll is a complete Read Status Register transaction.
    pub fn wait_while_busy(&mut self, timeout_us: u32) -> Result<(), DriverError<SPI, CS>> {
        let interval = self.config.poll_interval();
        let mut waited: u32 = 0;
        loop {
            let status = self.read_status()?;
            if !status.contains(Status::BUSY) {
                trace!("Flash ready after {} us", waited);
                return Ok(());
            }
            if waited >= timeout_us {
                warn!("Flash still busy after {} us: {:?}", waited, status);
                return Err(Error::Timeout);
            }
            self.delay.delay_us(interval);
            waited = waited.saturating_add(interval);
        }
    }

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1. The WEL bit must be set prior to every Page Program,
    /// Sector Erase and Chip Erase instruction.
    pub fn write_enable(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.command(&[Opcode::WriteEnable as u8])
    }

    /// From datasheet section 8.2.3
    /// Resets the Write Enable Latch (WEL) bit to 0.
    pub fn write_disable(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.command(&[Opcode::WriteDisable as u8])
    }

    /// Waits out a program or erase that was started but never waited for,
    /// then clears the write enable latch.
    pub(crate) fn settle(&mut self) -> Result<(), DriverError<SPI, CS>> {
        if let Some(operation) = self.outstanding {
            self.wait_while_busy(operation.timeout_us(&self.config))?;
            self.outstanding = None;
            self.write_disable()?;
        }
        Ok(())
    }

    /// Write enable followed by a program or erase instruction. The operation
    /// stays outstanding until [`FlashDriver::settle`] or an idle status clears it.
    pub(crate) fn start(
        &mut self,
        operation: PendingOperation,
        header: &[u8],
        payload: &[u8],
    ) -> Result<(), DriverError<SPI, CS>> {
        self.write_enable()?;
        self.outstanding = Some(operation);
        if payload.is_empty() {
            self.command(header)
        } else {
            self.command_with_payload(header, payload)
        }
    }

    pub(crate) fn select(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.cs.set_low().map_err(Error::ChipSelect)
    }

    pub(crate) fn deselect(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.cs.set_high().map_err(Error::ChipSelect)
    }

    /// Runs `f` with chip select asserted. Chip select is raised again even
    /// when the transfer fails.
    fn transaction<R>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<R, SPI::Error>,
    ) -> Result<R, DriverError<SPI, CS>> {
        self.select()?;
        let result = f(&mut self.spi).and_then(|value| self.spi.flush().map(|()| value));
        let deselected = self.deselect();
        let value = result.map_err(Error::Spi)?;
        deselected?;
        Ok(value)
    }

    /// Writes a command to the SPI bus
    fn command(&mut self, bytes: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        self.transaction(|spi| spi.write(bytes))
    }

    /// Writes a command to the SPI bus and reads the response that follows it
    fn command_with_response(
        &mut self,
        instruction: &[u8],
        response: &mut [u8],
    ) -> Result<(), DriverError<SPI, CS>> {
        self.transaction(|spi| {
            spi.write(instruction)?;
            spi.read(response)
        })
    }

    /// Writes a command followed by its data phase within one transaction
    fn command_with_payload(
        &mut self,
        instruction: &[u8],
        payload: &[u8],
    ) -> Result<(), DriverError<SPI, CS>> {
        self.transaction(|spi| {
            spi.write(instruction)?;
            spi.write(payload)
        })
    }
}
