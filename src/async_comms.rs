// Refer to datasheet:
// https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use core::fmt::Debug;

use crate::address::{check_range, check_sector, command_and_address, space_in_page, Chunks};
use crate::comms::{DriverError, Opcode, Status};
use crate::config::Config;
use crate::error::Error;
use crate::pending::PendingOperation;
use crate::traits::AsyncHardwareFlashDevice;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiBus;

/// Async W25Q128 driver.
///
/// Every program and erase is a single `async fn`: awaiting it sends the
/// instruction and then polls the status register, yielding to the executor
/// through the delay between polls.
///
/// A program or erase whose future timed out or was dropped before the chip
/// finished is remembered, and the next call waits for it before sending
/// anything else.
pub struct AsyncFlashDriver<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    config: Config,
    outstanding: Option<PendingOperation>,
}

impl<SPI, CS, D> Debug for AsyncFlashDriver<SPI, CS, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncFlashDriver")
            .field("config", &self.config)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl<SPI, CS, D> AsyncHardwareFlashDevice for AsyncFlashDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = DriverError<SPI, CS>;

    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        AsyncFlashDriver::read(self, addr, buf).await
    }

    async fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        AsyncFlashDriver::sector_erase(self, addr).await
    }

    async fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        AsyncFlashDriver::write(self, addr, data).await
    }

    async fn chip_erase(&mut self) -> Result<(), Self::Error> {
        AsyncFlashDriver::chip_erase(self).await
    }
}

impl<SPI, CS, D> AsyncFlashDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub async fn new(spi: SPI, cs: CS, delay: D) -> Result<Self, DriverError<SPI, CS>> {
        Self::with_config(spi, cs, delay, Config::default()).await
    }

    pub async fn with_config(
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
        this.release_power_down().await?;
        this.write_disable().await?;
        let status = this.read_status().await?;
        debug!("Initial status: {:?}", status);
        Ok(this)
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads one byte at `addr`, then waits until the chip reports idle.
    pub async fn read_byte(&mut self, addr: impl Into<u32>) -> Result<u8, DriverError<SPI, CS>> {
        let addr = addr.into();
        check_range(addr, 1)?;
        self.settle().await?;
        let mut value = [0u8; 1];
        self.command_with_response(&command_and_address(Opcode::Read, addr), &mut value)
            .await?;
        self.wait_while_busy(self.config.page_program_timeout_us)
            .await?;
        Ok(value[0])
    }

    /// Reads flash contents into `buf`, starting at `addr`.
    pub async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DriverError<SPI, CS>> {
        check_range(addr, buf.len())?;
        self.settle().await?;
        for (chunk_addr, range) in Chunks::read(addr, buf.len()) {
            self.command_with_response(
                &command_and_address(Opcode::Read, chunk_addr),
                &mut buf[range],
            )
            .await?;
        }
        Ok(())
    }

    pub async fn write_byte(
        &mut self,
        addr: impl Into<u32>,
        value: u8,
    ) -> Result<(), DriverError<SPI, CS>> {
        let addr = addr.into();
        check_range(addr, 1)?;
        self.settle().await?;
        self.program_cycle(addr, &[value]).await
    }

    /// Programs `data` at `addr`, one cycle per page touched.
    pub async fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        check_range(addr, data.len())?;
        self.settle().await?;
        for (chunk_addr, range) in Chunks::program(addr, data.len()) {
            self.program_cycle(chunk_addr, &data[range]).await?;
        }
        Ok(())
    }

    /// Programs at most the rest of the page containing `addr`. Returns how
    /// many bytes of `data` were programmed.
    pub async fn page_program(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> Result<usize, DriverError<SPI, CS>> {
        let len = data.len().min(space_in_page(addr));
        check_range(addr, len)?;
        self.settle().await?;
        if len > 0 {
            self.program_cycle(addr, &data[..len]).await?;
        }
        Ok(len)
    }

    /// Sector erase (see datasheet 8.2.15)
    pub async fn sector_erase(&mut self, addr: u32) -> Result<(), DriverError<SPI, CS>> {
        check_sector(addr)?;
        self.settle().await?;
        let header = command_and_address(Opcode::SectorErase, addr);
        self.start(PendingOperation::SectorErase { address: addr }, &header, &[])
            .await?;
        self.settle().await
    }

    /// Chip Erase (see datasheet 8.2.18)
    pub async fn chip_erase(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.settle().await?;
        self.start(PendingOperation::ChipErase, &[Opcode::ChipErase as u8], &[])
            .await?;
        self.settle().await
    }

    /// Waits for any operation in flight, then enters power-down.
    pub async fn power_down(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.settle().await?;
        self.wait_while_busy(self.config.wake_timeout_us).await?;
        self.command(&[Opcode::PowerDown as u8]).await?;
        self.delay
            .delay_us(self.config.power_down_delay_us)
            .await;
        Ok(())
    }

    pub async fn release_power_down(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.command(&[Opcode::ReleasePowerDown as u8]).await?;
        self.delay
            .delay_us(self.config.release_power_down_delay_us)
            .await;
        self.wait_while_busy(self.config.wake_timeout_us).await
    }

    pub async fn manufacturer_id(&mut self) -> Result<u8, DriverError<SPI, CS>> {
        self.settle().await?;
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReadMfDId as u8, 0, 0, 0], &mut response)
            .await?;
        Ok(response[0])
    }

    pub async fn is_busy(&mut self) -> Result<bool, DriverError<SPI, CS>> {
        Ok(self.read_status().await?.contains(Status::BUSY))
    }

    pub async fn is_write_enabled(&mut self) -> Result<bool, DriverError<SPI, CS>> {
        Ok(self.read_status().await?.contains(Status::WEL))
    }

    /// Reads the status register.
    pub async fn read_status(&mut self) -> Result<Status, DriverError<SPI, CS>> {
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReadStatus as u8], &mut response)
            .await?;

        Ok(Status::from_bits_truncate(response[0]))
    }

    /// Polls the status register until BUSY clears or `timeout_us` elapses.
    pub async fn wait_while_busy(&mut self, timeout_us: u32) -> Result<(), DriverError<SPI, CS>> {
        let interval = self.config.poll_interval();
        let mut waited: u32 = 0;
        loop {
            let status = self.read_status().await?;
            if !status.contains(Status::BUSY) {
                trace!("Flash ready after {} us", waited);
                return Ok(());
            }
            if waited >= timeout_us {
                warn!("Flash still busy after {} us: {:?}", waited, status);
                return Err(Error::Timeout);
            }
            self.delay.delay_us(interval).await;
            waited = waited.saturating_add(interval);
        }
    }

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1.
    pub async fn write_enable(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.command(&[Opcode::WriteEnable as u8]).await
    }

    pub async fn write_disable(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.command(&[Opcode::WriteDisable as u8]).await
    }

    /// Write enable, Page Program, wait, write disable. `data` must not
    /// cross a page boundary.
    async fn program_cycle(&mut self, addr: u32, data: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        let operation = PendingOperation::PageProgram {
            address: addr,
            len: data.len(),
        };
        let header = command_and_address(Opcode::PageProg, addr);
        self.start(operation, &header, data).await?;
        self.settle().await
    }

    /// Write enable followed by a program or erase instruction. The operation
    /// is recorded before the instruction goes out.
    async fn start(
        &mut self,
        operation: PendingOperation,
        header: &[u8],
        payload: &[u8],
    ) -> Result<(), DriverError<SPI, CS>> {
        self.write_enable().await?;
        self.outstanding = Some(operation);
        self.command_with_payload(header, payload).await
    }

    /// Waits out a recorded program or erase, then clears the write enable
    /// latch. The record is kept until both have gone through.
    async fn settle(&mut self) -> Result<(), DriverError<SPI, CS>> {
        if let Some(operation) = self.outstanding {
            self.wait_while_busy(operation.timeout_us(&self.config))
                .await?;
            self.write_disable().await?;
            self.outstanding = None;
        }
        Ok(())
    }

    fn select(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.cs.set_low().map_err(Error::ChipSelect)
    }

    fn deselect(&mut self) -> Result<(), DriverError<SPI, CS>> {
        self.cs.set_high().map_err(Error::ChipSelect)
    }

    /// Raises chip select after a transfer, reporting the transfer error first.
    fn finish(&mut self, result: Result<(), SPI::Error>) -> Result<(), DriverError<SPI, CS>> {
        let deselected = self.deselect();
        result.map_err(Error::Spi)?;
        deselected
    }

    /// Writes a command to the SPI bus
    async fn command(&mut self, bytes: &[u8]) -> Result<(), DriverError<SPI, CS>> {
        self.select()?;
        let result = self.send(bytes, &[]).await;
        self.finish(result)
    }

    /// Writes a command to the SPI bus and reads the response that follows it
    async fn command_with_response(
        &mut self,
        instruction: &[u8],
        response: &mut [u8],
    ) -> Result<(), DriverError<SPI, CS>> {
        self.select()?;
        let result = self.exchange(instruction, response).await;
        self.finish(result)
    }

    /// Writes a command followed by its data phase within one transaction
    async fn command_with_payload(
        &mut self,
        instruction: &[u8],
        payload: &[u8],
    ) -> Result<(), DriverError<SPI, CS>> {
        self.select()?;
        let result = self.send(instruction, payload).await;
        self.finish(result)
    }

    async fn send(&mut self, instruction: &[u8], payload: &[u8]) -> Result<(), SPI::Error> {
        self.spi.write(instruction).await?;
        if !payload.is_empty() {
            self.spi.write(payload).await?;
        }
        self.spi.flush().await
    }

    async fn exchange(&mut self, instruction: &[u8], response: &mut [u8]) -> Result<(), SPI::Error> {
        self.spi.write(instruction).await?;
        self.spi.read(response).await?;
        self.spi.flush().await
    }
}
