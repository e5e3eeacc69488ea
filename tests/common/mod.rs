//! Simulated W25Q128 behind `SpiBus` + `OutputPin` + `DelayNs`.
//!
//! The chip decodes instructions byte by byte while chip select is low and
//! applies program/erase effects when chip select rises, like the real part.
//! Every completed transaction is logged, and anything the datasheet forbids
//! (program without WEL, instructions while busy, clocking while deselected,
//! a Page Program that wraps inside its page) is recorded as a violation.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::spi::{ErrorKind, ErrorType};
use w25q128_nor_flash::{FlashDriver, CAPACITY, SECTOR_SIZE};

pub const WREN: u8 = 0x06;
pub const WRDI: u8 = 0x04;
pub const PP: u8 = 0x02;
pub const RDSR: u8 = 0x05;
pub const READ: u8 = 0x03;
pub const SE: u8 = 0x20;
pub const CE: u8 = 0xC7;
pub const PD: u8 = 0xB9;
pub const RPD: u8 = 0xAB;
pub const MFID: u8 = 0x90;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub opcode: u8,
    /// Everything clocked in while chip select was low.
    pub bytes: Vec<u8>,
    pub address: Option<u32>,
    /// Bytes clocked in after the instruction (and address, if any).
    pub payload: Vec<u8>,
    pub busy: bool,
    pub wel: bool,
}

#[derive(Debug)]
pub struct ChipState {
    memory: HashMap<u32, u8>,
    selected: bool,
    rx: Vec<u8>,
    pub wel: bool,
    pub busy_polls: u32,
    pub powered_down: bool,
    pub stuck_busy: bool,
    pub fail_transfers: bool,
    pub program_busy_polls: u32,
    pub erase_busy_polls: u32,
    pub chip_erase_busy_polls: u32,
    pub wake_busy_polls: u32,
    pub manufacturer_id: u8,
    pub device_id: u8,
    pub log: Vec<Transaction>,
    pub violations: Vec<String>,
    pub delayed_ns: u64,
}

impl ChipState {
    fn new() -> Self {
        Self {
            memory: HashMap::new(),
            selected: false,
            rx: Vec::new(),
            wel: false,
            busy_polls: 0,
            powered_down: false,
            stuck_busy: false,
            fail_transfers: false,
            program_busy_polls: 2,
            erase_busy_polls: 5,
            chip_erase_busy_polls: 20,
            wake_busy_polls: 0,
            manufacturer_id: 0xEF,
            device_id: 0x17,
            log: Vec::new(),
            violations: Vec::new(),
            delayed_ns: 0,
        }
    }

    fn busy(&self) -> bool {
        self.stuck_busy || self.busy_polls > 0
    }

    fn status(&self) -> u8 {
        (self.busy() as u8) | ((self.wel as u8) << 1)
    }

    fn address(&self) -> u32 {
        (self.rx[1] as u32) << 16 | (self.rx[2] as u32) << 8 | self.rx[3] as u32
    }

    fn byte_at(&self, addr: u32) -> u8 {
        *self.memory.get(&(addr % CAPACITY)).unwrap_or(&0xFF)
    }

    fn exchange(&mut self, out: u8) -> u8 {
        if !self.selected {
            self.violations.push(format!("clocked {:#04x} while deselected", out));
            return 0xFF;
        }
        let index = self.rx.len();
        self.rx.push(out);
        if self.powered_down || index == 0 {
            return 0xFF;
        }
        match self.rx[0] {
            RDSR => self.status(),
            READ if index >= 4 => self.byte_at(self.address() + (index - 4) as u32),
            MFID if index == 4 => self.manufacturer_id,
            MFID if index == 5 => self.device_id,
            RPD if index >= 4 => self.device_id,
            _ => 0xFF,
        }
    }

    fn select(&mut self) {
        if self.selected {
            self.violations.push("chip select asserted twice".into());
        }
        self.selected = true;
        self.rx.clear();
    }

    fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        if self.rx.is_empty() {
            return;
        }
        let opcode = self.rx[0];
        let has_address = matches!(opcode, PP | READ | SE | MFID) && self.rx.len() >= 4;
        let address = has_address.then(|| self.address());
        let payload = if has_address {
            self.rx[4..].to_vec()
        } else {
            self.rx[1..].to_vec()
        };
        let busy = self.busy();
        self.log.push(Transaction {
            opcode,
            bytes: self.rx.clone(),
            address,
            payload: payload.clone(),
            busy,
            wel: self.wel,
        });

        if self.powered_down {
            if opcode == RPD {
                self.powered_down = false;
                self.busy_polls = self.wake_busy_polls;
            } else {
                self.violations
                    .push(format!("{:#04x} sent while powered down", opcode));
            }
            return;
        }

        if busy && opcode != RDSR {
            self.violations
                .push(format!("{:#04x} sent while busy", opcode));
            return;
        }

        match opcode {
            RDSR => {
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                }
            }
            WREN => self.wel = true,
            WRDI => self.wel = false,
            PP => self.program(address, &payload),
            SE => {
                if !self.wel {
                    self.violations.push("sector erase without WEL".into());
                    return;
                }
                let Some(address) = address else { return };
                let base = address - address % SECTOR_SIZE;
                self.memory.retain(|a, _| *a < base || *a >= base + SECTOR_SIZE);
                self.wel = false;
                self.busy_polls = self.erase_busy_polls;
            }
            CE => {
                if !self.wel {
                    self.violations.push("chip erase without WEL".into());
                    return;
                }
                self.memory.clear();
                self.wel = false;
                self.busy_polls = self.chip_erase_busy_polls;
            }
            PD => self.powered_down = true,
            RPD => self.busy_polls = self.wake_busy_polls,
            _ => {}
        }
    }

    fn program(&mut self, address: Option<u32>, data: &[u8]) {
        if !self.wel {
            self.violations.push("page program without WEL".into());
            return;
        }
        let Some(address) = address else { return };
        if data.is_empty() {
            // Ignored by the chip; WEL stays set.
            return;
        }
        let offset = address % 256;
        if offset as usize + data.len() > 256 {
            self.violations
                .push(format!("page program of {} bytes at {:#x} wraps", data.len(), address));
        }
        let base = address - offset;
        for (i, byte) in data.iter().enumerate() {
            let target = base + (offset + i as u32) % 256;
            let old = self.byte_at(target);
            self.memory.insert(target, old & byte);
        }
        self.wel = false;
        self.busy_polls = self.program_busy_polls;
    }
}

/// Handle shared by the bus, the chip-select pin and the test body.
#[derive(Clone)]
pub struct SimChip(Rc<RefCell<ChipState>>);

impl SimChip {
    pub fn new() -> Self {
        SimChip(Rc::new(RefCell::new(ChipState::new())))
    }

    pub fn bus(&self) -> SimBus {
        SimBus(self.0.clone())
    }

    pub fn cs(&self) -> SimCs {
        SimCs(self.0.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.0.clone())
    }

    pub fn state(&self) -> std::cell::RefMut<'_, ChipState> {
        self.0.borrow_mut()
    }

    /// Returns and clears the transaction log.
    pub fn take_log(&self) -> Vec<Transaction> {
        std::mem::take(&mut self.0.borrow_mut().log)
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.0.borrow().log.iter().map(|t| t.opcode).collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.0.borrow().violations.clone()
    }

    pub fn selected(&self) -> bool {
        self.0.borrow().selected
    }

    pub fn poke(&self, addr: u32, data: &[u8]) {
        let mut state = self.0.borrow_mut();
        for (i, byte) in data.iter().enumerate() {
            state.memory.insert(addr + i as u32, *byte);
        }
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let state = self.0.borrow();
        (0..len).map(|i| state.byte_at(addr + i as u32)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFault;

impl embedded_hal::spi::Error for SimFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub struct SimBus(Rc<RefCell<ChipState>>);

impl SimBus {
    fn check(&self) -> Result<(), SimFault> {
        if self.0.borrow().fail_transfers {
            Err(SimFault)
        } else {
            Ok(())
        }
    }
}

impl ErrorType for SimBus {
    type Error = SimFault;
}

impl embedded_hal::spi::SpiBus for SimBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), SimFault> {
        self.check()?;
        let mut state = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = state.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SimFault> {
        self.check()?;
        let mut state = self.0.borrow_mut();
        for word in words {
            state.exchange(*word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimFault> {
        self.check()?;
        let mut state = self.0.borrow_mut();
        for i in 0..read.len().max(write.len()) {
            let received = state.exchange(write.get(i).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(i) {
                *slot = received;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SimFault> {
        self.check()?;
        let mut state = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = state.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SimFault> {
        self.check()
    }
}

impl embedded_hal_async::spi::SpiBus for SimBus {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), SimFault> {
        embedded_hal::spi::SpiBus::read(self, words)
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), SimFault> {
        embedded_hal::spi::SpiBus::write(self, words)
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimFault> {
        embedded_hal::spi::SpiBus::transfer(self, read, write)
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SimFault> {
        embedded_hal::spi::SpiBus::transfer_in_place(self, words)
    }

    async fn flush(&mut self) -> Result<(), SimFault> {
        embedded_hal::spi::SpiBus::flush(self)
    }
}

pub struct SimCs(Rc<RefCell<ChipState>>);

impl embedded_hal::digital::ErrorType for SimCs {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}

/// Records the requested delay instead of sleeping.
pub struct SimDelay(Rc<RefCell<ChipState>>);

impl embedded_hal::delay::DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().delayed_ns += ns as u64;
    }
}

impl embedded_hal_async::delay::DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        embedded_hal::delay::DelayNs::delay_ns(self, ns)
    }
}

pub type SimFlash = FlashDriver<SimBus, SimCs, SimDelay>;

/// A driver bound to `chip`, with the bring-up traffic cleared from the log.
pub fn driver(chip: &SimChip) -> SimFlash {
    let flash = FlashDriver::new(chip.bus(), chip.cs(), chip.delay()).unwrap();
    chip.take_log();
    flash
}

/// Opcodes of a blocking program or erase: WREN, the instruction, the
/// status polls it took, WRDI.
pub fn cycle(opcode: u8, polls: usize) -> Vec<u8> {
    let mut opcodes = vec![WREN, opcode];
    opcodes.extend(std::iter::repeat(RDSR).take(polls));
    opcodes.push(WRDI);
    opcodes
}
