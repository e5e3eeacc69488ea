use core::ops::Range;

use crate::comms::Opcode;
use crate::{CAPACITY, PAGE_SIZE, READ_CHUNK_SIZE, SECTOR_SIZE};

/// Legacy page-addressed view of the flat address space.
///
/// `PageAddress { page, offset }` names the same byte as the linear address
/// `page * 256 + offset`. Every byte-level operation on the drivers takes
/// `impl Into<u32>`, so both forms can be passed where an address is expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PageAddress {
    pub page: u16,
    pub offset: u8,
}

impl PageAddress {
    pub const fn new(page: u16, offset: u8) -> Self {
        Self { page, offset }
    }

    /// Splits a linear address. Returns `None` past the end of the array.
    pub const fn from_linear(addr: u32) -> Option<Self> {
        if addr >= CAPACITY {
            return None;
        }
        Some(Self {
            page: (addr / PAGE_SIZE) as u16,
            offset: (addr % PAGE_SIZE) as u8,
        })
    }

    pub const fn linear(self) -> u32 {
        (self.page as u32) * PAGE_SIZE + self.offset as u32
    }
}

impl From<PageAddress> for u32 {
    fn from(addr: PageAddress) -> u32 {
        addr.linear()
    }
}

/// Opcode followed by the 24-bit address, most significant byte first.
pub(crate) fn command_and_address(opcode: Opcode, addr: u32) -> [u8; 4] {
    [
        opcode as u8,
        (addr >> 16) as u8,
        (addr >> 8) as u8,
        addr as u8,
    ]
}

/// Argument rejected before anything is sent to the chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressError {
    OutOfBounds,
    NotAligned,
}

/// `addr..addr + len` must lie inside the array.
pub(crate) fn check_range(addr: u32, len: usize) -> Result<(), AddressError> {
    let end = addr as u64 + len as u64;
    if addr >= CAPACITY || end > CAPACITY as u64 {
        return Err(AddressError::OutOfBounds);
    }
    Ok(())
}

/// Sector erase addresses must name the first byte of a sector.
pub(crate) fn check_sector(addr: u32) -> Result<(), AddressError> {
    if addr >= CAPACITY {
        return Err(AddressError::OutOfBounds);
    }
    if addr % SECTOR_SIZE != 0 {
        return Err(AddressError::NotAligned);
    }
    Ok(())
}

/// Bytes left between `addr` and the next page boundary.
pub(crate) const fn space_in_page(addr: u32) -> usize {
    (PAGE_SIZE - (addr % PAGE_SIZE)) as usize
}

/// Splits a transfer into `(device address, buffer range)` pieces.
pub(crate) struct Chunks {
    addr: u32,
    pos: usize,
    len: usize,
    max: usize,
    page_bounded: bool,
}

impl Chunks {
    /// Pieces that never cross a page boundary, for Page Program.
    pub(crate) fn program(addr: u32, len: usize) -> Self {
        Self {
            addr,
            pos: 0,
            len,
            max: PAGE_SIZE as usize,
            page_bounded: true,
        }
    }

    /// Pieces of at most [`READ_CHUNK_SIZE`] bytes, for Read Data.
    pub(crate) fn read(addr: u32, len: usize) -> Self {
        Self {
            addr,
            pos: 0,
            len,
            max: READ_CHUNK_SIZE,
            page_bounded: false,
        }
    }
}

impl Iterator for Chunks {
    type Item = (u32, Range<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.len - self.pos;
        if remaining == 0 {
            return None;
        }
        let mut chunk = remaining.min(self.max);
        if self.page_bounded {
            chunk = chunk.min(space_in_page(self.addr));
        }
        let item = (self.addr, self.pos..self.pos + chunk);
        self.addr += chunk as u32;
        self.pos += chunk;
        Some(item)
    }
}
