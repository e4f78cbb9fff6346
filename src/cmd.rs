//! Serial flash command frames built on a `FlashBus`.
//!
//! These routines run with XIP disabled and must stay out of flash.
//! None of them log.

use crate::bus::{ChipSelect, FlashBus, Transfer};
use crate::sreg::StatusRegister1;
use crate::{Error, Result, PAGE_SIZE, UNIQUE_ID_SIZE};

/// Standard SPI flash command opcodes used by this crate.
#[derive(Copy, Clone, Debug, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    PageProgram = 0x02,
    ReadData = 0x03,
    ReadStatusRegister1 = 0x05,
    WriteEnable = 0x06,
    SectorErase = 0x20,
    ReadUniqueID = 0x4B,
    ReadJEDECID = 0x9F,
    BlockErase = 0xD8,
}

/// Number of dummy bytes between the 4Bh opcode and the unique ID.
pub const RUID_DUMMY_BYTES: usize = 4;

/// A 24-bit flash offset, with the chip select in bit 24.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashAddress(u32);

impl FlashAddress {
    const CS_SHIFT: u32 = 24;
    const OFFSET_MASK: u32 = (1 << 24) - 1;

    /// Panics if `offset` does not fit in 24 bits.
    pub fn new(cs: ChipSelect, offset: u32) -> Self {
        assert!(offset <= Self::OFFSET_MASK, "flash offset exceeds 24 bits");
        FlashAddress(((cs as u32) << Self::CS_SHIFT) | offset)
    }

    /// Interpret a raw address, where bit 24 selects CS1 and higher bits are ignored.
    pub fn from_raw(raw: u32) -> Self {
        FlashAddress(raw & ((1 << (Self::CS_SHIFT + 1)) - 1))
    }

    #[inline(always)]
    pub fn chip_select(self) -> ChipSelect {
        if (self.0 >> Self::CS_SHIFT) & 1 == 0 {
            ChipSelect::Cs0
        } else {
            ChipSelect::Cs1
        }
    }

    #[inline(always)]
    pub fn offset(self) -> u32 {
        self.0 & Self::OFFSET_MASK
    }

    /// The 3-byte big-endian address as sent on the bus.
    #[inline(always)]
    pub fn to_bytes(self) -> [u8; 3] {
        let offset = self.offset();
        [(offset >> 16) as u8, (offset >> 8) as u8, offset as u8]
    }
}

/// Send the WriteEnable command, setting the WEL in the status register.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn write_enable<B: FlashBus>(bus: &mut B, cs: ChipSelect) -> Transfer {
    let skip = bus.queue_header(cs, &[Command::WriteEnable as u8]);
    bus.exchange(cs, None, None, 0, skip)
}

/// Read status register 1.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn read_status<B: FlashBus>(bus: &mut B, cs: ChipSelect) -> (StatusRegister1, Transfer) {
    let mut status = [0u8; 1];
    let skip = bus.queue_header(cs, &[Command::ReadStatusRegister1 as u8]);
    let transfer = bus.exchange(cs, None, Some(&mut status), 1, skip);
    (StatusRegister1(status[0]), transfer)
}

/// Poll status register 1 until BUSY clears or the abort latch is set.
///
/// There is no timeout.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn wait_ready<B: FlashBus>(bus: &mut B, cs: ChipSelect) -> Transfer {
    loop {
        let (status, transfer) = read_status(bus, cs);
        if transfer.is_aborted() {
            return Transfer::Aborted { bytes: 0 };
        }
        if !status.get_busy() {
            return Transfer::Completed { bytes: 0 };
        }
        if bus.aborted() {
            return Transfer::Aborted { bytes: 0 };
        }
    }
}

/// Queue `cmd` followed by the 24-bit address of `addr`.
///
/// Returns the number of received bytes the following exchange must skip.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn put_cmd_addr<B: FlashBus>(bus: &mut B, cmd: Command, addr: FlashAddress) -> usize {
    let [a2, a1, a0] = addr.to_bytes();
    bus.queue_header(addr.chip_select(), &[cmd as u8, a2, a1, a0])
}

/// Program up to one page with the PageProgram instruction and wait for completion.
///
/// The returned transfer counts data bytes shifted; an abort at any stage
/// is reported as `Transfer::Aborted`.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn write_partial<B: FlashBus>(bus: &mut B, addr: FlashAddress, data: &[u8]) -> Transfer {
    let cs = addr.chip_select();
    if write_enable(bus, cs).is_aborted() {
        return Transfer::Aborted { bytes: 0 };
    }
    let skip = put_cmd_addr(bus, Command::PageProgram, addr);
    let transfer = bus.exchange(cs, Some(data), None, data.len(), skip);
    if transfer.is_aborted() {
        return transfer;
    }
    match wait_ready(bus, cs) {
        Transfer::Completed { .. } => transfer,
        Transfer::Aborted { .. } => Transfer::Aborted { bytes: transfer.bytes() },
    }
}

/// Read `buf.len()` bytes from `addr` using the ReadData instruction.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn read_data<B: FlashBus>(bus: &mut B, addr: FlashAddress, buf: &mut [u8]) -> Transfer {
    let skip = put_cmd_addr(bus, Command::ReadData, addr);
    let len = buf.len();
    bus.exchange(addr.chip_select(), None, Some(buf), len, skip)
}

/// Read the device's 64-bit unique ID.
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn read_unique_id<B: FlashBus>(bus: &mut B, cs: ChipSelect) -> Result<[u8; UNIQUE_ID_SIZE]> {
    let mut header = [0u8; 1 + RUID_DUMMY_BYTES];
    header[0] = Command::ReadUniqueID as u8;
    let skip = bus.queue_header(cs, &header);
    let mut id = [0u8; UNIQUE_ID_SIZE];
    match bus.exchange(cs, None, Some(&mut id), UNIQUE_ID_SIZE, skip) {
        Transfer::Completed { .. } => Ok(id),
        Transfer::Aborted { bytes } => Err(Error::Aborted { transferred: bytes }),
    }
}

/// Read the JEDEC manufacturer ID and 16-bit device ID.
///
/// Returns (manufacturer ID, device ID).
#[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
#[inline(never)]
pub fn read_jedec_id<B: FlashBus>(bus: &mut B, cs: ChipSelect) -> Result<(u8, u16)> {
    let skip = bus.queue_header(cs, &[Command::ReadJEDECID as u8]);
    let mut data = [0u8; 3];
    match bus.exchange(cs, None, Some(&mut data), 3, skip) {
        Transfer::Completed { .. } => {
            Ok((data[0], ((data[1] as u16) << 8) | data[2] as u16))
        }
        Transfer::Aborted { bytes } => Err(Error::Aborted { transferred: bytes }),
    }
}

/// Returns true if `len` bytes starting at `offset` stay within one page.
pub fn within_page(offset: u32, len: usize) -> bool {
    match (offset as usize % PAGE_SIZE).checked_add(len) {
        Some(end) => end <= PAGE_SIZE,
        None => false,
    }
}

#[test]
fn test_flash_address() {
    let addr = FlashAddress::from_raw(0x0112_3456);
    assert_eq!(addr.chip_select(), ChipSelect::Cs1);
    assert_eq!(addr.offset(), 0x12_3456);
    assert_eq!(addr.to_bytes(), [0x12, 0x34, 0x56]);
    assert_eq!(FlashAddress::from_raw(0xFE00_0010).chip_select(), ChipSelect::Cs0);
    assert_eq!(FlashAddress::new(ChipSelect::Cs0, 0xAB_CDEF).to_bytes(), [0xAB, 0xCD, 0xEF]);
}

#[test]
#[should_panic]
fn test_flash_address_too_large() {
    FlashAddress::new(ChipSelect::Cs0, 1 << 24);
}

#[test]
fn test_within_page() {
    assert!(within_page(0, 256));
    assert!(within_page(0x1F0, 16));
    assert!(!within_page(0x1F0, 17));
    assert!(within_page(0x1FF, 0));
    assert!(!within_page(0x1F0, usize::MAX));
}
