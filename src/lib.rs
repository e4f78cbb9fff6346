// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! xip-flash
//!
//! This crate erases and programs the execute-in-place flash of RP2040 and
//! RP2350 microcontrollers while running from that same flash.
//!
//! Every operation is an excursion: the memory-mapped window is disabled,
//! the flash is driven with raw serial commands or bootrom routines, and
//! the window is restored with a RAM copy of the boot stage routine.
//! Hardware is reached through the traits in `rom`, `bus` and `xip`, with
//! register-level implementations in `hw` for embedded targets.
//!
//! ```ignore
//! use xip_flash::{hw, qmi::Qmi, XipFlash};
//!
//! // Interrupts off, core 1 parked.
//! let bus = Qmi::new(unsafe { hw::QmiRegs::new() }, unsafe { hw::QspiAbort::new() });
//! let window = unsafe { hw::Rp2350Window::new() };
//! let mut flash = XipFlash::new(unsafe { hw::BootRom::new() }, bus, window)?;
//! flash.erase_range(0x10_0000, 4096)?;
//! flash.program_range(0x10_0000, &[0xA5; 256])?;
//! ```

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::sync::atomic::{fence, Ordering};

pub mod boot2;
pub mod bus;
pub mod cmd;
pub mod devinfo;
pub mod erase_plan;
pub mod id;
pub mod qmi;
pub mod rom;
pub mod sreg;
pub mod ssi;
pub mod xip;

#[cfg(all(target_arch = "arm", target_os = "none", any(feature = "rp2040", feature = "rp2350")))]
pub mod hw;

#[cfg(test)]
mod sim;

pub use bus::{AbortLatch, ChipSelect, FlashBus, NeverAbort, Transfer};
pub use devinfo::{DevInfo, DevInfoSize, DevInfoWord};
pub use id::FlashId;
pub use rom::{FlashRom, RomFunction, RomFunctions};
pub use sreg::StatusRegister1;
pub use xip::{Cs1Save, XipWindow};

use boot2::Boot2Copyout;
use cmd::{Command, FlashAddress};
use erase_plan::ErasePlan;
use rom::EXCURSION_FUNCTIONS;

/// Smallest programmable unit.
pub const PAGE_SIZE: usize = 256;
/// Smallest erasable unit.
pub const SECTOR_SIZE: usize = 4096;
/// Unit erased by the D8h block erase.
pub const BLOCK_SIZE: usize = 65536;
/// Length of the 4Bh unique ID.
pub const UNIQUE_ID_SIZE: usize = 8;

/// Largest offset reachable with a 24-bit address.
const ADDRESS_SPACE: usize = 1 << 24;

#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[derive(Debug)]
pub enum Error {
    #[cfg_attr(feature = "std", error("Bootrom function {function:?} is not available."))]
    MissingRomFunction { function: RomFunction },
    #[cfg_attr(feature = "std", error("Transfer aborted after {transferred} bytes."))]
    Aborted { transferred: usize },
    #[cfg_attr(feature = "std", error("Reserved size code {raw} in FLASH_DEVINFO."))]
    InvalidDevInfoSize { raw: u8 },
}

pub type Result<T> = core::result::Result<T, Error>;

/// Where an excursion is in the unmap/restore sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum XipState {
    Mapped,
    UnmappedPreparing,
    UnmappedExecuting,
    UnmappedRestoring,
}

/// Work done while flash is unmapped.
enum Excursion<'a> {
    Erase { offset: u32, count: usize },
    Program { offset: u32, data: &'a [u8] },
    WritePartial { addr: FlashAddress, data: &'a [u8] },
    Read { addr: FlashAddress, buf: &'a mut [u8] },
    RawCommand { cs: ChipSelect, tx: &'a [u8], rx: Option<&'a mut [u8]> },
    UniqueId { cs: ChipSelect, id: &'a mut [u8; UNIQUE_ID_SIZE] },
    Identify { cs: ChipSelect, id: &'a mut Option<FlashId> },
}

impl<'a> Excursion<'a> {
    /// Bootrom function needed besides the ones every excursion uses.
    fn rom_function(&self) -> Option<RomFunction> {
        match self {
            Excursion::Erase { .. } => Some(RomFunction::FlashRangeErase),
            Excursion::Program { .. } => Some(RomFunction::FlashRangeProgram),
            _ => None,
        }
    }
}

/// XIP flash.
///
/// Owns the bootrom capabilities, the bus controller and the XIP window
/// hooks for one chip. There must be only one instance per chip.
///
/// Nothing may fetch from flash while an operation runs: disable
/// interrupts or make sure handlers live in RAM, and park the other core.
/// Misaligned or out-of-range arguments panic before flash is touched.
pub struct XipFlash<R: FlashRom, B: FlashBus, W: XipWindow> {
    rom: R,
    bus: B,
    window: W,

    /// Copy of the boot stage, taken on the first excursion.
    boot2: Boot2Copyout,

    state: XipState,

    /// Total flash capacity in bytes, if known.
    capacity: Option<usize>,
}

impl<R: FlashRom, B: FlashBus, W: XipWindow> XipFlash<R, B, W> {
    /// Create a new XipFlash, checking that the bootrom provides what every excursion needs.
    pub fn new(rom: R, bus: B, window: W) -> Result<Self> {
        let flash = XipFlash {
            rom,
            bus,
            window,
            boot2: Boot2Copyout::new(),
            state: XipState::Mapped,
            capacity: None,
        };
        flash.resolve(None)?;
        Ok(flash)
    }

    /// Release the hardware handles.
    pub fn free(self) -> (R, B, W) {
        (self.rom, self.bus, self.window)
    }

    /// Get the total memory capacity in bytes, if known.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Set the total memory capacity in bytes.
    ///
    /// If set, operations are prevented from going beyond it.
    pub fn set_capacity(&mut self, n: usize) {
        self.capacity = Some(n);
    }

    pub fn state(&self) -> XipState {
        self.state
    }

    /// Erase `len` bytes at `offset`.
    ///
    /// Panics if `offset` or `len` is not a multiple of `SECTOR_SIZE`.
    pub fn erase_range(&mut self, offset: u32, len: usize) -> Result<()> {
        self.check_alignment(offset, len, SECTOR_SIZE);
        log::debug!("Erasing 0x{:06X}, {} bytes", offset, len);
        self.excursion(Excursion::Erase { offset, count: len }).map(|_| ())
    }

    /// Erase `len` bytes at `offset` using one excursion per erase instruction.
    ///
    /// Interrupts may be serviced between excursions. Calls `cb` with the
    /// number of bytes erased so far after each one.
    pub fn erase_range_cb<F: Fn(usize)>(&mut self, offset: u32, len: usize, cb: F) -> Result<()> {
        self.check_alignment(offset, len, SECTOR_SIZE);
        log::debug!("Erasing 0x{:06X}, {} bytes, in steps", offset, len);
        let mut total_bytes = 0;
        cb(total_bytes);
        for step in ErasePlan::new(offset, len) {
            log::trace!("Erase step {:?}", step);
            self.excursion(Excursion::Erase { offset: step.base, count: step.size })?;
            total_bytes += step.size;
            cb(total_bytes);
        }
        Ok(())
    }

    /// Program `data` at `offset`, which must already be erased.
    ///
    /// Panics if `offset` or `data.len()` is not a multiple of `PAGE_SIZE`.
    pub fn program_range(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.check_alignment(offset, data.len(), PAGE_SIZE);
        log::debug!("Programming 0x{:06X}, {} bytes", offset, data.len());
        self.excursion(Excursion::Program { offset, data }).map(|_| ())
    }

    /// Program `data` at `offset` using one excursion per sector's worth of data.
    ///
    /// Calls `cb` with the number of bytes programmed so far after each excursion.
    pub fn program_range_cb<F: Fn(usize)>(&mut self, offset: u32, data: &[u8], cb: F) -> Result<()> {
        self.check_alignment(offset, data.len(), PAGE_SIZE);
        log::debug!("Programming 0x{:06X}, {} bytes, in steps", offset, data.len());
        let mut total_bytes = 0;
        cb(total_bytes);
        for chunk in data.chunks(SECTOR_SIZE) {
            let offset = offset + total_bytes as u32;
            self.excursion(Excursion::Program { offset, data: chunk })?;
            total_bytes += chunk.len();
            cb(total_bytes);
        }
        Ok(())
    }

    /// Program up to one page with a raw PageProgram command.
    ///
    /// There is no alignment requirement, but the write must stay inside one page.
    /// An abort during the write is reported as `Transfer::Aborted`.
    pub fn write_partial(&mut self, offset: u32, data: &[u8]) -> Result<Transfer> {
        assert!(cmd::within_page(offset, data.len()), "write_partial: write crosses a page boundary");
        self.check_range(offset, data.len());
        log::debug!("Writing {} bytes at 0x{:06X}", data.len(), offset);
        let addr = FlashAddress::new(ChipSelect::Cs0, offset);
        self.excursion(Excursion::WritePartial { addr, data })
    }

    /// Read `buf.len()` bytes at `offset` with the 03h ReadData command.
    ///
    /// This bypasses the XIP cache and memory map.
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<Transfer> {
        self.check_range(offset, buf.len());
        log::debug!("Reading {} bytes at 0x{:06X}", buf.len(), offset);
        let addr = FlashAddress::new(ChipSelect::Cs0, offset);
        self.excursion(Excursion::Read { addr, buf })
    }

    /// Assert `cs`, exchange `tx.len()` bytes, and de-assert `cs`.
    ///
    /// Received bytes are stored in `rx` if given, which must be at least
    /// as long as `tx`. Panics if the bus controller cannot drive `cs`.
    pub fn raw_command(&mut self, cs: ChipSelect, tx: &[u8], rx: Option<&mut [u8]>) -> Result<Transfer> {
        assert!(self.bus.has_chip_select(cs), "raw_command: {:?} not available on this controller", cs);
        if let Some(rx) = rx.as_deref() {
            assert!(rx.len() >= tx.len(), "raw_command: rx buffer shorter than tx");
        }
        log::debug!("Raw command on {:?}: {:02X?}", cs, tx);
        self.excursion(Excursion::RawCommand { cs, tx, rx })
    }

    /// Read the flash's 64-bit unique ID.
    pub fn read_unique_id(&mut self) -> Result<[u8; UNIQUE_ID_SIZE]> {
        log::debug!("Reading unique ID");
        let mut id = [0u8; UNIQUE_ID_SIZE];
        self.excursion(Excursion::UniqueId { cs: ChipSelect::Cs0, id: &mut id })?;
        Ok(id)
    }

    /// Read the JEDEC and unique IDs in one excursion.
    pub fn read_id(&mut self) -> Result<FlashId> {
        log::debug!("Reading flash ID");
        let mut id = None;
        self.excursion(Excursion::Identify { cs: ChipSelect::Cs0, id: &mut id })?;
        match id {
            Some(id) => {
                log::debug!("Read ID: {:?}", id);
                Ok(id)
            }
            None => Err(Error::Aborted { transferred: 0 }),
        }
    }

    /// Flush the XIP cache, without leaving XIP mode.
    ///
    /// Needed after flash has been changed behind the cache's back.
    pub fn flush_cache(&mut self) -> Result<()> {
        rom::resolve(&self.rom, &[RomFunction::FlashFlushCache])?;
        self.rom.flash_flush_cache();
        Ok(())
    }

    fn check_alignment(&self, offset: u32, len: usize, unit: usize) {
        assert!(offset as usize % unit == 0, "offset 0x{:X} not aligned to {} bytes", offset, unit);
        assert!(len % unit == 0, "length {} not a multiple of {} bytes", len, unit);
        self.check_range(offset, len);
    }

    fn check_range(&self, offset: u32, len: usize) {
        let end = match (offset as usize).checked_add(len) {
            Some(end) => end,
            None => panic!("range at 0x{:X} of {} bytes overflows", offset, len),
        };
        assert!(end <= ADDRESS_SPACE, "range ends beyond 24-bit address space");
        if let Some(capacity) = self.capacity {
            assert!(end <= capacity, "range ends beyond flash capacity of {} bytes", capacity);
        }
    }

    /// Check every bootrom function an excursion will call, before anything is touched.
    fn resolve(&self, func: Option<RomFunction>) -> Result<()> {
        rom::resolve(&self.rom, EXCURSION_FUNCTIONS)?;
        if let Some(func) = func {
            rom::resolve(&self.rom, &[func])?;
        }
        if !self.window.has_boot_stage() {
            rom::resolve(&self.rom, &[RomFunction::FlashEnterCmdXip])?;
        }
        Ok(())
    }

    /// Run `op` with flash unmapped, restoring XIP afterwards whatever its outcome.
    ///
    /// Nothing between the first fence and the end of the restore may log,
    /// as the logger runs from flash.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn excursion(&mut self, op: Excursion<'_>) -> Result<Transfer> {
        self.resolve(op.rom_function())?;
        log::trace!("Entering flash excursion");

        self.state = XipState::UnmappedPreparing;
        let has_boot_stage = self.window.has_boot_stage();
        if has_boot_stage {
            self.boot2.ensure_cached(&self.window);
        }
        // Commit pending writes to PSRAM before the flush drops them.
        self.window.clean_cache();
        let cs1 = self.window.save_cs1();

        // No flash accesses after this point.
        fence(Ordering::SeqCst);

        self.rom.connect_internal_flash();
        self.rom.flash_exit_xip();

        self.state = XipState::UnmappedExecuting;
        let result = self.run(op);

        self.state = XipState::UnmappedRestoring;
        // Also releases any chip select force.
        self.rom.flash_flush_cache();
        if has_boot_stage {
            self.boot2.invoke(&mut self.window);
        } else {
            self.rom.flash_enter_cmd_xip();
        }
        if let Some(saved) = cs1 {
            // With a device on CS1 the exit sequence went to it too, so its
            // write mode must go back to serial rather than be restored.
            if self.window.cs1_populated() {
                self.window.reset_cs1_write();
            } else {
                self.window.restore_cs1(&saved);
            }
        }
        fence(Ordering::SeqCst);
        self.state = XipState::Mapped;

        match &result {
            Ok(t @ Transfer::Aborted { .. }) => log::warn!("Flash excursion aborted after {} bytes", t.bytes()),
            Err(e) => log::warn!("Flash excursion failed: {:?}", e),
            Ok(_) => log::trace!("Flash excursion complete"),
        }
        result
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn run(&mut self, op: Excursion<'_>) -> Result<Transfer> {
        Ok(match op {
            Excursion::Erase { offset, count } => {
                self.rom.flash_range_erase(offset, count, BLOCK_SIZE as u32, Command::BlockErase as u8);
                Transfer::Completed { bytes: count }
            }
            Excursion::Program { offset, data } => {
                self.rom.flash_range_program(offset, data);
                Transfer::Completed { bytes: data.len() }
            }
            Excursion::WritePartial { addr, data } => cmd::write_partial(&mut self.bus, addr, data),
            Excursion::Read { addr, buf } => cmd::read_data(&mut self.bus, addr, buf),
            Excursion::RawCommand { cs, tx, rx } => self.bus.exchange(cs, Some(tx), rx, tx.len(), 0),
            Excursion::UniqueId { cs, id } => match cmd::read_unique_id(&mut self.bus, cs) {
                Ok(uid) => {
                    *id = uid;
                    Transfer::Completed { bytes: UNIQUE_ID_SIZE }
                }
                Err(e) => return Err(e),
            },
            Excursion::Identify { cs, id } => match FlashId::read(&mut self.bus, cs) {
                Ok(flash_id) => {
                    *id = Some(flash_id);
                    Transfer::Completed { bytes: 3 + UNIQUE_ID_SIZE }
                }
                Err(e) => return Err(e),
            },
        })
    }
}
