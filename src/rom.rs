//! Bootrom flash capabilities.
//!
//! The bootrom exposes its flash routines through a table keyed by
//! two-character tags. Entries are looked up on every use rather than
//! cached, and every entry an operation needs is checked before XIP is
//! disabled: jumping through a missing entry with flash unmapped cannot
//! be recovered from.

use crate::{Error, Result};

/// Bootrom functions used by flash excursions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RomFunction {
    ConnectInternalFlash,
    FlashExitXip,
    FlashRangeErase,
    FlashRangeProgram,
    FlashFlushCache,
    FlashEnterCmdXip,
}

impl RomFunction {
    /// Two-character lookup tag.
    #[inline(always)]
    pub fn tag(self) -> [u8; 2] {
        match self {
            RomFunction::ConnectInternalFlash => *b"IF",
            RomFunction::FlashExitXip => *b"EX",
            RomFunction::FlashRangeErase => *b"RE",
            RomFunction::FlashRangeProgram => *b"RP",
            RomFunction::FlashFlushCache => *b"FC",
            RomFunction::FlashEnterCmdXip => *b"CX",
        }
    }

    /// Tag as the 16-bit code passed to the bootrom lookup function.
    #[inline(always)]
    pub fn code(self) -> u32 {
        let [lo, hi] = self.tag();
        lo as u32 | (hi as u32) << 8
    }
}

/// Functions every excursion needs.
pub const EXCURSION_FUNCTIONS: &[RomFunction] = &[
    RomFunction::ConnectInternalFlash,
    RomFunction::FlashExitXip,
    RomFunction::FlashFlushCache,
];

/// Trait for providers of the bootrom flash capabilities.
///
/// Callers check `provides()` for every function before calling it.
pub trait FlashRom {
    /// Whether the table has a non-null entry for `func`.
    fn provides(&self, func: RomFunction) -> bool;

    /// Restore the QSPI pad configuration and connect the SSI/QMI to flash.
    fn connect_internal_flash(&mut self);

    /// Leave XIP mode and put the flash device into a serial command state.
    fn flash_exit_xip(&mut self);

    /// Erase `count` bytes at `addr`, using `block_cmd` for aligned `block_size` blocks.
    fn flash_range_erase(&mut self, addr: u32, count: usize, block_size: u32, block_cmd: u8);

    /// Program `data` at `addr`.
    fn flash_range_program(&mut self, addr: u32, data: &[u8]);

    /// Flush and enable the XIP cache, releasing any chip select override.
    fn flash_flush_cache(&mut self);

    /// Configure XIP for slow generic 03h reads.
    fn flash_enter_cmd_xip(&mut self);
}

/// Check that `rom` provides every function in `funcs`.
pub fn resolve<R: FlashRom + ?Sized>(rom: &R, funcs: &[RomFunction]) -> Result<()> {
    match funcs.iter().find(|&&func| !rom.provides(func)) {
        Some(&function) => {
            log::error!(
                "Bootrom function {:?} ({}) not found",
                function,
                core::str::from_utf8(&function.tag()).unwrap_or("??")
            );
            Err(Error::MissingRomFunction { function })
        }
        None => Ok(()),
    }
}

type VoidFn = unsafe extern "C" fn();
type EraseFn = unsafe extern "C" fn(addr: u32, count: usize, block_size: u32, block_cmd: u8);
type ProgramFn = unsafe extern "C" fn(addr: u32, data: *const u8, count: usize);

/// Bootrom capabilities given as direct function references.
///
/// For platforms without a lookup table, or where the pointers were
/// resolved ahead of time. A `None` entry behaves as a missing table entry.
#[derive(Copy, Clone, Default)]
pub struct RomFunctions {
    pub connect_internal_flash: Option<VoidFn>,
    pub flash_exit_xip: Option<VoidFn>,
    pub flash_range_erase: Option<EraseFn>,
    pub flash_range_program: Option<ProgramFn>,
    pub flash_flush_cache: Option<VoidFn>,
    pub flash_enter_cmd_xip: Option<VoidFn>,
}

impl RomFunctions {
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn call(func: Option<VoidFn>) {
        if let Some(func) = func {
            // Presence was checked by `resolve()`; the function itself is
            // trusted to be a valid bootrom routine.
            unsafe { func() }
        }
    }
}

impl FlashRom for RomFunctions {
    fn provides(&self, func: RomFunction) -> bool {
        match func {
            RomFunction::ConnectInternalFlash => self.connect_internal_flash.is_some(),
            RomFunction::FlashExitXip => self.flash_exit_xip.is_some(),
            RomFunction::FlashRangeErase => self.flash_range_erase.is_some(),
            RomFunction::FlashRangeProgram => self.flash_range_program.is_some(),
            RomFunction::FlashFlushCache => self.flash_flush_cache.is_some(),
            RomFunction::FlashEnterCmdXip => self.flash_enter_cmd_xip.is_some(),
        }
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn connect_internal_flash(&mut self) {
        Self::call(self.connect_internal_flash)
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn flash_exit_xip(&mut self) {
        Self::call(self.flash_exit_xip)
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn flash_range_erase(&mut self, addr: u32, count: usize, block_size: u32, block_cmd: u8) {
        if let Some(erase) = self.flash_range_erase {
            unsafe { erase(addr, count, block_size, block_cmd) }
        }
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn flash_range_program(&mut self, addr: u32, data: &[u8]) {
        if let Some(program) = self.flash_range_program {
            unsafe { program(addr, data.as_ptr(), data.len()) }
        }
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn flash_flush_cache(&mut self) {
        Self::call(self.flash_flush_cache)
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn flash_enter_cmd_xip(&mut self) {
        Self::call(self.flash_enter_cmd_xip)
    }
}

#[test]
fn test_rom_function_codes() {
    assert_eq!(RomFunction::ConnectInternalFlash.code(), 0x4649);
    assert_eq!(RomFunction::FlashExitXip.code(), u16::from_le_bytes(*b"EX") as u32);
    assert_eq!(&RomFunction::FlashFlushCache.tag(), b"FC");
}
