//! Register-level implementations for RP2040 (`rp2040` feature) and RP2350 (`rp2350` feature).
//!
//! Everything here may run with flash unmapped, so it all lives in RAM.
//! Constructors are unsafe: the caller must own the peripheral exclusively,
//! and must make sure nothing fetches from flash while an excursion runs
//! (interrupts disabled or RAM-resident, second core parked, no DMA from flash).

use core::ptr::{read_volatile, write_volatile};

use crate::boot2::BOOT2_SIZE_WORDS;
use crate::bus::AbortLatch;
use crate::rom::{FlashRom, RomFunction};
use crate::xip::XipWindow;
#[cfg(feature = "rp2040")]
use crate::ssi::{OutOver, SsiRegisters};
#[cfg(feature = "rp2350")]
use crate::{
    bus::ChipSelect,
    devinfo::{DevInfo, DevInfoSize, DevInfoWord},
    qmi::QmiRegisters,
    xip::{Cs1Save, QMI_M1_WCMD_RESET, QMI_M1_WFMT_RESET},
};

#[cfg(all(feature = "rp2040", feature = "rp2350"))]
compile_error!("Select only one of the `rp2040` and `rp2350` features.");

const REG_ALIAS_XOR: usize = 0x1000;

#[cfg(feature = "rp2040")]
const IO_QSPI_BASE: usize = 0x4001_8000;
#[cfg(feature = "rp2350")]
const IO_QSPI_BASE: usize = 0x4003_0000;

#[cfg(feature = "rp2040")]
const GPIO_QSPI_SD1_CTRL: usize = 0x1c;
#[cfg(feature = "rp2350")]
const GPIO_QSPI_SD1_CTRL: usize = 0x2c;
const GPIO_CTRL_INOVER_BITS: u32 = 0x0003_0000;

#[link_section = ".data.ram_func"]
#[inline(never)]
unsafe fn read_reg(addr: usize) -> u32 {
    read_volatile(addr as *const u32)
}

#[link_section = ".data.ram_func"]
#[inline(never)]
unsafe fn write_reg(addr: usize, value: u32) {
    write_volatile(addr as *mut u32, value)
}

/// Write `value` into the bits of `mask` through the XOR alias.
#[link_section = ".data.ram_func"]
#[inline(never)]
unsafe fn write_masked(addr: usize, value: u32, mask: u32) {
    write_reg(addr + REG_ALIAS_XOR, (read_reg(addr) ^ value) & mask)
}

/// Bootrom flash routines, looked up through the bootrom table on every call.
pub struct BootRom {
    _private: (),
}

type VoidFn = unsafe extern "C" fn();
type EraseFn = unsafe extern "C" fn(addr: u32, count: usize, block_size: u32, block_cmd: u8);
type ProgramFn = unsafe extern "C" fn(addr: u32, data: *const u8, count: usize);

/// Secure Arm function entries.
#[cfg(feature = "rp2350")]
const RT_FLAG_FUNC_ARM_SEC: u32 = 0x0004;
/// Data entries.
#[cfg(feature = "rp2350")]
const RT_FLAG_DATA: u32 = 0x0040;

impl BootRom {
    /// # Safety
    ///
    /// See the module documentation.
    pub unsafe fn new() -> Self {
        BootRom { _private: () }
    }

    /// Address of `func`, or 0 if the table has no entry.
    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn lookup(&self, func: RomFunction) -> usize {
        #[cfg(feature = "rp2040")]
        unsafe {
            type LookupFn = unsafe extern "C" fn(table: *const u16, code: u32) -> usize;
            let lookup: LookupFn = core::mem::transmute(read_volatile(0x18 as *const u16) as usize);
            let table = read_volatile(0x14 as *const u16) as usize as *const u16;
            lookup(table, func.code())
        }
        #[cfg(feature = "rp2350")]
        unsafe {
            type LookupFn = unsafe extern "C" fn(code: u32, mask: u32) -> usize;
            let lookup: LookupFn = core::mem::transmute(read_volatile(0x16 as *const u16) as usize);
            lookup(func.code(), RT_FLAG_FUNC_ARM_SEC)
        }
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn call(&self, func: RomFunction) {
        let ptr = self.lookup(func);
        if ptr != 0 {
            unsafe {
                let func: VoidFn = core::mem::transmute(ptr);
                func()
            }
        }
    }
}

impl FlashRom for BootRom {
    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn provides(&self, func: RomFunction) -> bool {
        self.lookup(func) != 0
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn connect_internal_flash(&mut self) {
        self.call(RomFunction::ConnectInternalFlash)
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn flash_exit_xip(&mut self) {
        self.call(RomFunction::FlashExitXip)
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn flash_range_erase(&mut self, addr: u32, count: usize, block_size: u32, block_cmd: u8) {
        let ptr = self.lookup(RomFunction::FlashRangeErase);
        if ptr != 0 {
            unsafe {
                let erase: EraseFn = core::mem::transmute(ptr);
                erase(addr, count, block_size, block_cmd)
            }
        }
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn flash_range_program(&mut self, addr: u32, data: &[u8]) {
        let ptr = self.lookup(RomFunction::FlashRangeProgram);
        if ptr != 0 {
            unsafe {
                let program: ProgramFn = core::mem::transmute(ptr);
                program(addr, data.as_ptr(), data.len())
            }
        }
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn flash_flush_cache(&mut self) {
        self.call(RomFunction::FlashFlushCache)
    }

    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn flash_enter_cmd_xip(&mut self) {
        self.call(RomFunction::FlashEnterCmdXip)
    }
}

/// Abort request latched by a debugger through the QSPI SD1 input override.
pub struct QspiAbort {
    _private: (),
}

impl QspiAbort {
    /// # Safety
    ///
    /// See the module documentation.
    pub unsafe fn new() -> Self {
        QspiAbort { _private: () }
    }
}

impl AbortLatch for QspiAbort {
    #[link_section = ".data.ram_func"]
    #[inline(never)]
    fn aborted(&self) -> bool {
        unsafe { read_reg(IO_QSPI_BASE + GPIO_QSPI_SD1_CTRL) & GPIO_CTRL_INOVER_BITS != 0 }
    }
}

#[cfg(feature = "rp2040")]
mod rp2040 {
    use super::*;

    const XIP_BASE: usize = 0x1000_0000;
    const SSI_BASE: usize = 0x1800_0000;
    const SSI_TXFLR: usize = 0x20;
    const SSI_RXFLR: usize = 0x24;
    const SSI_DR0: usize = 0x60;
    const GPIO_QSPI_SS_CTRL: usize = 0x0c;
    const OUTOVER_LSB: u32 = 8;
    const OUTOVER_BITS: u32 = 0x0000_0300;

    /// SSI registers and the QSPI_SS pad override.
    pub struct SsiRegs {
        _private: (),
    }

    impl SsiRegs {
        /// # Safety
        ///
        /// See the module documentation.
        pub unsafe fn new() -> Self {
            SsiRegs { _private: () }
        }
    }

    impl SsiRegisters for SsiRegs {
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn txflr(&self) -> u32 {
            unsafe { read_reg(SSI_BASE + SSI_TXFLR) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn rxflr(&self) -> u32 {
            unsafe { read_reg(SSI_BASE + SSI_RXFLR) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn write_dr0(&mut self, data: u32) {
            unsafe { write_reg(SSI_BASE + SSI_DR0, data) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn read_dr0(&mut self) -> u32 {
            unsafe { read_reg(SSI_BASE + SSI_DR0) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn set_ss_outover(&mut self, value: OutOver) {
            let value = (u8::from(value) as u32) << OUTOVER_LSB;
            unsafe { write_masked(IO_QSPI_BASE + GPIO_QSPI_SS_CTRL, value, OUTOVER_BITS) }
        }
    }

    /// XIP window with boot2 in the first 256 bytes of flash.
    pub struct Rp2040Window {
        _private: (),
    }

    impl Rp2040Window {
        /// # Safety
        ///
        /// See the module documentation.
        pub unsafe fn new() -> Self {
            Rp2040Window { _private: () }
        }
    }

    impl XipWindow for Rp2040Window {
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn boot_stage_word(&self, index: usize) -> u32 {
            unsafe { read_volatile((XIP_BASE as *const u32).add(index)) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn enter_boot_stage(&mut self, code: &[u32; BOOT2_SIZE_WORDS]) {
            super::enter_boot_stage(code)
        }
    }
}

#[cfg(feature = "rp2040")]
pub use rp2040::{Rp2040Window, SsiRegs};

#[cfg(feature = "rp2350")]
mod rp2350 {
    use super::*;

    const BOOTRAM_BASE: usize = 0x400e_0000;
    const XIP_MAINTENANCE_BASE: usize = 0x1800_0000;
    const XIP_CACHE_SIZE: usize = 16 * 1024;
    const XIP_CACHE_LINE_SIZE: usize = 8;
    const XIP_CACHE_CLEAN_BY_SET_WAY: usize = 1;

    const QMI_BASE: usize = 0x400d_0000;
    const QMI_DIRECT_CSR: usize = 0x00;
    const QMI_DIRECT_TX: usize = 0x04;
    const QMI_DIRECT_RX: usize = 0x08;
    const QMI_M1_TIMING: usize = 0x20;
    const QMI_M1_RFMT: usize = 0x24;
    const QMI_M1_RCMD: usize = 0x28;
    const QMI_M1_WFMT: usize = 0x2c;
    const QMI_M1_WCMD: usize = 0x30;

    /// QMI direct mode registers.
    pub struct QmiRegs {
        _private: (),
    }

    impl QmiRegs {
        /// # Safety
        ///
        /// See the module documentation.
        pub unsafe fn new() -> Self {
            QmiRegs { _private: () }
        }
    }

    impl QmiRegisters for QmiRegs {
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn direct_csr(&self) -> u32 {
            unsafe { read_reg(QMI_BASE + QMI_DIRECT_CSR) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn xor_direct_csr(&mut self, mask: u32) {
            unsafe { write_reg(QMI_BASE + QMI_DIRECT_CSR + REG_ALIAS_XOR, mask) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn write_direct_tx(&mut self, value: u32) {
            unsafe { write_reg(QMI_BASE + QMI_DIRECT_TX, value) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn read_direct_rx(&mut self) -> u32 {
            unsafe { read_reg(QMI_BASE + QMI_DIRECT_RX) }
        }
    }

    /// Live FLASH_DEVINFO copy in boot RAM, found through the bootrom data table.
    pub struct RomDevInfo {
        ptr: *mut u16,
    }

    impl RomDevInfo {
        /// Returns `None` if the bootrom has no FLASH_DEVINFO entry.
        ///
        /// # Safety
        ///
        /// See the module documentation.
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        pub unsafe fn new() -> Option<Self> {
            type LookupFn = unsafe extern "C" fn(code: u32, mask: u32) -> usize;
            let lookup: LookupFn = core::mem::transmute(read_volatile(0x16 as *const u16) as usize);
            // The entry is a pointer to a 32-bit pointer literal in the ROM.
            let entry = lookup(u16::from_le_bytes(*b"FD") as u32, RT_FLAG_DATA) as *const *mut u16;
            if entry.is_null() {
                None
            } else {
                Some(RomDevInfo { ptr: read_volatile(entry) })
            }
        }
    }

    impl DevInfoWord for RomDevInfo {
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn read(&self) -> u16 {
            unsafe { read_volatile(self.ptr) }
        }

        /// Boot RAM has a 16-bit XOR alias, unlike the 32-bit masked write helpers.
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn xor(&mut self, bits: u16) {
            unsafe { write_volatile((self.ptr as usize + REG_ALIAS_XOR) as *mut u16, bits) }
        }
    }

    /// XIP window with the boot stage in boot RAM, a write-back cache, and a CS1 window.
    pub struct Rp2350Window {
        devinfo: Option<RomDevInfo>,
    }

    impl Rp2350Window {
        /// # Safety
        ///
        /// See the module documentation.
        pub unsafe fn new() -> Self {
            Rp2350Window { devinfo: RomDevInfo::new() }
        }
    }

    impl XipWindow for Rp2350Window {
        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn boot_stage_word(&self, index: usize) -> u32 {
            unsafe { read_volatile((BOOTRAM_BASE as *const u32).add(index)) }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn enter_boot_stage(&mut self, code: &[u32; BOOT2_SIZE_WORDS]) {
            super::enter_boot_stage(code)
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn clean_cache(&mut self) {
            // Set/way maintenance through the top 16kB of the maintenance window.
            let base = XIP_MAINTENANCE_BASE + 0x00ff_c000;
            for line in (0..XIP_CACHE_SIZE).step_by(XIP_CACHE_LINE_SIZE) {
                unsafe { write_volatile((base + line + XIP_CACHE_CLEAN_BY_SET_WAY) as *mut u8, 0) }
            }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn save_cs1(&self) -> Option<Cs1Save> {
            unsafe {
                Some(Cs1Save {
                    timing: read_reg(QMI_BASE + QMI_M1_TIMING),
                    rcmd: read_reg(QMI_BASE + QMI_M1_RCMD),
                    rfmt: read_reg(QMI_BASE + QMI_M1_RFMT),
                })
            }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn restore_cs1(&mut self, saved: &Cs1Save) {
            unsafe {
                write_reg(QMI_BASE + QMI_M1_TIMING, saved.timing);
                write_reg(QMI_BASE + QMI_M1_RCMD, saved.rcmd);
                write_reg(QMI_BASE + QMI_M1_RFMT, saved.rfmt);
            }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn reset_cs1_write(&mut self) {
            unsafe {
                write_reg(QMI_BASE + QMI_M1_WFMT, QMI_M1_WFMT_RESET);
                write_reg(QMI_BASE + QMI_M1_WCMD, QMI_M1_WCMD_RESET);
            }
        }

        #[link_section = ".data.ram_func"]
        #[inline(never)]
        fn cs1_populated(&self) -> bool {
            let word = match &self.devinfo {
                Some(devinfo) => devinfo.read(),
                None => return false,
            };
            DevInfo::new(Snapshot(word))
                .cs_size(ChipSelect::Cs1)
                .map_or(false, |size| size != DevInfoSize::None)
        }
    }

    /// A FLASH_DEVINFO value read once, for use while the live copy is borrowed.
    struct Snapshot(u16);

    impl DevInfoWord for Snapshot {
        fn read(&self) -> u16 {
            self.0
        }

        fn xor(&mut self, bits: u16) {
            self.0 ^= bits;
        }
    }
}

#[cfg(feature = "rp2350")]
pub use rp2350::{QmiRegs, RomDevInfo, Rp2350Window};

/// Call the RAM copy of the boot stage, which returns with XIP restored.
#[link_section = ".data.ram_func"]
#[inline(never)]
fn enter_boot_stage(code: &[u32; BOOT2_SIZE_WORDS]) {
    unsafe {
        // Thumb bit set.
        let entry: VoidFn = core::mem::transmute(code.as_ptr() as usize + 1);
        entry()
    }
}
