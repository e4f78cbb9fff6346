//! Hooks around the memory-mapped flash window.

use crate::boot2::BOOT2_SIZE_WORDS;

/// Reset value of QMI M1_WFMT: serial 02h writes.
pub const QMI_M1_WFMT_RESET: u32 = 0x0000_1000;
/// Reset value of QMI M1_WCMD: 02h prefix, A0h suffix.
pub const QMI_M1_WCMD_RESET: u32 = 0x0000_A002;

/// CS1 window registers which the RP2350 bootrom `flash_exit_xip` rewrites.
///
/// This is not the whole window state, only what the exit sequence touches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cs1Save {
    pub timing: u32,
    pub rcmd: u32,
    pub rfmt: u32,
}

/// Platform hooks the excursion needs besides the bootrom and the bus.
///
/// Apart from `boot_stage_word()`, which is called while XIP is still
/// enabled, implementations must not touch flash.
pub trait XipWindow {
    /// Whether a boot stage routine exists to re-enter XIP with.
    ///
    /// Images which never run from flash have none, and re-enter XIP with
    /// the bootrom's plain 03h read mode instead.
    fn has_boot_stage(&self) -> bool {
        true
    }

    /// Read word `index` of the active boot stage routine.
    fn boot_stage_word(&self, index: usize) -> u32;

    /// Call the RAM copy of the boot stage routine, restoring XIP.
    fn enter_boot_stage(&mut self, code: &[u32; BOOT2_SIZE_WORDS]);

    /// Write back any dirty cache lines, such as pending writes to PSRAM.
    fn clean_cache(&mut self) {}

    /// Snapshot the CS1 window registers, if the platform has a CS1 window.
    fn save_cs1(&self) -> Option<Cs1Save> {
        None
    }

    /// Write back a snapshot taken by `save_cs1()`.
    fn restore_cs1(&mut self, _saved: &Cs1Save) {}

    /// Reset the CS1 write format and write command to serial defaults.
    fn reset_cs1_write(&mut self) {}

    /// Whether FLASH_DEVINFO declares a device on CS1.
    fn cs1_populated(&self) -> bool {
        false
    }
}
