//! RAM copy of the second stage boot routine.
//!
//! Calling boot2 as a function works because it accepts a return vector in
//! LR. The bootrom passes null there, telling boot2 to enter the flash
//! vector table's reset handler; a normal call makes it return instead,
//! with XIP set up again.

use core::sync::atomic::{compiler_fence, Ordering};

use crate::xip::XipWindow;

/// Size of the boot stage routine in 32-bit words.
pub const BOOT2_SIZE_WORDS: usize = 64;

/// Copy of the boot stage routine, taken once while XIP is still enabled.
///
/// Once valid, the copy is never rewritten. The valid flag is not guarded
/// because a single core drives all excursions; a multicore port must give
/// `ensure_cached()` a single initialising core or an atomic flag.
pub struct Boot2Copyout {
    words: [u32; BOOT2_SIZE_WORDS],
    valid: bool,
}

impl Boot2Copyout {
    pub const fn new() -> Self {
        Boot2Copyout { words: [0; BOOT2_SIZE_WORDS], valid: false }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn words(&self) -> &[u32; BOOT2_SIZE_WORDS] {
        &self.words
    }

    /// Copy the active boot stage from `window`, unless already copied.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    pub fn ensure_cached<W: XipWindow>(&mut self, window: &W) {
        if self.valid {
            return;
        }
        for (idx, word) in self.words.iter_mut().enumerate() {
            *word = window.boot_stage_word(idx);
        }
        compiler_fence(Ordering::SeqCst);
        self.valid = true;
    }

    /// Run the copied routine to restore XIP.
    ///
    /// Panics if no copy has been taken. A corrupt copy is not detected.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    pub fn invoke<W: XipWindow>(&self, window: &mut W) {
        assert!(self.valid, "boot stage copy not taken");
        window.enter_boot_stage(&self.words);
    }
}

impl Default for Boot2Copyout {
    fn default() -> Self {
        Self::new()
    }
}
