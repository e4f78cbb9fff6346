//! The byte-exchange primitive shared by both QSPI controller generations.

/// Chip select line on the QSPI bus.
///
/// Flash is normally on CS0; RP2350 can attach a second device, usually
/// PSRAM, to CS1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum ChipSelect {
    Cs0 = 0,
    Cs1 = 1,
}

/// Outcome of a bus exchange.
///
/// `bytes` counts payload bytes which were fully exchanged, not including
/// any discarded leading bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Transfer {
    Completed { bytes: usize },
    Aborted { bytes: usize },
}

impl Transfer {
    /// Number of payload bytes exchanged before completion or abort.
    #[inline(always)]
    pub fn bytes(&self) -> usize {
        match *self {
            Transfer::Completed { bytes } | Transfer::Aborted { bytes } => bytes,
        }
    }

    #[inline(always)]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Transfer::Aborted { .. })
    }
}

/// Externally latched request to abandon the current exchange.
///
/// On hardware this is an input override readback on a QSPI data pin,
/// set by a debugger that wants the core back.
pub trait AbortLatch {
    fn aborted(&self) -> bool;
}

impl<F: Fn() -> bool> AbortLatch for F {
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn aborted(&self) -> bool {
        self()
    }
}

/// Abort latch which never fires.
#[derive(Copy, Clone, Debug, Default)]
pub struct NeverAbort;

impl AbortLatch for NeverAbort {
    #[inline(always)]
    fn aborted(&self) -> bool {
        false
    }
}

/// Trait for QSPI controllers able to run raw serial exchanges with XIP disabled.
///
/// Implementations, and everything they call, must not live in flash.
pub trait FlashBus {
    /// Queue an opcode/address/dummy `header` for `cs` ahead of the next `exchange()`.
    ///
    /// Returns the number of bytes the controller will receive while shifting
    /// the header, which the following `exchange()` must skip.
    fn queue_header(&mut self, cs: ChipSelect, header: &[u8]) -> usize;

    /// Assert `cs`, shift `count` bytes of `tx` (or zeros) out while capturing
    /// `count` bytes into `rx` (or discarding them), then de-assert `cs`.
    ///
    /// The first `rx_skip` received bytes are dropped before capture starts.
    /// The abort latch is checked on every iteration; an aborted exchange
    /// drains the controller and still de-asserts `cs`.
    fn exchange(
        &mut self,
        cs: ChipSelect,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        count: usize,
        rx_skip: usize,
    ) -> Transfer;

    /// Check the abort latch.
    fn aborted(&self) -> bool;

    /// Whether this controller can drive `cs`.
    fn has_chip_select(&self, cs: ChipSelect) -> bool {
        matches!(cs, ChipSelect::Cs0)
    }
}

#[test]
fn test_transfer_bytes() {
    assert_eq!(Transfer::Completed { bytes: 4 }.bytes(), 4);
    assert_eq!(Transfer::Aborted { bytes: 2 }.bytes(), 2);
    assert!(Transfer::Aborted { bytes: 0 }.is_aborted());
    assert!(!Transfer::Completed { bytes: 0 }.is_aborted());
}

#[test]
fn test_closure_abort_latch() {
    let flag = core::cell::Cell::new(false);
    let latch = || flag.get();
    assert!(!latch.aborted());
    flag.set(true);
    assert!(latch.aborted());
    assert!(!NeverAbort.aborted());
}
