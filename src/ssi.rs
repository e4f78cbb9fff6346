//! Exchange engine for the RP2040 Synopsys SSI controller.
//!
//! The SSI has 16-entry TX and RX FIFOs and frames transfers with its own
//! chip select, which drops whenever the TX FIFO runs dry. To survive being
//! starved by interrupts, chip select is instead forced through the QSPI_SS
//! pad output override, and the number of bytes in flight is bounded so the
//! RX FIFO can never overflow.

use crate::bus::{AbortLatch, ChipSelect, FlashBus, Transfer};

/// Depth of each SSI FIFO.
pub const SSI_FIFO_DEPTH: u32 = 16;

/// Maximum number of bytes allowed in the TX and RX FIFOs combined.
pub const MAX_IN_FLIGHT: u32 = SSI_FIFO_DEPTH - 2;

/// Output override value for the QSPI_SS pad.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum OutOver {
    Normal = 0,
    Invert = 1,
    Low = 2,
    High = 3,
}

/// Register access needed to drive the SSI in direct mode.
pub trait SsiRegisters {
    /// TX FIFO level.
    fn txflr(&self) -> u32;
    /// RX FIFO level.
    fn rxflr(&self) -> u32;
    /// Push a byte to the TX FIFO.
    fn write_dr0(&mut self, data: u32);
    /// Pop a byte from the RX FIFO.
    fn read_dr0(&mut self) -> u32;
    /// Set the QSPI_SS pad output override.
    fn set_ss_outover(&mut self, value: OutOver);
}

/// SSI-backed flash bus.
///
/// The SSI only has one chip select, so the `cs` argument is ignored and
/// `has_chip_select()` only accepts CS0.
pub struct Ssi<R: SsiRegisters, A: AbortLatch> {
    regs: R,
    abort: A,
}

impl<R: SsiRegisters, A: AbortLatch> Ssi<R, A> {
    pub fn new(regs: R, abort: A) -> Self {
        Ssi { regs, abort }
    }

    pub fn free(self) -> (R, A) {
        (self.regs, self.abort)
    }

    /// Pull chip select low or release it high.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn force_cs(&mut self, high: bool) {
        self.regs.set_ss_outover(if high { OutOver::High } else { OutOver::Low });
    }

    /// Wait for every queued byte to be shifted and drop whatever was received.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn drain(&mut self) {
        loop {
            let tx_level = self.regs.txflr();
            let rx_level = self.regs.rxflr();
            if tx_level == 0 && rx_level == 0 {
                break;
            }
            let mut n = 0;
            while n < rx_level {
                self.regs.read_dr0();
                n += 1;
            }
        }
    }
}

impl<R: SsiRegisters, A: AbortLatch> FlashBus for Ssi<R, A> {
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn queue_header(&mut self, _cs: ChipSelect, header: &[u8]) -> usize {
        assert!(header.len() as u32 <= MAX_IN_FLIGHT, "header exceeds SSI FIFO bound");
        self.force_cs(false);
        let mut i = 0;
        while i < header.len() {
            self.regs.write_dr0(header[i] as u32);
            i += 1;
        }
        // Every header byte comes back as an echo in the RX FIFO.
        header.len()
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn exchange(
        &mut self,
        _cs: ChipSelect,
        tx: Option<&[u8]>,
        mut rx: Option<&mut [u8]>,
        count: usize,
        mut rx_skip: usize,
    ) -> Transfer {
        if let Some(tx) = tx {
            assert!(tx.len() >= count, "tx buffer shorter than exchange");
        }
        if let Some(rx) = &rx {
            assert!(rx.len() >= count, "rx buffer shorter than exchange");
        }

        self.force_cs(false);
        let mut tx_idx = 0;
        let mut rx_idx = 0;
        let mut aborted = false;

        while tx_idx < count || rx_skip > 0 || rx_idx < count {
            if self.abort.aborted() {
                aborted = true;
                break;
            }
            let tx_level = self.regs.txflr();
            let rx_level = self.regs.rxflr();
            if tx_idx < count && tx_level + rx_level < MAX_IN_FLIGHT {
                let byte = match tx {
                    Some(tx) => tx[tx_idx],
                    None => 0,
                };
                self.regs.write_dr0(byte as u32);
                tx_idx += 1;
            }
            if rx_level > 0 {
                let byte = self.regs.read_dr0() as u8;
                if rx_skip > 0 {
                    rx_skip -= 1;
                } else {
                    if let Some(rx) = &mut rx {
                        rx[rx_idx] = byte;
                    }
                    rx_idx += 1;
                }
            }
        }

        if aborted {
            self.drain();
        }
        self.force_cs(true);

        if aborted {
            Transfer::Aborted { bytes: rx_idx }
        } else {
            Transfer::Completed { bytes: rx_idx }
        }
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn aborted(&self) -> bool {
        self.abort.aborted()
    }
}
