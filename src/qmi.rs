//! Exchange engine for the RP2350 QSPI memory interface (QMI) direct mode.
//!
//! QMI stalls the serial clock when DIRECT_RX is full, so unlike the SSI
//! there is no need to bound the bytes in flight. Chip select is asserted
//! through DIRECT_CSR, which also makes CS1 reachable.

use crate::bus::{AbortLatch, ChipSelect, FlashBus, Transfer};

/// DIRECT_CSR: enable direct mode.
pub const DIRECT_CSR_EN: u32 = 1 << 0;
/// DIRECT_CSR: a direct mode transfer is in progress.
pub const DIRECT_CSR_BUSY: u32 = 1 << 1;
/// DIRECT_CSR: assert CS0n; CS1n is the next bit up.
pub const DIRECT_CSR_ASSERT_CS0N: u32 = 1 << 2;
/// DIRECT_CSR: TX FIFO is full.
pub const DIRECT_CSR_TXFULL: u32 = 1 << 10;
/// DIRECT_CSR: TX FIFO is empty.
pub const DIRECT_CSR_TXEMPTY: u32 = 1 << 11;
/// DIRECT_CSR: RX FIFO is empty.
pub const DIRECT_CSR_RXEMPTY: u32 = 1 << 16;

/// DIRECT_TX: 16-bit data width.
pub const DIRECT_TX_DWIDTH: u32 = 1 << 18;
/// DIRECT_TX: do not push the corresponding RX data.
pub const DIRECT_TX_NOPUSH: u32 = 1 << 20;

/// Register access needed to drive QMI direct mode.
pub trait QmiRegisters {
    fn direct_csr(&self) -> u32;
    /// Atomically XOR `mask` into DIRECT_CSR.
    fn xor_direct_csr(&mut self, mask: u32);
    fn write_direct_tx(&mut self, value: u32);
    fn read_direct_rx(&mut self) -> u32;
}

/// QMI-backed flash bus.
pub struct Qmi<R: QmiRegisters, A: AbortLatch> {
    regs: R,
    abort: A,
}

impl<R: QmiRegisters, A: AbortLatch> Qmi<R, A> {
    pub fn new(regs: R, abort: A) -> Self {
        Qmi { regs, abort }
    }

    pub fn free(self) -> (R, A) {
        (self.regs, self.abort)
    }

    #[inline(always)]
    fn csr_toggle_mask(cs: ChipSelect) -> u32 {
        (DIRECT_CSR_ASSERT_CS0N << (cs as u32)) | DIRECT_CSR_EN
    }
}

impl<R: QmiRegisters, A: AbortLatch> FlashBus for Qmi<R, A> {
    /// Header bytes are pushed with NOPUSH set, two at a time where possible,
    /// so they produce nothing in DIRECT_RX. They start shifting once the
    /// following exchange enables direct mode.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn queue_header(&mut self, _cs: ChipSelect, header: &[u8]) -> usize {
        assert!(header.len() <= 8, "header exceeds QMI TX FIFO");
        let mut i = 0;
        while i + 1 < header.len() {
            // 16-bit entries go out low byte first.
            let data = header[i] as u32 | (header[i + 1] as u32) << 8;
            self.regs.write_direct_tx(data | DIRECT_TX_NOPUSH | DIRECT_TX_DWIDTH);
            i += 2;
        }
        if i < header.len() {
            self.regs.write_direct_tx(header[i] as u32 | DIRECT_TX_NOPUSH);
        }
        0
    }

    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    fn exchange(
        &mut self,
        cs: ChipSelect,
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

        // Assert chip select and enable direct mode; anything already
        // queued in the TX FIFO starts now.
        let toggle = Self::csr_toggle_mask(cs);
        self.regs.xor_direct_csr(toggle);

        let mut tx_idx = 0;
        let mut rx_idx = 0;
        let mut aborted = false;

        while tx_idx < count || rx_skip > 0 || rx_idx < count {
            if self.abort.aborted() {
                aborted = true;
                break;
            }
            let status = self.regs.direct_csr();
            if tx_idx < count && status & DIRECT_CSR_TXFULL == 0 {
                let byte = match tx {
                    Some(tx) => tx[tx_idx],
                    None => 0,
                };
                self.regs.write_direct_tx(byte as u32);
                tx_idx += 1;
            }
            if status & DIRECT_CSR_RXEMPTY == 0 {
                let byte = self.regs.read_direct_rx() as u8;
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

        // Wait for BUSY, as there may be no RX data at all, e.g. for single-byte commands.
        // After an abort RX must keep draining, or a full FIFO stalls the clock forever.
        loop {
            let status = self.regs.direct_csr();
            if aborted && status & DIRECT_CSR_RXEMPTY == 0 {
                self.regs.read_direct_rx();
            } else if status & DIRECT_CSR_BUSY == 0 {
                break;
            }
        }

        // Disable direct mode and de-assert chip select.
        self.regs.xor_direct_csr(toggle);

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

    fn has_chip_select(&self, _cs: ChipSelect) -> bool {
        true
    }
}

#[test]
fn test_csr_toggle_mask() {
    type Q = Qmi<crate::sim::SimQmi, crate::bus::NeverAbort>;
    assert_eq!(Q::csr_toggle_mask(ChipSelect::Cs0), 0b0101);
    assert_eq!(Q::csr_toggle_mask(ChipSelect::Cs1), 0b1001);
}
