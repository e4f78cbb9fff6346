/// Status Register 1, as returned by the 05h Read Status instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusRegister1(pub u8);

impl StatusRegister1 {
    /// Get BUSY bit, set while an erase or program is in progress.
    #[inline(always)]
    pub fn get_busy(&self) -> bool {
        self.0 & 0b0000_0001 != 0
    }

    /// Get WEL (write enable latch) bit.
    #[inline(always)]
    pub fn get_wel(&self) -> bool {
        self.0 & 0b0000_0010 != 0
    }
}

#[test]
fn test_status_register1() {
    assert!(StatusRegister1(0x01).get_busy());
    assert!(!StatusRegister1(0x02).get_busy());
    assert!(StatusRegister1(0x02).get_wel());
    assert!(!StatusRegister1(0xFD).get_wel());
}
