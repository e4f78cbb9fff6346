use crate::{BLOCK_SIZE, SECTOR_SIZE};

/// One erase instruction of an `ErasePlan`.
///
/// The bootrom picks the opcode from the size: D8h for a block, 20h for a sector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EraseStep {
    pub size: usize,
    pub base: u32,
}

/// Erase plan splitting a sector-aligned range into one instruction per excursion.
///
/// Each step is the largest erase which starts at the current position and
/// stays inside the range: a 64kB block where aligned, else a 4kB sector.
#[derive(Clone, Debug)]
pub struct ErasePlan {
    pos: usize,
    end: usize,
}

impl ErasePlan {
    pub fn new(start: u32, length: usize) -> Self {
        log::trace!("Creating erase plan, start={} length={}", start, length);
        assert!(start as usize % SECTOR_SIZE == 0 && length % SECTOR_SIZE == 0);
        ErasePlan { pos: start as usize, end: start as usize + length }
    }
}

impl Iterator for ErasePlan {
    type Item = EraseStep;

    fn next(&mut self) -> Option<EraseStep> {
        if self.pos >= self.end {
            return None;
        }
        let size = if self.pos % BLOCK_SIZE == 0 && self.end - self.pos >= BLOCK_SIZE {
            BLOCK_SIZE
        } else {
            SECTOR_SIZE
        };
        let step = EraseStep { size, base: self.pos as u32 };
        self.pos += size;
        Some(step)
    }
}

#[test]
fn test_erase_plan() {
    const K: usize = 1024;
    let plan = |start: usize, len: usize| -> Vec<(usize, u32)> {
        ErasePlan::new(start as u32, len).map(|s| (s.size, s.base)).collect()
    };
    // Use a single 4kB erase to erase an aligned 4kB block.
    assert_eq!(plan(0, 4 * K), vec![(4 * K, 0)]);
    // Use a single 64kB erase to erase an aligned 64kB block.
    assert_eq!(plan(0, 64 * K), vec![(64 * K, 0)]);
    // Use three 64kB erases to erase an aligned 192kB block.
    assert_eq!(
        plan(0, 192 * K),
        vec![(64 * K, 0), (64 * K, 64 * K as u32), (64 * K, 128 * K as u32)]
    );
    // Use 64kB followed by 4kB to erase an aligned 68kB block.
    assert_eq!(plan(0, 68 * K), vec![(64 * K, 0), (4 * K, 64 * K as u32)]);
    // Use sectors up to the block boundary for a misaligned start.
    assert_eq!(
        plan(56 * K, 72 * K),
        vec![
            (4 * K, 56 * K as u32),
            (4 * K, 60 * K as u32),
            (64 * K, 64 * K as u32),
        ]
    );
    // Nothing to do for an empty range.
    assert!(plan(8 * K, 0).is_empty());
}

#[test]
#[should_panic]
fn test_erase_plan_unaligned() {
    ErasePlan::new(100, 4096);
}
