//! Host model of the RP2040/RP2350 flash subsystem, for tests.
//!
//! One `SimChip` holds the flash device, both controllers, the bootrom,
//! the XIP window and the OTP word. Every register-level handle shares it
//! through `Shared`, so a test can inspect the chip while the driver
//! owns the handles.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::boot2::BOOT2_SIZE_WORDS;
use crate::bus::{AbortLatch, ChipSelect};
use crate::devinfo::{DevInfo, DevInfoSize, DevInfoWord};
use crate::qmi::{
    Qmi, QmiRegisters, DIRECT_CSR_ASSERT_CS0N, DIRECT_CSR_BUSY, DIRECT_CSR_EN, DIRECT_CSR_RXEMPTY,
    DIRECT_CSR_TXEMPTY, DIRECT_CSR_TXFULL, DIRECT_TX_DWIDTH, DIRECT_TX_NOPUSH,
};
use crate::rom::{FlashRom, RomFunction};
use crate::ssi::{OutOver, Ssi, SsiRegisters, SSI_FIFO_DEPTH};
use crate::xip::{Cs1Save, XipWindow, QMI_M1_WCMD_RESET, QMI_M1_WFMT_RESET};
use crate::{XipFlash, SECTOR_SIZE};

pub(crate) type Shared = Rc<RefCell<SimChip>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Generation {
    Rp2040,
    Rp2350,
}

/// Everything the excursion does outside the bus, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    CleanCache,
    SaveCs1,
    Rom(RomFunction),
    Boot2,
    RestoreCs1,
    ResetCs1Write,
}

/// QMI CS1 window registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Cs1Regs {
    pub timing: u32,
    pub rcmd: u32,
    pub rfmt: u32,
    pub wfmt: u32,
    pub wcmd: u32,
}

impl Cs1Regs {
    /// A QSPI PSRAM set up for quad reads and writes.
    const PSRAM: Cs1Regs = Cs1Regs {
        timing: 0x6000_0203,
        rcmd: 0x0000_F5EB,
        rfmt: 0x0006_12AA,
        wfmt: 0x0000_12AA,
        wcmd: 0x0000_F538,
    };
}

/// What the bootrom's exit sequence leaves in the CS1 read registers.
const CLEAN_TIMING: u32 = 0x4000_0004;
const CLEAN_RCMD: u32 = 0x0000_0003;
const CLEAN_RFMT: u32 = 0x0000_1000;
/// Marks a write configuration the exit sequence has invalidated.
const STALE: u32 = 0xDEAD_BEEF;

const QMI_FIFO_DEPTH: usize = 4;
const BOOT2_MAGIC: u32 = 0xB007_0000;

pub(crate) struct SimChip {
    generation: Generation,
    mem: Vec<u8>,
    xip_enabled: bool,
    has_boot_stage: bool,
    missing: Vec<RomFunction>,
    events: Vec<Event>,
    boot2_reads: usize,

    selected: bool,
    frame: Vec<u8>,
    wel: bool,
    busy_polls: usize,
    busy_latency: usize,
    hold_busy: bool,
    status_polls: usize,
    flash_bytes: usize,
    bus_bytes: usize,
    abort_at: Option<usize>,

    ssi_tx: VecDeque<u8>,
    ssi_rx: VecDeque<u8>,
    max_fifo_level: usize,

    csr: u32,
    qmi_tx: VecDeque<u32>,
    qmi_rx: VecDeque<u8>,

    cs1: Cs1Regs,
    devinfo: u16,
}

impl SimChip {
    const UNIQUE_ID: [u8; 8] = [0xE6, 0x60, 0x58, 0x38, 0x83, 0x4A, 0x2C, 0x21];
    const JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x15];

    fn new(generation: Generation, capacity: usize) -> Shared {
        Rc::new(RefCell::new(SimChip {
            generation,
            mem: vec![0xFF; capacity],
            xip_enabled: true,
            has_boot_stage: true,
            missing: Vec::new(),
            events: Vec::new(),
            boot2_reads: 0,
            selected: false,
            frame: Vec::new(),
            wel: false,
            busy_polls: 0,
            busy_latency: 0,
            hold_busy: false,
            status_polls: 0,
            flash_bytes: 0,
            bus_bytes: 0,
            abort_at: None,
            ssi_tx: VecDeque::new(),
            ssi_rx: VecDeque::new(),
            max_fifo_level: 0,
            csr: 0,
            qmi_tx: VecDeque::new(),
            qmi_rx: VecDeque::new(),
            cs1: Cs1Regs::PSRAM,
            devinfo: 0,
        }))
    }

    pub fn rp2040(capacity: usize) -> Shared {
        Self::new(Generation::Rp2040, capacity)
    }

    pub fn rp2350(capacity: usize) -> Shared {
        Self::new(Generation::Rp2350, capacity)
    }

    /// Raw flash contents, bypassing every controller.
    pub fn mem(&self, offset: u32, len: usize) -> Vec<u8> {
        self.mem[offset as usize..offset as usize + len].to_vec()
    }

    /// Fill flash directly, as a previous image would have left it.
    pub fn preload(&mut self, offset: u32, data: &[u8]) {
        self.mem[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    /// Read through the memory-mapped window.
    pub fn xip_read(&self, offset: u32, len: usize) -> Vec<u8> {
        assert!(self.xip_enabled, "XIP read while flash is unmapped");
        self.mem(offset, len)
    }

    pub fn xip_enabled(&self) -> bool {
        self.xip_enabled
    }

    /// Put the device in serial command mode without going through the bootrom.
    pub fn exit_xip_for_test(&mut self) {
        self.xip_enabled = false;
    }

    pub fn unique_id(&self) -> [u8; 8] {
        Self::UNIQUE_ID
    }

    pub fn jedec_id(&self) -> [u8; 3] {
        Self::JEDEC_ID
    }

    pub fn cs_asserted(&self) -> bool {
        self.selected
    }

    pub fn busy(&self) -> bool {
        self.hold_busy || self.busy_polls > 0
    }

    /// Report busy for `polls` status reads after each program or erase.
    pub fn set_busy_latency(&mut self, polls: usize) {
        self.busy_latency = polls;
    }

    /// Report busy forever.
    pub fn hold_busy(&mut self) {
        self.hold_busy = true;
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls
    }

    /// Bytes which reached the flash device.
    pub fn flash_bytes_shifted(&self) -> usize {
        self.flash_bytes
    }

    /// Bytes clocked by any controller, on any chip select.
    pub fn bus_bytes(&self) -> usize {
        self.bus_bytes
    }

    /// Latch the abort request once `bytes` more bytes have been clocked.
    pub fn abort_after(&mut self, bytes: usize) {
        self.abort_at = Some(self.bus_bytes + bytes);
    }

    pub fn aborted(&self) -> bool {
        self.abort_at.map_or(false, |at| self.bus_bytes >= at)
    }

    pub fn max_fifo_level(&self) -> usize {
        self.max_fifo_level
    }

    /// Entries left in any controller FIFO.
    pub fn fifo_level(&self) -> usize {
        self.ssi_tx.len() + self.ssi_rx.len() + self.qmi_tx.len() + self.qmi_rx.len()
    }

    pub fn direct_csr_raw(&self) -> u32 {
        self.csr
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.clone()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn remove_rom_function(&mut self, func: RomFunction) {
        self.missing.push(func);
    }

    /// Model a RAM-only image, which has no boot stage routine to re-enter XIP with.
    pub fn remove_boot_stage(&mut self) {
        self.has_boot_stage = false;
    }

    pub fn boot2_reads(&self) -> usize {
        self.boot2_reads
    }

    pub fn cs1(&self) -> Cs1Regs {
        self.cs1
    }

    pub fn set_devinfo(&mut self, raw: u16) {
        self.devinfo = raw;
    }

    fn cs1_populated(&self) -> bool {
        (self.devinfo >> 12) & 0xF != 0
    }

    fn select(&mut self) {
        assert!(!self.xip_enabled, "serial command issued while XIP is enabled");
        self.selected = true;
        self.frame.clear();
    }

    fn deselect(&mut self) {
        self.selected = false;
        let frame = std::mem::take(&mut self.frame);
        if frame.is_empty() || (self.busy() && frame[0] != 0x05) {
            return;
        }
        match frame[0] {
            0x06 => self.wel = true,
            0x02 if frame.len() >= 4 => self.program(Self::frame_addr(&frame), &frame[4..]),
            0x20 if frame.len() == 4 => self.erase(Self::frame_addr(&frame), SECTOR_SIZE),
            0xD8 if frame.len() == 4 => self.erase(Self::frame_addr(&frame), 64 * 1024),
            _ => {}
        }
    }

    fn frame_addr(frame: &[u8]) -> usize {
        ((frame[1] as usize) << 16) | ((frame[2] as usize) << 8) | frame[3] as usize
    }

    /// Clock one byte through the device, returning what it drives back.
    fn shift(&mut self, mosi: u8) -> u8 {
        self.flash_bytes += 1;
        self.frame.push(mosi);
        let idx = self.frame.len() - 1;
        match self.frame[0] {
            0x05 if idx >= 1 => self.status_byte(),
            0x03 if idx >= 4 => {
                let addr = Self::frame_addr(&self.frame) + idx - 4;
                self.mem[addr % self.mem.len()]
            }
            0x4B if (5..13).contains(&idx) => Self::UNIQUE_ID[idx - 5],
            0x9F if (1..4).contains(&idx) => Self::JEDEC_ID[idx - 1],
            _ => 0xFF,
        }
    }

    fn status_byte(&mut self) -> u8 {
        self.status_polls += 1;
        let busy = self.busy();
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
        }
        (busy as u8) | ((self.wel as u8) << 1)
    }

    /// Program with NOR semantics: bits only clear, and the address wraps within the page.
    fn program(&mut self, addr: usize, data: &[u8]) {
        if !self.wel {
            return;
        }
        self.wel = false;
        let base = addr & !0xFF;
        for (i, &byte) in data.iter().enumerate() {
            let target = base + ((addr + i) & 0xFF);
            if target < self.mem.len() {
                self.mem[target] &= byte;
            }
        }
        self.busy_polls = self.busy_latency;
    }

    fn erase(&mut self, addr: usize, size: usize) {
        if !self.wel {
            return;
        }
        self.wel = false;
        let base = addr & !(size - 1);
        let end = (base + size).min(self.mem.len());
        for byte in &mut self.mem[base.min(end)..end] {
            *byte = 0xFF;
        }
        self.busy_polls = self.busy_latency;
    }

    /// One complete frame issued by the bootrom, which polls busy itself.
    fn rom_frame(&mut self, frame: &[u8]) {
        self.busy_polls = 0;
        self.select();
        for &byte in frame {
            self.bus_bytes += 1;
            self.shift(byte);
        }
        self.deselect();
        self.busy_polls = 0;
    }

    fn rom_cmd_addr(&mut self, cmd: u8, addr: usize, data: &[u8]) {
        let mut frame = vec![cmd, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8];
        frame.extend_from_slice(data);
        self.rom_frame(&[0x06]);
        self.rom_frame(&frame);
    }

    fn ssi_tick(&mut self) {
        if let Some(mosi) = self.ssi_tx.pop_front() {
            self.bus_bytes += 1;
            let miso = if self.selected { self.shift(mosi) } else { 0xFF };
            assert!(self.ssi_rx.len() < SSI_FIFO_DEPTH as usize, "SSI RX FIFO overflow");
            self.ssi_rx.push_back(miso);
        }
    }

    fn qmi_tick(&mut self) {
        if self.csr & DIRECT_CSR_EN == 0 || self.qmi_rx.len() >= QMI_FIFO_DEPTH {
            return;
        }
        if let Some(entry) = self.qmi_tx.pop_front() {
            let wide = entry & DIRECT_TX_DWIDTH != 0;
            let nopush = entry & DIRECT_TX_NOPUSH != 0;
            assert!(!wide || nopush, "16-bit RX entries are not modelled");
            let width = if wide { 2 } else { 1 };
            let mut miso = 0;
            for i in 0..width {
                self.bus_bytes += 1;
                let mosi = (entry >> (8 * i)) as u8;
                miso = if self.selected { self.shift(mosi) } else { 0 };
            }
            if !nopush {
                self.qmi_rx.push_back(miso);
            }
        }
    }

    fn qmi_status(&self) -> u32 {
        let mut status = self.csr & (DIRECT_CSR_EN | DIRECT_CSR_ASSERT_CS0N | (DIRECT_CSR_ASSERT_CS0N << 1));
        if !self.qmi_tx.is_empty() {
            status |= DIRECT_CSR_BUSY;
        } else {
            status |= DIRECT_CSR_TXEMPTY;
        }
        if self.qmi_tx.len() >= QMI_FIFO_DEPTH {
            status |= DIRECT_CSR_TXFULL;
        }
        if self.qmi_rx.is_empty() {
            status |= DIRECT_CSR_RXEMPTY;
        }
        status
    }
}

/// SSI and QSPI_SS pad registers.
pub(crate) struct SimSsi(pub Shared);

impl SsiRegisters for SimSsi {
    fn txflr(&self) -> u32 {
        self.0.borrow().ssi_tx.len() as u32
    }

    /// Each level read lets the controller clock one byte.
    fn rxflr(&self) -> u32 {
        let mut chip = self.0.borrow_mut();
        chip.ssi_tick();
        chip.ssi_rx.len() as u32
    }

    fn write_dr0(&mut self, data: u32) {
        let mut chip = self.0.borrow_mut();
        assert!(chip.ssi_tx.len() < SSI_FIFO_DEPTH as usize, "SSI TX FIFO overflow");
        chip.ssi_tx.push_back(data as u8);
        let level = chip.ssi_tx.len() + chip.ssi_rx.len();
        chip.max_fifo_level = chip.max_fifo_level.max(level);
    }

    fn read_dr0(&mut self) -> u32 {
        self.0.borrow_mut().ssi_rx.pop_front().expect("SSI RX FIFO underflow") as u32
    }

    fn set_ss_outover(&mut self, value: OutOver) {
        let mut chip = self.0.borrow_mut();
        match value {
            OutOver::Low if !chip.selected => chip.select(),
            OutOver::High if chip.selected => chip.deselect(),
            _ => {}
        }
    }
}

/// QMI direct mode registers.
pub(crate) struct SimQmi(pub Shared);

impl QmiRegisters for SimQmi {
    /// Each status read lets the controller clock one TX entry.
    fn direct_csr(&self) -> u32 {
        let mut chip = self.0.borrow_mut();
        chip.qmi_tick();
        chip.qmi_status()
    }

    fn xor_direct_csr(&mut self, mask: u32) {
        let mut chip = self.0.borrow_mut();
        let before = chip.csr & DIRECT_CSR_ASSERT_CS0N != 0;
        chip.csr ^= mask;
        let after = chip.csr & DIRECT_CSR_ASSERT_CS0N != 0;
        match (before, after) {
            (false, true) => chip.select(),
            (true, false) => chip.deselect(),
            _ => {}
        }
    }

    fn write_direct_tx(&mut self, value: u32) {
        let mut chip = self.0.borrow_mut();
        assert!(chip.qmi_tx.len() < QMI_FIFO_DEPTH, "QMI TX FIFO overflow");
        chip.qmi_tx.push_back(value);
    }

    fn read_direct_rx(&mut self) -> u32 {
        self.0.borrow_mut().qmi_rx.pop_front().expect("QMI RX FIFO underflow") as u32
    }
}

pub(crate) struct SimAbort(pub Shared);

impl AbortLatch for SimAbort {
    fn aborted(&self) -> bool {
        self.0.borrow().aborted()
    }
}

/// Bootrom flash routines, driving the device directly.
pub(crate) struct SimRom(pub Shared);

impl SimRom {
    fn record(&mut self, func: RomFunction) {
        let mut chip = self.0.borrow_mut();
        assert!(!chip.missing.contains(&func), "called missing bootrom function {:?}", func);
        chip.events.push(Event::Rom(func));
    }
}

impl FlashRom for SimRom {
    fn provides(&self, func: RomFunction) -> bool {
        !self.0.borrow().missing.contains(&func)
    }

    fn connect_internal_flash(&mut self) {
        self.record(RomFunction::ConnectInternalFlash);
    }

    fn flash_exit_xip(&mut self) {
        self.record(RomFunction::FlashExitXip);
        let mut chip = self.0.borrow_mut();
        chip.xip_enabled = false;
        if chip.generation == Generation::Rp2350 {
            // The exit sequence sets up clean 03h reads on both windows, and
            // also sends the XIP exit sequence to CS1 when a device is declared.
            let populated = chip.cs1_populated();
            chip.cs1.timing = CLEAN_TIMING;
            chip.cs1.rcmd = CLEAN_RCMD;
            chip.cs1.rfmt = CLEAN_RFMT;
            if populated {
                chip.cs1.wfmt = STALE;
                chip.cs1.wcmd = STALE;
            }
        }
    }

    fn flash_range_erase(&mut self, addr: u32, count: usize, block_size: u32, block_cmd: u8) {
        self.record(RomFunction::FlashRangeErase);
        let mut chip = self.0.borrow_mut();
        let block_size = block_size as usize;
        let mut addr = addr as usize;
        let end = addr + count;
        while addr < end {
            if addr % block_size == 0 && end - addr >= block_size {
                chip.rom_cmd_addr(block_cmd, addr, &[]);
                addr += block_size;
            } else {
                chip.rom_cmd_addr(0x20, addr, &[]);
                addr += SECTOR_SIZE;
            }
        }
    }

    fn flash_range_program(&mut self, addr: u32, data: &[u8]) {
        self.record(RomFunction::FlashRangeProgram);
        let mut chip = self.0.borrow_mut();
        for (idx, page) in data.chunks(256).enumerate() {
            chip.rom_cmd_addr(0x02, addr as usize + idx * 256, page);
        }
    }

    fn flash_flush_cache(&mut self) {
        self.record(RomFunction::FlashFlushCache);
        let mut chip = self.0.borrow_mut();
        if chip.selected {
            chip.deselect();
        }
    }

    fn flash_enter_cmd_xip(&mut self) {
        self.record(RomFunction::FlashEnterCmdXip);
        self.0.borrow_mut().xip_enabled = true;
    }
}

/// The chip's live FLASH_DEVINFO copy, with OTP semantics.
pub(crate) struct SimDevInfo(pub Shared);

impl DevInfoWord for SimDevInfo {
    fn read(&self) -> u16 {
        self.0.borrow().devinfo
    }

    fn xor(&mut self, bits: u16) {
        self.0.borrow_mut().devinfo |= bits;
    }
}

/// A free-standing OTP word. Programmed bits stay programmed, so XOR can only set bits.
pub(crate) struct OtpWord {
    value: u16,
}

impl OtpWord {
    pub fn new(value: u16) -> Self {
        OtpWord { value }
    }
}

impl DevInfoWord for OtpWord {
    fn read(&self) -> u16 {
        self.value
    }

    fn xor(&mut self, bits: u16) {
        self.value |= bits;
    }
}

/// Boot stage source, cache and CS1 window.
pub(crate) struct SimWindow(pub Shared);

impl XipWindow for SimWindow {
    fn has_boot_stage(&self) -> bool {
        self.0.borrow().has_boot_stage
    }

    fn boot_stage_word(&self, index: usize) -> u32 {
        let mut chip = self.0.borrow_mut();
        // RP2040 boot2 sits at the start of flash; RP2350 keeps it in boot RAM.
        if chip.generation == Generation::Rp2040 {
            assert!(chip.xip_enabled, "boot stage read from unmapped flash");
        }
        chip.boot2_reads += 1;
        BOOT2_MAGIC + index as u32
    }

    fn enter_boot_stage(&mut self, code: &[u32; BOOT2_SIZE_WORDS]) {
        let mut chip = self.0.borrow_mut();
        for (idx, &word) in code.iter().enumerate() {
            assert_eq!(word, BOOT2_MAGIC + idx as u32, "corrupt boot stage copy");
        }
        assert!(!chip.selected, "boot stage entered with chip select forced");
        chip.events.push(Event::Boot2);
        chip.xip_enabled = true;
    }

    fn clean_cache(&mut self) {
        self.0.borrow_mut().events.push(Event::CleanCache);
    }

    fn save_cs1(&self) -> Option<Cs1Save> {
        let mut chip = self.0.borrow_mut();
        if chip.generation == Generation::Rp2040 {
            return None;
        }
        chip.events.push(Event::SaveCs1);
        Some(Cs1Save { timing: chip.cs1.timing, rcmd: chip.cs1.rcmd, rfmt: chip.cs1.rfmt })
    }

    fn restore_cs1(&mut self, saved: &Cs1Save) {
        let mut chip = self.0.borrow_mut();
        chip.events.push(Event::RestoreCs1);
        chip.cs1.timing = saved.timing;
        chip.cs1.rcmd = saved.rcmd;
        chip.cs1.rfmt = saved.rfmt;
    }

    fn reset_cs1_write(&mut self) {
        let mut chip = self.0.borrow_mut();
        chip.events.push(Event::ResetCs1Write);
        chip.cs1.wfmt = QMI_M1_WFMT_RESET;
        chip.cs1.wcmd = QMI_M1_WCMD_RESET;
    }

    fn cs1_populated(&self) -> bool {
        DevInfo::new(SimDevInfo(self.0.clone()))
            .cs_size(ChipSelect::Cs1)
            .map_or(false, |size| size != DevInfoSize::None)
    }
}

pub(crate) type Rp2040Flash = XipFlash<SimRom, Ssi<SimSsi, SimAbort>, SimWindow>;
pub(crate) type Rp2350Flash = XipFlash<SimRom, Qmi<SimQmi, SimAbort>, SimWindow>;

pub(crate) fn rp2040_flash(capacity: usize) -> (Shared, Rp2040Flash) {
    let chip = SimChip::rp2040(capacity);
    let bus = Ssi::new(SimSsi(chip.clone()), SimAbort(chip.clone()));
    let flash = XipFlash::new(SimRom(chip.clone()), bus, SimWindow(chip.clone())).unwrap();
    (chip, flash)
}

pub(crate) fn rp2350_flash(capacity: usize) -> (Shared, Rp2350Flash) {
    let chip = SimChip::rp2350(capacity);
    let bus = Qmi::new(SimQmi(chip.clone()), SimAbort(chip.clone()));
    let flash = XipFlash::new(SimRom(chip.clone()), bus, SimWindow(chip.clone())).unwrap();
    (chip, flash)
}
