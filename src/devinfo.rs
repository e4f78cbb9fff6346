//! FLASH_DEVINFO: the RP2350 OTP record describing attached QSPI devices.
//!
//! The bootrom keeps a 16-bit copy of the OTP word in boot RAM. Its layout
//! may change between devices, so fields are only reached through
//! getters and setters here.

use core::convert::TryFrom;

use crate::bus::ChipSelect;
use crate::{Error, Result};

const CS1_GPIO_LSB: u16 = 0;
const CS1_GPIO_BITS: u16 = 0x001F;
const D8H_ERASE_SUPPORTED_LSB: u16 = 7;
const D8H_ERASE_SUPPORTED_BITS: u16 = 0x0080;
const CS0_SIZE_LSB: u16 = 8;
const CS1_SIZE_LSB: u16 = 12;
const CS_SIZE_MASK: u16 = 0x000F;

/// Size class of a device on a chip select.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum DevInfoSize {
    None = 0,
    Size8K = 1,
    Size16K = 2,
    Size32K = 3,
    Size64K = 4,
    Size128K = 5,
    Size256K = 6,
    Size512K = 7,
    Size1M = 8,
    Size2M = 9,
    Size4M = 10,
    Size8M = 11,
    Size16M = 12,
}

impl DevInfoSize {
    /// Size in bytes, zero for `None`.
    pub fn bytes(self) -> u32 {
        match self {
            DevInfoSize::None => 0,
            size => 4096 << u8::from(size),
        }
    }

    /// Smallest size class holding `bytes`, saturating at 16MB.
    pub fn from_bytes(bytes: u32) -> Self {
        if bytes == 0 {
            return DevInfoSize::None;
        }
        let mut code = 1;
        while code < u8::from(DevInfoSize::Size16M) && (4096u32 << code) < bytes {
            code += 1;
        }
        DevInfoSize::try_from(code).unwrap_or(DevInfoSize::Size16M)
    }
}

/// Access to the live FLASH_DEVINFO word.
pub trait DevInfoWord {
    fn read(&self) -> u16;

    /// Atomically XOR `bits` into the word.
    fn xor(&mut self, bits: u16);
}

/// Typed accessors for FLASH_DEVINFO.
pub struct DevInfo<W: DevInfoWord> {
    word: W,
    cs0_size_bytes: Option<u32>,
}

impl<W: DevInfoWord> DevInfo<W> {
    pub fn new(word: W) -> Self {
        DevInfo { word, cs0_size_bytes: None }
    }

    /// Report `bytes` as the CS0 size instead of the OTP value.
    ///
    /// A flash size declared for the board takes precedence over OTP.
    pub fn with_cs0_size_bytes(mut self, bytes: u32) -> Self {
        self.cs0_size_bytes = Some(bytes);
        self
    }

    /// The whole raw word.
    pub fn raw(&self) -> u16 {
        self.word.read()
    }

    /// Size class of the device on `cs`.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    pub fn cs_size(&self, cs: ChipSelect) -> Result<DevInfoSize> {
        if let (ChipSelect::Cs0, Some(bytes)) = (cs, self.cs0_size_bytes) {
            return Ok(DevInfoSize::from_bytes(bytes));
        }
        let raw = ((self.word.read() >> Self::cs_size_lsb(cs)) & CS_SIZE_MASK) as u8;
        DevInfoSize::try_from(raw).map_err(|_| Error::InvalidDevInfoSize { raw })
    }

    pub fn set_cs_size(&mut self, cs: ChipSelect, size: DevInfoSize) {
        log::debug!("Setting FLASH_DEVINFO {:?} size to {:?}", cs, size);
        let lsb = Self::cs_size_lsb(cs);
        self.update_field((u8::from(size) as u16) << lsb, CS_SIZE_MASK << lsb);
    }

    pub fn d8h_erase_supported(&self) -> bool {
        self.word.read() & D8H_ERASE_SUPPORTED_BITS != 0
    }

    pub fn set_d8h_erase_supported(&mut self, supported: bool) {
        log::debug!("Setting FLASH_DEVINFO D8h erase supported to {}", supported);
        self.update_field((supported as u16) << D8H_ERASE_SUPPORTED_LSB, D8H_ERASE_SUPPORTED_BITS);
    }

    /// GPIO used as chip select for `cs`; only CS1 has one.
    pub fn cs_gpio(&self, cs: ChipSelect) -> u8 {
        assert_eq!(cs, ChipSelect::Cs1, "only CS1 has a configurable GPIO");
        ((self.word.read() & CS1_GPIO_BITS) >> CS1_GPIO_LSB) as u8
    }

    pub fn set_cs_gpio(&mut self, cs: ChipSelect, gpio: u8) {
        assert_eq!(cs, ChipSelect::Cs1, "only CS1 has a configurable GPIO");
        assert!(gpio as u16 <= CS1_GPIO_BITS >> CS1_GPIO_LSB, "GPIO out of range");
        log::debug!("Setting FLASH_DEVINFO CS1 GPIO to {}", gpio);
        self.update_field((gpio as u16) << CS1_GPIO_LSB, CS1_GPIO_BITS);
    }

    fn cs_size_lsb(cs: ChipSelect) -> u16 {
        match cs {
            ChipSelect::Cs0 => CS0_SIZE_LSB,
            ChipSelect::Cs1 => CS1_SIZE_LSB,
        }
    }

    /// Boot RAM has no exclusives and a plain masked write would be 32 bits
    /// wide, so fields are changed with a single XOR of the differing bits.
    fn update_field(&mut self, wdata: u16, mask: u16) {
        let bits = (self.word.read() ^ wdata) & mask;
        self.word.xor(bits);
    }
}
