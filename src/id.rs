use crate::bus::{ChipSelect, FlashBus};
use crate::cmd;
use crate::Result;

/// Store the ID read off the XIP flash.
///
/// The manufacturer ID and 16-bit device ID are read using the 0x9F command.
/// The 64-bit unique ID is read using the 0x4B command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashId {
    pub manufacturer_id: u8,
    pub device_id: u16,
    pub unique_id: u64,
}

impl FlashId {
    /// Read both IDs over `bus`. Flash must already be out of XIP mode.
    #[cfg_attr(target_os = "none", link_section = ".data.ram_func")]
    #[inline(never)]
    pub fn read<B: FlashBus>(bus: &mut B, cs: ChipSelect) -> Result<Self> {
        let (manufacturer_id, device_id) = match cmd::read_jedec_id(bus, cs) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        let uid = match cmd::read_unique_id(bus, cs) {
            Ok(uid) => uid,
            Err(e) => return Err(e),
        };
        let mut unique_id = 0u64;
        let mut i = 0;
        while i < uid.len() {
            unique_id = (unique_id << 8) | uid[i] as u64;
            i += 1;
        }
        Ok(FlashId { manufacturer_id, device_id, unique_id })
    }

    /// Capacity implied by the low byte of the device ID, as log2 of bytes.
    ///
    /// Most vendors follow this convention, but it is not guaranteed.
    pub fn capacity(&self) -> Option<usize> {
        match self.device_id & 0xFF {
            bits @ 0x10..=0x1F => Some(1 << bits),
            _ => None,
        }
    }

    /// Look up a manufacturer name from the JEDEC ID.
    #[cfg(feature = "std")]
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        match jep106::JEP106Code::new(0, self.manufacturer_id & 0x7F).get() {
            // Winbond acquired NEXCOM and so the ID 0xEF is commonly used for Winbond memory.
            Some(mfn) if mfn == "NEXCOM" => Some("Winbond/NEXCOM"),
            // GigaDevice flash doesn't use a continuation code, so 0xC8 appears as Apple Computer.
            Some(mfn) if mfn == "Apple Computer" => Some("Apple Computer/GigaDevice Semiconductor"),
            Some(mfn) => Some(mfn),
            None => None,
        }
    }
}

#[cfg(feature = "std")]
impl std::fmt::Display for FlashId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mfn = match self.manufacturer_name() {
            Some(mfn) => format!(" ({})", mfn),
            None => "".to_string(),
        };
        let unique_id = match self.unique_id {
            0x0000_0000_0000_0000 | 0xFFFF_FFFF_FFFF_FFFF => "".to_string(),
            id => format!(", Unique ID: {:016X}", id),
        };
        write!(f, "Manufacturer 0x{:02X}{}, Device 0x{:04X}{}",
               self.manufacturer_id, mfn, self.device_id, unique_id)
    }
}

#[test]
fn test_capacity_from_device_id() {
    let id = FlashId { manufacturer_id: 0xEF, device_id: 0x4015, unique_id: 0 };
    assert_eq!(id.capacity(), Some(2 * 1024 * 1024));
    let id = FlashId { manufacturer_id: 0xEF, device_id: 0x40FF, unique_id: 0 };
    assert_eq!(id.capacity(), None);
}

#[cfg(feature = "std")]
#[test]
fn test_display() {
    let id = FlashId { manufacturer_id: 0xEF, device_id: 0x4015, unique_id: 0xE660_5838_834A_2C21 };
    assert_eq!(
        id.to_string(),
        "Manufacturer 0xEF (Winbond/NEXCOM), Device 0x4015, Unique ID: E6605838834A2C21"
    );
    let id = FlashId { manufacturer_id: 0xEF, device_id: 0x4015, unique_id: u64::MAX };
    assert!(!id.to_string().contains("Unique ID"));
}
