//! SDP device identity: `(vendor_id, product_id) -> chip_tag` and the
//! per-chip HID profile that selects it.

use phf::phf_map;

/// Closed set of supported chips. Each selects a [`HidProfile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChipTag {
    Vybrid,
    Mx6,
    Mx7,
    Mx8mq,
    Mx8qxp,
    Mx8qm,
    RT1050,
}

/// Report sizes and status endianness for one chip family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HidProfile {
    pub report1_size: usize,
    pub report2_size: usize,
    pub report3_size: usize,
    pub report4_size: usize,
    /// `true` if device->host status reports are big-endian.
    pub status_big_endian: bool,
}

const HAB_LEGACY: HidProfile = HidProfile {
    report1_size: 1025,
    report2_size: 1025,
    report3_size: 5,
    report4_size: 65,
    status_big_endian: true,
};

const HAB_MODERN: HidProfile = HidProfile {
    report1_size: 1025,
    report2_size: 1025,
    report3_size: 65,
    report4_size: 65,
    status_big_endian: false,
};

pub fn profile_for(chip: ChipTag) -> HidProfile {
    match chip {
        ChipTag::Vybrid | ChipTag::Mx6 | ChipTag::Mx7 => HAB_LEGACY,
        ChipTag::Mx8mq | ChipTag::Mx8qxp | ChipTag::Mx8qm | ChipTag::RT1050 => HAB_MODERN,
    }
}

static VID_PID_TO_CHIP: phf::Map<u32, ChipTag> = phf_map! {
    0x15A2_0052u32 => ChipTag::Vybrid,
    0x15A2_0054u32 => ChipTag::Mx6,
    0x15A2_0061u32 => ChipTag::Mx6,
    0x15A2_0063u32 => ChipTag::Mx7,
    0x1FC9_0135u32 => ChipTag::Mx8mq,
    0x1FC9_012Fu32 => ChipTag::Mx8qxp,
    0x1FC9_0129u32 => ChipTag::Mx8qm,
    0x1FC9_0134u32 => ChipTag::RT1050,
};

fn key(vid: u16, pid: u16) -> u32 {
    ((vid as u32) << 16) | pid as u32
}

pub fn chip_for_usb_id(vid: u16, pid: u16) -> Option<ChipTag> {
    VID_PID_TO_CHIP.get(&key(vid, pid)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_id_resolves_to_a_chip() {
        assert_eq!(chip_for_usb_id(0x15a2, 0x0054), Some(ChipTag::Mx6));
    }

    #[test]
    fn unknown_id_resolves_to_none() {
        assert_eq!(chip_for_usb_id(0xdead, 0xbeef), None);
    }
}
