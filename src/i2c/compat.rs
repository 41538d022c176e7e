// Licensed under the Apache-2.0 license

//! Hardware-revision compatibility table.
//!
//! Each controller generation is described by a [`Capabilities`] value that
//! is looked up once, when a controller is attached, from the device's
//! compatible string. Everything that used to be decided by conditional
//! compilation is a field here.

/// Register layout family.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HwRevision {
    /// Original layout.
    V1,
    /// Relocated layout with SCL timeout, master-error status and MCU
    /// interrupt gating. Some V1 registers do not exist.
    V2,
}

/// Addressing reach of the DMA channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DmaTier {
    /// 32-bit bus addresses only.
    Addr32 = 1,
    /// 33-bit bus addresses; the high word goes to `*_MEM_ADDR2`.
    Addr33 = 2,
    /// 36-bit bus addresses; the high word goes to `*_MEM_ADDR2`.
    Addr36 = 3,
}

impl DmaTier {
    /// Whether the channel takes a high address word.
    #[must_use]
    pub fn has_high_address(self) -> bool {
        self >= DmaTier::Addr33
    }
}

/// Per-revision capability descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub revision: HwRevision,
    pub dma: DmaTier,
    /// Write-read lengths share one register when the DVFS processor also
    /// drives this bus.
    pub idvfs_i2c: bool,
    /// A clock divider register exists.
    pub set_dt_div: bool,
    /// A separate low-phase timing register exists (asymmetric duty cycle).
    pub set_ltiming: bool,
    /// The IO config register carries an AED field.
    pub set_aed: bool,
    /// Reject targets above high-speed mode instead of clamping.
    pub check_max_freq: bool,
    /// Start-condition override for speeds above standard mode (`0` = none).
    pub ext_time_config: u16,
}

const V1_BASE: Capabilities = Capabilities {
    revision: HwRevision::V1,
    dma: DmaTier::Addr32,
    idvfs_i2c: false,
    set_dt_div: false,
    set_ltiming: false,
    set_aed: false,
    check_max_freq: true,
    ext_time_config: 0,
};

const MT6775: Capabilities = Capabilities {
    revision: HwRevision::V2,
    dma: DmaTier::Addr33,
    idvfs_i2c: true,
    set_dt_div: true,
    set_ltiming: true,
    set_aed: true,
    ..V1_BASE
};

const MT6771: Capabilities = Capabilities {
    set_aed: false,
    ext_time_config: 0x1801,
    ..MT6775
};

const MT6735: Capabilities = V1_BASE;

const MT6739: Capabilities = Capabilities {
    set_dt_div: true,
    set_ltiming: true,
    set_aed: true,
    ext_time_config: 0x1801,
    ..V1_BASE
};

const MT6797: Capabilities = Capabilities {
    idvfs_i2c: true,
    ..V1_BASE
};

const MT6757: Capabilities = Capabilities {
    dma: DmaTier::Addr33,
    ext_time_config: 0x0201,
    ..V1_BASE
};

const MT6758: Capabilities = Capabilities {
    dma: DmaTier::Addr33,
    idvfs_i2c: true,
    set_dt_div: true,
    ..V1_BASE
};

const MT6799: Capabilities = Capabilities {
    dma: DmaTier::Addr36,
    check_max_freq: false,
    ..MT6758
};

const MT6763: Capabilities = Capabilities {
    set_ltiming: true,
    set_aed: true,
    ext_time_config: 0x1801,
    ..MT6758
};

const ELBRUS: Capabilities = Capabilities {
    dma: DmaTier::Addr33,
    idvfs_i2c: true,
    ..V1_BASE
};

/// Compatible-string table, fixed at build time.
pub static COMPAT_TABLE: &[(&str, Capabilities)] = &[
    ("mediatek,mt6775-i2c", MT6775),
    ("mediatek,mt6771-i2c", MT6771),
    ("mediatek,mt6735-i2c", MT6735),
    ("mediatek,mt6739-i2c", MT6739),
    ("mediatek,mt6797-i2c", MT6797),
    ("mediatek,mt6757-i2c", MT6757),
    ("mediatek,mt6758-i2c", MT6758),
    ("mediatek,mt6759-i2c", MT6758),
    ("mediatek,mt6799-i2c", MT6799),
    ("mediatek,mt6763-i2c", MT6763),
    ("mediatek,elbrus-i2c", ELBRUS),
];

/// Find the capability descriptor for a compatible string.
#[must_use]
pub fn lookup(compatible: &str) -> Option<&'static Capabilities> {
    COMPAT_TABLE
        .iter()
        .find(|(name, _)| *name == compatible)
        .map(|(_, caps)| caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_compatibles_resolve() {
        let caps = lookup("mediatek,mt6775-i2c").unwrap();
        assert_eq!(caps.revision, HwRevision::V2);
        assert!(caps.set_ltiming);
        assert!(caps.dma.has_high_address());

        let caps = lookup("mediatek,mt6735-i2c").unwrap();
        assert_eq!(caps.revision, HwRevision::V1);
        assert!(!caps.dma.has_high_address());
        assert!(caps.check_max_freq);

        let caps = lookup("mediatek,mt6799-i2c").unwrap();
        assert_eq!(caps.dma, DmaTier::Addr36);
        assert!(!caps.check_max_freq);
    }

    #[test]
    fn unknown_compatible_is_none() {
        assert!(lookup("mediatek,mt9999-i2c").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn table_has_no_duplicate_names() {
        for (i, (a, _)) in COMPAT_TABLE.iter().enumerate() {
            assert!(COMPAT_TABLE.iter().skip(i + 1).all(|(b, _)| a != b));
        }
    }
}
