//! Directory entries as the user sees them, plus the catalogue of known entry types.

use std::path::{Path, PathBuf};

use crate::ondisk::{AddressMode, BhdDirectoryEntryAttrs, PspDirectoryEntryAttrs};
use crate::types::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::EnumString, strum_macros::IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub enum DirectoryKind {
    #[strum(serialize = "PSP")]
    Psp,
    #[strum(serialize = "BIOS")]
    Bhd,
}

impl DirectoryKind {
    /// Element name in the declarative configuration.
    pub fn config_tag(self) -> &'static str {
        match self {
            Self::Psp => "PSP_DIR",
            Self::Bhd => "BIOS_DIR",
        }
    }

    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Psp => "PspDir",
            Self::Bhd => "BiosDir",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::EnumString, strum_macros::IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub enum EntryKind {
    #[strum(serialize = "IMAGE_ENTRY")]
    Image,
    #[strum(serialize = "VALUE_ENTRY")]
    Value,
    #[strum(serialize = "POINT_ENTRY")]
    Point,
}

#[derive(Debug)]
pub struct EntryTypeInfo {
    pub type_: u8,
    pub kind: EntryKind,
    pub short_name: &'static str,
    pub description: &'static str,
    /// Runtime-writable payloads get SpiBlockSize alignment.
    pub modifiable: bool,
}

const fn image(type_: u8, short_name: &'static str, description: &'static str) -> EntryTypeInfo {
    EntryTypeInfo { type_, kind: EntryKind::Image, short_name, description, modifiable: false }
}

const fn modifiable(type_: u8, short_name: &'static str, description: &'static str) -> EntryTypeInfo {
    EntryTypeInfo { type_, kind: EntryKind::Image, short_name, description, modifiable: true }
}

pub const PSP_ENTRY_TYPES: &[EntryTypeInfo] = &[
    image(0x00, "AmdPubKey", "AMD public Key"),
    image(0x01, "PspBootLoader", "PSP Boot Loader firmware"),
    image(0x03, "PspRecBL", "PSP Recovery Boot Loader"),
    image(0x08, "Smu", "SMU offchip firmware"),
    image(0x09, "DbgKey", "AMD Secure Debug Key"),
    image(0x0a, "OemAblKey", "OEM ABL public key signed with AMD key"),
    image(0x12, "Smu2", "SMU offchip firmware 2"),
    image(0x13, "PspEarlyUnlock", "PSP early secure unlock debug image"),
    image(0x21, "ikek", "Wrapped iKEK"),
    modifiable(0x22, "PspTokenUnlockData", "PSP token unlock data"),
    image(0x23, "PspDiagBL", "Entry to load PSP Diag BL on non-secure part via fuse"),
    image(0x24, "RegisterAccessPolicy", "Register Access Policy"),
    image(0x2a, "Mp5Fw", "Location field pointing to MP5 FW"),
    image(0x30, "PspAgesaBL0", "PSP AGESA Binary 0"),
    image(0x39, "SevCode", "Trusted application implementing SEV functionality"),
    image(0x42, "DxioFw", "DXIO Phy FW binary"),
    image(0x44, "UsbPhyFw", "USB unified PHY FW"),
    image(0x47, "DrtmTa", "DRTM TA"),
    image(
        0x50,
        "PspBlPubKey",
        "Public keys are needed to certify firmware components and data. Public keys are stored in SPI ROM and are loaded into SRAM. This entry point to the Public keys Table for PSP BL",
    ),
    image(0x55, "SPL Table", "Table of SPL values used by bootloader for FW anti-rollback"),
    image(0x5d, "MPIOOffchipFW", "MPIO Offchip Firmware, responsible for xGMI, WAFL, PCIe, etc. training"),
    image(0x76, "RIB", "Register Initialization Binary (RIB)"),
    image(0x8b, "FipsCert", "FIPS certification dedicated module used for FIPS certification of PSP"),
    image(0x8c, "MpdmaTfFw", "Firmware for MPDMA TF instances"),
    image(0x91, "Gmi3PhyFw", "Delivered by MPIO team. Validated with PSP Entry Type 0x43"),
    image(0x92, "MpdmaPmFw", "Firmware for MPDMA Page Migration instances"),
];

pub const BHD_ENTRY_TYPES: &[EntryTypeInfo] = &[
    image(
        0x05,
        "OemPubKey",
        "Location field points to the public part of the OEM/IBV BIOS Signing Key Token or BIOS Signing Sub-CA Key Token when OEM uses a BIOS Signing Sub-CA key hierarchy.",
    ),
    image(
        0x06,
        "OemPubKey2",
        "Location filed points to the public part of the OEM/IBV BIOS Signing Key Token when OEM uses a BIOS Signing Sub-CA key hierarchy otherwise left as reserved",
    ),
    modifiable(0x63, "ApobNv", "APOB NV Copy"),
    image(0x66, "UCodePatch", "Microcode Patch"),
    image(0x68, "ApcbRec", "Location field points to the backup copy of APCB data"),
    image(0x69, "EarlyVgaImage", "Location field pointing to the interpreter binary that displays the video image"),
    EntryTypeInfo {
        type_: 0x70,
        kind: EntryKind::Point,
        short_name: "BIOSDirLv2",
        description: "Point to BIOS level 2 directory",
        modifiable: false,
    },
];

pub fn entry_type_info(kind: DirectoryKind, type_: u8) -> Option<&'static EntryTypeInfo> {
    let table = match kind {
        DirectoryKind::Psp => PSP_ENTRY_TYPES,
        DirectoryKind::Bhd => BHD_ENTRY_TYPES,
    };
    table.iter().find(|info| info.type_ == type_)
}

pub fn short_name(kind: DirectoryKind, type_: u8) -> &'static str {
    entry_type_info(kind, type_).map_or("unknown", |info| info.short_name)
}

pub fn description(kind: DirectoryKind, type_: u8) -> &'static str {
    entry_type_info(kind, type_).map_or("Unknown Type", |info| info.description)
}

pub fn is_modifiable(kind: DirectoryKind, type_: u8) -> bool {
    entry_type_info(kind, type_).map_or(false, |info| info.modifiable)
}

/// Old configurations packed the sub program into bits 8..16 of Type.
/// Returns the (type, sub program) pair to use.
pub fn split_legacy_type(type_: u64, sub_program: u64) -> (u64, u64) {
    if type_ > 0xff {
        (type_ & 0xff, (type_ >> 8) & 0xff)
    } else {
        (type_, sub_program)
    }
}

/// Attribute bits shared by every entry that carries a payload. The BIOS-only flags stay zero in PSP directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct EntryAttrs {
    pub type_: u8,
    pub sub_program: u8,
    pub rom_id: u8,
    pub instance: u8,
    pub writable: bool,
    pub region_type: u8,
    pub reset_image: bool,
    pub copy: bool,
    pub read_only: bool,
    pub compressed: bool,
}

impl EntryAttrs {
    pub fn new(type_: u8) -> Self {
        Self { type_, ..Default::default() }
    }

    /// Checks the narrow on-disk fields. TAG names the entry in errors.
    pub fn validate(&self, kind: DirectoryKind, tag: &str) -> Result<()> {
        if kind == DirectoryKind::Psp && (self.reset_image || self.copy || self.read_only || self.compressed) {
            return Err(Error::InvalidAttribute {
                tag: tag.to_string(),
                attribute: "ResetImage/Copy/ReadOnly/Compressed".to_string(),
                value: "1".to_string(),
            });
        }
        for (field, value, limit) in [
            ("SubProgram", self.sub_program, 0x7),
            ("RomId", self.rom_id, 0x3),
            ("Instance", self.instance, 0xf),
        ] {
            if value > limit {
                return Err(Error::FieldOutOfRange {
                    tag: tag.to_string(),
                    field,
                    value: value.into(),
                    limit: limit.into(),
                });
            }
        }
        Ok(())
    }

    /// Key under which two entries of one directory must not collide.
    pub fn composite_key(&self) -> (u8, u8, u8, u8) {
        (self.type_, self.rom_id, self.instance, self.sub_program)
    }

    pub fn psp_bits(&self) -> PspDirectoryEntryAttrs {
        PspDirectoryEntryAttrs::new()
            .with_type_(self.type_)
            .with_sub_program(self.sub_program)
            .with_rom_id(self.rom_id)
            .with_writable(self.writable)
            .with_instance(self.instance)
    }

    pub fn bhd_bits(&self) -> BhdDirectoryEntryAttrs {
        BhdDirectoryEntryAttrs::new()
            .with_type_(self.type_)
            .with_region_type(self.region_type)
            .with_reset_image(self.reset_image)
            .with_copy(self.copy)
            .with_read_only(self.read_only)
            .with_compressed(self.compressed)
            .with_instance(self.instance)
            .with_sub_program(self.sub_program)
            .with_rom_id(self.rom_id)
            .with_writable(self.writable)
    }
}

impl From<PspDirectoryEntryAttrs> for EntryAttrs {
    fn from(bits: PspDirectoryEntryAttrs) -> Self {
        Self {
            type_: bits.type_(),
            sub_program: bits.sub_program(),
            rom_id: bits.rom_id(),
            instance: bits.instance(),
            writable: bits.writable(),
            ..Default::default()
        }
    }
}

impl From<BhdDirectoryEntryAttrs> for EntryAttrs {
    fn from(bits: BhdDirectoryEntryAttrs) -> Self {
        Self {
            type_: bits.type_(),
            sub_program: bits.sub_program(),
            rom_id: bits.rom_id(),
            instance: bits.instance(),
            writable: bits.writable(),
            region_type: bits.region_type(),
            reset_image: bits.reset_image(),
            copy: bits.copy(),
            read_only: bits.read_only(),
            compressed: bits.compressed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub enum ImageSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Payload length, or None when the file does not exist.
    pub fn len(&self) -> Result<Option<u64>> {
        match self {
            Self::Bytes(bytes) => Ok(Some(bytes.len() as u64)),
            Self::File(path) => match std::fs::metadata(path) {
                Ok(metadata) => Ok(Some(metadata.len())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::io(path, e)),
            },
        }
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::File(path) => std::fs::read(path).map_err(|e| Error::io(path, e)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Bytes(_) => None,
        }
    }
}

/// An entry whose payload lives inside the directory's own region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct ImageEntry {
    pub attrs: EntryAttrs,
    pub source: ImageSource,
    /// Required in fixed layouts, assigned by the writer in dynamic ones.
    pub address: Option<u64>,
    pub size: Option<u32>,
    /// None: inherit the directory's mode.
    pub address_mode: Option<AddressMode>,
    /// BIOS only.
    pub destination: Option<u64>,
}

impl ImageEntry {
    pub fn new(attrs: EntryAttrs, source: ImageSource) -> Self {
        Self { attrs, source, address: None, size: None, address_mode: None, destination: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct ValueEntry {
    pub type_: u8,
    pub value: u64,
}

/// An entry that refers to bytes outside the directory's region, typically another directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct PointEntry {
    pub attrs: EntryAttrs,
    /// Absolute flash offset, or an offset from the mode's base in relative directories.
    pub address: u64,
    pub size: u32,
    /// ADDRESS is a flash offset to be stored as a physical address even in a relative directory.
    pub absolute_addr: bool,
    pub address_mode: Option<AddressMode>,
    pub destination: Option<u64>,
}

impl PointEntry {
    pub fn new(attrs: EntryAttrs, address: u64, size: u32) -> Self {
        Self { attrs, address, size, absolute_addr: false, address_mode: None, destination: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub enum DirectoryEntry {
    Image(ImageEntry),
    Value(ValueEntry),
    Point(PointEntry),
}

impl DirectoryEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Image(_) => EntryKind::Image,
            Self::Value(_) => EntryKind::Value,
            Self::Point(_) => EntryKind::Point,
        }
    }

    pub fn type_(&self) -> u8 {
        self.attrs().type_
    }

    pub fn attrs(&self) -> EntryAttrs {
        match self {
            Self::Image(entry) => entry.attrs,
            Self::Point(entry) => entry.attrs,
            Self::Value(entry) => EntryAttrs::new(entry.type_),
        }
    }

    pub fn address_mode(&self) -> Option<AddressMode> {
        match self {
            Self::Image(entry) => entry.address_mode,
            Self::Point(entry) => entry.address_mode,
            Self::Value(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_tables() {
        assert_eq!(short_name(DirectoryKind::Psp, 0x30), "PspAgesaBL0");
        assert_eq!(short_name(DirectoryKind::Psp, 0x66), "unknown");
        assert_eq!(short_name(DirectoryKind::Bhd, 0x66), "UCodePatch");
        assert_eq!(description(DirectoryKind::Bhd, 0x99), "Unknown Type");
        assert!(is_modifiable(DirectoryKind::Psp, 0x22));
        assert!(is_modifiable(DirectoryKind::Bhd, 0x63));
        assert!(!is_modifiable(DirectoryKind::Bhd, 0x22));
        assert_eq!(entry_type_info(DirectoryKind::Bhd, 0x70).unwrap().kind, EntryKind::Point);
    }

    #[test]
    fn test_legacy_type() {
        assert_eq!(split_legacy_type(0x130, 0), (0x30, 1));
        assert_eq!(split_legacy_type(0x30, 2), (0x30, 2));
    }

    #[test]
    fn test_attrs_validation() {
        let mut attrs = EntryAttrs::new(0x30);
        attrs.rom_id = 3;
        assert!(attrs.validate(DirectoryKind::Psp, "IMAGE_ENTRY").is_ok());
        attrs.rom_id = 4;
        assert!(matches!(
            attrs.validate(DirectoryKind::Psp, "IMAGE_ENTRY"),
            Err(Error::FieldOutOfRange { field: "RomId", .. })
        ));
        let mut attrs = EntryAttrs::new(0x62);
        attrs.sub_program = 0x8;
        assert!(attrs.validate(DirectoryKind::Bhd, "IMAGE_ENTRY").is_err());
        attrs.sub_program = 0x7;
        assert!(attrs.validate(DirectoryKind::Bhd, "IMAGE_ENTRY").is_ok());
        attrs.reset_image = true;
        assert!(attrs.validate(DirectoryKind::Psp, "IMAGE_ENTRY").is_err());
    }

    #[test]
    fn test_attrs_bits() {
        let mut attrs = EntryAttrs::new(0x62);
        attrs.reset_image = true;
        attrs.instance = 2;
        attrs.sub_program = 1;
        attrs.region_type = 0x10;
        assert_eq!(EntryAttrs::from(attrs.bhd_bits()), attrs);
        let mut attrs = EntryAttrs::new(0x30);
        attrs.sub_program = 1;
        attrs.writable = true;
        assert_eq!(u32::from(attrs.psp_bits()), 0x0130 | (1 << 18));
        assert_eq!(EntryAttrs::from(attrs.psp_bits()), attrs);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("POINT_ENTRY".parse::<EntryKind>().unwrap(), EntryKind::Point);
        let name: &'static str = EntryKind::Value.into();
        assert_eq!(name, "VALUE_ENTRY");
        assert_eq!("BIOS".parse::<DirectoryKind>().unwrap(), DirectoryKind::Bhd);
    }
}
