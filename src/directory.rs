//! Directory-level models: PSP/BIOS directories, combo tables, the common
//! directory and ISH headers, together with the checks that span entries or
//! directories.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::entry::{short_name, DirectoryEntry, DirectoryKind, EntryAttrs, EntryKind};
use crate::ondisk::{
    entry_type, AddressMode, BHD_COMBO_DIRECTORY_SIGNATURE, BHD_DIRECTORY_SIGNATURE,
    BHD_LEVEL2_DIRECTORY_SIGNATURE, DEFAULT_SPI_BLOCK_SIZE, DIRECTORY_HEADER_RESERVATION,
    ISH_HEADER_SIZE, PSP_COMBO_DIRECTORY_SIGNATURE, PSP_DIRECTORY_SIGNATURE,
    PSP_LEVEL2_DIRECTORY_SIGNATURE,
};
use crate::types::{Error, Result};

pub const MAX_HEADER_BASE: u64 = 0x400_0000;
/// The size field holds 10 bits of 4 KiB units.
pub const MAX_DIRECTORY_SIZE: u32 = 0x3f_f000;
pub const MAX_SPI_BLOCK_SIZE: u32 = 0x1_0000;
const SIZE_GRANULARITY: u64 = 0x1000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::IntoStaticStr, strum_macros::Display,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub enum LevelType {
    A,
    B,
}

/// Half-open byte range [start, start + size) of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub size: u64,
}

impl Region {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// Last byte of the region.
    pub fn last(&self) -> u64 {
        (self.start + self.size).saturating_sub(1)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        !(self.last() < other.start || other.last() < self.start)
    }
}

/// Fails on the first pair of REGIONS that share a byte.
pub fn check_overlaps(regions: &[Region]) -> Result<()> {
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            if a.overlaps(b) {
                return Err(Error::Overlap {
                    a_start: a.start,
                    a_end: a.last(),
                    b_start: b.start,
                    b_end: b.last(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct Directory {
    pub kind: DirectoryKind,
    pub level: u8,
    pub level_type: Option<LevelType>,
    /// Position among the level 2 siblings of the same level type.
    pub level_index: usize,
    /// Start of the directory's region. Without a HeaderBase the header sits here too.
    pub base: Option<u64>,
    pub header_base: Option<u64>,
    /// Reserved region size. Together with Base this selects dynamic layout.
    pub size: Option<u32>,
    pub spi_block_size: Option<u32>,
    /// Base of mode 3 (slot relative) locations.
    pub image_base: Option<u64>,
    pub address_mode: AddressMode,
    pub entries: Vec<DirectoryEntry>,
}

impl Directory {
    pub fn new(kind: DirectoryKind, level: u8) -> Self {
        Self {
            kind,
            level,
            level_type: None,
            level_index: 0,
            base: None,
            header_base: None,
            size: None,
            spi_block_size: None,
            image_base: None,
            address_mode: AddressMode::PhysicalMmio,
            entries: Vec::new(),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind.config_tag()
    }

    /// Where the header lives.
    pub fn header_offset(&self) -> Option<u64> {
        self.header_base.or(self.base)
    }

    /// Where mode 3 locations are measured from. PSP slots start at their own header.
    pub fn slot_base(&self) -> Option<u64> {
        match self.kind {
            DirectoryKind::Psp => self.image_base.or_else(|| self.header_offset()),
            DirectoryKind::Bhd => self.image_base,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.base.is_some() && self.size.is_some()
    }

    pub fn signature(&self) -> Result<u32> {
        Ok(match (self.kind, self.level) {
            (DirectoryKind::Psp, 1) => PSP_DIRECTORY_SIGNATURE,
            (DirectoryKind::Psp, 2) => PSP_LEVEL2_DIRECTORY_SIGNATURE,
            (DirectoryKind::Bhd, 1) => BHD_DIRECTORY_SIGNATURE,
            (DirectoryKind::Bhd, 2) => BHD_LEVEL2_DIRECTORY_SIGNATURE,
            (_, level) => return Err(Error::UnsupportedLevel { level }),
        })
    }

    /// Whether ADDRESS falls inside the region this directory owns.
    pub fn owns(&self, address: u64) -> bool {
        match (self.base, self.size) {
            (Some(base), Some(size)) => address >= base && address < base + u64::from(size),
            _ => false,
        }
    }

    /// Regions that must not overlap any other directory's.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions = Vec::new();
        if let (Some(base), Some(size)) = (self.base, self.size) {
            regions.push(Region::new(base, size.into()));
        }
        if let Some(header_base) = self.header_base {
            regions.push(Region::new(header_base, DIRECTORY_HEADER_RESERVATION));
        }
        regions
    }

    fn check_alignment(&self, attribute: &'static str, value: u64, limit: u64) -> Result<()> {
        if value % SIZE_GRANULARITY != 0 {
            return Err(Error::Misaligned { tag: self.tag().to_string(), attribute, value });
        }
        if value > limit {
            return Err(Error::FieldOutOfRange { tag: self.tag().to_string(), field: attribute, value, limit });
        }
        Ok(())
    }

    /// Checks directory attributes and every entry's fields.
    pub fn validate(&self) -> Result<()> {
        let tag = self.tag();
        self.signature()?;
        if self.base.is_none() {
            if self.size.is_some() {
                return Err(Error::BaseRequired { tag: tag.to_string(), attribute: "Size" });
            }
            if self.header_base.is_some() {
                return Err(Error::BaseRequired { tag: tag.to_string(), attribute: "HeaderBase" });
            }
        }
        if let Some(header_base) = self.header_base {
            self.check_alignment("HeaderBase", header_base, MAX_HEADER_BASE)?;
        }
        if let Some(size) = self.size {
            self.check_alignment("Size", size.into(), MAX_DIRECTORY_SIZE.into())?;
        }
        if let Some(spi_block_size) = self.spi_block_size {
            self.check_alignment("SpiBlockSize", spi_block_size.into(), MAX_SPI_BLOCK_SIZE.into())?;
        }
        for entry in &self.entries {
            let entry_tag: &'static str = entry.kind().into();
            entry.attrs().validate(self.kind, entry_tag)?;
        }
        self.check_amd_public_key_first()?;
        self.check_duplicate_types()
    }

    /// A level 1 PSP directory that carries the AMD public key must list it first.
    pub fn check_amd_public_key_first(&self) -> Result<()> {
        if self.kind != DirectoryKind::Psp || self.level != 1 {
            return Ok(());
        }
        let has_key = self.entries.iter().any(|entry| entry.type_() == entry_type::PSP_AMD_PUBLIC_KEY);
        match self.entries.first() {
            Some(first) if has_key && first.type_() != entry_type::PSP_AMD_PUBLIC_KEY => {
                Err(Error::AmdPublicKeyNotFirst)
            }
            _ => Ok(()),
        }
    }

    fn type_code(&self, attrs: &EntryAttrs) -> u32 {
        let (type_, rom_id, instance, sub_program) = (
            u32::from(attrs.type_),
            u32::from(attrs.rom_id),
            u32::from(attrs.instance),
            u32::from(attrs.sub_program),
        );
        match self.kind {
            DirectoryKind::Psp => type_ | (rom_id << 8) | (instance << 16) | (sub_program << 24),
            DirectoryKind::Bhd => type_ | (instance << 8) | (sub_program << 12) | (rom_id << 16),
        }
    }

    /// Rejects two entries with the same (type, rom id, instance, sub program).
    /// Level 2A/2B pointers may repeat in PSP directories.
    pub fn check_duplicate_types(&self) -> Result<()> {
        let mut coded: Vec<(u32, EntryAttrs)> = self
            .entries
            .iter()
            .map(|entry| {
                let attrs = entry.attrs();
                (self.type_code(&attrs), attrs)
            })
            .collect();
        coded.sort_by_key(|(code, _)| *code);
        for pair in coded.windows(2) {
            let (previous, _) = pair[0];
            let (code, attrs) = pair[1];
            if code != previous {
                continue;
            }
            let ab_pointer = self.kind == DirectoryKind::Psp
                && matches!(
                    attrs.type_,
                    entry_type::PSP_LEVEL2A_DIRECTORY | entry_type::PSP_LEVEL2B_DIRECTORY
                );
            if ab_pointer {
                log::warn!("{} lists level 2 pointer 0x{:02x} more than once", self.tag(), attrs.type_);
                continue;
            }
            return Err(Error::Duplicate {
                type_: attrs.type_,
                rom_id: attrs.rom_id,
                instance: attrs.instance,
                sub_program: attrs.sub_program,
            });
        }
        Ok(())
    }

    /// File names a dump uses for each entry's payload, None for value entries.
    pub fn entry_file_names(&self) -> Vec<Option<String>> {
        let mut namer = EntryNamer::new(self.kind, self.level, self.level_type, self.level_index);
        self.entries.iter().map(|entry| namer.name(entry.kind(), &entry.attrs())).collect()
    }

    /// SPI block size with the 64 KiB default applied.
    pub fn effective_spi_block_size(&self) -> u32 {
        match self.spi_block_size {
            Some(0) | None => DEFAULT_SPI_BLOCK_SIZE,
            Some(size) => size,
        }
    }
}

/// Hands out the file names entry payloads are dumped to. Repeated BIOS names get a numeric suffix.
pub struct EntryNamer {
    kind: DirectoryKind,
    level: u8,
    level_type: Option<LevelType>,
    level_index: usize,
    seen: HashMap<String, usize>,
}

impl EntryNamer {
    pub fn new(kind: DirectoryKind, level: u8, level_type: Option<LevelType>, level_index: usize) -> Self {
        Self { kind, level, level_type, level_index, seen: HashMap::new() }
    }

    fn base_name(&self, entry_kind: EntryKind, attrs: &EntryAttrs) -> Option<String> {
        if entry_kind == EntryKind::Value {
            return None;
        }
        if attrs.type_ == entry_type::BHD_RESET_IMAGE && attrs.reset_image {
            return Some("ResetImage".to_string());
        }
        if entry_kind == EntryKind::Image && attrs.type_ == entry_type::PSP_RTM_SIGNATURE {
            match self.level {
                1 => return Some("RTMSignature".to_string()),
                2 => return Some("RTMSignatureL1L2".to_string()),
                _ => {}
            }
        }
        let level_type: &'static str = self.level_type.map_or("", Into::into);
        Some(format!(
            "{}L{:x}{}{}_Typex{:x}_{:x}_{:x}_{:x}_{}",
            self.kind.file_prefix(),
            self.level,
            level_type,
            self.level_index,
            attrs.type_,
            attrs.rom_id,
            attrs.instance,
            attrs.sub_program,
            short_name(self.kind, attrs.type_),
        ))
    }

    pub fn name(&mut self, entry_kind: EntryKind, attrs: &EntryAttrs) -> Option<String> {
        let mut name = self.base_name(entry_kind, attrs)?;
        if self.kind == DirectoryKind::Bhd {
            let count = self.seen.entry(name.clone()).or_insert(0);
            if *count > 0 {
                name = format!("{}_{}", name, count);
            }
            *count += 1;
        }
        Some(format!("{}.bin", name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct ComboEntry {
    pub id_select: u32,
    pub id: u32,
    pub address: u64,
}

/// Selects one of several directories by PSP id.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct ComboDirectory {
    pub kind: DirectoryKind,
    pub base: u64,
    pub lookup_mode: u32,
    pub address_mode: AddressMode,
    pub entries: Vec<ComboEntry>,
}

impl ComboDirectory {
    pub fn tag(&self) -> &'static str {
        match self.kind {
            DirectoryKind::Psp => "COMBO_DIR",
            DirectoryKind::Bhd => "BIOS_COMBO_DIR",
        }
    }

    pub fn signature(&self) -> u32 {
        match self.kind {
            DirectoryKind::Psp => PSP_COMBO_DIRECTORY_SIGNATURE,
            DirectoryKind::Bhd => BHD_COMBO_DIRECTORY_SIGNATURE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let out_of_range = |field, value: u32| Error::FieldOutOfRange {
            tag: self.tag().to_string(),
            field,
            value: value.into(),
            limit: 1,
        };
        if self.lookup_mode > 1 {
            return Err(out_of_range("LookUpMode", self.lookup_mode));
        }
        if let Some(entry) = self.entries.iter().find(|entry| entry.id_select > 1) {
            return Err(out_of_range("IdSelect", entry.id_select));
        }
        Ok(())
    }
}

/// A payload placed verbatim at a fixed address, outside of any directory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct CommonEntry {
    pub file: PathBuf,
    pub address: u64,
    pub size: u32,
    pub rom_id: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct CommonDirectory {
    pub entries: Vec<CommonEntry>,
}

/// Image slot header in front of a level 2 PSP directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct IshHeader {
    pub base: u64,
    pub boot_priority: u32,
    pub update_retries: u32,
    /// Only the low byte is stored.
    pub glitch_retries: u32,
    pub location: u32,
    pub psp_id: u32,
    pub slot_max_size: u32,
    pub reserved_1: u32,
}

impl IshHeader {
    pub fn region(&self) -> Region {
        Region::new(self.base, ISH_HEADER_SIZE)
    }
}

/// Root attributes of a configuration, also recovered when parsing an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct GlobalSettings {
    pub address_mode: AddressMode,
    /// Set the writable bit on modifiable entries.
    pub writable: bool,
    pub xor_bit24: bool,
}

/// Everything one build configuration declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct DirectoryConfig {
    pub settings: GlobalSettings,
    pub psp_directories: Vec<Directory>,
    pub bhd_directories: Vec<Directory>,
    pub ish_headers: Vec<IshHeader>,
    pub psp_combo: Option<ComboDirectory>,
    pub bhd_combo: Option<ComboDirectory>,
    pub common: Option<CommonDirectory>,
}

impl DirectoryConfig {
    pub fn regions(&self) -> Vec<Region> {
        self.bhd_directories
            .iter()
            .chain(self.psp_directories.iter())
            .flat_map(Directory::regions)
            .chain(self.ish_headers.iter().map(IshHeader::region))
            .collect()
    }

    /// Validates each directory, then that no two regions overlap.
    pub fn validate(&self) -> Result<()> {
        for directory in self.psp_directories.iter().chain(self.bhd_directories.iter()) {
            directory.validate()?;
        }
        for combo in self.psp_combo.iter().chain(self.bhd_combo.iter()) {
            combo.validate()?;
        }
        check_overlaps(&self.regions())
    }
}
