// Packed records of the PSP and BIOS (BHD) directory tables, combo tables, ISH slot headers and the embedded firmware structure.
// Field offsets and bit positions are fixed by the firmware that consumes them.

use byteorder::LittleEndian;
use modular_bitfield::prelude::*;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned, U32, U64};

use crate::flash::Location;

/// Given *BUF (a collection of multiple items), retrieves the first of the items and returns it.
/// If the item cannot be parsed, returns None.
pub fn header_from_collection<'a, T: Sized + FromBytes>(buf: &'a [u8]) -> Option<&'a T> {
    match LayoutVerified::<_, T>::new_from_prefix(buf) {
        Some((item, _xbuf)) => Some(item.into_ref()),
        None => None,
    }
}

pub(crate) type LU32 = U32<LittleEndian>;
pub(crate) type LU64 = U64<LittleEndian>;

// The first one is recommended by AMD; 0x2_0000 is always used in practice.
pub const EMBEDDED_FIRMWARE_STRUCTURE_POSITION: [Location; 7] =
    [0xFA_0000, 0xF2_0000, 0xE2_0000, 0xC2_0000, 0x82_0000, 0x2_0000, 0x12_0000];

pub const EFH_SIGNATURE: u32 = 0x55aa_55aa;

pub const PSP_DIRECTORY_SIGNATURE: u32 = 0x5053_5024; // "$PSP"
pub const PSP_LEVEL2_DIRECTORY_SIGNATURE: u32 = 0x324c_5024; // "$PL2"
pub const PSP_COMBO_DIRECTORY_SIGNATURE: u32 = 0x5053_5032; // "2PSP"
pub const BHD_DIRECTORY_SIGNATURE: u32 = 0x4448_4224; // "$BHD"
pub const BHD_LEVEL2_DIRECTORY_SIGNATURE: u32 = 0x324c_4224; // "$BL2"
pub const BHD_COMBO_DIRECTORY_SIGNATURE: u32 = 0x4448_4232; // "2BHD"

/// Every directory header is given this much room in front of its entries.
pub const DIRECTORY_HEADER_RESERVATION: u64 = 0x400;
/// Default placement granularity of entry payloads.
pub const DEFAULT_ALIGNMENT: u64 = 0x100;
pub const DEFAULT_SPI_BLOCK_SIZE: u32 = 0x1_0000;
/// Size field of value entries.
pub const VALUE_ENTRY_SIZE: u32 = 0xffff_ffff;
pub const NO_DESTINATION: u64 = 0xffff_ffff_ffff_ffff;
/// Room an ISH header occupies in the image.
pub const ISH_HEADER_SIZE: u64 = 0x20;

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, FromPrimitive, Clone, Copy, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub enum AddressMode {
    /// Physical address in the 4 GiB MMIO window.
    #[default]
    PhysicalMmio = 0,
    /// Offset from the start of the flash image.
    FlashOffset = 1,
    /// Offset from the directory header.
    DirectoryRelative = 2,
    /// Offset from the slot image base.
    SlotRelative = 3,
}

impl AddressMode {
    pub fn from_bits(value: u64) -> Option<Self> {
        num_traits::FromPrimitive::from_u64(value)
    }

    pub fn is_relative(self) -> bool {
        matches!(self, Self::DirectoryRelative | Self::SlotRelative)
    }
}

/// Entry types that the directory walker follows.
pub mod entry_type {
    pub const PSP_AMD_PUBLIC_KEY: u8 = 0x00;
    pub const PSP_RTM_SIGNATURE: u8 = 0x07;
    pub const PSP_SOFT_FUSE_CHAIN: u8 = 0x0b;
    pub const PSP_LEVEL2_DIRECTORY: u8 = 0x40;
    pub const PSP_LEVEL2A_DIRECTORY: u8 = 0x48;
    pub const PSP_LEVEL2B_DIRECTORY: u8 = 0x4a;
    /// Found in PSP directories; points at a BIOS level 2 directory of the same slot.
    pub const BHD_LEVEL2AB_DIRECTORY: u8 = 0x49;
    pub const BHD_APOB: u8 = 0x61;
    pub const BHD_RESET_IMAGE: u8 = 0x62;
    pub const BHD_MICROCODE_PATCH: u8 = 0x66;
    pub const BHD_LEVEL2_DIRECTORY: u8 = 0x70;
}

/// 12 words of the embedded firmware structure ("ROMSIG").
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct Efh {
    pub signature: LU32, // 0x55aa_55aa
    pub imc_fw_location: LU32, // usually unused
    pub gbe_fw_location: LU32, // usually unused
    pub xhci_fw_location: LU32, // usually unused
    _psp_directory_table_location_early: LU32, // usually unused
    pub psp_directory_table_location_zen: LU32,
    pub bios_directory_tables: [LU32; 3], // Naples (usually unused), Newer (usually unused), Rome
    pub second_gen_efs: LU32, // bit 0: EFS generation
    pub bios_directory_table_milan: LU32, // or Combo
    pub psp_directory_table_location_recovery: LU32,
}

impl Default for Efh {
    fn default() -> Self {
        Self {
            signature: EFH_SIGNATURE.into(),
            imc_fw_location: 0.into(),
            gbe_fw_location: 0.into(),
            xhci_fw_location: 0.into(),
            _psp_directory_table_location_early: 0.into(),
            psp_directory_table_location_zen: 0.into(), // probably invalid
            bios_directory_tables: [0.into(); 3], // probably invalid
            second_gen_efs: 0xffff_fffe.into(),
            bios_directory_table_milan: 0xffff_ffff.into(),
            psp_directory_table_location_recovery: 0xffff_ffff.into(),
        }
    }
}

impl Efh {
    pub const FIELD_COUNT: usize = 12;

    /// Word INDEX of the table. Program profiles locate the BIOS directory pointer by index.
    pub fn field(&self, index: usize) -> Option<u32> {
        let bytes = self.as_bytes();
        let word = bytes.get(index * 4..index * 4 + 4)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Precondition: signature needs to be there--otherwise you might be reading garbage in the first place
    pub fn efs_generation_bit(&self) -> u32 {
        self.second_gen_efs.get() & 1
    }
}

/// The "reserved" word of a directory header.
#[bitfield]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryAdditionalInfo {
    pub max_size_in_4k: B10,
    pub spi_block_size_in_4k: B4, // 0: 64 KiB
    pub base_address_in_4k: B15,
    pub address_mode: B2,
    #[skip]
    __: B1,
}

impl DirectoryAdditionalInfo {
    pub fn max_size(&self) -> u32 {
        u32::from(self.max_size_in_4k()) << 12
    }

    pub fn spi_block_size(&self) -> u32 {
        match self.spi_block_size_in_4k() {
            0 => DEFAULT_SPI_BLOCK_SIZE,
            n => u32::from(n) << 12,
        }
    }

    pub fn base_address(&self) -> u64 {
        u64::from(self.base_address_in_4k()) << 12
    }
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct DirectoryHeader {
    pub cookie: LU32, // fourcc "$PSP", "$PL2", "$BHD" or "$BL2"
    pub checksum: LU32, // Fletcher-32 of everything below this field, including all entries
    pub total_entries: LU32,
    pub additional_info: LU32,
}

impl Default for DirectoryHeader {
    fn default() -> Self {
        Self {
            cookie: 0.into(),
            checksum: 0.into(),
            total_entries: 0.into(),
            additional_info: 0.into(),
        }
    }
}

impl DirectoryHeader {
    pub fn additional_info(&self) -> DirectoryAdditionalInfo {
        DirectoryAdditionalInfo::from(self.additional_info.get())
    }
}

#[bitfield]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PspDirectoryEntryAttrs {
    pub type_: B8,
    pub sub_program: B8,
    pub rom_id: B2,
    pub writable: bool,
    pub instance: B4,
    #[skip]
    __: B9,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct PspDirectoryEntry {
    pub attrs: LU32,
    pub size: LU32, // VALUE_ENTRY_SIZE: value entry
    pub value_or_location: LU64,
}

impl Default for PspDirectoryEntry {
    fn default() -> Self {
        Self {
            attrs: 0.into(),
            size: 0.into(),
            value_or_location: 0.into(),
        }
    }
}

impl PspDirectoryEntry {
    pub fn attrs(&self) -> PspDirectoryEntryAttrs {
        PspDirectoryEntryAttrs::from(self.attrs.get())
    }
    pub fn is_value(&self) -> bool {
        self.size.get() == VALUE_ENTRY_SIZE
    }
}

#[bitfield]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BhdDirectoryEntryAttrs {
    pub type_: B8,
    pub region_type: B8,
    pub reset_image: bool,
    pub copy: bool,
    pub read_only: bool,
    pub compressed: bool,
    pub instance: B4,
    pub sub_program: B3,
    pub rom_id: B2,
    pub writable: bool,
    #[skip]
    __: B2,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct BhdDirectoryEntry {
    pub attrs: LU32,
    pub size: LU32,
    pub value_or_source_location: LU64, // value iff size == VALUE_ENTRY_SIZE
    pub destination_location: LU64, // NO_DESTINATION: none
}

impl Default for BhdDirectoryEntry {
    fn default() -> Self {
        Self {
            attrs: 0.into(),
            size: 0.into(),
            value_or_source_location: 0.into(),
            destination_location: NO_DESTINATION.into(),
        }
    }
}

impl BhdDirectoryEntry {
    pub fn attrs(&self) -> BhdDirectoryEntryAttrs {
        BhdDirectoryEntryAttrs::from(self.attrs.get())
    }
    pub fn is_value(&self) -> bool {
        self.size.get() == VALUE_ENTRY_SIZE
    }
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ComboDirectoryHeader {
    pub cookie: LU32, // fourcc "2PSP" or "2BHD"
    pub checksum: LU32,
    pub total_entries: LU32,
    pub lookup_mode: LU32,
    pub _reserved: [LU32; 4],
}

impl Default for ComboDirectoryHeader {
    fn default() -> Self {
        Self {
            cookie: 0.into(),
            checksum: 0.into(),
            total_entries: 0.into(),
            lookup_mode: 0.into(),
            _reserved: [0.into(); 4],
        }
    }
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ComboDirectoryEntry {
    pub id_select: LU32,
    pub id: LU32,
    pub location: LU64,
}

/// Image slot header, as used by programs whose level 2 pointers go through one.
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct IshSlotHeader {
    pub checksum: LU32, // Fletcher-32 of the seven words below
    pub boot_priority: LU32,
    pub update_retries: LU32,
    pub glitch_retries: LU32, // low byte only
    pub location: LU32,
    pub psp_id: LU32,
    pub slot_max_size: LU32,
    pub reserved_1: LU32,
}
