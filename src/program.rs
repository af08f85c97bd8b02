//! Per-processor-program knobs that steer directory discovery.

use crate::types::{Error, Result};

/// How a program's level 2 pointers reach the level 2 directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IshStructure {
    /// Level 2 pointers lead straight to a directory.
    None,
    /// The pointed-to header carries the directory location in its last word.
    Mr,
    /// The pointer leads to a 32 byte image slot header.
    SlotHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramProfile {
    pub name: &'static str,
    /// Applied to both sides when comparing PSP ids.
    pub and_mask: u32,
    pub psp_id: u32,
    /// Word of the embedded firmware structure that holds the BIOS directory pointer.
    pub bios_dir_index: usize,
    /// Expected EFS generation bit for images larger than 16 MiB.
    pub second_gen_efs: u32,
    pub ish_structure: IshStructure,
}

pub const GENOA: ProgramProfile = ProgramProfile {
    name: "Genoa",
    and_mask: 0xffff_ffff,
    psp_id: 0xbc0d_0111,
    bios_dir_index: 0xa,
    second_gen_efs: 0,
    ish_structure: IshStructure::None,
};

pub const PROGRAMS: &[ProgramProfile] = &[GENOA];

impl ProgramProfile {
    /// Looks up a built-in profile, ignoring case.
    pub fn by_name(name: &str) -> Result<&'static ProgramProfile> {
        PROGRAMS
            .iter()
            .find(|program| program.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownProgram { name: name.to_string() })
    }

    pub fn matches(&self, psp_id: u32) -> bool {
        psp_id & self.and_mask == self.psp_id & self.and_mask
    }

    /// Older programs stored the last entry of a physical-address PSP directory as a plain offset.
    pub fn keeps_last_entry_as_offset(&self) -> bool {
        ["ZP", "RV"].iter().any(|name| self.name.eq_ignore_ascii_case(name))
    }
}
