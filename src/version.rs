//! Version strings recovered from the headers of entry payloads.

use byteorder::LittleEndian;
use zerocopy::{FromBytes, Unaligned, U16, U32};

use crate::entry::{DirectoryKind, EntryKind};
use crate::ondisk::{entry_type, header_from_collection};

const DEFAULT_HEADER_SIZE: usize = 0x100;
const VERSION_OFFSET: usize = 0x60;
const ABL_HEADER_SIZE: usize = 0x110;
/// Newer ABL images keep their version in a nested header this word points at.
const ABL_NESTED_HEADER_POINTER: usize = 0x104;

/// Layout of the start of a microcode patch.
#[derive(FromBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct MicrocodePatchHeader {
    pub date_code: U32<LittleEndian>, // 0xMMDDYYYY
    pub patch_id: U32<LittleEndian>,
    _reserved: [u8; 16],
    pub equivalent_processor_revision_id: U16<LittleEndian>,
}

impl MicrocodePatchHeader {
    pub fn from_content(content: &[u8]) -> Option<&Self> {
        header_from_collection(content)
    }

    /// Month/day/year, as stored (BCD digits print as decimal).
    pub fn date(&self) -> String {
        let code = self.date_code.get();
        format!("{:X}/{:X}/{:X}", code >> 24, (code >> 16) & 0xff, code & 0xffff)
    }
}

fn word_at(content: &[u8], offset: usize) -> Option<u32> {
    let bytes = content.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::IntoStaticStr)]
pub enum VersionDecoder {
    /// Four bytes at 0x60, most significant first.
    Generic,
    Smu,
    Abl,
    Kvm,
    Microcode,
    /// Payload has no version; reported as "null".
    None,
}

impl VersionDecoder {
    /// Decoder for an entry of TYPE_ with SIZE bytes of payload, if its layout is known.
    pub fn for_entry(kind: DirectoryKind, type_: u8, entry_kind: EntryKind, size: u64) -> Option<Self> {
        if entry_kind == EntryKind::Value {
            return Option::None;
        }
        match (kind, type_) {
            (DirectoryKind::Psp, 0x08 | 0x12 | 0x2a) => Some(Self::Smu),
            (DirectoryKind::Psp, 0x30..=0x37) => Some(Self::Abl),
            (DirectoryKind::Psp, 0x29) => Some(Self::Kvm),
            (DirectoryKind::Psp, entry_type::PSP_SOFT_FUSE_CHAIN) => Some(Self::None),
            (DirectoryKind::Psp, 0x01..=0x03) => Some(Self::Generic),
            (DirectoryKind::Bhd, entry_type::BHD_MICROCODE_PATCH) => Some(Self::Microcode),
            _ if entry_kind == EntryKind::Image && size > DEFAULT_HEADER_SIZE as u64 => Some(Self::Generic),
            _ => Option::None,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            Self::Generic | Self::Smu | Self::Kvm => DEFAULT_HEADER_SIZE,
            Self::Abl => ABL_HEADER_SIZE,
            Self::Microcode => core::mem::size_of::<MicrocodePatchHeader>(),
            Self::None => 0,
        }
    }

    /// Fails when CONTENT is shorter than the header the version lives in.
    pub fn decode(self, content: &[u8]) -> Option<String> {
        if content.len() < self.header_size() {
            return Option::None;
        }
        match self {
            Self::Generic => {
                let [b0, b1, b2, b3] = word_at(content, VERSION_OFFSET)?.to_le_bytes();
                Some(format!("{:X}.{:X}.{:X}.{:X}", b3, b2, b1, b0))
            }
            Self::Smu => {
                // Older SMU images keep the version in the first word.
                let offset = if word_at(content, VERSION_OFFSET)? & 0x00ff_0000 != 0 { VERSION_OFFSET } else { 0 };
                let version = word_at(content, offset)?;
                let [b0, b1, b2, b3] = version.to_le_bytes();
                if b3 != 0 {
                    Some(format!("{}.{}.{}.{}", b3, b2, b1, b0))
                } else {
                    Some(format!("{}.{}.{}", version >> 16, b1, b0))
                }
            }
            Self::Abl => {
                let version = word_at(content, VERSION_OFFSET)?;
                if version > 0 {
                    return Some(format!("{:08X}", version));
                }
                let nested = word_at(content, ABL_NESTED_HEADER_POINTER)? as usize;
                if nested >= content.len() {
                    return Some("00000000".to_string());
                }
                word_at(content, nested.checked_add(VERSION_OFFSET)?).map(|version| format!("{:08X}", version))
            }
            Self::Kvm => {
                let version = word_at(content, VERSION_OFFSET)?;
                Some(format!("{}.{}.{}", version & 0xff, (version >> 8) & 0xff, version >> 16))
            }
            Self::Microcode => {
                let header = MicrocodePatchHeader::from_content(content)?;
                Some(format!(
                    "Date={}, PatchId={:#X}, EquivProcRevId={:#X}",
                    header.date(),
                    header.patch_id.get(),
                    header.equivalent_processor_revision_id.get()
                ))
            }
            Self::None => Some("null".to_string()),
        }
    }
}

/// Version of an entry payload, or None when nothing is known about its layout.
pub fn describe(kind: DirectoryKind, type_: u8, entry_kind: EntryKind, content: &[u8]) -> Option<String> {
    VersionDecoder::for_entry(kind, type_, entry_kind, content.len() as u64)?.decode(content)
}
