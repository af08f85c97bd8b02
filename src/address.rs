//! Translation between flash offsets and the location words stored in directory entries.

use crate::flash::Location;
use crate::ondisk::AddressMode;
use crate::types::{Error, Result};

/// The MMIO window maps at most the top 16 MiB of the 4 GiB space.
pub const MMIO_WINDOW_SIZE: u64 = 0x100_0000;

const LOW32: u64 = 0xffff_ffff;
const TAG_SHIFT: u32 = 62;
const PHYSICAL_HIGH_NIBBLE: u64 = 0xf000_0000;

/// Rounds VALUE up to the next multiple of ALIGNMENT. An ALIGNMENT of 0 leaves VALUE alone.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value + (alignment - value % alignment) % alignment
}

/// Whether LOCATION looks like a physical MMIO address rather than a flash offset.
pub fn is_physical(location: u64) -> bool {
    location & PHYSICAL_HIGH_NIBBLE != 0
}

/// Maps PHYSICAL (an address in the top MMIO window) to an offset in an image of IMAGE_SIZE bytes.
/// For raw eMMC/UFS images (IMAGE_SIZE == 0) the address already is the offset.
pub fn offset_in_image(image_size: u64, physical: u64, xor_bit24: bool) -> Result<Location> {
    if xor_bit24 && is_physical(physical) {
        return Err(Error::XorBit24PhysicalAddress { address: physical });
    }
    if image_size == 0 {
        return Ok(physical);
    }
    let window = image_size.min(MMIO_WINDOW_SIZE);
    (physical + window)
        .checked_sub(1 << 32)
        .ok_or(Error::AddressOutsideImage { address: physical, image_size })
}

/// Inverse of offset_in_image for offsets inside the MMIO window.
pub fn mmio_address(image_size: u64, offset: Location) -> Result<u64> {
    if offset > MMIO_WINDOW_SIZE {
        return Err(Error::MmioOutOfRange { offset });
    }
    let window = image_size.min(MMIO_WINDOW_SIZE);
    Ok(LOW32 - window + offset + 1)
}

/// The reference points relative locations are measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressFrame {
    /// 0 for raw images without an MMIO window.
    pub image_size: u64,
    pub xor_bit24: bool,
    /// Start of the directory header (mode 2).
    pub header_offset: u64,
    /// Start of the image slot (mode 3).
    pub image_base: u64,
}

/// A location word resolved back to a flash offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedLocation {
    pub offset: Location,
    /// The mode the word was encoded with.
    pub mode: AddressMode,
    /// Set for untagged physical addresses inside a relative directory.
    pub absolute: bool,
}

fn tag(mode: AddressMode) -> u64 {
    (mode as u64) << TAG_SHIFT
}

/// Turns the location word of an entry in a directory using DIRECTORY_MODE back into an offset.
/// Mode 0 and 1 directories never tag their words; mode 2 and 3 directories always do.
pub fn decode_location(
    location: u64,
    directory_mode: AddressMode,
    frame: &AddressFrame,
) -> Result<DecodedLocation> {
    let low = location & LOW32;
    let decoded = |offset, mode| DecodedLocation { offset, mode, absolute: false };
    Ok(match directory_mode {
        AddressMode::PhysicalMmio => decoded(
            offset_in_image(frame.image_size, low, frame.xor_bit24)?,
            AddressMode::PhysicalMmio,
        ),
        AddressMode::FlashOffset => decoded(low, AddressMode::FlashOffset),
        AddressMode::DirectoryRelative | AddressMode::SlotRelative => {
            match location >> TAG_SHIFT {
                3 => decoded(frame.image_base + low, AddressMode::SlotRelative),
                2 => decoded(frame.header_offset + low, AddressMode::DirectoryRelative),
                1 => decoded(low, AddressMode::FlashOffset),
                _ => DecodedLocation {
                    offset: offset_in_image(frame.image_size, location, frame.xor_bit24)?,
                    mode: AddressMode::PhysicalMmio,
                    absolute: true,
                },
            }
        }
    })
}

/// What a location word refers to, which decides the base of a relative encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationTarget {
    /// ADDRESS is an absolute flash offset of entry payload.
    Payload,
    /// ADDRESS is already relative to the base selected by the entry mode.
    Relative,
}

/// Encodes ADDRESS for an entry using ENTRY_MODE inside a directory using DIRECTORY_MODE.
pub fn encode_location(
    address: Location,
    entry_mode: AddressMode,
    directory_mode: AddressMode,
    target: LocationTarget,
    frame: &AddressFrame,
) -> Result<u64> {
    let relative_to = |base: u64| -> Result<u64> {
        match target {
            LocationTarget::Relative => Ok(address),
            LocationTarget::Payload => {
                address.checked_sub(base).ok_or(Error::AddressBelowBase { address, base })
            }
        }
    };
    Ok(match entry_mode {
        AddressMode::PhysicalMmio => mmio_address(frame.image_size, address)?,
        AddressMode::FlashOffset => {
            if directory_mode.is_relative() {
                address | tag(AddressMode::FlashOffset)
            } else {
                address
            }
        }
        AddressMode::DirectoryRelative => {
            relative_to(frame.header_offset)? | tag(AddressMode::DirectoryRelative)
        }
        AddressMode::SlotRelative => relative_to(frame.image_base)? | tag(AddressMode::SlotRelative),
    })
}
