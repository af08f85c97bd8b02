//! Packs directories into their on-disk form and splices them into an image.

use zerocopy::AsBytes;

use crate::adapters::XorBit24FlashAdapter;
use crate::address::{align_up, encode_location, mmio_address, AddressFrame, LocationTarget};
use crate::amdfletcher32::fletcher32;
use crate::directory::{ComboDirectory, Directory, DirectoryConfig, GlobalSettings, IshHeader, LevelType};
use crate::entry::{is_modifiable, DirectoryEntry, DirectoryKind, EntryAttrs, EntryKind, ImageEntry, ImageSource};
use crate::flash::{BinaryImage, FlashWrite, Location};
use crate::ondisk::{
    entry_type, AddressMode, BhdDirectoryEntry, ComboDirectoryEntry, ComboDirectoryHeader, DirectoryAdditionalInfo,
    DirectoryHeader, IshSlotHeader, PspDirectoryEntry, DEFAULT_ALIGNMENT, DEFAULT_SPI_BLOCK_SIZE,
    DIRECTORY_HEADER_RESERVATION, NO_DESTINATION, VALUE_ENTRY_SIZE,
};
use crate::types::{Error, Result};
use crate::version;

/// Image-wide inputs of a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildContext {
    /// Size of the target image; sets the MMIO window of physical addresses.
    pub image_size: u64,
    pub settings: GlobalSettings,
}

impl BuildContext {
    pub fn new(image_size: u64, settings: GlobalSettings) -> Self {
        Self { image_size, settings }
    }

    fn stored_attrs(&self, kind: DirectoryKind, attrs: &EntryAttrs) -> EntryAttrs {
        EntryAttrs {
            writable: attrs.writable || (self.settings.writable && is_modifiable(kind, attrs.type_)),
            ..*attrs
        }
    }
}

fn display_source(source: &ImageSource) -> String {
    source.path().map_or_else(|| "<inline>".to_string(), |path| path.display().to_string())
}

/// Payload length of IMAGE, capped by its declared Size.
fn image_size(image: &ImageEntry) -> Result<u32> {
    let length = image.source.len()?;
    let path = || image.source.path().map(|path| path.to_path_buf()).unwrap_or_default();
    match (length, image.size) {
        (None, None) => Err(Error::EntryFileMissing { path: path() }),
        (Some(length), Some(limit)) if length > u64::from(limit) => {
            Err(Error::EntryTooLarge { path: path(), size: length, limit: limit.into() })
        }
        (_, Some(limit)) => Ok(limit),
        (Some(length), None) => {
            u32::try_from(length).map_err(|_| Error::EntryTooLarge { path: path(), size: length, limit: u32::MAX.into() })
        }
    }
}

/// Assigns addresses to the image entries of a directory that declares both Base and Size.
/// Directories in fixed layout are left alone.
pub fn layout_directory(directory: &mut Directory) -> Result<()> {
    let (base, size) = match (directory.base, directory.size) {
        (Some(base), Some(size)) => (base, size),
        _ => return Ok(()),
    };
    let mut next = if directory.header_base.is_some() {
        align_up(base, DEFAULT_ALIGNMENT)
    } else {
        align_up(base + DIRECTORY_HEADER_RESERVATION, DEFAULT_ALIGNMENT)
    };
    let kind = directory.kind;
    let spi_block_size = directory.spi_block_size.map(|_| directory.effective_spi_block_size());
    for entry in directory.entries.iter_mut() {
        let image = match entry {
            DirectoryEntry::Image(image) => image,
            _ => continue,
        };
        if image.address.is_some() {
            return Err(Error::UnexpectedAddress { type_: image.attrs.type_ });
        }
        let entry_size = image_size(image)?;
        let alignment = match spi_block_size {
            Some(block) if is_modifiable(kind, image.attrs.type_) => u64::from(block),
            _ => DEFAULT_ALIGNMENT,
        };
        next = align_up(next, alignment);
        image.address = Some(next);
        image.size = Some(entry_size);
        next += u64::from(entry_size);
    }
    let used = next - base;
    let available = u64::from(size);
    if used > available {
        return Err(Error::DirectoryFull { base, used, available });
    }
    let percent = if available == 0 { 100.0 } else { used as f64 / available as f64 * 100.0 };
    log::info!(
        "{} FV 0x{:x} bytes used, 0x{:x} bytes free [{:.2}% full]",
        <&'static str>::from(kind),
        used,
        available - used,
        percent
    );
    Ok(())
}

/// The reserved word of the header. Size and SpiBlockSize are recorded only when Size is declared.
/// A fixed layout directory in mode 0 leaves the word at 0; any other mode keeps its mode bits so
/// relative locations stay decodable.
fn additional_info(directory: &Directory) -> Result<u32> {
    if directory.size.is_none() && directory.address_mode == AddressMode::PhysicalMmio {
        return Ok(0);
    }
    let out_of_range = |field, value, limit| Error::FieldOutOfRange {
        tag: directory.tag().to_string(),
        field,
        value,
        limit,
    };
    let mut info = DirectoryAdditionalInfo::new();
    if let Some(size) = directory.size {
        let size_4k = size >> 12;
        if size_4k > 0x3ff {
            return Err(out_of_range("Size", size.into(), 0x3f_f000));
        }
        info.set_max_size_in_4k(size_4k as u16);
        if let Some(block) = directory.spi_block_size {
            let block = if block == 0 { DEFAULT_SPI_BLOCK_SIZE } else { block };
            if block != DEFAULT_SPI_BLOCK_SIZE {
                let block_4k = block >> 12;
                if block_4k > 0xf {
                    return Err(out_of_range("SpiBlockSize", block.into(), DEFAULT_SPI_BLOCK_SIZE.into()));
                }
                info.set_spi_block_size_in_4k(block_4k as u8);
            }
        }
    }
    if let (Some(base), Some(_)) = (directory.base, directory.header_base) {
        let base_4k = base >> 12;
        if base_4k > 0x7fff {
            return Err(out_of_range("Base", base, 0x07ff_f000));
        }
        info.set_base_address_in_4k(base_4k as u16);
    }
    info.set_address_mode(directory.address_mode as u8);
    Ok(u32::from(info))
}

/// One entry reduced to the fields both record layouts share.
struct Record {
    attrs: EntryAttrs,
    size: u32,
    location: u64,
    destination: u64,
}

/// Encodes ADDRESS of an entry of TYPE_ as stored with MODE.
fn entry_location(
    directory: &Directory,
    context: &BuildContext,
    type_: u8,
    address: Location,
    mode: AddressMode,
    target: LocationTarget,
) -> Result<u64> {
    let apob = directory.kind == DirectoryKind::Bhd && type_ == entry_type::BHD_APOB;
    if apob && (mode == AddressMode::PhysicalMmio || (target == LocationTarget::Relative && mode.is_relative())) {
        return Ok(0);
    }
    let mut frame = AddressFrame { image_size: context.image_size, ..Default::default() };
    if target == LocationTarget::Payload {
        match mode {
            AddressMode::DirectoryRelative => {
                frame.header_offset = directory.header_offset().ok_or(Error::BaseRequired {
                    tag: directory.tag().to_string(),
                    attribute: "AddressMode",
                })?;
                if let Some(base) = directory.base {
                    if frame.header_offset > base {
                        return Err(Error::AddressBelowBase { address: base, base: frame.header_offset });
                    }
                }
            }
            AddressMode::SlotRelative => {
                frame.image_base = directory.slot_base().ok_or(Error::ImageBaseRequired { type_ })?;
            }
            _ => {}
        }
    }
    encode_location(address, mode, directory.address_mode, target, &frame)
}

fn record(directory: &Directory, entry: &DirectoryEntry, context: &BuildContext) -> Result<Record> {
    match entry {
        DirectoryEntry::Value(value) => Ok(Record {
            attrs: EntryAttrs::new(value.type_),
            size: VALUE_ENTRY_SIZE,
            location: value.value,
            destination: NO_DESTINATION,
        }),
        DirectoryEntry::Image(image) => {
            let type_ = image.attrs.type_;
            let address = image.address.ok_or(Error::AddressRequired { type_ })?;
            let mode = image.address_mode.unwrap_or(directory.address_mode);
            Ok(Record {
                attrs: context.stored_attrs(directory.kind, &image.attrs),
                size: image_size(image)?,
                location: entry_location(directory, context, type_, address, mode, LocationTarget::Payload)?,
                destination: image.destination.unwrap_or(NO_DESTINATION),
            })
        }
        DirectoryEntry::Point(point) => {
            let type_ = point.attrs.type_;
            let mode = if point.absolute_addr && directory.address_mode == AddressMode::DirectoryRelative {
                AddressMode::PhysicalMmio
            } else {
                point.address_mode.unwrap_or(directory.address_mode)
            };
            Ok(Record {
                attrs: context.stored_attrs(directory.kind, &point.attrs),
                size: point.size,
                location: entry_location(directory, context, type_, point.address, mode, LocationTarget::Relative)?,
                destination: point.destination.unwrap_or(NO_DESTINATION),
            })
        }
    }
}

/// Header and entry table of DIRECTORY, checksummed. Entry payloads are not included.
pub fn serialize_directory(directory: &Directory, context: &BuildContext) -> Result<Vec<u8>> {
    let signature = directory.signature()?;
    directory.check_duplicate_types()?;
    let mut covered = Vec::new();
    covered.extend_from_slice(&(directory.entries.len() as u32).to_le_bytes());
    covered.extend_from_slice(&additional_info(directory)?.to_le_bytes());
    for entry in &directory.entries {
        let record = record(directory, entry, context)?;
        match directory.kind {
            DirectoryKind::Psp => {
                let raw = PspDirectoryEntry {
                    attrs: u32::from(record.attrs.psp_bits()).into(),
                    size: record.size.into(),
                    value_or_location: record.location.into(),
                };
                covered.extend_from_slice(raw.as_bytes());
            }
            DirectoryKind::Bhd => {
                let raw = BhdDirectoryEntry {
                    attrs: u32::from(record.attrs.bhd_bits()).into(),
                    size: record.size.into(),
                    value_or_source_location: record.location.into(),
                    destination_location: record.destination.into(),
                };
                covered.extend_from_slice(raw.as_bytes());
            }
        }
    }
    let header = DirectoryHeader {
        cookie: signature.into(),
        checksum: fletcher32(&covered).into(),
        ..Default::default()
    };
    let mut bytes = header.as_bytes()[..8].to_vec();
    bytes.extend_from_slice(&covered);
    Ok(bytes)
}

pub fn serialize_combo(combo: &ComboDirectory, context: &BuildContext) -> Result<Vec<u8>> {
    combo.validate()?;
    if combo.address_mode == AddressMode::SlotRelative {
        log::warn!("{} at 0x{:x} uses address mode 3, locations are written unchanged", combo.tag(), combo.base);
    }
    let mut entries = Vec::new();
    for entry in &combo.entries {
        let location = match combo.address_mode {
            AddressMode::PhysicalMmio => mmio_address(context.image_size, entry.address)?,
            AddressMode::FlashOffset | AddressMode::SlotRelative => entry.address,
            AddressMode::DirectoryRelative => {
                return Err(Error::UnsupportedAddressMode { mode: 2, context: "combo directories" })
            }
        };
        let raw = ComboDirectoryEntry {
            id_select: entry.id_select.into(),
            id: entry.id.into(),
            location: location.into(),
        };
        entries.extend_from_slice(raw.as_bytes());
    }
    let mut header = ComboDirectoryHeader::default();
    header.cookie.set(combo.signature());
    header.total_entries.set(combo.entries.len() as u32);
    header.lookup_mode.set(combo.lookup_mode);
    let mut covered = header.as_bytes()[8..].to_vec();
    covered.extend_from_slice(&entries);
    header.checksum.set(fletcher32(&covered));
    let mut bytes = header.as_bytes()[..8].to_vec();
    bytes.extend_from_slice(&covered);
    Ok(bytes)
}

pub fn serialize_ish_header(ish: &IshHeader) -> Vec<u8> {
    let mut slot = IshSlotHeader {
        checksum: 0.into(),
        boot_priority: ish.boot_priority.into(),
        update_retries: ish.update_retries.into(),
        glitch_retries: ((ish.glitch_retries & 0xff) | 0xffff_ff00).into(),
        location: ish.location.into(),
        psp_id: ish.psp_id.into(),
        slot_max_size: ish.slot_max_size.into(),
        reserved_1: ish.reserved_1.into(),
    };
    let checksum = fletcher32(&slot.as_bytes()[4..]);
    slot.checksum.set(checksum);
    slot.as_bytes().to_vec()
}

/// A serialized directory header with the place it belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltHeader {
    pub kind: DirectoryKind,
    /// Name used when the header is written out on its own.
    pub file_name: String,
    /// None when the directory declares no Base.
    pub location: Option<Location>,
    pub bytes: Vec<u8>,
}

fn header_file_name(directory: &Directory) -> String {
    match directory.kind {
        DirectoryKind::Psp => format!("PspDirHeaderL{}.bin", directory.level),
        DirectoryKind::Bhd => {
            let suffix = if directory.level_type == Some(LevelType::B) { "B" } else { "" };
            format!("BiosDirHeaderL{}{}.bin", directory.level, suffix)
        }
    }
}

/// Validates CONFIG, lays out its dynamic directories and serializes every PSP, then every BIOS directory.
pub fn build_directories(config: &mut DirectoryConfig, context: &BuildContext) -> Result<Vec<BuiltHeader>> {
    config.validate()?;
    let mut headers = Vec::new();
    for directory in config.psp_directories.iter_mut().chain(config.bhd_directories.iter_mut()) {
        layout_directory(directory)?;
        log::debug!(
            "{} level {} with {} entries",
            directory.tag(),
            directory.level,
            directory.entries.len()
        );
        headers.push(BuiltHeader {
            kind: directory.kind,
            file_name: header_file_name(directory),
            location: directory.header_offset(),
            bytes: serialize_directory(directory, context)?,
        });
    }
    Ok(headers)
}

fn splice<W: FlashWrite>(flash: &mut XorBit24FlashAdapter<W>, location: Location, bytes: &[u8], message: &str) -> Result<()> {
    flash.write_exact(location, bytes)?;
    log::info!(
        "IMAGE: [0x{:08x} ~ 0x{:08x}] <{}>",
        location,
        (location + bytes.len() as u64).saturating_sub(1),
        message
    );
    Ok(())
}

/// Builds CONFIG and splices directory headers, entry payloads, combo tables, common entries and
/// ISH headers into IMAGE, in that order.
pub fn patch_image(image: &mut BinaryImage, config: &mut DirectoryConfig) -> Result<()> {
    let context = BuildContext::new(image.size(), config.settings);
    let headers = build_directories(config, &context)?;
    let combos = config
        .psp_combo
        .iter()
        .chain(config.bhd_combo.iter())
        .map(|combo| Ok((combo.base, serialize_combo(combo, &context)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut flash = XorBit24FlashAdapter::new(image, config.settings.xor_bit24);
    let directories = config.psp_directories.iter().chain(config.bhd_directories.iter());
    for (directory, header) in directories.zip(&headers) {
        let location = header.location.ok_or(Error::BaseRequired {
            tag: directory.tag().to_string(),
            attribute: "Base",
        })?;
        let banner = match directory.kind {
            DirectoryKind::Psp => "---PSPDirectory---",
            DirectoryKind::Bhd => "---BIOSDirectory---",
        };
        splice(&mut flash, location, &header.bytes, banner)?;
        for entry in &directory.entries {
            match entry {
                DirectoryEntry::Image(image) => {
                    let type_ = image.attrs.type_;
                    let address = image.address.ok_or(Error::AddressRequired { type_ })?;
                    let payload = image.source.read()?;
                    let version = version::describe(directory.kind, type_, EntryKind::Image, &payload)
                        .unwrap_or_else(|| "Unknown".to_string());
                    let message = format!("0x{:02X} {} Version: {}", type_, display_source(&image.source), version);
                    splice(&mut flash, address, &payload, &message)?;
                }
                DirectoryEntry::Point(point) => log::info!(
                    "POINT: <0x{:02X} Addr=0x{:X} Size=0x{:X}>",
                    point.attrs.type_,
                    point.address,
                    point.size
                ),
                DirectoryEntry::Value(_) => {}
            }
        }
    }
    for (base, bytes) in &combos {
        splice(&mut flash, *base, bytes, "---COMBODirectory---")?;
    }
    if let Some(common) = &config.common {
        for entry in &common.entries {
            let payload = std::fs::read(&entry.file).map_err(|e| Error::io(&entry.file, e))?;
            if payload.len() as u64 > u64::from(entry.size) {
                return Err(Error::EntryTooLarge {
                    path: entry.file.clone(),
                    size: payload.len() as u64,
                    limit: entry.size.into(),
                });
            }
            splice(&mut flash, entry.address, &payload, &entry.file.display().to_string())?;
        }
    }
    for ish in &config.ish_headers {
        splice(&mut flash, ish.base, &serialize_ish_header(ish), "Ish Header")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{CommonDirectory, CommonEntry, ComboEntry};
    use crate::efs::Efs;
    use crate::entry::{PointEntry, ValueEntry};
    use crate::flash::FlashRead;
    use crate::ondisk::{header_from_collection, Efh};
    use crate::program::GENOA;

    fn image(type_: u8, len: usize) -> DirectoryEntry {
        DirectoryEntry::Image(ImageEntry::new(EntryAttrs::new(type_), ImageSource::Bytes(vec![0x5a; len])))
    }

    fn dynamic(kind: DirectoryKind, base: u64, size: u32, entries: Vec<DirectoryEntry>) -> Directory {
        Directory { base: Some(base), size: Some(size), entries, ..Directory::new(kind, 1) }
    }

    fn addresses(directory: &Directory) -> Vec<Option<u64>> {
        directory
            .entries
            .iter()
            .map(|entry| match entry {
                DirectoryEntry::Image(image) => image.address,
                _ => None,
            })
            .collect()
    }

    fn psp_records(bytes: &[u8]) -> Vec<PspDirectoryEntry> {
        bytes[16..]
            .chunks(16)
            .map(|chunk| *header_from_collection::<PspDirectoryEntry>(chunk).unwrap())
            .collect()
    }

    #[test]
    fn test_minimal_build_overflows() {
        let mut directory = dynamic(DirectoryKind::Psp, 0x12000, 0x1000, vec![image(0x01, 4096)]);
        match layout_directory(&mut directory) {
            Err(Error::DirectoryFull { base, used, available }) => {
                assert_eq!((base, used, available), (0x12000, 0x1400, 0x1000));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(addresses(&directory), vec![Some(0x12400)]);
    }

    #[test]
    fn test_dynamic_layout() {
        let mut directory =
            dynamic(DirectoryKind::Psp, 0x12000, 0x3000, vec![image(0x01, 0x1000), image(0x22, 0x10), image(0x03, 0x80)]);
        directory.spi_block_size = Some(0x1000);
        layout_directory(&mut directory).unwrap();
        assert_eq!(addresses(&directory), vec![Some(0x12400), Some(0x14000), Some(0x14100)]);

        let mut directory = dynamic(DirectoryKind::Bhd, 0x20000, 0x1000, vec![image(0x62, 0x10), image(0x63, 0x10)]);
        directory.header_base = Some(0x1_0000);
        layout_directory(&mut directory).unwrap();
        // No SpiBlockSize: modifiable entries use the default alignment.
        assert_eq!(addresses(&directory), vec![Some(0x20000), Some(0x20100)]);
    }

    #[test]
    fn test_layout_errors() {
        let mut entry = ImageEntry::new(EntryAttrs::new(0x01), ImageSource::Bytes(vec![0; 0x10]));
        entry.address = Some(0x13000);
        let mut directory = dynamic(DirectoryKind::Psp, 0x12000, 0x3000, vec![DirectoryEntry::Image(entry)]);
        assert!(matches!(layout_directory(&mut directory), Err(Error::UnexpectedAddress { type_: 1 })));

        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("missing.bin");
        let mut entry = ImageEntry::new(EntryAttrs::new(0x01), ImageSource::File(missing.clone()));
        let mut directory = dynamic(DirectoryKind::Psp, 0x12000, 0x3000, vec![DirectoryEntry::Image(entry.clone())]);
        assert!(matches!(layout_directory(&mut directory), Err(Error::EntryFileMissing { .. })));
        entry.size = Some(0x200);
        let mut directory = dynamic(DirectoryKind::Psp, 0x12000, 0x3000, vec![DirectoryEntry::Image(entry)]);
        layout_directory(&mut directory).unwrap();

        let large = scratch.path().join("large.bin");
        std::fs::write(&large, vec![0u8; 0x300]).unwrap();
        let mut entry = ImageEntry::new(EntryAttrs::new(0x01), ImageSource::File(large));
        entry.size = Some(0x200);
        let mut directory = dynamic(DirectoryKind::Psp, 0x12000, 0x3000, vec![DirectoryEntry::Image(entry)]);
        assert!(matches!(
            layout_directory(&mut directory),
            Err(Error::EntryTooLarge { size: 0x300, limit: 0x200, .. })
        ));
    }

    #[test]
    fn test_additional_info() {
        let mut directory = dynamic(DirectoryKind::Psp, 0x12000, 0x3000, vec![]);
        assert_eq!(additional_info(&directory).unwrap(), 3);
        directory.spi_block_size = Some(0x1000);
        directory.header_base = Some(0x10_0000);
        directory.address_mode = AddressMode::DirectoryRelative;
        assert_eq!(additional_info(&directory).unwrap(), 3 | (1 << 10) | (0x12 << 14) | (2 << 29));
        directory.spi_block_size = Some(0);
        assert_eq!(additional_info(&directory).unwrap(), 3 | (0x12 << 14) | (2 << 29));
        directory.size = None;
        assert_eq!(additional_info(&directory).unwrap(), (0x12 << 14) | (2 << 29));
        directory.header_base = None;
        directory.address_mode = AddressMode::SlotRelative;
        assert_eq!(additional_info(&directory).unwrap(), 3 << 29);
        directory.address_mode = AddressMode::PhysicalMmio;
        assert_eq!(additional_info(&directory).unwrap(), 0);
    }

    #[test]
    fn test_entry_encoding() {
        let context = BuildContext::new(0x100_0000, GlobalSettings { writable: true, ..Default::default() });
        let mut fixed = ImageEntry::new(EntryAttrs::new(0x22), ImageSource::Bytes(vec![0; 0x40]));
        fixed.address = Some(0x3_1000);
        let mut absolute = PointEntry::new(EntryAttrs::new(0x0c), 0x5_0000, 0x100);
        absolute.absolute_addr = true;
        let directory = Directory {
            base: Some(0x3_0000),
            size: Some(0x1_0000),
            address_mode: AddressMode::DirectoryRelative,
            entries: vec![
                DirectoryEntry::Image(fixed),
                DirectoryEntry::Point(PointEntry::new(EntryAttrs::new(0x0d), 0x100, 0x10)),
                DirectoryEntry::Point(absolute),
                DirectoryEntry::Value(ValueEntry { type_: 0x10, value: 1 }),
            ],
            ..Directory::new(DirectoryKind::Psp, 1)
        };
        let bytes = serialize_directory(&directory, &context).unwrap();
        assert_eq!(&bytes[..4], b"$PSP");
        let records = psp_records(&bytes);
        assert_eq!(records[0].value_or_location.get(), (2 << 62) | 0x1000);
        assert_eq!(records[0].size.get(), 0x40);
        assert!(records[0].attrs().writable());
        assert_eq!(records[1].value_or_location.get(), (2 << 62) | 0x100);
        assert_eq!(records[2].value_or_location.get(), 0xff05_0000);
        assert!(records[3].is_value());
        assert_eq!(records[3].value_or_location.get(), 1);
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(checksum, fletcher32(&bytes[8..]));

        // AbsoluteAddr only switches mode 2 directories to physical addresses.
        let mut slotted = PointEntry::new(EntryAttrs::new(0x0c), 0x2000, 0x100);
        slotted.absolute_addr = true;
        let mut physical = PointEntry::new(EntryAttrs::new(0x0e), 0x5_0000, 0x100);
        physical.absolute_addr = true;
        physical.address_mode = Some(AddressMode::PhysicalMmio);
        let directory = Directory {
            base: Some(0x3_0000),
            image_base: Some(0x3_0000),
            address_mode: AddressMode::SlotRelative,
            entries: vec![DirectoryEntry::Point(slotted), DirectoryEntry::Point(physical)],
            ..Directory::new(DirectoryKind::Psp, 1)
        };
        let records = psp_records(&serialize_directory(&directory, &context).unwrap());
        assert_eq!(records[0].value_or_location.get(), (3 << 62) | 0x2000);
        assert_eq!(records[1].value_or_location.get(), 0xff05_0000);
    }

    #[test]
    fn test_bios_records() {
        let context = BuildContext::new(0x100_0000, GlobalSettings::default());
        let mut reset = ImageEntry::new(EntryAttrs { reset_image: true, ..EntryAttrs::new(0x62) }, ImageSource::Bytes(vec![0; 0x10]));
        reset.address = Some(0x8_0000);
        reset.destination = Some(0x7600_0000);
        let directory = Directory {
            entries: vec![
                DirectoryEntry::Image(reset),
                DirectoryEntry::Point(PointEntry::new(EntryAttrs::new(entry_type::BHD_APOB), 0x1234, 0x1000)),
                DirectoryEntry::Value(ValueEntry { type_: 0x5f, value: 7 }),
            ],
            ..Directory::new(DirectoryKind::Bhd, 1)
        };
        let bytes = serialize_directory(&directory, &context).unwrap();
        assert_eq!(&bytes[..4], b"$BHD");
        let records: Vec<BhdDirectoryEntry> = bytes[16..]
            .chunks(24)
            .map(|chunk| *header_from_collection::<BhdDirectoryEntry>(chunk).unwrap())
            .collect();
        assert_eq!(records[0].value_or_source_location.get(), 0xff08_0000);
        assert_eq!(records[0].destination_location.get(), 0x7600_0000);
        assert!(records[0].attrs().reset_image());
        assert_eq!(records[1].value_or_source_location.get(), 0);
        assert_eq!(records[2].destination_location.get(), NO_DESTINATION);
        assert_eq!(records[2].size.get(), VALUE_ENTRY_SIZE);

        let mut slotted = ImageEntry::new(EntryAttrs::new(0x62), ImageSource::Bytes(vec![0; 0x10]));
        slotted.address = Some(0x9_0000);
        slotted.address_mode = Some(AddressMode::SlotRelative);
        let directory = Directory {
            entries: vec![DirectoryEntry::Image(slotted)],
            ..Directory::new(DirectoryKind::Bhd, 2)
        };
        assert!(matches!(serialize_directory(&directory, &context), Err(Error::ImageBaseRequired { type_: 0x62 })));
    }

    #[test]
    fn test_fixed_layout_needs_addresses() {
        let context = BuildContext::default();
        let directory = Directory { entries: vec![image(0x01, 0x10)], ..Directory::new(DirectoryKind::Psp, 1) };
        assert!(matches!(serialize_directory(&directory, &context), Err(Error::AddressRequired { type_: 1 })));
    }

    #[test]
    fn test_duplicates_rejected() {
        let context = BuildContext::new(0x100_0000, GlobalSettings::default());
        let point = |type_| DirectoryEntry::Point(PointEntry::new(EntryAttrs::new(type_), 0x4_0000, 0x1000));
        let directory = Directory { entries: vec![point(0x30), point(0x30)], ..Directory::new(DirectoryKind::Psp, 1) };
        assert!(matches!(serialize_directory(&directory, &context), Err(Error::Duplicate { type_: 0x30, .. })));
        let directory = Directory { entries: vec![point(0x48), point(0x48)], ..Directory::new(DirectoryKind::Psp, 1) };
        serialize_directory(&directory, &context).unwrap();
    }

    #[test]
    fn test_combo() {
        let context = BuildContext::new(0x100_0000, GlobalSettings::default());
        let mut combo = ComboDirectory {
            kind: DirectoryKind::Psp,
            base: 0x2_1000,
            lookup_mode: 1,
            address_mode: AddressMode::PhysicalMmio,
            entries: vec![ComboEntry { id_select: 0, id: GENOA.psp_id, address: 0x3_0000 }],
        };
        let bytes = serialize_combo(&combo, &context).unwrap();
        assert_eq!(&bytes[..4], b"2PSP");
        assert_eq!(bytes.len(), 32 + 16);
        let entry = header_from_collection::<ComboDirectoryEntry>(&bytes[32..]).unwrap();
        assert_eq!(entry.location.get(), 0xff03_0000);
        assert_eq!(entry.id.get(), GENOA.psp_id);
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(checksum, fletcher32(&bytes[8..]));
        combo.address_mode = AddressMode::DirectoryRelative;
        assert!(matches!(serialize_combo(&combo, &context), Err(Error::UnsupportedAddressMode { mode: 2, .. })));
    }

    #[test]
    fn test_ish_header() {
        let ish = IshHeader {
            base: 0x4_0000,
            boot_priority: 1,
            update_retries: 2,
            glitch_retries: 0x1_0003,
            location: 0x5_0000,
            psp_id: GENOA.psp_id,
            slot_max_size: 0x10_0000,
            reserved_1: 0xffff_ffff,
        };
        let bytes = serialize_ish_header(&ish);
        assert_eq!(bytes.len(), 0x20);
        let slot = header_from_collection::<IshSlotHeader>(&bytes).unwrap();
        assert_eq!(slot.glitch_retries.get(), 0xffff_ff03);
        assert_eq!(slot.checksum.get(), fletcher32(&bytes[4..]));
    }

    fn round_trip(mode: AddressMode) {
        let mut image = BinaryImage::new(vec![0xff; 0x100_0000]);
        let pointer: u32 = if mode == AddressMode::PhysicalMmio { 0xff03_0000 } else { 0x3_0000 };
        let mut efh = Efh::default();
        efh.psp_directory_table_location_zen.set(pointer);
        efh.bios_directory_table_milan.set(0);
        image.write_exact(0x2_0000, efh.as_bytes()).unwrap();

        let mut attrs = EntryAttrs::new(0x03);
        attrs.rom_id = 1;
        attrs.instance = 2;
        attrs.sub_program = 1;
        let mut directory = Directory {
            address_mode: mode,
            entries: vec![image_with(EntryAttrs::new(0x01), 0x100), image_with(attrs, 0x80)],
            ..dynamic(DirectoryKind::Psp, 0x3_0000, 0x1_0000, vec![])
        };
        directory.spi_block_size = Some(0x1000);
        let mut config = DirectoryConfig { psp_directories: vec![directory], ..Default::default() };
        patch_image(&mut image, &mut config).unwrap();

        let efs = Efs::load(&image, image.size());
        let set = efs.directories(&GENOA).unwrap();
        assert_eq!(set.psp_directories.len(), 1);
        let parsed = &set.psp_directories[0];
        assert_eq!(parsed.address_mode, mode);
        let found: Vec<_> =
            parsed.entries.iter().map(|e| (e.attrs.composite_key(), e.address, e.size, e.kind)).collect();
        assert_eq!(
            found,
            vec![
                ((0x01, 0, 0, 0), 0x3_0400, 0x100, EntryKind::Image),
                ((0x03, 1, 2, 1), 0x3_0500, 0x80, EntryKind::Image),
            ]
        );
        let mut payload = [0u8; 4];
        image.read_exact(0x3_0500, &mut payload).unwrap();
        assert_eq!(payload, [0x5a; 4]);
    }

    fn image_with(attrs: EntryAttrs, len: usize) -> DirectoryEntry {
        DirectoryEntry::Image(ImageEntry::new(attrs, ImageSource::Bytes(vec![0x5a; len])))
    }

    #[test]
    fn test_round_trip_all_modes() {
        for mode in [
            AddressMode::PhysicalMmio,
            AddressMode::FlashOffset,
            AddressMode::DirectoryRelative,
            AddressMode::SlotRelative,
        ] {
            round_trip(mode);
        }
    }

    fn fixed_round_trip(mode: AddressMode) {
        let mut image = BinaryImage::new(vec![0xff; 0x100_0000]);
        let pointer: u32 = if mode == AddressMode::PhysicalMmio { 0xff03_0000 } else { 0x3_0000 };
        let mut efh = Efh::default();
        efh.psp_directory_table_location_zen.set(pointer);
        efh.bios_directory_table_milan.set(0);
        image.write_exact(0x2_0000, efh.as_bytes()).unwrap();

        let placed = |attrs: EntryAttrs, address: u64, len: usize| {
            let mut entry = ImageEntry::new(attrs, ImageSource::Bytes(vec![0x5a; len]));
            entry.address = Some(address);
            DirectoryEntry::Image(entry)
        };
        let mut attrs = EntryAttrs::new(0x03);
        attrs.rom_id = 1;
        attrs.instance = 2;
        let directory = Directory {
            base: Some(0x3_0000),
            image_base: Some(0x3_0000),
            address_mode: mode,
            entries: vec![placed(EntryAttrs::new(0x01), 0x3_1000, 0x100), placed(attrs, 0x3_2000, 0x80)],
            ..Directory::new(DirectoryKind::Psp, 1)
        };
        let mut config = DirectoryConfig { psp_directories: vec![directory], ..Default::default() };
        patch_image(&mut image, &mut config).unwrap();

        let set = Efs::load(&image, image.size()).directories(&GENOA).unwrap();
        assert_eq!(set.psp_directories.len(), 1);
        let parsed = &set.psp_directories[0];
        assert_eq!(parsed.address_mode, mode);
        assert_eq!(parsed.size, 0);
        let found: Vec<_> = parsed.entries.iter().map(|e| (e.attrs.composite_key(), e.address, e.size)).collect();
        assert_eq!(found, vec![((0x01, 0, 0, 0), 0x3_1000, 0x100), ((0x03, 1, 2, 0), 0x3_2000, 0x80)]);
    }

    #[test]
    fn test_fixed_layout_round_trip_all_modes() {
        for mode in [
            AddressMode::PhysicalMmio,
            AddressMode::FlashOffset,
            AddressMode::DirectoryRelative,
            AddressMode::SlotRelative,
        ] {
            fixed_round_trip(mode);
        }
    }

    #[test]
    fn test_patch_bounds_and_common() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("common.bin");
        std::fs::write(&file, [1u8, 2, 3, 4]).unwrap();
        let mut image = BinaryImage::new(vec![0; 0x1000]);
        let mut config = DirectoryConfig {
            common: Some(CommonDirectory {
                entries: vec![CommonEntry { file: file.clone(), address: 0x800, size: 4, rom_id: 0 }],
            }),
            ..Default::default()
        };
        patch_image(&mut image, &mut config).unwrap();
        assert_eq!(&image.as_bytes()[0x800..0x804], &[1, 2, 3, 4]);

        config.common = Some(CommonDirectory {
            entries: vec![CommonEntry { file: file.clone(), address: 0x800, size: 2, rom_id: 0 }],
        });
        assert!(matches!(patch_image(&mut image, &mut config), Err(Error::EntryTooLarge { .. })));

        config.common = Some(CommonDirectory {
            entries: vec![CommonEntry { file, address: 0xffe, size: 4, rom_id: 0 }],
        });
        assert!(matches!(patch_image(&mut image, &mut config), Err(Error::PatchOutOfRange { .. })));
    }
}
