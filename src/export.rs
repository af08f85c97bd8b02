//! Views of a parsed image: the round-trip configuration, the descriptive info
//! document, the version report and the extracted entry payloads.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::adapters::XorBit24FlashAdapter;
use crate::config::{hex, ish_element, settings_element, write_config, XmlElement};
use crate::directory::{Directory, DirectoryConfig};
use crate::efs::{ParsedDirectory, ParsedDirectorySet, ParsedEntry};
use crate::entry::{
    entry_type_info, DirectoryEntry, DirectoryKind, EntryKind, ImageEntry, ImageSource, PointEntry, ValueEntry,
};
use crate::flash::{FlashRead, Location};
use crate::ondisk::{entry_type, AddressMode, DEFAULT_SPI_BLOCK_SIZE, NO_DESTINATION};
use crate::types::{Error, Result};
use crate::version::{MicrocodePatchHeader, VersionDecoder};

pub const DIRECTORY_XML: &str = "PspDirectory.xml";
pub const INFO_XML: &str = "PspDirInfo.xml";
pub const VERSION_REPORT: &str = "PspVersion.txt";

/// A compressed reset image records its compressed length here, excluding the header.
const COMPRESSED_SIZE_OFFSET: u64 = 0x14;
const COMPRESSED_HEADER_SIZE: u64 = 0x100;

const SOFT_FUSE_CHAIN_HELP: &str = "BIT0:PSP Secure Debug Control Flag (0-Disabled, 1-Enabled); \
BIT4:Enable applying of Security Policy to unsecure ASIC; \
BIT28:MP0 DPM Enable; \
BIT29:Skip MP2 FW loading. 0: Load MP2 FW normally 1: Skip MP2 FW Loading";

/// Reads entry payloads out of an in-memory image, cutting reads short at its end.
struct PayloadReader<'a> {
    storage: XorBit24FlashAdapter<&'a [u8]>,
    image_len: u64,
}

impl<'a> PayloadReader<'a> {
    fn new(image: &'a [u8], set: &ParsedDirectorySet) -> Self {
        Self { storage: XorBit24FlashAdapter::new(image, set.settings.xor_bit24), image_len: image.len() as u64 }
    }

    fn read(&self, address: Location, len: u64) -> Result<Vec<u8>> {
        let available = self.image_len.saturating_sub(self.storage.translate(address));
        let len = len.min(available);
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; len as usize];
        self.storage.read_exact(address, &mut buffer)?;
        Ok(buffer)
    }

    fn word(&self, address: Location) -> Result<Option<u32>> {
        let bytes = self.read(address, 4)?;
        Ok(<[u8; 4]>::try_from(bytes.as_slice()).ok().map(u32::from_le_bytes))
    }

    fn version(&self, kind: DirectoryKind, entry: &ParsedEntry) -> Result<Option<String>> {
        let size = u64::from(entry.size);
        let Some(decoder) = VersionDecoder::for_entry(kind, entry.attrs.type_, entry.kind, size) else {
            return Ok(None);
        };
        // ABL versions may live in a nested header anywhere in the payload.
        let len = match decoder {
            VersionDecoder::Abl => size,
            decoder => (decoder.header_size() as u64).min(size),
        };
        Ok(decoder.decode(&self.read(entry.address, len)?))
    }
}

fn header_bases(directory: &ParsedDirectory) -> (u64, Option<u64>) {
    if directory.base != 0 {
        (directory.base, Some(directory.offset))
    } else {
        (directory.offset, None)
    }
}

fn nonzero<N: Default + PartialEq>(value: N) -> Option<N> {
    (value != N::default()).then_some(value)
}

fn destination(entry: &ParsedEntry) -> Option<u64> {
    entry.destination.filter(|&destination| destination != NO_DESTINATION)
}

/// Address and entry mode a point entry is declared with, relative to what its mode measures from.
fn point_address(directory: &ParsedDirectory, entry: &ParsedEntry) -> (u64, Option<AddressMode>) {
    if entry.absolute && directory.address_mode == AddressMode::SlotRelative {
        // AbsoluteAddr alone keeps a mode 3 directory's own encoding.
        return (entry.address, Some(AddressMode::PhysicalMmio));
    }
    if entry.absolute || !directory.address_mode.is_relative() {
        return (entry.address, None);
    }
    match entry.address_mode {
        Some(AddressMode::SlotRelative) => {
            (entry.address.saturating_sub(directory.image_base), Some(AddressMode::SlotRelative))
        }
        Some(AddressMode::DirectoryRelative) | None => (entry.address.saturating_sub(directory.offset), None),
        Some(mode) => (entry.address, Some(mode)),
    }
}

fn config_entry(directory: &ParsedDirectory, entry: &ParsedEntry, output_dir: &Path) -> DirectoryEntry {
    let mut attrs = entry.attrs;
    attrs.writable = false;
    match entry.kind {
        EntryKind::Value => DirectoryEntry::Value(ValueEntry { type_: attrs.type_, value: entry.value }),
        EntryKind::Image => {
            let file = output_dir.join(entry.file.as_deref().unwrap_or_default());
            let mut image = ImageEntry::new(attrs, ImageSource::File(file));
            if directory.size == 0 {
                image.address = Some(entry.address);
                image.size = Some(entry.size);
                image.address_mode = entry.address_mode.filter(|&mode| mode != directory.address_mode);
            }
            image.destination = destination(entry);
            DirectoryEntry::Image(image)
        }
        EntryKind::Point => {
            let (address, address_mode) = point_address(directory, entry);
            let mut point = PointEntry::new(attrs, address, entry.size);
            point.absolute_addr = entry.absolute;
            point.address_mode = address_mode;
            point.destination = destination(entry);
            DirectoryEntry::Point(point)
        }
    }
}

fn config_directory(directory: &ParsedDirectory, output_dir: &Path) -> Directory {
    let (base, header_base) = header_bases(directory);
    Directory {
        level_type: directory.level_type,
        level_index: directory.level_index,
        base: Some(base),
        header_base,
        size: nonzero(directory.size),
        spi_block_size: nonzero(directory.size)
            .and(Some(directory.spi_block_size))
            .filter(|&size| size != DEFAULT_SPI_BLOCK_SIZE),
        image_base: match directory.kind {
            DirectoryKind::Bhd => nonzero(directory.image_base),
            DirectoryKind::Psp => None,
        },
        address_mode: directory.address_mode,
        entries: directory.entries.iter().map(|entry| config_entry(directory, entry, output_dir)).collect(),
        ..Directory::new(directory.kind, directory.level)
    }
}

/// The configuration that rebuilds SET, with image payloads taken from OUTPUT_DIR.
pub fn to_config(set: &ParsedDirectorySet, output_dir: &Path) -> DirectoryConfig {
    DirectoryConfig {
        settings: set.settings,
        psp_directories: set.psp_directories.iter().map(|d| config_directory(d, output_dir)).collect(),
        bhd_directories: set.bhd_directories.iter().map(|d| config_directory(d, output_dir)).collect(),
        ish_headers: set.ish_headers.clone(),
        ..Default::default()
    }
}

pub fn directory_xml(set: &ParsedDirectorySet, output_dir: &Path) -> Result<String> {
    write_config(&to_config(set, output_dir))
}

fn microcode_detail(content: &[u8]) -> Option<XmlElement> {
    let header = MicrocodePatchHeader::from_content(content)?;
    let date = header.date_code.get();
    Some(
        XmlElement::new("Detail")
            .with("DateCode", format!("{:x}/{:x}/{:x}", date >> 24, (date >> 16) & 0xff, date & 0xffff))
            .with("PatchId", format!("{:x}", header.patch_id.get()))
            .with("EquivalentProcessorRevisionID", format!("{:x}", header.equivalent_processor_revision_id.get())),
    )
}

fn detail(reader: &PayloadReader, kind: DirectoryKind, entry: &ParsedEntry) -> Result<Option<XmlElement>> {
    match (kind, entry.attrs.type_) {
        (DirectoryKind::Psp, entry_type::PSP_SOFT_FUSE_CHAIN) => {
            Ok(Some(XmlElement::new("Detail").with("Help", SOFT_FUSE_CHAIN_HELP)))
        }
        (DirectoryKind::Bhd, entry_type::BHD_MICROCODE_PATCH) if entry.kind != EntryKind::Value => {
            let content = reader.read(entry.address, core::mem::size_of::<MicrocodePatchHeader>() as u64)?;
            Ok(microcode_detail(&content))
        }
        (DirectoryKind::Bhd, _) => Ok(None),
        (DirectoryKind::Psp, _) => {
            Ok(reader.version(kind, entry)?.map(|version| XmlElement::new("Detail").with("Version", version)))
        }
    }
}

fn info_entry(reader: &PayloadReader, directory: &ParsedDirectory, entry: &ParsedEntry) -> Result<XmlElement> {
    let kind = directory.kind;
    let attrs = &entry.attrs;
    let mut element = XmlElement::new(<&'static str>::from(entry.kind))
        .with("Type", hex(attrs.type_))
        .with("Description", entry.description(kind));
    if entry.kind == EntryKind::Value {
        element.push("Value", hex(entry.value));
        element.children.extend(detail(reader, kind, entry)?);
        return Ok(element);
    }
    element.push("Size", hex(entry.size));
    element.push("RTOffset", hex(entry.location));
    element.push("Address", hex(entry.address));
    element.push("RomId", hex(attrs.rom_id));
    element.push("Instance", hex(attrs.instance));
    element.push("SubProgram", hex(attrs.sub_program));
    element.push("AbsoluteAddr", hex(u8::from(entry.absolute)));
    element.push_opt("AddressMode", entry.address_mode.map(|mode| hex(mode as u8)));
    element.push_opt("File", entry.file.clone());
    if kind == DirectoryKind::Bhd {
        element.push("RegionType", hex(attrs.region_type));
        for (key, flag) in [
            ("ResetImage", attrs.reset_image),
            ("Copy", attrs.copy),
            ("ReadOnly", attrs.read_only),
            ("Compressed", attrs.compressed),
        ] {
            element.push(key, hex(u8::from(flag)));
        }
        element.push_opt("Destination", destination(entry).map(hex));
    }
    element.children.extend(detail(reader, kind, entry)?);
    Ok(element)
}

fn info_directory(reader: &PayloadReader, directory: &ParsedDirectory) -> Result<XmlElement> {
    let name = match directory.kind {
        DirectoryKind::Psp => "PspDirectory",
        DirectoryKind::Bhd => "BiosDirectory",
    };
    let (base, header_base) = header_bases(directory);
    let mut element = XmlElement::new(name);
    element.push_opt("HeaderBase", header_base.map(hex));
    element.push("Base", hex(base));
    element.push_opt("Size", nonzero(directory.size).map(hex));
    element.push("SpiBlockSize", hex(directory.spi_block_size));
    element.push_opt("LevelType", directory.level_type.map(|level_type| level_type.to_string()));
    element.push_opt("ImageBase", nonzero(directory.image_base).map(hex));
    element.push("Level", hex(directory.level));
    element.push("AddressMode", hex(directory.address_mode as u8));
    element.children = directory
        .entries
        .iter()
        .map(|entry| info_entry(reader, directory, entry))
        .collect::<Result<_>>()?;
    Ok(element)
}

/// Describes every directory and entry of SET, with the versions decoded from IMAGE.
pub fn info_xml(image: &[u8], set: &ParsedDirectorySet) -> Result<String> {
    let reader = PayloadReader::new(image, set);
    let mut root = settings_element("Dirs", &set.settings);
    for directory in set.psp_directories.iter().chain(set.bhd_directories.iter()) {
        root.children.push(info_directory(&reader, directory)?);
    }
    root.children.extend(set.ish_headers.iter().map(ish_element));
    root.to_xml()
}

/// Plain text table of the versions of every entry, one block per directory.
pub fn version_report(image: &[u8], set: &ParsedDirectorySet) -> Result<String> {
    let reader = PayloadReader::new(image, set);
    let mut report = String::new();
    for directory in set.psp_directories.iter().chain(set.bhd_directories.iter()) {
        let kind = directory.kind;
        match kind {
            DirectoryKind::Psp => {
                let _ = writeln!(report, "PSP Directory Level {}:", directory.level);
                report.push_str("RomId SubProgram Type  ShortName            Version\n");
            }
            DirectoryKind::Bhd => {
                let _ = writeln!(report, "BIOS Directory Level {}:", directory.level);
                report.push_str("RomId SubProgram Instance Type  ShortName            Version\n");
            }
        }
        for entry in &directory.entries {
            let attrs = &entry.attrs;
            let short_name = entry_type_info(kind, attrs.type_).map_or("", |info| info.short_name);
            let version = reader.version(kind, entry)?.unwrap_or_else(|| "null".to_string());
            let _ = match kind {
                DirectoryKind::Psp => writeln!(
                    report,
                    "0x{:02X}  0x{:02X}       0x{:02X}  {:<20} {}",
                    attrs.rom_id, attrs.sub_program, attrs.type_, short_name, version
                ),
                DirectoryKind::Bhd => writeln!(
                    report,
                    "0x{:02X}  0x{:02X}       0x{:02X}     0x{:02X}  {:<20} {}",
                    attrs.rom_id, attrs.sub_program, attrs.instance, attrs.type_, short_name, version
                ),
            };
        }
        report.push_str("\n\n");
    }
    Ok(report)
}

/// Writes the payload of every image and point entry into OUTPUT_DIR. Returns the files written.
pub fn extract_binaries(image: &[u8], set: &ParsedDirectorySet, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let reader = PayloadReader::new(image, set);
    let mut written = Vec::new();
    for directory in set.psp_directories.iter().chain(set.bhd_directories.iter()) {
        for entry in &directory.entries {
            let Some(file) = &entry.file else {
                continue;
            };
            let attrs = &entry.attrs;
            let mut len = u64::from(entry.size);
            if directory.kind == DirectoryKind::Bhd
                && attrs.type_ == entry_type::BHD_RESET_IMAGE
                && attrs.reset_image
                && attrs.compressed
            {
                if let Some(compressed) = reader.word(entry.address + COMPRESSED_SIZE_OFFSET)? {
                    len = u64::from(compressed) + COMPRESSED_HEADER_SIZE;
                }
            }
            log::info!(
                "Output {} of BIOS [{:x}:{:x}]",
                file,
                entry.address,
                (entry.address + len).saturating_sub(1)
            );
            let path = output_dir.join(file);
            std::fs::write(&path, reader.read(entry.address, len)?).map_err(|e| Error::io(&path, e))?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::efs::Efs;
    use crate::entry::EntryAttrs;
    use crate::flash::{BinaryImage, FlashWrite};
    use crate::ondisk::Efh;
    use crate::program::GENOA;
    use crate::writer::patch_image;
    use zerocopy::AsBytes;

    const IMAGE_SIZE: usize = 0x100_0000;

    fn bytes(len: usize, fill: u8) -> ImageSource {
        ImageSource::Bytes(vec![fill; len])
    }

    /// A mode 2 PSP directory at 0x30000 pointing at a BIOS directory at 0x60000.
    fn build_image() -> BinaryImage {
        let mut image = BinaryImage::new(vec![0xff; IMAGE_SIZE]);
        let mut efh = Efh::default();
        efh.psp_directory_table_location_zen.set(0x3_0000);
        efh.bios_directory_table_milan.set(0x6_0000);
        image.write_exact(0x2_0000, efh.as_bytes()).unwrap();

        let mut boot_loader = vec![0u8; 0x200];
        boot_loader[0x60..0x64].copy_from_slice(&0x0011_2233u32.to_le_bytes());
        let mut sev = EntryAttrs::new(0x39);
        sev.instance = 1;
        let mut sev_point = PointEntry::new(sev, 0x2_0000, 0x1000);
        sev_point.address_mode = None;
        let psp = Directory {
            base: Some(0x3_0000),
            size: Some(0x1_0000),
            address_mode: AddressMode::DirectoryRelative,
            entries: vec![
                DirectoryEntry::Image(ImageEntry::new(EntryAttrs::new(0x01), ImageSource::Bytes(boot_loader))),
                DirectoryEntry::Value(ValueEntry { type_: 0x0b, value: 0x1 }),
                DirectoryEntry::Point(sev_point),
            ],
            ..Directory::new(DirectoryKind::Psp, 1)
        };

        let mut microcode = vec![0u8; 0x40];
        microcode[0..4].copy_from_slice(&0x0415_2023u32.to_le_bytes());
        microcode[4..8].copy_from_slice(&0x0a10_1144u32.to_le_bytes());
        let mut reset_attrs = EntryAttrs::new(entry_type::BHD_RESET_IMAGE);
        reset_attrs.reset_image = true;
        reset_attrs.copy = true;
        let mut reset = ImageEntry::new(reset_attrs, bytes(0x80, 0x11));
        reset.destination = Some(0x7600_0000);
        let bios = Directory {
            base: Some(0x6_0000),
            size: Some(0x1_0000),
            address_mode: AddressMode::FlashOffset,
            entries: vec![
                DirectoryEntry::Image(ImageEntry::new(EntryAttrs::new(0x66), ImageSource::Bytes(microcode))),
                DirectoryEntry::Image(reset),
            ],
            ..Directory::new(DirectoryKind::Bhd, 1)
        };
        let mut config = DirectoryConfig {
            psp_directories: vec![psp],
            bhd_directories: vec![bios],
            ..Default::default()
        };
        patch_image(&mut image, &mut config).unwrap();
        image
    }

    fn parse(image: &BinaryImage) -> ParsedDirectorySet {
        Efs::load(image, image.size()).directories(&GENOA).unwrap()
    }

    #[test]
    fn test_to_config() {
        let image = build_image();
        let set = parse(&image);
        let config = to_config(&set, Path::new("Output"));

        let psp = &config.psp_directories[0];
        assert_eq!((psp.base, psp.header_base, psp.size), (Some(0x3_0000), None, Some(0x1_0000)));
        assert_eq!(psp.spi_block_size, None);
        match &psp.entries[0] {
            DirectoryEntry::Image(image) => {
                assert_eq!(image.address, None);
                assert_eq!(
                    image.source,
                    ImageSource::File(Path::new("Output").join("PspDirL10_Typex1_0_0_0_PspBootLoader.bin"))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(psp.entries[1], DirectoryEntry::Value(ValueEntry { type_: 0x0b, value: 0x1 }));
        match &psp.entries[2] {
            DirectoryEntry::Point(point) => {
                assert_eq!((point.address, point.size, point.address_mode), (0x2_0000, 0x1000, None));
                assert_eq!(point.attrs.instance, 1);
                assert!(!point.absolute_addr);
            }
            other => panic!("unexpected {:?}", other),
        }

        let bios = &config.bhd_directories[0];
        assert_eq!(bios.address_mode, AddressMode::FlashOffset);
        match &bios.entries[1] {
            DirectoryEntry::Image(image) => {
                assert_eq!(image.destination, Some(0x7600_0000));
                assert!(image.attrs.reset_image && image.attrs.copy);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fixed_layout_export() {
        let image = build_image();
        let mut set = parse(&image);
        set.psp_directories[0].size = 0;
        let config = to_config(&set, Path::new("out"));
        let psp = &config.psp_directories[0];
        assert_eq!(psp.size, None);
        match &psp.entries[0] {
            DirectoryEntry::Image(image) => {
                assert_eq!((image.address, image.size), (Some(0x3_0400), Some(0x200)));
                assert_eq!(image.address_mode, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_point_addresses() {
        let image = build_image();
        let set = parse(&image);
        let mut directory = set.psp_directories[0].clone();
        let mut entry = directory.entries[2].clone();
        assert_eq!(entry.address, 0x5_0000);

        entry.address_mode = Some(AddressMode::SlotRelative);
        directory.image_base = 0x4_0000;
        assert_eq!(point_address(&directory, &entry), (0x1_0000, Some(AddressMode::SlotRelative)));
        entry.address_mode = Some(AddressMode::FlashOffset);
        assert_eq!(point_address(&directory, &entry), (0x5_0000, Some(AddressMode::FlashOffset)));
        entry.absolute = true;
        assert_eq!(point_address(&directory, &entry), (0x5_0000, None));
        directory.address_mode = AddressMode::SlotRelative;
        assert_eq!(point_address(&directory, &entry), (0x5_0000, Some(AddressMode::PhysicalMmio)));
        directory.address_mode = AddressMode::PhysicalMmio;
        entry.absolute = false;
        assert_eq!(point_address(&directory, &entry), (0x5_0000, None));
    }

    #[test]
    fn test_reports() {
        let image = build_image();
        let set = parse(&image);

        let report = version_report(image.as_bytes(), &set).unwrap();
        assert!(report.starts_with("PSP Directory Level 1:\nRomId SubProgram Type  ShortName            Version\n"));
        assert!(report.contains("0x00  0x00       0x01  PspBootLoader        0.11.22.33\n"));
        assert!(report.contains("0x00  0x00       0x0B                       null\n"));
        assert!(report.contains("BIOS Directory Level 1:\n"));
        assert!(report.contains(
            "0x00  0x00       0x00     0x66  UCodePatch           Date=4/15/2023, PatchId=0xA101144, EquivProcRevId=0x0\n"
        ));

        let info = XmlElement::parse(&info_xml(image.as_bytes(), &set).unwrap()).unwrap();
        assert_eq!(info.name, "Dirs");
        assert_eq!(info.get("AddressMode"), None);
        let psp = &info.children[0];
        assert_eq!(psp.name, "PspDirectory");
        assert_eq!(psp.get("AddressMode"), Some("0x2"));
        let boot_loader = &psp.children[0];
        assert_eq!(boot_loader.name, "IMAGE_ENTRY");
        assert_eq!(boot_loader.get("Address"), Some("0x30400"));
        assert_eq!(boot_loader.children[0].get("Version"), Some("0.11.22.33"));
        assert_eq!(psp.children[1].name, "VALUE_ENTRY");
        assert!(psp.children[1].children[0].get("Help").unwrap().starts_with("BIT0:"));
        assert_eq!(psp.children[2].name, "POINT_ENTRY");
        let microcode = &info.children[1].children[0];
        assert_eq!(microcode.children[0].get("DateCode"), Some("4/15/2023"));
        assert_eq!(microcode.children[0].get("PatchId"), Some("a101144"));
        let reset = &info.children[1].children[1];
        assert_eq!(reset.get("ResetImage"), Some("0x1"));
        assert_eq!(reset.get("Destination"), Some("0x76000000"));
    }

    #[test]
    fn test_extract_and_rebuild() {
        let image = build_image();
        let set = parse(&image);
        let scratch = tempfile::tempdir().unwrap();
        let written = extract_binaries(image.as_bytes(), &set, scratch.path()).unwrap();
        assert_eq!(written.len(), 4);
        let reset = std::fs::read(scratch.path().join("ResetImage.bin")).unwrap();
        assert_eq!(reset, vec![0x11; 0x80]);
        let point = std::fs::read(scratch.path().join("PspDirL10_Typex39_0_1_0_SevCode.bin")).unwrap();
        assert_eq!(point.len(), 0x1000);

        let text = directory_xml(&set, scratch.path()).unwrap();
        let mut config = parse_config(&text).unwrap();
        let mut rebuilt = BinaryImage::new(vec![0xff; IMAGE_SIZE]);
        let efh_range = 0x2_0000..0x2_0000 + core::mem::size_of::<Efh>();
        rebuilt.write_exact(0x2_0000, &image.as_bytes()[efh_range]).unwrap();
        patch_image(&mut rebuilt, &mut config).unwrap();
        let reparsed = parse(&rebuilt);

        let summary = |set: &ParsedDirectorySet| -> Vec<_> {
            set.psp_directories
                .iter()
                .chain(set.bhd_directories.iter())
                .flat_map(|directory| directory.entries.iter())
                .map(|entry| (entry.kind, entry.attrs, entry.address, entry.size, entry.destination))
                .collect()
        };
        assert_eq!(summary(&reparsed), summary(&set));
        assert_eq!(&rebuilt.as_bytes()[0x3_0400..0x3_0600], &image.as_bytes()[0x3_0400..0x3_0600]);
    }

    #[test]
    fn test_compressed_reset_image_length() {
        let mut image = build_image();
        let mut set = parse(&image);
        let reset = set.bhd_directories[0].entries[1].clone();
        set.bhd_directories[0].entries[1].attrs.compressed = true;
        image.write_exact(reset.address + COMPRESSED_SIZE_OFFSET, &0x10u32.to_le_bytes()).unwrap();
        let scratch = tempfile::tempdir().unwrap();
        extract_binaries(image.as_bytes(), &set, scratch.path()).unwrap();
        let written = std::fs::read(scratch.path().join("ResetImage.bin")).unwrap();
        assert_eq!(written.len(), 0x110);
    }
}
