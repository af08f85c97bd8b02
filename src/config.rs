//! The declarative directory configuration, stored as XML with a `DIRS` root.

use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::directory::{
    ComboDirectory, ComboEntry, CommonDirectory, CommonEntry, Directory, DirectoryConfig, GlobalSettings, IshHeader,
    LevelType,
};
use crate::entry::{
    split_legacy_type, DirectoryEntry, DirectoryKind, EntryAttrs, EntryKind, ImageEntry, ImageSource, PointEntry,
    ValueEntry,
};
use crate::ondisk::{AddressMode, DEFAULT_SPI_BLOCK_SIZE, NO_DESTINATION};
use crate::types::{Error, Result};

pub const ROOT_TAG: &str = "DIRS";
const COMBO_ENTRY_TAG: &str = "COMBO_ENTRY";
const TYPE_ATTRIB_TAG: &str = "TypeAttrib";
/// Entry AddressMode value meaning "use the directory's mode".
const INHERIT_ADDRESS_MODE: u64 = 0xff;

const ROOT_ATTRIBUTES: &[&str] = &["AddressMode", "Writable", "XorBit24"];
const PSP_DIR_ATTRIBUTES: &[&str] =
    &["Base", "HeaderBase", "Size", "SpiBlockSize", "Level", "AddressMode", "Copy", "LevelType"];
const BIOS_DIR_ATTRIBUTES: &[&str] =
    &["Base", "HeaderBase", "Size", "SpiBlockSize", "Level", "AddressMode", "Copy", "LevelType", "ImageBase"];
const PSP_ENTRY_ATTRIBUTES: &[&str] = &[
    "Type",
    "File",
    "Address",
    "Size",
    "Value",
    "Recovery",
    "RomId",
    "Instance",
    "SubProgram",
    "AbsoluteAddr",
    "AddressMode",
];
const BIOS_ENTRY_ATTRIBUTES: &[&str] = &[
    "Type",
    "File",
    "Address",
    "Size",
    "Value",
    "Recovery",
    "RomId",
    "Instance",
    "SubProgram",
    "AbsoluteAddr",
    "AddressMode",
    "Destination",
];
const TYPE_ATTRIB_ATTRIBUTES: &[&str] = &["RegionType", "ResetImage", "Copy", "ReadOnly", "Compressed"];
const COMBO_DIR_ATTRIBUTES: &[&str] = &["Base", "LookUpMode", "AddressMode"];
const COMBO_ENTRY_ATTRIBUTES: &[&str] = &["IdSelect", "Id", "Address"];
const CMN_DIR_ATTRIBUTES: &[&str] = &["AddressMode"];
const CMN_ENTRY_ATTRIBUTES: &[&str] = &["File", "Address", "Size", "RomId"];
const ISH_HEADER_ATTRIBUTES: &[&str] = &[
    "Base",
    "BootPriority",
    "UpdateRetries",
    "GlitchRetries",
    "Location",
    "PspId",
    "SlotMaxSize",
    "Reserved_1",
];

/// Parses a number the way configuration files write them: `0x` hex or decimal, with an optional trailing `L`.
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    let text = text.strip_suffix('L').unwrap_or(text);
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => text.parse().ok(),
    }
}

pub fn hex(value: impl Into<u64>) -> String {
    format!("0x{:x}", value.into())
}

/// Minimal element tree; text content is not used by any of the formats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.push((key.to_string(), value.into()));
    }

    /// Pushes KEY only when VALUE is present.
    pub fn push_opt(&mut self, key: &str, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.push(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn from_start(reader: &Reader<&[u8]>, start: &BytesStart) -> Result<Self> {
        let decoder = reader.decoder();
        let mut element = Self::new(decoder.decode(start.name().as_ref())?.into_owned());
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::InvalidAttr)?;
            let key = decoder.decode(attribute.key.as_ref())?.into_owned();
            let value = attribute.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    /// Parses TEXT into its root element.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        let mut stack: Vec<XmlElement> = Vec::new();
        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Self::from_start(&reader, &start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&reader, &start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| quick_xml::Error::UnexpectedEof("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Eof => {
                    return Err(quick_xml::Error::UnexpectedEof("document has no complete root element".to_string()).into())
                }
                _ => {}
            }
        }
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    /// Serializes the tree as an indented document.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        self.write_to(&mut writer)?;
        let mut text = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        text.push('\n');
        Ok(text)
    }
}

/// Typed access to the attributes of one element.
struct Attributes<'a> {
    element: &'a XmlElement,
}

impl<'a> Attributes<'a> {
    /// Rejects attributes outside ALLOWED.
    fn new(element: &'a XmlElement, allowed: &[&str]) -> Result<Self> {
        if let Some((key, _)) = element.attributes.iter().find(|(key, _)| !allowed.contains(&key.as_str())) {
            return Err(Error::UnrecognizedAttribute { tag: element.name.clone(), attribute: key.clone() });
        }
        Ok(Self { element })
    }

    fn tag(&self) -> String {
        self.element.name.clone()
    }

    fn string(&self, key: &str) -> Option<&'a str> {
        self.element.get(key)
    }

    fn number(&self, key: &str) -> Result<Option<u64>> {
        self.string(key)
            .map(|text| {
                parse_number(text).ok_or_else(|| Error::InvalidAttribute {
                    tag: self.tag(),
                    attribute: key.to_string(),
                    value: text.to_string(),
                })
            })
            .transpose()
    }

    fn required(&self, key: &'static str) -> Result<u64> {
        self.number(key)?.ok_or(Error::MissingAttribute { tag: self.tag(), attribute: key })
    }

    fn narrow<N: TryFrom<u64>>(&self, key: &'static str, value: u64, limit: u64) -> Result<N> {
        N::try_from(value).map_err(|_| Error::FieldOutOfRange { tag: self.tag(), field: key, value, limit })
    }

    fn u8(&self, key: &'static str) -> Result<u8> {
        let value = self.number(key)?.unwrap_or(0);
        self.narrow(key, value, u8::MAX.into())
    }

    fn u32(&self, key: &'static str) -> Result<Option<u32>> {
        self.number(key)?.map(|value| self.narrow(key, value, u32::MAX.into())).transpose()
    }

    fn required_u32(&self, key: &'static str) -> Result<u32> {
        let value = self.required(key)?;
        self.narrow(key, value, u32::MAX.into())
    }

    fn flag(&self, key: &'static str) -> Result<bool> {
        match self.number(key)?.unwrap_or(0) {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(Error::FieldOutOfRange { tag: self.tag(), field: key, value, limit: 1 }),
        }
    }

    fn address_mode(&self, key: &str) -> Result<Option<AddressMode>> {
        self.number(key)?
            .map(|value| {
                AddressMode::from_bits(value).ok_or_else(|| Error::InvalidAttribute {
                    tag: self.tag(),
                    attribute: key.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }
}

fn parse_settings(root: &XmlElement) -> Result<GlobalSettings> {
    let attributes = Attributes::new(root, ROOT_ATTRIBUTES)?;
    Ok(GlobalSettings {
        address_mode: attributes.address_mode("AddressMode")?.unwrap_or_default(),
        writable: attributes.flag("Writable")?,
        xor_bit24: attributes.number("XorBit24")?.unwrap_or(0) != 0,
    })
}

fn parse_type_attrib(element: &XmlElement, attrs: &mut EntryAttrs) -> Result<()> {
    let attributes = Attributes::new(element, TYPE_ATTRIB_ATTRIBUTES)?;
    attrs.region_type = attributes.u8("RegionType")?;
    attrs.reset_image = attributes.flag("ResetImage")?;
    attrs.copy = attributes.flag("Copy")?;
    attrs.read_only = attributes.flag("ReadOnly")?;
    attrs.compressed = attributes.flag("Compressed")?;
    Ok(())
}

fn parse_entry(kind: DirectoryKind, element: &XmlElement) -> Result<DirectoryEntry> {
    let entry_kind: EntryKind =
        element.name.parse().map_err(|_| Error::UnrecognizedTag { tag: element.name.clone() })?;
    let allowed = match kind {
        DirectoryKind::Psp => PSP_ENTRY_ATTRIBUTES,
        DirectoryKind::Bhd => BIOS_ENTRY_ATTRIBUTES,
    };
    let attributes = Attributes::new(element, allowed)?;
    let raw_type = attributes.required("Type")?;
    let (type_, sub_program) = match kind {
        DirectoryKind::Psp => split_legacy_type(raw_type, attributes.number("SubProgram")?.unwrap_or(0)),
        DirectoryKind::Bhd => (raw_type, attributes.number("SubProgram")?.unwrap_or(0)),
    };
    let mut attrs = EntryAttrs {
        type_: attributes.narrow("Type", type_, 0xff)?,
        sub_program: attributes.narrow("SubProgram", sub_program, 0xff)?,
        rom_id: attributes.u8("RomId")?,
        instance: attributes.u8("Instance")?,
        ..Default::default()
    };
    for child in &element.children {
        match (kind, child.name.as_str()) {
            (DirectoryKind::Bhd, TYPE_ATTRIB_TAG) => parse_type_attrib(child, &mut attrs)?,
            _ => return Err(Error::UnrecognizedTag { tag: child.name.clone() }),
        }
    }
    let address_mode = match attributes.number("AddressMode")? {
        None | Some(INHERIT_ADDRESS_MODE) => None,
        Some(_) => attributes.address_mode("AddressMode")?,
    };
    let destination = attributes.number("Destination")?.filter(|&destination| destination != NO_DESTINATION);

    Ok(match entry_kind {
        EntryKind::Image => {
            let file = attributes
                .string("File")
                .ok_or(Error::MissingAttribute { tag: attributes.tag(), attribute: "File" })?;
            let mut image = ImageEntry::new(attrs, ImageSource::File(PathBuf::from(file)));
            image.address = attributes.number("Address")?;
            image.size = attributes.u32("Size")?;
            image.address_mode = address_mode;
            image.destination = destination;
            DirectoryEntry::Image(image)
        }
        EntryKind::Value => DirectoryEntry::Value(ValueEntry { type_: attrs.type_, value: attributes.required("Value")? }),
        EntryKind::Point => {
            let mut point = PointEntry::new(attrs, attributes.required("Address")?, attributes.required_u32("Size")?);
            point.absolute_addr = attributes.number("AbsoluteAddr")?.unwrap_or(0) != 0;
            point.address_mode = address_mode;
            point.destination = destination;
            DirectoryEntry::Point(point)
        }
    })
}

fn parse_directory(
    kind: DirectoryKind,
    element: &XmlElement,
    settings: &GlobalSettings,
    earlier: &[Directory],
) -> Result<Directory> {
    let allowed = match kind {
        DirectoryKind::Psp => PSP_DIR_ATTRIBUTES,
        DirectoryKind::Bhd => BIOS_DIR_ATTRIBUTES,
    };
    let attributes = Attributes::new(element, allowed)?;
    let level = attributes.number("Level")?.unwrap_or(1);
    let level = attributes.narrow("Level", level, 2)?;
    let level_type = attributes
        .string("LevelType")
        .map(|text| {
            text.parse::<LevelType>().map_err(|_| Error::InvalidAttribute {
                tag: attributes.tag(),
                attribute: "LevelType".to_string(),
                value: text.to_string(),
            })
        })
        .transpose()?;
    let base = attributes.number("Base")?;

    if attributes.flag("Copy")? {
        if level != 2 {
            return Err(Error::CopyNotLevel2 { level });
        }
        let source = earlier
            .iter()
            .find(|directory| directory.level == 2)
            .ok_or(Error::CopySourceNotFound { tag: attributes.tag() })?;
        log::debug!("{} at {:x?} copies the level 2 directory at {:x?}", attributes.tag(), base, source.base);
        return Ok(Directory { base, ..source.clone() });
    }

    let level_index = earlier
        .iter()
        .filter(|directory| directory.level == level && directory.level_type == level_type)
        .count();
    let entries = element
        .children
        .iter()
        .map(|child| parse_entry(kind, child))
        .collect::<Result<Vec<_>>>()?;
    Ok(Directory {
        kind,
        level,
        level_type,
        level_index: if level == 2 { level_index } else { 0 },
        base,
        header_base: attributes.number("HeaderBase")?,
        size: attributes.u32("Size")?,
        spi_block_size: attributes.u32("SpiBlockSize")?.map(|size| if size == 0 { DEFAULT_SPI_BLOCK_SIZE } else { size }),
        image_base: attributes.number("ImageBase")?,
        address_mode: attributes.address_mode("AddressMode")?.unwrap_or(settings.address_mode),
        entries,
    })
}

fn parse_combo(kind: DirectoryKind, element: &XmlElement, settings: &GlobalSettings) -> Result<ComboDirectory> {
    let attributes = Attributes::new(element, COMBO_DIR_ATTRIBUTES)?;
    let mut entries = Vec::new();
    for child in &element.children {
        if child.name != COMBO_ENTRY_TAG {
            return Err(Error::UnrecognizedTag { tag: child.name.clone() });
        }
        let entry = Attributes::new(child, COMBO_ENTRY_ATTRIBUTES)?;
        entries.push(ComboEntry {
            id_select: entry.required_u32("IdSelect")?,
            id: entry.required_u32("Id")?,
            address: entry.required("Address")?,
        });
    }
    Ok(ComboDirectory {
        kind,
        base: attributes.required("Base")?,
        lookup_mode: attributes.required_u32("LookUpMode")?,
        address_mode: attributes.address_mode("AddressMode")?.unwrap_or(settings.address_mode),
        entries,
    })
}

fn parse_common(element: &XmlElement) -> Result<CommonDirectory> {
    Attributes::new(element, CMN_DIR_ATTRIBUTES)?;
    let mut entries = Vec::new();
    for child in &element.children {
        if child.name != <&'static str>::from(EntryKind::Image) {
            return Err(Error::UnrecognizedTag { tag: child.name.clone() });
        }
        let entry = Attributes::new(child, CMN_ENTRY_ATTRIBUTES)?;
        let file = entry.string("File").ok_or(Error::MissingAttribute { tag: entry.tag(), attribute: "File" })?;
        let rom_id = entry.u8("RomId")?;
        if rom_id > 3 {
            return Err(Error::FieldOutOfRange { tag: entry.tag(), field: "RomId", value: rom_id.into(), limit: 3 });
        }
        entries.push(CommonEntry {
            file: PathBuf::from(file),
            address: entry.required("Address")?,
            size: entry.required_u32("Size")?,
            rom_id,
        });
    }
    Ok(CommonDirectory { entries })
}

fn parse_ish_header(element: &XmlElement) -> Result<IshHeader> {
    let attributes = Attributes::new(element, ISH_HEADER_ATTRIBUTES)?;
    Ok(IshHeader {
        base: attributes.required("Base")?,
        boot_priority: attributes.required_u32("BootPriority")?,
        update_retries: attributes.required_u32("UpdateRetries")?,
        glitch_retries: attributes.required_u32("GlitchRetries")?,
        location: attributes.required_u32("Location")?,
        psp_id: attributes.required_u32("PspId")?,
        slot_max_size: attributes.required_u32("SlotMaxSize")?,
        reserved_1: attributes.u32("Reserved_1")?.unwrap_or(0xffff_ffff),
    })
}

/// Interprets a configuration document and validates the result.
pub fn parse_config(text: &str) -> Result<DirectoryConfig> {
    let root = XmlElement::parse(text)?;
    if root.name != ROOT_TAG {
        return Err(Error::UnrecognizedTag { tag: root.name });
    }
    let settings = parse_settings(&root)?;
    let mut config = DirectoryConfig { settings, ..Default::default() };
    for element in &root.children {
        match element.name.as_str() {
            "PSP_DIR" => {
                let directory = parse_directory(DirectoryKind::Psp, element, &settings, &config.psp_directories)?;
                config.psp_directories.push(directory);
            }
            "BIOS_DIR" => {
                let directory = parse_directory(DirectoryKind::Bhd, element, &settings, &config.bhd_directories)?;
                config.bhd_directories.push(directory);
            }
            "COMBO_DIR" => config.psp_combo = Some(parse_combo(DirectoryKind::Psp, element, &settings)?),
            "BIOS_COMBO_DIR" => config.bhd_combo = Some(parse_combo(DirectoryKind::Bhd, element, &settings)?),
            "CMN_DIR" => config.common = Some(parse_common(element)?),
            "ISH_HEADER" => config.ish_headers.push(parse_ish_header(element)?),
            _ => return Err(Error::UnrecognizedTag { tag: element.name.clone() }),
        }
    }
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<DirectoryConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    log::info!("Parse Configure File: {}", path.display());
    parse_config(&text)
}

fn entry_element(kind: DirectoryKind, entry: &DirectoryEntry) -> XmlElement {
    let mut element = XmlElement::new(<&'static str>::from(entry.kind()));
    let attrs = entry.attrs();
    element.push("Type", hex(attrs.type_));
    match entry {
        DirectoryEntry::Value(value) => {
            element.push("Value", hex(value.value));
            return element;
        }
        DirectoryEntry::Image(image) => {
            let file = match &image.source {
                ImageSource::File(path) => path.display().to_string(),
                ImageSource::Bytes(_) => String::new(),
            };
            element.push("File", file);
            element.push_opt("Address", image.address.map(hex));
            element.push_opt("Size", image.size.map(hex));
            element.push_opt("AddressMode", image.address_mode.map(|mode| hex(mode as u8)));
            element.push_opt("Destination", image.destination.map(hex));
        }
        DirectoryEntry::Point(point) => {
            element.push("Address", hex(point.address));
            element.push("Size", hex(point.size));
            if point.absolute_addr {
                element.push("AbsoluteAddr", "0x1");
            }
            element.push_opt("AddressMode", point.address_mode.map(|mode| hex(mode as u8)));
            element.push_opt("Destination", point.destination.map(hex));
        }
    }
    for (key, value) in [("RomId", attrs.rom_id), ("Instance", attrs.instance), ("SubProgram", attrs.sub_program)] {
        if value != 0 {
            element.push(key, hex(value));
        }
    }
    let flags = [attrs.reset_image, attrs.copy, attrs.read_only, attrs.compressed];
    if kind == DirectoryKind::Bhd && (attrs.region_type != 0 || flags.iter().any(|&flag| flag)) {
        let mut type_attrib = XmlElement::new(TYPE_ATTRIB_TAG).with("RegionType", hex(attrs.region_type));
        for (key, flag) in TYPE_ATTRIB_ATTRIBUTES[1..].iter().zip(flags) {
            type_attrib.push(key, hex(u8::from(flag)));
        }
        element.children.push(type_attrib);
    }
    element
}

fn directory_element(directory: &Directory) -> XmlElement {
    let mut element = XmlElement::new(directory.tag());
    element.push_opt("Base", directory.base.map(hex));
    element.push_opt("HeaderBase", directory.header_base.map(hex));
    element.push_opt("Size", directory.size.map(hex));
    element.push_opt("SpiBlockSize", directory.spi_block_size.map(hex));
    element.push_opt("LevelType", directory.level_type.map(|level_type| level_type.to_string()));
    if directory.kind == DirectoryKind::Bhd {
        element.push_opt("ImageBase", directory.image_base.map(hex));
    }
    element.push("Level", hex(directory.level));
    element.push("AddressMode", hex(directory.address_mode as u8));
    element.children = directory.entries.iter().map(|entry| entry_element(directory.kind, entry)).collect();
    element
}

fn combo_element(combo: &ComboDirectory) -> XmlElement {
    let mut element = XmlElement::new(combo.tag())
        .with("Base", hex(combo.base))
        .with("LookUpMode", hex(combo.lookup_mode))
        .with("AddressMode", hex(combo.address_mode as u8));
    element.children = combo
        .entries
        .iter()
        .map(|entry| {
            XmlElement::new(COMBO_ENTRY_TAG)
                .with("IdSelect", hex(entry.id_select))
                .with("Id", hex(entry.id))
                .with("Address", hex(entry.address))
        })
        .collect();
    element
}

pub(crate) fn ish_element(ish: &IshHeader) -> XmlElement {
    XmlElement::new("ISH_HEADER")
        .with("Base", hex(ish.base))
        .with("BootPriority", hex(ish.boot_priority))
        .with("UpdateRetries", hex(ish.update_retries))
        .with("GlitchRetries", hex(ish.glitch_retries))
        .with("Location", hex(ish.location))
        .with("PspId", hex(ish.psp_id))
        .with("SlotMaxSize", hex(ish.slot_max_size))
        .with("Reserved_1", hex(ish.reserved_1))
}

/// Root attributes, omitting the defaults.
pub(crate) fn settings_element(name: &str, settings: &GlobalSettings) -> XmlElement {
    let mut element = XmlElement::new(name);
    if settings.address_mode != AddressMode::PhysicalMmio {
        element.push("AddressMode", hex(settings.address_mode as u8));
    }
    if settings.writable {
        element.push("Writable", "0x1");
    }
    if settings.xor_bit24 {
        element.push("XorBit24", "0x1");
    }
    element
}

pub fn config_element(config: &DirectoryConfig) -> XmlElement {
    let mut root = settings_element(ROOT_TAG, &config.settings);
    root.children.extend(config.psp_directories.iter().map(directory_element));
    root.children.extend(config.bhd_directories.iter().map(directory_element));
    root.children.extend(config.psp_combo.iter().chain(config.bhd_combo.iter()).map(combo_element));
    if let Some(common) = &config.common {
        let mut element = XmlElement::new("CMN_DIR");
        element.children = common
            .entries
            .iter()
            .map(|entry| {
                let mut child = XmlElement::new(<&'static str>::from(EntryKind::Image))
                    .with("File", entry.file.display().to_string())
                    .with("Address", hex(entry.address))
                    .with("Size", hex(entry.size));
                if entry.rom_id != 0 {
                    child.push("RomId", hex(entry.rom_id));
                }
                child
            })
            .collect();
        root.children.push(element);
    }
    root.children.extend(config.ish_headers.iter().map(ish_element));
    root
}

pub fn write_config(config: &DirectoryConfig) -> Result<String> {
    config_element(config).to_xml()
}
