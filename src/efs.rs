//! Discovery of the PSP and BIOS directories of a flash image.

use core::mem::size_of;

use zerocopy::{AsBytes, FromBytes};

use crate::adapters::{xor_bit24, XorBit24FlashAdapter};
use crate::address::{decode_location, is_physical, offset_in_image, AddressFrame, MMIO_WINDOW_SIZE};
use crate::amdfletcher32::fletcher32;
use crate::directory::{EntryNamer, GlobalSettings, IshHeader, LevelType};
use crate::entry::{description, entry_type_info, DirectoryKind, EntryAttrs, EntryKind};
use crate::flash::{FlashRead, Location};
use crate::ondisk::{
    entry_type, header_from_collection, AddressMode, BhdDirectoryEntry, ComboDirectoryEntry,
    ComboDirectoryHeader, DirectoryHeader, Efh, IshSlotHeader, PspDirectoryEntry,
    BHD_COMBO_DIRECTORY_SIGNATURE, BHD_DIRECTORY_SIGNATURE, BHD_LEVEL2_DIRECTORY_SIGNATURE,
    EFH_SIGNATURE, EMBEDDED_FIRMWARE_STRUCTURE_POSITION, PSP_COMBO_DIRECTORY_SIGNATURE,
    PSP_DIRECTORY_SIGNATURE, PSP_LEVEL2_DIRECTORY_SIGNATURE, VALUE_ENTRY_SIZE,
};
use crate::program::{IshStructure, ProgramProfile};
use crate::types::{Error, Result};

/// Deepest chain of directories (level 2 pointers, combo redirects, ISH hops) followed.
pub const MAX_NESTING_DEPTH: usize = 8;

const LOW32: u64 = 0xffff_ffff;

fn read_record<S: FromBytes + Copy, R: FlashRead + ?Sized>(storage: &R, location: Location) -> Result<S> {
    let mut buffer = vec![0u8; size_of::<S>()];
    storage.read_exact(location, &mut buffer)?;
    header_from_collection::<S>(&buffer)
        .copied()
        .ok_or(Error::DirectoryRangeCheck { offset: location, len: buffer.len() })
}

/// One entry as found on disk, with its location resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedEntry {
    pub kind: EntryKind,
    pub attrs: EntryAttrs,
    /// Payload of value entries.
    pub value: u64,
    pub size: u32,
    /// The location word as stored.
    pub location: u64,
    /// Flash offset the location resolves to, before XorBit24 is applied.
    pub address: Location,
    /// Tag of the location word. Only recorded in relative directories.
    pub address_mode: Option<AddressMode>,
    /// Untagged physical address inside a relative directory.
    pub absolute: bool,
    /// BIOS entries only.
    pub destination: Option<u64>,
    /// Where a dump puts the payload.
    pub file: Option<String>,
}

impl ParsedEntry {
    fn value(type_: u8, value: u64, destination: Option<u64>) -> Self {
        Self {
            kind: EntryKind::Value,
            attrs: EntryAttrs::new(type_),
            value,
            size: VALUE_ENTRY_SIZE,
            location: value,
            address: 0,
            address_mode: None,
            absolute: false,
            destination,
            file: None,
        }
    }

    pub fn description(&self, kind: DirectoryKind) -> String {
        let mut text = description(kind, self.attrs.type_).to_string();
        if kind == DirectoryKind::Psp && self.kind != EntryKind::Value {
            match self.attrs.sub_program {
                1 => text.push_str(" (RV2,PiR,CF,VM,RMB B0)"),
                2 => text.push_str(" (PCO)"),
                _ => {}
            }
        }
        text
    }
}

/// A directory as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedDirectory {
    pub kind: DirectoryKind,
    pub level: u8,
    pub level_type: Option<LevelType>,
    pub level_index: usize,
    /// Where the header was found.
    pub offset: Location,
    pub checksum: u32,
    /// Region start recorded in the header; 0 when the region starts at the header.
    pub base: u64,
    pub size: u32,
    pub spi_block_size: u32,
    pub address_mode: AddressMode,
    /// Base of slot relative locations; 0 when unused.
    pub image_base: u64,
    pub entries: Vec<ParsedEntry>,
}

impl ParsedDirectory {
    fn new(
        kind: DirectoryKind,
        offset: Location,
        header: &DirectoryHeader,
        level: u8,
        level_type: Option<LevelType>,
        level_index: usize,
    ) -> Result<Self> {
        let info = header.additional_info();
        let address_mode = AddressMode::from_bits(info.address_mode().into())
            .ok_or(Error::UnsupportedDirectoryAddressMode { offset, mode: info.address_mode() })?;
        Ok(Self {
            kind,
            level,
            level_type,
            level_index,
            offset,
            checksum: header.checksum.get(),
            base: info.base_address(),
            size: info.max_size(),
            spi_block_size: info.spi_block_size(),
            address_mode,
            image_base: 0,
            entries: Vec::new(),
        })
    }

    pub fn region_start(&self) -> u64 {
        if self.base != 0 {
            self.base
        } else {
            self.offset
        }
    }

    /// Whether ADDRESS lies in the region the header declares.
    pub fn owns(&self, address: Location) -> bool {
        let start = self.region_start();
        address >= start && address < start + u64::from(self.size)
    }

    fn classify(&self, type_: u8, address: Location) -> EntryKind {
        match entry_type_info(self.kind, type_) {
            None => EntryKind::Image,
            Some(info) if self.owns(address) => info.kind,
            Some(_) => EntryKind::Point,
        }
    }
}

/// Everything discovered in one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedDirectorySet {
    /// Size used to translate physical addresses; 0 for raw eMMC/UFS images.
    pub image_size: u64,
    pub settings: GlobalSettings,
    /// Pre-order: every parent precedes its children, A copies precede B copies.
    pub psp_directories: Vec<ParsedDirectory>,
    pub bhd_directories: Vec<ParsedDirectory>,
    pub ish_headers: Vec<IshHeader>,
}

impl ParsedDirectorySet {
    pub fn is_empty(&self) -> bool {
        self.psp_directories.is_empty() && self.bhd_directories.is_empty()
    }
}

pub struct Efs<T: FlashRead> {
    storage: T,
    image_size: u64,
}

impl<T: FlashRead> Efs<T> {
    pub fn load(storage: T, image_size: u64) -> Self {
        Self { storage, image_size }
    }

    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    /// Every embedded firmware structure PROGRAM accepts, as (position, XorBit24 pass, structure).
    /// The lower 16 MiB are searched before the upper ones.
    pub fn embedded_firmware_structures<'a>(
        &'a self,
        program: &'a ProgramProfile,
    ) -> impl Iterator<Item = (Location, bool, Efh)> + 'a {
        [false, true]
            .into_iter()
            .flat_map(|xor| EMBEDDED_FIRMWARE_STRUCTURE_POSITION.iter().map(move |&position| (xor_bit24(position, xor), xor)))
            .filter(move |&(position, _)| position <= self.image_size)
            .filter_map(move |(position, xor)| {
                let efh: Efh = read_record(&self.storage, position).ok()?;
                if efh.signature.get() != EFH_SIGNATURE {
                    return None;
                }
                log::debug!("embedded firmware structure at 0x{:x}", position);
                if self.image_size > MMIO_WINDOW_SIZE && efh.efs_generation_bit() != program.second_gen_efs {
                    log::debug!(
                        "EFS generation {} does not match {}, continuing search",
                        efh.efs_generation_bit(),
                        program.second_gen_efs
                    );
                    return None;
                }
                Some((position, xor, efh))
            })
    }

    pub fn embedded_firmware_structure(&self, program: &ProgramProfile) -> Result<Efh> {
        self.embedded_firmware_structures(program)
            .next()
            .map(|(_, _, efh)| efh)
            .ok_or(Error::EfsHeaderNotFound)
    }

    /// Walks every directory reachable from the embedded firmware structure, or from a bare
    /// PSP directory at offset 0 when there is none.
    pub fn directories(&self, program: &ProgramProfile) -> Result<ParsedDirectorySet> {
        for (position, xor, efh) in self.embedded_firmware_structures(program) {
            let walker = Walker::new(&self.storage, self.image_size, xor, program);
            if let Some(set) = walker.walk_from_efh(&efh)? {
                log::info!("directories found through the embedded firmware structure at 0x{:x}", position);
                return Ok(set);
            }
        }
        let header: DirectoryHeader =
            read_record(&self.storage, 0).map_err(|_| Error::EfsHeaderNotFound)?;
        if header.cookie.get() != PSP_DIRECTORY_SIGNATURE {
            return Err(Error::EfsHeaderNotFound);
        }
        log::info!("PSP image identified, no address translation");
        let mut walker = Walker::new(&self.storage, 0, false, program);
        walker.parse_psp(0, 1, None, 0, 0)?;
        let mut set = walker.result;
        set.settings.address_mode = AddressMode::FlashOffset;
        Ok(set)
    }
}

#[derive(Default)]
struct PspChildren {
    level2: Option<Location>,
    level2a: Vec<Location>,
    level2b: Vec<Location>,
    bios_level2ab: Option<Location>,
}

struct Walker<'a, T: FlashRead> {
    storage: XorBit24FlashAdapter<&'a T>,
    program: &'a ProgramProfile,
    /// L2A/L2B pointers seen so far.
    ab_recovery_count: usize,
    result: ParsedDirectorySet,
}

impl<'a, T: FlashRead> Walker<'a, T> {
    fn new(storage: &'a T, image_size: u64, xor: bool, program: &'a ProgramProfile) -> Self {
        let mut result = ParsedDirectorySet { image_size, ..Default::default() };
        result.settings.xor_bit24 = xor;
        Self { storage: XorBit24FlashAdapter::new(storage, xor), program, ab_recovery_count: 0, result }
    }

    fn xor(&self) -> bool {
        self.storage.enabled()
    }

    fn image_size(&self) -> u64 {
        self.result.image_size
    }

    fn read<S: FromBytes + Copy>(&self, location: Location) -> Result<S> {
        read_record(&self.storage, location)
    }

    fn enter(&self, offset: Location, depth: usize) -> Result<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::DirectoryNestingTooDeep { offset, depth });
        }
        Ok(())
    }

    /// Resolves a pointer of the embedded firmware structure or of a combo directory.
    fn pointer_offset(&self, pointer: u64) -> Result<(Location, AddressMode)> {
        if is_physical(pointer) {
            Ok((offset_in_image(self.image_size(), pointer, self.xor())?, AddressMode::PhysicalMmio))
        } else {
            Ok((pointer, AddressMode::FlashOffset))
        }
    }

    /// Looks up the active program in the combo directory at OFFSET.
    fn combo_target(&self, offset: Location) -> Result<Option<(Location, AddressMode)>> {
        let header: ComboDirectoryHeader = self.read(offset)?;
        let entries = offset + size_of::<ComboDirectoryHeader>() as u64;
        for i in 0..u64::from(header.total_entries.get()) {
            let entry: ComboDirectoryEntry = self.read(entries + i * size_of::<ComboDirectoryEntry>() as u64)?;
            if self.program.matches(entry.id.get()) {
                return self.pointer_offset(entry.location.get()).map(Some);
            }
        }
        Ok(None)
    }

    fn combo_redirect(&self, offset: Location) -> Result<Location> {
        log::debug!("combo directory at 0x{:x}", offset);
        self.combo_target(offset)?
            .map(|(target, _)| target)
            .ok_or(Error::ComboEntryNotFound { offset, psp_id: self.program.psp_id })
    }

    /// Returns None when the structure does not lead to a PSP directory for this program.
    fn walk_from_efh(mut self, efh: &Efh) -> Result<Option<ParsedDirectorySet>> {
        let (mut psp_offset, mut psp_pointer_mode) =
            self.pointer_offset(efh.psp_directory_table_location_zen.get().into())?;
        let header: DirectoryHeader = self.read(psp_offset)?;
        match header.cookie.get() {
            PSP_DIRECTORY_SIGNATURE => {}
            PSP_COMBO_DIRECTORY_SIGNATURE => match self.combo_target(psp_offset)? {
                Some((target, mode)) => {
                    log::debug!("PSP directory for {} at 0x{:x}", self.program.name, target);
                    psp_offset = target;
                    psp_pointer_mode = mode;
                }
                None => return Ok(None),
            },
            _ => return Ok(None),
        }
        self.parse_psp(psp_offset, 1, None, 0, 0)?;

        let bios_pointer = efh.field(self.program.bios_dir_index).unwrap_or(0);
        if self.ab_recovery_count < 2 && bios_pointer != 0 {
            let (bios_offset, bios_pointer_mode) = self.pointer_offset(bios_pointer.into())?;
            self.parse_bios(bios_offset, 1, None, 0, 0, 0)?;
            self.settle_address_mode(psp_pointer_mode, bios_pointer_mode);
        }
        Ok(Some(self.result))
    }

    fn settle_address_mode(&mut self, psp_pointer_mode: AddressMode, bios_pointer_mode: AddressMode) {
        let result = &mut self.result;
        for (name, directories) in [("PSP", &result.psp_directories), ("BIOS", &result.bhd_directories)] {
            if directories.windows(2).any(|pair| pair[0].address_mode != pair[1].address_mode) {
                log::warn!("address mode is not aligned between {} directories", name);
            }
        }
        let last_psp = result.psp_directories.last().map(|d| d.address_mode);
        let last_bios = result.bhd_directories.last().map(|d| d.address_mode);
        if psp_pointer_mode == bios_pointer_mode
            && last_psp == Some(psp_pointer_mode)
            && last_bios == Some(bios_pointer_mode)
        {
            result.settings.address_mode = psp_pointer_mode;
        } else {
            log::warn!(
                "address mode is not aligned between EFS PSP pointer {:?}, EFS BIOS pointer {:?}, PSP directories {:?} and BIOS directories {:?}",
                psp_pointer_mode,
                bios_pointer_mode,
                last_psp,
                last_bios
            );
        }
    }

    fn verify_checksum(&self, directory: &ParsedDirectory, covered: &[u8]) {
        let computed = fletcher32(covered);
        if computed != directory.checksum {
            log::warn!(
                "{} directory at 0x{:x} has checksum 0x{:08x}, expected 0x{:08x}",
                <&'static str>::from(directory.kind),
                directory.offset,
                directory.checksum,
                computed
            );
        }
    }

    fn parse_psp(
        &mut self,
        offset: Location,
        level: u8,
        level_type: Option<LevelType>,
        level_index: usize,
        depth: usize,
    ) -> Result<()> {
        self.enter(offset, depth)?;
        let header: DirectoryHeader = self.read(offset)?;
        match header.cookie.get() {
            PSP_DIRECTORY_SIGNATURE | PSP_LEVEL2_DIRECTORY_SIGNATURE => {}
            PSP_COMBO_DIRECTORY_SIGNATURE => {
                let target = self.combo_redirect(offset)?;
                return self.parse_psp(target, level, level_type, level_index, depth + 1);
            }
            _ => return self.parse_ish(offset, &header, level_type, level_index, depth),
        }

        let mut directory = ParsedDirectory::new(DirectoryKind::Psp, offset, &header, level, level_type, level_index)?;
        log::debug!(
            "PSP directory header at 0x{:x}, base 0x{:x}, size 0x{:x}, SPI block size 0x{:x}",
            offset,
            directory.base,
            directory.size,
            directory.spi_block_size
        );
        if directory.address_mode.is_relative() {
            directory.image_base = offset;
        }
        let frame = AddressFrame {
            image_size: self.image_size(),
            xor_bit24: self.xor(),
            header_offset: offset,
            image_base: offset,
        };
        let count = header.total_entries.get();
        let mut covered = header.as_bytes()[8..].to_vec();
        let mut namer = EntryNamer::new(DirectoryKind::Psp, level, level_type, level_index);
        let mut children = PspChildren::default();

        for i in 0..count {
            let position = offset + (size_of::<DirectoryHeader>() + i as usize * size_of::<PspDirectoryEntry>()) as u64;
            let raw: PspDirectoryEntry = self.read(position)?;
            covered.extend_from_slice(raw.as_bytes());
            let word = raw.value_or_location.get();
            if raw.is_value() {
                let type_ = raw.attrs().type_();
                log::debug!("type 0x{:02x} value 0x{:08x} ({})", type_, word, description(DirectoryKind::Psp, type_));
                directory.entries.push(ParsedEntry::value(type_, word, None));
                continue;
            }
            let attrs = EntryAttrs::from(raw.attrs());
            self.result.settings.writable |= attrs.writable;
            let low = word & LOW32;
            let (address, address_mode, absolute) = match directory.address_mode {
                AddressMode::PhysicalMmio => {
                    if is_physical(low) {
                        (offset_in_image(self.image_size(), low, self.xor())?, None, false)
                    } else if self.program.keeps_last_entry_as_offset() && i + 1 == count {
                        (low, None, false)
                    } else {
                        // Older images did not record the mode; plain offsets mean mode 1.
                        directory.address_mode = AddressMode::FlashOffset;
                        (low, None, false)
                    }
                }
                AddressMode::FlashOffset => (low, None, false),
                mode => {
                    let decoded = decode_location(word, mode, &frame)?;
                    (decoded.offset, Some(decoded.mode), decoded.absolute)
                }
            };
            let size = raw.size.get();
            log::debug!(
                "type 0x{:02x} sub program 0x{:02x} rom id {} instance {} size 0x{:08x} location 0x{:x} -> 0x{:x}",
                attrs.type_,
                attrs.sub_program,
                attrs.rom_id,
                attrs.instance,
                size,
                word,
                address
            );
            match attrs.type_ {
                entry_type::PSP_LEVEL2_DIRECTORY if address > 0 => children.level2 = Some(address),
                entry_type::PSP_LEVEL2A_DIRECTORY => {
                    self.ab_recovery_count += 1;
                    children.level2a.push(address);
                }
                entry_type::PSP_LEVEL2B_DIRECTORY => {
                    self.ab_recovery_count += 1;
                    children.level2b.push(address);
                }
                entry_type::BHD_LEVEL2AB_DIRECTORY if address > 0 => children.bios_level2ab = Some(address),
                _ => {}
            }
            let kind = directory.classify(attrs.type_, address);
            directory.entries.push(ParsedEntry {
                kind,
                attrs,
                value: 0,
                size,
                location: word,
                address,
                address_mode,
                absolute,
                destination: None,
                file: namer.name(kind, &attrs),
            });
        }
        self.verify_checksum(&directory, &covered);
        log::info!(
            "PSP directory level {}{} at 0x{:x} with {} entries",
            level,
            level_type.map_or("", Into::into),
            offset,
            directory.entries.len()
        );
        self.result.psp_directories.push(directory);

        if let Some(address) = children.level2 {
            self.parse_psp(address, 2, None, 0, depth + 1)?;
        }
        for (index, &address) in children.level2a.iter().enumerate() {
            self.parse_psp(address, 2, Some(LevelType::A), index, depth + 1)?;
        }
        let mut index = 0;
        for &address in &children.level2b {
            if children.level2a.contains(&address) {
                log::info!("L2B directory at 0x{:x} has the same address as an L2A directory, skipped", address);
                continue;
            }
            self.parse_psp(address, 2, Some(LevelType::B), index, depth + 1)?;
            index += 1;
        }
        if let Some(address) = children.bios_level2ab {
            self.parse_bios(address, 2, level_type, offset, level_index, depth + 1)?;
        }
        Ok(())
    }

    /// OFFSET holds something other than a PSP directory, which some programs use for image slot headers.
    fn parse_ish(
        &mut self,
        offset: Location,
        header: &DirectoryHeader,
        level_type: Option<LevelType>,
        level_index: usize,
        depth: usize,
    ) -> Result<()> {
        match self.program.ish_structure {
            IshStructure::None => Err(Error::SignatureVerifyFail {
                kind: "PSP",
                offset,
                signature: header.cookie.get(),
            }),
            IshStructure::Mr => {
                let target = u64::from(header.additional_info.get());
                log::debug!("ISH at 0x{:x} points at PSP directory 0x{:x}", offset, target);
                self.parse_psp(target, 2, level_type, level_index, depth + 1)
            }
            IshStructure::SlotHeader => {
                let slot: IshSlotHeader = self.read(offset)?;
                if !self.program.matches(slot.psp_id.get()) {
                    log::debug!("ISH at 0x{:x} is for PSP id 0x{:08x}, skipped", offset, slot.psp_id.get());
                    return Ok(());
                }
                let ish = IshHeader {
                    base: offset,
                    boot_priority: slot.boot_priority.get(),
                    update_retries: slot.update_retries.get(),
                    glitch_retries: slot.glitch_retries.get() & 0xff,
                    location: slot.location.get(),
                    psp_id: slot.psp_id.get(),
                    slot_max_size: slot.slot_max_size.get(),
                    reserved_1: slot.reserved_1.get(),
                };
                log::debug!("ISH at 0x{:x} points at PSP directory 0x{:x}", offset, ish.location);
                self.result.ish_headers.push(ish);
                self.parse_psp(ish.location.into(), 2, level_type, level_index, depth + 1)
            }
        }
    }

    fn parse_bios(
        &mut self,
        offset: Location,
        level: u8,
        level_type: Option<LevelType>,
        image_base: u64,
        level_index: usize,
        depth: usize,
    ) -> Result<()> {
        self.enter(offset, depth)?;
        let mut offset = offset;
        let mut header: DirectoryHeader = self.read(offset)?;
        if header.cookie.get() == BHD_COMBO_DIRECTORY_SIGNATURE {
            offset = self.combo_redirect(offset)?;
            header = self.read(offset)?;
        }
        match header.cookie.get() {
            BHD_DIRECTORY_SIGNATURE | BHD_LEVEL2_DIRECTORY_SIGNATURE => {}
            signature => return Err(Error::SignatureVerifyFail { kind: "BIOS", offset, signature }),
        }

        let mut directory = ParsedDirectory::new(DirectoryKind::Bhd, offset, &header, level, level_type, level_index)?;
        log::debug!(
            "BIOS directory header at 0x{:x}, base 0x{:x}, size 0x{:x}, SPI block size 0x{:x}",
            offset,
            directory.base,
            directory.size,
            directory.spi_block_size
        );
        if directory.address_mode.is_relative() {
            directory.image_base = image_base;
        }
        let frame = AddressFrame {
            image_size: self.image_size(),
            xor_bit24: self.xor(),
            header_offset: offset,
            image_base,
        };
        let count = header.total_entries.get();
        let mut covered = header.as_bytes()[8..].to_vec();
        let mut namer = EntryNamer::new(DirectoryKind::Bhd, level, level_type, level_index);
        let mut level2 = None;

        for i in 0..count {
            let position = offset + (size_of::<DirectoryHeader>() + i as usize * size_of::<BhdDirectoryEntry>()) as u64;
            let raw: BhdDirectoryEntry = self.read(position)?;
            covered.extend_from_slice(raw.as_bytes());
            let word = raw.value_or_source_location.get();
            let destination = raw.destination_location.get();
            if raw.is_value() {
                let type_ = raw.attrs().type_();
                log::debug!("type 0x{:02x} value 0x{:08x} ({})", type_, word, description(DirectoryKind::Bhd, type_));
                directory.entries.push(ParsedEntry::value(type_, word, Some(destination)));
                continue;
            }
            let attrs = EntryAttrs::from(raw.attrs());
            self.result.settings.writable |= attrs.writable;
            let low = word & LOW32;
            let (address, address_mode, absolute) = match directory.address_mode {
                AddressMode::PhysicalMmio => {
                    if is_physical(low) {
                        (offset_in_image(self.image_size(), low, self.xor())?, None, false)
                    } else {
                        if attrs.type_ != entry_type::BHD_APOB {
                            directory.address_mode = AddressMode::FlashOffset;
                        }
                        (low, None, false)
                    }
                }
                AddressMode::FlashOffset => (low, None, false),
                mode => {
                    let decoded = decode_location(word, mode, &frame)?;
                    (decoded.offset, Some(decoded.mode), decoded.absolute)
                }
            };
            let size = raw.size.get();
            log::debug!(
                "type 0x{:02x} region type 0x{:02x} reset {} copy {} read only {} compressed {} size 0x{:08x} source 0x{:x} -> 0x{:x} destination 0x{:x}",
                attrs.type_,
                attrs.region_type,
                attrs.reset_image,
                attrs.copy,
                attrs.read_only,
                attrs.compressed,
                size,
                word,
                address,
                destination
            );
            if attrs.type_ == entry_type::BHD_LEVEL2_DIRECTORY && address > 0 {
                level2 = Some(address);
            }
            let kind = directory.classify(attrs.type_, address);
            // APOB has no backing storage; its location is kept as stored.
            let address = if attrs.type_ == entry_type::BHD_APOB {
                offset_in_image(0, word, self.xor())?
            } else {
                address
            };
            directory.entries.push(ParsedEntry {
                kind,
                attrs,
                value: 0,
                size,
                location: word,
                address,
                address_mode,
                absolute,
                destination: Some(destination),
                file: namer.name(kind, &attrs),
            });
        }
        self.verify_checksum(&directory, &covered);
        log::info!(
            "BIOS directory level {}{} at 0x{:x} with {} entries",
            level,
            level_type.map_or("", Into::into),
            offset,
            directory.entries.len()
        );
        self.result.bhd_directories.push(directory);

        if let Some(address) = level2 {
            self.parse_bios(address, 2, None, 0, 0, depth + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::BinaryImage;
    use crate::ondisk::NO_DESTINATION;
    use crate::program::GENOA;

    const SIXTEEN_MIB: usize = 0x100_0000;

    fn put(image: &mut [u8], offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn psp_entry(type_: u8, size: u32, location: u64) -> Vec<u8> {
        let entry = PspDirectoryEntry {
            attrs: u32::from(EntryAttrs::new(type_).psp_bits()).into(),
            size: size.into(),
            value_or_location: location.into(),
        };
        entry.as_bytes().to_vec()
    }

    fn bhd_entry(type_: u8, size: u32, location: u64) -> Vec<u8> {
        let entry = BhdDirectoryEntry {
            attrs: u32::from(EntryAttrs::new(type_).bhd_bits()).into(),
            size: size.into(),
            value_or_source_location: location.into(),
            destination_location: NO_DESTINATION.into(),
        };
        entry.as_bytes().to_vec()
    }

    fn directory(signature: u32, additional_info: u32, entries: &[Vec<u8>]) -> Vec<u8> {
        let mut covered = Vec::new();
        covered.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        covered.extend_from_slice(&additional_info.to_le_bytes());
        for entry in entries {
            covered.extend_from_slice(entry);
        }
        let mut bytes = signature.to_le_bytes().to_vec();
        bytes.extend_from_slice(&fletcher32(&covered).to_le_bytes());
        bytes.extend_from_slice(&covered);
        bytes
    }

    fn efh(psp: u32, bios: u32) -> Vec<u8> {
        let mut efh = Efh::default();
        efh.psp_directory_table_location_zen.set(psp);
        efh.bios_directory_table_milan.set(bios);
        efh.as_bytes().to_vec()
    }

    fn image_with_efh(psp: u32, bios: u32) -> Vec<u8> {
        let mut image = vec![0xffu8; SIXTEEN_MIB];
        put(&mut image, 0x2_0000, &efh(psp, bios));
        image
    }

    fn parse(image: Vec<u8>, program: &ProgramProfile) -> Result<ParsedDirectorySet> {
        let image = BinaryImage::new(image);
        let efs = Efs::load(&image, image.size());
        efs.directories(program)
    }

    #[test]
    fn test_known_layout() {
        let mut image = image_with_efh(0x3_0000, 0);
        put(&mut image, 0x3_0000, &directory(PSP_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x10, VALUE_ENTRY_SIZE, 1)]));
        let set = parse(image, &GENOA).unwrap();
        assert_eq!(set.psp_directories.len(), 1);
        assert!(set.bhd_directories.is_empty());
        let psp = &set.psp_directories[0];
        assert_eq!(psp.level, 1);
        assert_eq!(psp.offset, 0x3_0000);
        assert_eq!(psp.entries.len(), 1);
        assert_eq!(psp.entries[0].kind, EntryKind::Value);
        assert_eq!(psp.entries[0].attrs.type_, 0x10);
        assert_eq!(psp.entries[0].value, 1);
    }

    #[test]
    fn test_embedded_firmware_structure() {
        let image = BinaryImage::new(image_with_efh(0x3_0000, 0));
        let efs = Efs::load(&image, image.size());
        let efh = efs.embedded_firmware_structure(&GENOA).unwrap();
        assert_eq!(efh.psp_directory_table_location_zen.get(), 0x3_0000);
        let blank = BinaryImage::new(vec![0; 0x10_0000]);
        let efs = Efs::load(&blank, blank.size());
        assert!(matches!(efs.embedded_firmware_structure(&GENOA), Err(Error::EfsHeaderNotFound)));
    }

    #[test]
    fn test_level2_and_bios_recursion() {
        let mut image = image_with_efh(0xff03_0000, 0xff05_0000);
        put(
            &mut image,
            0x3_0000,
            &directory(PSP_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x40, 0x1000, 0xff04_0000)]),
        );
        put(
            &mut image,
            0x4_0000,
            &directory(PSP_LEVEL2_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x01, 0x100, 0xff04_1000)]),
        );
        put(
            &mut image,
            0x5_0000,
            &directory(
                BHD_DIRECTORY_SIGNATURE,
                0,
                &[bhd_entry(0x5f, VALUE_ENTRY_SIZE, 7), bhd_entry(0x70, 0x1000, 0xff06_0000)],
            ),
        );
        put(
            &mut image,
            0x6_0000,
            &directory(BHD_LEVEL2_DIRECTORY_SIGNATURE, 0, &[bhd_entry(0x62, 0x100, 0xff06_1000)]),
        );
        let set = parse(image, &GENOA).unwrap();
        let levels: Vec<_> = set.psp_directories.iter().map(|d| (d.level, d.offset)).collect();
        assert_eq!(levels, vec![(1, 0x3_0000), (2, 0x4_0000)]);
        let levels: Vec<_> = set.bhd_directories.iter().map(|d| (d.level, d.offset)).collect();
        assert_eq!(levels, vec![(1, 0x5_0000), (2, 0x6_0000)]);
        let l2 = &set.psp_directories[1];
        assert_eq!(l2.entries[0].address, 0x4_1000);
        assert_eq!(l2.entries[0].file.as_deref(), Some("PspDirL20_Typex1_0_0_0_PspBootLoader.bin"));
        // Every directory stayed physical, so the image is consistently mode 0.
        assert_eq!(set.settings.address_mode, AddressMode::PhysicalMmio);
        assert!(!set.settings.writable);
        let bios_l1 = &set.bhd_directories[0];
        assert_eq!(bios_l1.entries[0].value, 7);
        assert_eq!(bios_l1.entries[0].destination, Some(NO_DESTINATION));
        assert_eq!(bios_l1.entries[1].kind, EntryKind::Point);
    }

    #[test]
    fn test_legacy_offsets_switch_to_mode_1() {
        let mut image = image_with_efh(0x3_0000, 0x5_0000);
        put(
            &mut image,
            0x3_0000,
            &directory(PSP_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x01, 0x100, 0x3_1000)]),
        );
        put(
            &mut image,
            0x5_0000,
            &directory(BHD_DIRECTORY_SIGNATURE, 0, &[bhd_entry(0x62, 0x100, 0x5_1000)]),
        );
        let set = parse(image, &GENOA).unwrap();
        assert_eq!(set.psp_directories[0].address_mode, AddressMode::FlashOffset);
        assert_eq!(set.bhd_directories[0].address_mode, AddressMode::FlashOffset);
        assert_eq!(set.settings.address_mode, AddressMode::FlashOffset);
    }

    #[test]
    fn test_ab_recovery() {
        let mut image = image_with_efh(0x3_0000, 0x5_0000);
        put(
            &mut image,
            0x3_0000,
            &directory(
                PSP_DIRECTORY_SIGNATURE,
                0,
                &[
                    psp_entry(0x48, 0x1000, 0x4_0000),
                    psp_entry(0x4a, 0x1000, 0x4_0000),
                    psp_entry(0x4a, 0x1000, 0x6_0000),
                ],
            ),
        );
        put(&mut image, 0x4_0000, &directory(PSP_LEVEL2_DIRECTORY_SIGNATURE, 0, &[]));
        put(&mut image, 0x6_0000, &directory(PSP_LEVEL2_DIRECTORY_SIGNATURE, 0, &[]));
        // Never read: A/B images carry their BIOS directories in the slots.
        put(&mut image, 0x5_0000, b"JUNK");
        let set = parse(image, &GENOA).unwrap();
        let labels: Vec<_> =
            set.psp_directories.iter().map(|d| (d.offset, d.level_type, d.level_index)).collect();
        assert_eq!(
            labels,
            vec![(0x3_0000, None, 0), (0x4_0000, Some(LevelType::A), 0), (0x6_0000, Some(LevelType::B), 0)]
        );
        assert!(set.bhd_directories.is_empty());
    }

    #[test]
    fn test_psp_image_fallback() {
        let mut image = vec![0u8; 0x1_0000];
        put(&mut image, 0, &directory(PSP_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x01, 0x100, 0x1000)]));
        let set = parse(image, &GENOA).unwrap();
        assert_eq!(set.image_size, 0);
        assert_eq!(set.settings.address_mode, AddressMode::FlashOffset);
        assert!(!set.settings.xor_bit24);
        assert_eq!(set.psp_directories[0].entries[0].address, 0x1000);

        assert!(matches!(parse(vec![0u8; 0x1_0000], &GENOA), Err(Error::EfsHeaderNotFound)));
    }

    #[test]
    fn test_relative_directory() {
        let mut image = image_with_efh(0x3_0000, 0);
        let info = 2u32 << 29;
        put(
            &mut image,
            0x3_0000,
            &directory(
                PSP_DIRECTORY_SIGNATURE,
                info,
                &[
                    psp_entry(0x01, 0x100, (2 << 62) | 0x1000),
                    psp_entry(0x03, 0x100, (1 << 62) | 0x5_0000),
                    psp_entry(0x08, 0x100, 0xff06_0000),
                    psp_entry(0x30, 0x100, (3 << 62) | 0x2000),
                ],
            ),
        );
        let set = parse(image, &GENOA).unwrap();
        let psp = &set.psp_directories[0];
        assert_eq!(psp.image_base, 0x3_0000);
        let decoded: Vec<_> =
            psp.entries.iter().map(|e| (e.address, e.address_mode, e.absolute)).collect();
        assert_eq!(
            decoded,
            vec![
                (0x3_1000, Some(AddressMode::DirectoryRelative), false),
                (0x5_0000, Some(AddressMode::FlashOffset), false),
                (0x6_0000, Some(AddressMode::PhysicalMmio), true),
                (0x3_2000, Some(AddressMode::SlotRelative), false),
            ]
        );
    }

    #[test]
    fn test_combo_root() {
        let mut image = image_with_efh(0x3_0000, 0);
        let mut combo = ComboDirectoryHeader::default();
        combo.cookie.set(PSP_COMBO_DIRECTORY_SIGNATURE);
        combo.total_entries.set(2);
        let mut bytes = combo.as_bytes().to_vec();
        for (id, location) in [(0x1234_5678u32, 0x7_0000u64), (GENOA.psp_id, 0x4_0000)] {
            let entry = ComboDirectoryEntry { id_select: 0.into(), id: id.into(), location: location.into() };
            bytes.extend_from_slice(entry.as_bytes());
        }
        put(&mut image, 0x3_0000, &bytes);
        put(&mut image, 0x4_0000, &directory(PSP_DIRECTORY_SIGNATURE, 0, &[]));
        let set = parse(image.clone(), &GENOA).unwrap();
        assert_eq!(set.psp_directories[0].offset, 0x4_0000);

        let other = ProgramProfile { psp_id: 0x0bad_0bad, ..GENOA };
        assert!(matches!(parse(image, &other), Err(Error::EfsHeaderNotFound)));
    }

    #[test]
    fn test_ish_slot_header() {
        let program = ProgramProfile { ish_structure: IshStructure::SlotHeader, ..GENOA };
        let mut image = image_with_efh(0x3_0000, 0);
        put(
            &mut image,
            0x3_0000,
            &directory(
                PSP_DIRECTORY_SIGNATURE,
                0,
                &[psp_entry(0x48, 0x1000, 0x4_0000), psp_entry(0x4a, 0x1000, 0x4_1000)],
            ),
        );
        let slot = |psp_id: u32| {
            let words = [0u32, 1, 2, 0xffff_ff03, 0x5_0000, psp_id, 0x10_0000, 0xffff_ffff];
            words.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>()
        };
        put(&mut image, 0x4_0000, &slot(GENOA.psp_id));
        put(&mut image, 0x4_1000, &slot(0x0bad_0bad));
        put(&mut image, 0x5_0000, &directory(PSP_LEVEL2_DIRECTORY_SIGNATURE, 0, &[]));
        let set = parse(image, &program).unwrap();
        assert_eq!(set.ish_headers.len(), 1);
        let ish = set.ish_headers[0];
        assert_eq!(ish.base, 0x4_0000);
        assert_eq!(ish.glitch_retries, 3);
        assert_eq!(ish.location, 0x5_0000);
        let labels: Vec<_> = set.psp_directories.iter().map(|d| (d.offset, d.level, d.level_type)).collect();
        assert_eq!(labels, vec![(0x3_0000, 1, None), (0x5_0000, 2, Some(LevelType::A))]);
    }

    #[test]
    fn test_bad_signatures() {
        let mut image = image_with_efh(0x3_0000, 0x5_0000);
        put(&mut image, 0x3_0000, &directory(PSP_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x40, 0x1000, 0x4_0000)]));
        put(&mut image, 0x4_0000, b"NOPE");
        assert!(matches!(
            parse(image.clone(), &GENOA),
            Err(Error::SignatureVerifyFail { kind: "PSP", offset: 0x4_0000, .. })
        ));
        put(&mut image, 0x3_0000, &directory(PSP_DIRECTORY_SIGNATURE, 0, &[]));
        put(&mut image, 0x5_0000, b"NOPE");
        assert!(matches!(parse(image, &GENOA), Err(Error::SignatureVerifyFail { kind: "BIOS", .. })));
    }

    #[test]
    fn test_nesting_limit() {
        let mut image = image_with_efh(0x3_0000, 0);
        // A level 2 pointer back at its own directory.
        put(&mut image, 0x3_0000, &directory(PSP_DIRECTORY_SIGNATURE, 0, &[psp_entry(0x40, 0x1000, 0x3_0000)]));
        assert!(matches!(parse(image, &GENOA), Err(Error::DirectoryNestingTooDeep { .. })));
    }
}
