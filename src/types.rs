use std::path::PathBuf;

/// Which part of the pipeline rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
	/// Malformed or contradictory declarative input.
	Config,
	/// Malformed binary input.
	Format,
	/// A layout or file does not fit its reserved region.
	Capacity,
	Io,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("I/O error on {path:?}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("XML syntax error: {0}")]
	Xml(#[from] quick_xml::Error),

	// Configuration
	#[error("unrecognized tag <{tag}>")]
	UnrecognizedTag { tag: String },
	#[error("unrecognized attribute {attribute} in <{tag}>")]
	UnrecognizedAttribute { tag: String, attribute: String },
	#[error("<{tag}> is missing the required attribute {attribute}")]
	MissingAttribute { tag: String, attribute: &'static str },
	#[error("<{tag}> attribute {attribute}={value:?} is invalid")]
	InvalidAttribute { tag: String, attribute: String, value: String },
	#[error("<{tag}> field {field}=0x{value:x} exceeds 0x{limit:x}")]
	FieldOutOfRange { tag: String, field: &'static str, value: u64, limit: u64 },
	#[error("<{tag}> {attribute}=0x{value:x} must be 0x1000 aligned")]
	Misaligned { tag: String, attribute: &'static str, value: u64 },
	#[error("<{tag}>: {attribute} requires Base to be declared")]
	BaseRequired { tag: String, attribute: &'static str },
	#[error("region [0x{a_start:x}, 0x{a_end:x}] overlaps region [0x{b_start:x}, 0x{b_end:x}]")]
	Overlap { a_start: u64, a_end: u64, b_start: u64, b_end: u64 },
	#[error("duplicate entry type 0x{type_:02x} (rom id {rom_id}, instance {instance}, sub program {sub_program})")]
	Duplicate { type_: u8, rom_id: u8, instance: u8, sub_program: u8 },
	#[error("entry 0x0 is not the first entry in the PSP level 1 directory")]
	AmdPublicKeyNotFirst,
	#[error("Copy is only supported on level 2 directories (found level {level})")]
	CopyNotLevel2 { level: u8 },
	#[error("Copy found no earlier level 2 <{tag}> to copy")]
	CopySourceNotFound { tag: String },
	#[error("image entry 0x{type_:02x} must not carry an Address in a dynamically laid out directory")]
	UnexpectedAddress { type_: u8 },
	#[error("image entry 0x{type_:02x} needs an Address in a fixed layout directory")]
	AddressRequired { type_: u8 },
	#[error("{path:?} does not exist and no Size was declared")]
	EntryFileMissing { path: PathBuf },
	#[error("address mode {mode} is not supported in {context}")]
	UnsupportedAddressMode { mode: u8, context: &'static str },
	#[error("mode 3 entry 0x{type_:02x} needs the directory to declare ImageBase")]
	ImageBaseRequired { type_: u8 },
	#[error("offset 0x{offset:x} is outside the 16 MiB MMIO window")]
	MmioOutOfRange { offset: u64 },
	#[error("address 0x{address:x} lies below its relative base 0x{base:x}")]
	AddressBelowBase { address: u64, base: u64 },
	#[error("unsupported directory level {level}")]
	UnsupportedLevel { level: u8 },
	#[error("unknown program {name:?}")]
	UnknownProgram { name: String },

	// Format
	#[error("no embedded firmware structure or PSP directory found")]
	EfsHeaderNotFound,
	#[error("{kind} directory signature verify fail at 0x{offset:x} (found 0x{signature:08x})")]
	SignatureVerifyFail { kind: &'static str, offset: u64, signature: u32 },
	#[error("directory at 0x{offset:x} uses unsupported address mode {mode}")]
	UnsupportedDirectoryAddressMode { offset: u64, mode: u8 },
	#[error("combo directory at 0x{offset:x} has no entry for PSP id 0x{psp_id:08x}")]
	ComboEntryNotFound { offset: u64, psp_id: u32 },
	#[error("directories nest deeper than {depth} levels at 0x{offset:x}")]
	DirectoryNestingTooDeep { offset: u64, depth: usize },
	#[error("read of 0x{len:x} bytes at 0x{offset:x} is outside the image")]
	DirectoryRangeCheck { offset: u64, len: usize },
	#[error("physical address 0x{address:x} cannot be combined with XorBit24")]
	XorBit24PhysicalAddress { address: u64 },
	#[error("physical address 0x{address:x} does not map into an image of 0x{image_size:x} bytes")]
	AddressOutsideImage { address: u64, image_size: u64 },

	// Capacity
	#[error("directory at 0x{base:x} needs 0x{used:x} bytes but only 0x{available:x} are reserved")]
	DirectoryFull { base: u64, used: u64, available: u64 },
	#[error("{path:?} is 0x{size:x} bytes, larger than its declared size 0x{limit:x}")]
	EntryTooLarge { path: PathBuf, size: u64, limit: u64 },
	#[error("patch of 0x{len:x} bytes at 0x{offset:x} runs past the 0x{image_size:x} byte image")]
	PatchOutOfRange { offset: u64, len: usize, image_size: usize },
}

impl Error {
	pub fn category(&self) -> ErrorCategory {
		match self {
			Error::Io { .. } => ErrorCategory::Io,
			Error::Xml(_)
			| Error::UnrecognizedTag { .. }
			| Error::UnrecognizedAttribute { .. }
			| Error::MissingAttribute { .. }
			| Error::InvalidAttribute { .. }
			| Error::FieldOutOfRange { .. }
			| Error::Misaligned { .. }
			| Error::BaseRequired { .. }
			| Error::Overlap { .. }
			| Error::Duplicate { .. }
			| Error::AmdPublicKeyNotFirst
			| Error::CopyNotLevel2 { .. }
			| Error::CopySourceNotFound { .. }
			| Error::UnexpectedAddress { .. }
			| Error::AddressRequired { .. }
			| Error::EntryFileMissing { .. }
			| Error::UnsupportedAddressMode { .. }
			| Error::ImageBaseRequired { .. }
			| Error::MmioOutOfRange { .. }
			| Error::AddressBelowBase { .. }
			| Error::UnsupportedLevel { .. }
			| Error::UnknownProgram { .. } => ErrorCategory::Config,
			Error::EfsHeaderNotFound
			| Error::SignatureVerifyFail { .. }
			| Error::UnsupportedDirectoryAddressMode { .. }
			| Error::ComboEntryNotFound { .. }
			| Error::DirectoryNestingTooDeep { .. }
			| Error::DirectoryRangeCheck { .. }
			| Error::XorBit24PhysicalAddress { .. }
			| Error::AddressOutsideImage { .. } => ErrorCategory::Format,
			Error::DirectoryFull { .. }
			| Error::EntryTooLarge { .. }
			| Error::PatchOutOfRange { .. } => ErrorCategory::Capacity,
		}
	}

	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Error::Io { path: path.into(), source }
	}
}

pub type Result<Q> = core::result::Result<Q, Error>;
