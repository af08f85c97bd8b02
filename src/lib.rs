#[cfg(test)]
#[macro_use]
extern crate memoffset;

mod adapters;
mod address;
mod amdfletcher32;
pub mod config;
pub mod directory;
mod efs;
pub mod entry;
pub mod export;
mod flash;
mod ondisk;
pub mod program;
#[cfg(feature = "serde")]
mod serializers;
mod types;
pub mod version;
pub mod writer;

pub use types::ErrorCategory;
pub use types::Result;
pub use types::Error;
pub use crate::adapters::XorBit24FlashAdapter;
pub use crate::address::{align_up, decode_location, encode_location, AddressFrame, LocationTarget};
pub use crate::amdfletcher32::fletcher32;
pub use crate::efs::Efs;
pub use crate::efs::ParsedDirectory;
pub use crate::efs::ParsedDirectorySet;
pub use crate::efs::ParsedEntry;
pub use crate::flash::{BinaryImage, FlashRead, FlashWrite, Location};
pub use ondisk::*;
