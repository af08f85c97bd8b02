//! Byte storage the directory codec reads from and patches into.

use std::path::Path;

use crate::types::{Error, Result};

/// Byte offset into a flash image.
pub type Location = u64;

pub trait FlashRead {
    /// Fills BUFFER from LOCATION, or fails without partial reads.
    fn read_exact(&self, location: Location, buffer: &mut [u8]) -> Result<()>;
}

pub trait FlashWrite {
    fn write_exact(&mut self, location: Location, buffer: &[u8]) -> Result<()>;
}

impl<T: FlashRead + ?Sized> FlashRead for &T {
    fn read_exact(&self, location: Location, buffer: &mut [u8]) -> Result<()> {
        (**self).read_exact(location, buffer)
    }
}

impl<T: FlashWrite + ?Sized> FlashWrite for &mut T {
    fn write_exact(&mut self, location: Location, buffer: &[u8]) -> Result<()> {
        (**self).write_exact(location, buffer)
    }
}

fn checked_range(location: Location, len: usize, size: usize) -> Option<core::ops::Range<usize>> {
    let start = usize::try_from(location).ok()?;
    let end = start.checked_add(len)?;
    if end > size {
        None
    } else {
        Some(start..end)
    }
}

impl FlashRead for [u8] {
    fn read_exact(&self, location: Location, buffer: &mut [u8]) -> Result<()> {
        let range = checked_range(location, buffer.len(), self.len())
            .ok_or(Error::DirectoryRangeCheck { offset: location, len: buffer.len() })?;
        buffer.copy_from_slice(&self[range]);
        Ok(())
    }
}

/// A complete firmware image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    data: Vec<u8>,
}

impl BinaryImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn load(path: &Path) -> Result<Self> {
        std::fs::read(path).map(Self::new).map_err(|e| Error::io(path, e))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl FlashRead for BinaryImage {
    fn read_exact(&self, location: Location, buffer: &mut [u8]) -> Result<()> {
        self.data[..].read_exact(location, buffer)
    }
}

impl FlashWrite for BinaryImage {
    fn write_exact(&mut self, location: Location, buffer: &[u8]) -> Result<()> {
        let range = checked_range(location, buffer.len(), self.data.len()).ok_or(
            Error::PatchOutOfRange {
                offset: location,
                len: buffer.len(),
                image_size: self.data.len(),
            },
        )?;
        self.data[range].copy_from_slice(buffer);
        Ok(())
    }
}
