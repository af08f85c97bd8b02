use crate::flash::{FlashRead, FlashWrite, Location};
use crate::types::Result;

const BIT24: Location = 0x100_0000; // 16 MiB

/// This is a flash adapter that lets you address the other half of a 32 MiB flash image.
/// When enabled, every location has bit 24 toggled before it reaches the underlying storage,
/// so the lower 16 MiB and the upper 16 MiB swap places.
pub struct XorBit24FlashAdapter<T> {
    underlying: T,
    enabled: bool,
}

impl<T> XorBit24FlashAdapter<T> {
    pub fn new(underlying: T, enabled: bool) -> Self {
        Self { underlying, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn translate(&self, location: Location) -> Location {
        xor_bit24(location, self.enabled)
    }

    pub fn into_inner(self) -> T {
        self.underlying
    }
}

/// Toggles bit 24 of LOCATION iff ENABLED.
pub fn xor_bit24(location: Location, enabled: bool) -> Location {
    if enabled {
        location ^ BIT24
    } else {
        location
    }
}

impl<T: FlashRead> FlashRead for XorBit24FlashAdapter<T> {
    fn read_exact(&self, location: Location, buffer: &mut [u8]) -> Result<()> {
        self.underlying.read_exact(self.translate(location), buffer)
    }
}

impl<T: FlashWrite> FlashWrite for XorBit24FlashAdapter<T> {
    fn write_exact(&mut self, location: Location, buffer: &[u8]) -> Result<()> {
        let location = self.translate(location);
        self.underlying.write_exact(location, buffer)
    }
}
