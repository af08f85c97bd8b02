use core::ops::{Add, BitAnd, BitOr, Shl, Shr};
use fletcher::generic_fletcher::{Fletcher, FletcherAccumulator};

/// Accumulator word of the AMD variant: sums wrap instead of overflowing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sum32(u32);

macro_rules! sum32_op {
    ($Trait:ident, $method:ident, $op:expr) => {
        impl $Trait for Sum32 {
            type Output = Self;
            fn $method(self, other: Self) -> Self {
                Self($op(self.0, other.0))
            }
        }
    };
}

sum32_op!(Add, add, u32::wrapping_add);
sum32_op!(BitAnd, bitand, |a: u32, b: u32| a & b);
sum32_op!(BitOr, bitor, |a: u32, b: u32| a | b);
sum32_op!(Shr, shr, |a: u32, b: u32| a >> b);
sum32_op!(Shl, shl, |a: u32, b: u32| a << b);

impl From<u16> for Sum32 {
    fn from(word: u16) -> Self {
        Self(word.into())
    }
}

impl FletcherAccumulator<u16> for Sum32 {
    fn default_value() -> Self {
        Self(0xffff)
    }

    /// Largest run of words whose sums cannot overflow before reduction.
    fn max_chunk_size() -> usize {
        359
    }

    fn combine(lower: &Self, upper: &Self) -> Self {
        *lower | (*upper << Self(16))
    }

    fn reduce(self) -> Self {
        (self & Self(0xffff)) + (self >> Self(16))
    }
}

pub type AmdFletcher32 = Fletcher<Sum32, u16>;

/// Checksums DATA as little-endian 16 bit words. A trailing odd byte is not
/// part of any word and is ignored.
pub fn fletcher32(data: &[u8]) -> u32 {
    let words: Vec<u16> = data
        .chunks_exact(2)
        .map(|word| u16::from_le_bytes([word[0], word[1]]))
        .collect();
    let mut checksummer = AmdFletcher32::new();
    checksummer.update(&words);
    checksummer.value().0
}
