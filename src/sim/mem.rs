//! The physical memory store.
//!
//! This module consists of:
//! - [`Memory`]: The byte-addressable store the MMU reads and writes after translation.
//! - [`SparseRam`]: A [`Memory`] which only keeps non-zero bytes.
//!
//! Words are stored big-endian: the most significant byte of a word sits at the lowest address.

use std::collections::BTreeMap;

use crate::bits::{Byte, DoubleWord, PhysicalAddress};

/// An access went past the highest address of a memory store.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AddressOutOfRange {
    /// The address accessed.
    pub address: PhysicalAddress,
    /// The highest valid address of the store.
    pub capacity: PhysicalAddress
}
impl std::fmt::Display for AddressOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "address {} is beyond the end of memory ({})", self.address, self.capacity)
    }
}
impl std::error::Error for AddressOutOfRange {}

/// A byte-addressable physical memory store.
///
/// Implementors provide byte accesses.
/// Word accesses are composed from four byte accesses in big-endian order.
pub trait Memory {
    /// The highest valid address (inclusive).
    fn capacity(&self) -> PhysicalAddress;

    /// Reads a byte. Cells that were never written read as zero.
    fn read_byte(&self, addr: PhysicalAddress) -> Result<Byte, AddressOutOfRange>;

    /// Writes a byte.
    fn write_byte(&mut self, addr: PhysicalAddress, data: Byte) -> Result<(), AddressOutOfRange>;

    /// Reads the word starting at `addr`.
    fn read_word(&self, addr: PhysicalAddress) -> Result<DoubleWord, AddressOutOfRange> {
        let mut bytes = [Byte::zero(); 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read_byte(addr.wrapping_add(i as u32))?;
        }
        Ok(DoubleWord::from_bytes(bytes))
    }

    /// Writes the word starting at `addr`.
    ///
    /// The whole word is bounds-checked before any byte is written.
    fn write_word(&mut self, addr: PhysicalAddress, data: DoubleWord) -> Result<(), AddressOutOfRange> {
        self.check_range(addr.wrapping_add(3))?;
        for (i, b) in data.to_bytes().into_iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u32), b)?;
        }
        Ok(())
    }

    /// Checks that `addr` is at most [`Memory::capacity`].
    fn check_range(&self, addr: PhysicalAddress) -> Result<(), AddressOutOfRange> {
        let capacity = self.capacity();
        match addr <= capacity {
            true  => Ok(()),
            false => Err(AddressOutOfRange { address: addr, capacity }),
        }
    }
}

/// Memory which only stores non-zero bytes.
///
/// Writing a zero byte removes its cell, so an untouched cell and a zeroed cell are indistinguishable.
///
/// ```
/// use sim32::bits::{Byte, PhysicalAddress};
/// use sim32::sim::mem::{Memory, SparseRam};
///
/// let mut ram = SparseRam::new(PhysicalAddress::from_u32(0xFFFF));
/// let addr = PhysicalAddress::from_u32(0x100);
///
/// assert_eq!(ram.read_byte(addr), Ok(Byte::zero()));
/// ram.write_byte(addr, Byte::from_u8(0x7F)).unwrap();
/// assert_eq!(ram.read_byte(addr), Ok(Byte::from_u8(0x7F)));
/// assert!(ram.read_byte(PhysicalAddress::from_u32(0x10000)).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct SparseRam {
    cells: BTreeMap<u32, Byte>,
    capacity: PhysicalAddress
}
impl SparseRam {
    /// Creates empty memory whose highest address is `capacity`.
    pub fn new(capacity: PhysicalAddress) -> Self {
        Self { cells: BTreeMap::new(), capacity }
    }

    /// The number of non-zero bytes stored.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether every byte is zero.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterates over every non-zero byte in address order.
    pub fn iter(&self) -> impl Iterator<Item=(PhysicalAddress, Byte)> + '_ {
        self.cells.iter().map(|(&a, &b)| (PhysicalAddress::from_u32(a), b))
    }

    /// Zeroes every byte.
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}
impl Memory for SparseRam {
    fn capacity(&self) -> PhysicalAddress {
        self.capacity
    }

    fn read_byte(&self, addr: PhysicalAddress) -> Result<Byte, AddressOutOfRange> {
        self.check_range(addr)?;
        Ok(self.cells.get(&addr.to_integer()).copied().unwrap_or_default())
    }

    fn write_byte(&mut self, addr: PhysicalAddress, data: Byte) -> Result<(), AddressOutOfRange> {
        self.check_range(addr)?;
        match data.is_zero() {
            true  => self.cells.remove(&addr.to_integer()),
            false => self.cells.insert(addr.to_integer(), data),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram() -> SparseRam {
        SparseRam::new(PhysicalAddress::from_u32(0xFF))
    }

    #[test]
    fn test_words_are_big_endian() {
        let mut ram = ram();
        let addr = PhysicalAddress::from_u32(0x10);
        ram.write_word(addr, DoubleWord::from_u32(0x1234_5678)).unwrap();

        assert_eq!(ram.read_byte(addr).unwrap().to_u8(), 0x12);
        assert_eq!(ram.read_byte(addr.wrapping_add(3)).unwrap().to_u8(), 0x78);
        assert_eq!(ram.read_word(addr).unwrap().to_u32(), 0x1234_5678);

        // unaligned
        assert_eq!(ram.read_word(addr.wrapping_add(1)).unwrap().to_u32(), 0x3456_7800);
    }

    #[test]
    fn test_zero_removes_cell() {
        let mut ram = ram();
        let addr = PhysicalAddress::from_u32(0x20);
        ram.write_word(addr, DoubleWord::from_u32(0x00FF_0001)).unwrap();
        assert_eq!(ram.len(), 2);

        ram.write_byte(addr.wrapping_add(1), Byte::zero()).unwrap();
        assert_eq!(ram.len(), 1);
        ram.write_word(addr, DoubleWord::zero()).unwrap();
        assert!(ram.is_empty());
    }

    #[test]
    fn test_bounds() {
        let mut ram = ram();
        let last = PhysicalAddress::from_u32(0xFF);

        // The capacity itself is a valid address.
        assert!(ram.write_byte(last, Byte::from_u8(1)).is_ok());
        assert_eq!(
            ram.read_byte(PhysicalAddress::from_u32(0x100)),
            Err(AddressOutOfRange { address: PhysicalAddress::from_u32(0x100), capacity: last })
        );

        // A word straddling the end fails without writing anything.
        assert!(ram.write_word(PhysicalAddress::from_u32(0xFE), DoubleWord::ones()).is_err());
        assert_eq!(ram.read_byte(PhysicalAddress::from_u32(0xFE)).unwrap(), Byte::zero());
        assert!(ram.read_word(PhysicalAddress::from_u32(0xFD)).is_err());
        assert!(ram.read_word(PhysicalAddress::from_u32(0xFC)).is_ok());
    }
}
