//! Fixed-width binary values.
//!
//! Every value the simulator touches (registers, memory cells, instruction words, addresses)
//! is a fixed-width vector of bits. This module consists of:
//! - [`Bits`]: the generic bit vector, stored most significant bit first,
//!     with the [`Byte`] and [`DoubleWord`] aliases.
//! - [`Address`]: an unsigned 32-bit address tagged with the address space it belongs to
//!     ([`VirtualAddress`] or [`PhysicalAddress`]).
//! - [`AddressSpace`]: an inclusive range of addresses.
//!
//! Arithmetic over these values lives in [`crate::alu`].
//! Native integers only appear here as conversion helpers.
//!
//! ```
//! use sim32::bits::DoubleWord;
//!
//! let word = DoubleWord::from_integer(-2).unwrap();
//! assert_eq!(word.to_string(), "11111111111111111111111111111110");
//! assert_eq!(word.to_signed_integer(), -2);
//! assert_eq!(word.to_unsigned_integer(), 0xFFFF_FFFE);
//! ```

use std::marker::PhantomData;

/// A fixed-width vector of `N` bits.
///
/// Index 0 holds the most significant bit and index `N - 1` holds the least significant bit.
/// The width is part of the type, so a vector can only be rebuilt from
/// a slice or string of the same width (see [`Bits::try_from_slice`] and [`str::parse`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bits<const N: usize>([bool; N]);

/// An 8-bit value.
pub type Byte = Bits<8>;
/// A 32-bit value.
pub type DoubleWord = Bits<32>;

/// A bit vector was built from a source of the wrong length.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WidthMismatch {
    /// The width of the target vector.
    pub expected: usize,
    /// The width of the source.
    pub found: usize
}
impl std::fmt::Display for WidthMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected a {}-bit value, found {} bits", self.expected, self.found)
    }
}
impl std::error::Error for WidthMismatch {}

/// An integer could not be represented in the requested bit vector.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct IntegerOutOfRange {
    /// The integer that was provided.
    pub value: i128,
    /// The width of the target vector.
    pub width: usize
}
impl std::fmt::Display for IntegerOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} does not fit in {} bits", self.value, self.width)
    }
}
impl std::error::Error for IntegerOutOfRange {}

/// Errors from parsing a string of `0`s and `1`s into a [`Bits`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseBitsErr {
    /// The string did not have exactly `N` digits.
    Width(WidthMismatch),
    /// The string had a character other than `0` or `1`.
    InvalidDigit(char)
}
impl std::fmt::Display for ParseBitsErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseBitsErr::Width(e)        => e.fmt(f),
            ParseBitsErr::InvalidDigit(c) => write!(f, "invalid binary digit {c:?}"),
        }
    }
}
impl std::error::Error for ParseBitsErr {}

impl<const N: usize> Bits<N> {
    /// The number of bits in this vector.
    pub const WIDTH: usize = N;

    /// Creates a vector with every bit cleared.
    pub const fn zero() -> Self {
        Self([false; N])
    }
    /// Creates a vector with every bit set.
    pub const fn ones() -> Self {
        Self([true; N])
    }
    /// Creates a vector from an array of bits (most significant first).
    pub const fn from_array(bits: [bool; N]) -> Self {
        Self(bits)
    }
    /// Creates a vector from a slice of bits (most significant first),
    /// failing if the slice is not exactly `N` bits long.
    pub fn try_from_slice(bits: &[bool]) -> Result<Self, WidthMismatch> {
        <[bool; N]>::try_from(bits)
            .map(Self)
            .map_err(|_| WidthMismatch { expected: N, found: bits.len() })
    }

    /// Creates a vector holding the unsigned representation of `value`.
    pub fn from_unsigned(value: u64) -> Result<Self, IntegerOutOfRange> {
        if N < 64 && value >> N != 0 {
            return Err(IntegerOutOfRange { value: i128::from(value), width: N });
        }
        Ok(Self(std::array::from_fn(|i| {
            let shift = N - 1 - i;
            shift < 64 && (value >> shift) & 1 == 1
        })))
    }
    /// Creates a vector holding the two's complement representation of `value`.
    pub fn from_signed(value: i64) -> Result<Self, IntegerOutOfRange> {
        let fits = N >= 64 || {
            let half = 1i128 << (N - 1);
            (-half..half).contains(&i128::from(value))
        };
        if !fits {
            return Err(IntegerOutOfRange { value: i128::from(value), width: N });
        }
        Ok(Self(std::array::from_fn(|i| {
            // Arithmetic shift keeps the sign for bits above 64.
            let shift = (N - 1 - i).min(63);
            (value >> shift) & 1 == 1
        })))
    }

    /// Reads the bits as an unsigned integer.
    ///
    /// Only meaningful for `N <= 64`.
    pub fn to_unsigned_integer(&self) -> u64 {
        self.0.iter().fold(0, |acc, &b| (acc << 1) | u64::from(b))
    }
    /// Reads the bits as a two's complement integer.
    ///
    /// Only meaningful for `N <= 63`.
    pub fn to_signed_integer(&self) -> i64 {
        let unsigned = self.to_unsigned_integer() as i64;
        match self.msb() {
            true  => unsigned - (1i64 << N),
            false => unsigned,
        }
    }

    /// Gets the bit at index `i` (0 = most significant).
    pub fn bit(&self, i: usize) -> bool {
        self.0[i]
    }
    /// Sets the bit at index `i` (0 = most significant).
    pub fn set_bit(&mut self, i: usize, value: bool) {
        self.0[i] = value;
    }
    /// The most significant bit.
    pub fn msb(&self) -> bool {
        self.0[0]
    }
    /// The least significant bit.
    pub fn lsb(&self) -> bool {
        self.0[N - 1]
    }
    /// Views the bits as a slice (most significant first).
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
    /// Iterates over the bits, most significant first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item=bool> + ExactSizeIterator + '_ {
        self.0.iter().copied()
    }
    /// Whether every bit is cleared.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| !b)
    }
    /// Counts the set bits.
    pub fn count_ones(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    /// Extracts the `M` bits starting at index `start`.
    ///
    /// # Panics
    ///
    /// Panics if `start + M > N`.
    pub fn field<const M: usize>(&self, start: usize) -> Bits<M> {
        assert!(start + M <= N, "field {start}..{} is out of bounds for a {N}-bit value", start + M);
        Bits(std::array::from_fn(|i| self.0[start + i]))
    }
    /// Returns a copy with the `M` bits starting at index `start` replaced by `value`.
    ///
    /// # Panics
    ///
    /// Panics if `start + M > N`.
    pub fn with_field<const M: usize>(mut self, start: usize, value: Bits<M>) -> Self {
        assert!(start + M <= N, "field {start}..{} is out of bounds for a {N}-bit value", start + M);
        self.0[start..start + M].copy_from_slice(&value.0);
        self
    }
    /// The `M` most significant bits.
    pub fn most_significant<const M: usize>(&self) -> Bits<M> {
        self.field(0)
    }
    /// The `M` least significant bits.
    pub fn least_significant<const M: usize>(&self) -> Bits<M> {
        self.field(N - M)
    }
    /// Widens to `M` bits, filling the new high bits with zeros.
    ///
    /// # Panics
    ///
    /// Panics if `M < N`.
    pub fn zero_extend<const M: usize>(&self) -> Bits<M> {
        Bits::<M>::zero().with_field(M - N, *self)
    }
    /// Widens to `M` bits, filling the new high bits with the sign bit.
    ///
    /// # Panics
    ///
    /// Panics if `M < N`.
    pub fn sign_extend<const M: usize>(&self) -> Bits<M> {
        let fill = match self.msb() {
            true  => Bits::<M>::ones(),
            false => Bits::<M>::zero(),
        };
        fill.with_field(M - N, *self)
    }

    /// Shifts every bit one place towards the most significant end,
    /// shifting `fill` in at the least significant end.
    pub fn shift_left(&self, fill: bool) -> Self {
        Self(std::array::from_fn(|i| match i + 1 < N {
            true  => self.0[i + 1],
            false => fill,
        }))
    }
    /// Shifts every bit one place towards the least significant end,
    /// shifting `fill` in at the most significant end.
    pub fn shift_right(&self, fill: bool) -> Self {
        Self(std::array::from_fn(|i| match i {
            0 => fill,
            _ => self.0[i - 1],
        }))
    }
    /// Inverts every bit.
    pub fn invert(&self) -> Self {
        Self(self.0.map(|b| !b))
    }
}

impl DoubleWord {
    /// Creates a double word from an integer.
    ///
    /// Negative integers (down to `-2^31`) are stored in two's complement,
    /// non-negative integers (up to `2^32 - 1`) are stored unsigned.
    pub fn from_integer(value: i64) -> Result<Self, IntegerOutOfRange> {
        match value < 0 {
            true  => Self::from_signed(value),
            false => Self::from_unsigned(value as u64),
        }
    }
    /// Creates a double word from a `u32`. This cannot fail.
    pub fn from_u32(value: u32) -> Self {
        Self(std::array::from_fn(|i| (value >> (31 - i)) & 1 == 1))
    }
    /// Reads the double word as a `u32`.
    pub fn to_u32(&self) -> u32 {
        self.0.iter().fold(0, |acc, &b| (acc << 1) | u32::from(b))
    }
    /// The most significant byte.
    pub fn most_significant_byte(&self) -> Byte {
        self.most_significant()
    }
    /// The least significant byte.
    pub fn least_significant_byte(&self) -> Byte {
        self.least_significant()
    }
    /// Splits the double word into bytes, most significant first.
    pub fn to_bytes(&self) -> [Byte; 4] {
        std::array::from_fn(|i| self.field(8 * i))
    }
    /// Joins bytes (most significant first) into a double word.
    pub fn from_bytes(bytes: [Byte; 4]) -> Self {
        bytes.iter()
            .enumerate()
            .fold(Self::zero(), |acc, (i, &b)| acc.with_field(8 * i, b))
    }
}

impl Byte {
    /// Creates a byte from a `u8`. This cannot fail.
    pub fn from_u8(value: u8) -> Self {
        Self(std::array::from_fn(|i| (value >> (7 - i)) & 1 == 1))
    }
    /// Reads the byte as a `u8`.
    pub fn to_u8(&self) -> u8 {
        self.0.iter().fold(0, |acc, &b| (acc << 1) | u8::from(b))
    }
}

impl<const N: usize> Default for Bits<N> {
    fn default() -> Self {
        Self::zero()
    }
}
impl<const N: usize> std::fmt::Display for Bits<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;

        self.0.iter()
            .try_for_each(|&b| f.write_char(if b { '1' } else { '0' }))
    }
}
impl<const N: usize> std::fmt::Debug for Bits<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bits<{N}>({self})")
    }
}
impl<const N: usize> std::str::FromStr for Bits<N> {
    type Err = ParseBitsErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = s.chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                c   => Err(ParseBitsErr::InvalidDigit(c)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::try_from_slice(&bits).map_err(ParseBitsErr::Width)
    }
}
impl<const N: usize> TryFrom<&[bool]> for Bits<N> {
    type Error = WidthMismatch;

    fn try_from(value: &[bool]) -> Result<Self, Self::Error> {
        Self::try_from_slice(value)
    }
}

/// Marker for the address space an [`Address`] belongs to.
pub trait Space: Copy + Eq + std::hash::Hash + std::fmt::Debug + 'static {
    /// Name used when printing addresses of this space.
    const NAME: &'static str;
}
/// The virtual address space (what programs see).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Virtual;
impl Space for Virtual {
    const NAME: &'static str = "virtual";
}
/// The physical address space (what the memory store sees).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Physical;
impl Space for Physical {
    const NAME: &'static str = "physical";
}

/// An unsigned 32-bit address in the address space `S`.
///
/// Addresses of different spaces are different types, so a [`VirtualAddress`]
/// can never be handed to something expecting a [`PhysicalAddress`] by accident.
/// Crossing spaces is explicit, either through the MMU or through [`Address::identity_mapped`].
///
/// ```
/// use sim32::bits::VirtualAddress;
///
/// assert!(VirtualAddress::from_integer(0xFFFF_FFFF).is_ok());
/// assert!(VirtualAddress::from_integer(0x1_0000_0000).is_err());
/// assert!(VirtualAddress::from_integer(-1).is_err());
/// ```
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct Address<S: Space> {
    bits: DoubleWord,
    space: PhantomData<S>
}
/// An address in the virtual address space.
pub type VirtualAddress = Address<Virtual>;
/// An address in the physical address space.
pub type PhysicalAddress = Address<Physical>;

impl<S: Space> Address<S> {
    /// The address `0`.
    pub fn zero() -> Self {
        Self::from_double_word(DoubleWord::zero())
    }
    /// Creates an address from an integer, failing for negative integers
    /// and integers above `0xFFFF_FFFF`.
    pub fn from_integer(value: i64) -> Result<Self, IntegerOutOfRange> {
        match value < 0 {
            true  => Err(IntegerOutOfRange { value: i128::from(value), width: 32 }),
            false => DoubleWord::from_unsigned(value as u64).map(Self::from_double_word),
        }
    }
    /// Creates an address from a `u32`. This cannot fail.
    pub fn from_u32(value: u32) -> Self {
        Self::from_double_word(DoubleWord::from_u32(value))
    }
    /// Reinterprets a raw double word as an address of this space.
    pub fn from_double_word(bits: DoubleWord) -> Self {
        Self { bits, space: PhantomData }
    }
    /// The raw bits of this address.
    pub fn to_double_word(self) -> DoubleWord {
        self.bits
    }
    /// The address as an integer.
    pub fn to_integer(self) -> u32 {
        self.bits.to_u32()
    }
    /// Adds a (two's complement) displacement to this address, wrapping around the address space.
    ///
    /// This uses the ripple-carry adder and never touches any flags.
    pub fn wrapping_offset(self, displacement: DoubleWord) -> Self {
        Self::from_double_word(crate::alu::ripple(&self.bits, &displacement, false).0)
    }
    /// Adds an unsigned displacement to this address, wrapping around the address space.
    pub fn wrapping_add(self, displacement: u32) -> Self {
        self.wrapping_offset(DoubleWord::from_u32(displacement))
    }
}
impl VirtualAddress {
    /// Maps this address onto the physical address with the same bits.
    ///
    /// This is the translation used while memory virtualization is disabled.
    pub fn identity_mapped(self) -> PhysicalAddress {
        PhysicalAddress::from_double_word(self.bits)
    }
}
impl<S: Space> Default for Address<S> {
    fn default() -> Self {
        Self::zero()
    }
}
impl<S: Space> std::fmt::Display for Address<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.to_integer())
    }
}
impl<S: Space> std::fmt::Debug for Address<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({self})", S::NAME)
    }
}
impl<S: Space> PartialOrd for Address<S> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<S: Space> Ord for Address<S> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_integer().cmp(&other.to_integer())
    }
}

/// An inclusive, immutable range `[low, high]` of addresses in space `S`.
///
/// These describe regions such as a loaded code segment or a page table.
///
/// ```
/// use sim32::bits::{AddressSpace, VirtualAddress};
///
/// let seg = AddressSpace::new(VirtualAddress::from_u32(0x1000), VirtualAddress::from_u32(0x1FFF)).unwrap();
/// assert_eq!(seg.size(), 0x1000);
/// assert!(seg.in_range(VirtualAddress::from_u32(0x1FFF)));
/// assert!(!seg.in_range(VirtualAddress::from_u32(0x2000)));
/// ```
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct AddressSpace<S: Space> {
    low: Address<S>,
    high: Address<S>
}
impl<S: Space> AddressSpace<S> {
    /// Creates the range `[low, high]`, returning `None` if `low > high`.
    pub fn new(low: Address<S>, high: Address<S>) -> Option<Self> {
        (low <= high).then_some(Self { low, high })
    }
    /// The lowest address in the range.
    pub fn low(&self) -> Address<S> {
        self.low
    }
    /// The highest address in the range.
    pub fn high(&self) -> Address<S> {
        self.high
    }
    /// The number of addresses in the range.
    pub fn size(&self) -> u64 {
        u64::from(self.high.to_integer()) - u64::from(self.low.to_integer()) + 1
    }
    /// Whether `addr` falls within the range.
    pub fn in_range(&self, addr: Address<S>) -> bool {
        (self.low..=self.high).contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_signed_round_trip() {
        for n in [0, 1, -1, 2, -2, 100, -100, i64::from(i32::MAX), i64::from(i32::MIN)] {
            let w = DoubleWord::from_integer(n).unwrap();
            assert_eq!(w.to_signed_integer(), n, "{n}");
        }

        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..1000 {
            let n = i64::from(rng.gen::<i32>());
            assert_eq!(DoubleWord::from_integer(n).unwrap().to_signed_integer(), n);
        }
    }

    #[test]
    fn test_unsigned_address_round_trip() {
        for n in [0u32, 1, 12, 0x7FFF_FFFF, 0x8000_0000, u32::MAX] {
            let a = VirtualAddress::from_integer(i64::from(n)).unwrap();
            assert_eq!(a.to_integer(), n);
        }

        let mut rng = StdRng::seed_from_u64(0xADD7);
        for _ in 0..1000 {
            let n: u32 = rng.gen();
            assert_eq!(PhysicalAddress::from_integer(i64::from(n)).unwrap().to_integer(), n);
        }
    }

    #[test]
    fn test_integer_range() {
        assert!(DoubleWord::from_integer(-(1 << 31)).is_ok());
        assert!(DoubleWord::from_integer(-(1 << 31) - 1).is_err());
        assert!(DoubleWord::from_integer(0xFFFF_FFFF).is_ok());
        assert!(DoubleWord::from_integer(0x1_0000_0000).is_err());

        assert!(VirtualAddress::from_integer(-1).is_err());
        assert!(Byte::from_unsigned(255).is_ok());
        assert!(Byte::from_unsigned(256).is_err());
        assert_eq!(Byte::from_signed(-128).unwrap().to_u8(), 0x80);
        assert!(Byte::from_signed(128).is_err());
    }

    #[test]
    fn test_width_mismatch() {
        let err = DoubleWord::try_from_slice(&[true; 8]).unwrap_err();
        assert_eq!(err, WidthMismatch { expected: 32, found: 8 });
        assert!(Byte::try_from_slice(&[false; 8]).is_ok());

        assert_eq!(
            "0101".parse::<Byte>(),
            Err(ParseBitsErr::Width(WidthMismatch { expected: 8, found: 4 }))
        );
        assert_eq!("0101010x".parse::<Byte>(), Err(ParseBitsErr::InvalidDigit('x')));
        assert_eq!("01010101".parse::<Byte>().map(|b| b.to_u8()), Ok(0x55));
    }

    #[test]
    fn test_slicing() {
        let w = DoubleWord::from_u32(0x12_34_56_78);
        assert_eq!(w.most_significant_byte().to_u8(), 0x12);
        assert_eq!(w.least_significant_byte().to_u8(), 0x78);
        assert_eq!(w.most_significant::<20>().to_unsigned_integer(), 0x12345);
        assert_eq!(w.least_significant::<12>().to_unsigned_integer(), 0x678);
        assert_eq!(w.to_bytes().map(|b| b.to_u8()), [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(DoubleWord::from_bytes(w.to_bytes()), w);

        let b = Byte::from_u8(0x80);
        assert_eq!(b.sign_extend::<32>().to_u32(), 0xFFFF_FF80);
        assert_eq!(b.zero_extend::<32>().to_u32(), 0x0000_0080);
    }

    #[test]
    fn test_shifts() {
        let b = Byte::from_u8(0b1000_0001);
        assert_eq!(b.shift_left(false).to_u8(), 0b0000_0010);
        assert_eq!(b.shift_right(true).to_u8(), 0b1100_0000);
        assert_eq!(b.invert().to_u8(), 0b0111_1110);
    }

    #[test]
    fn test_address_space() {
        let lo = PhysicalAddress::from_u32(0x10);
        let hi = PhysicalAddress::from_u32(0x1F);
        assert!(AddressSpace::new(hi, lo).is_none());

        let space = AddressSpace::new(lo, hi).unwrap();
        assert_eq!(space.size(), 16);
        assert!(space.in_range(lo));
        assert!(space.in_range(hi));
        assert!(!space.in_range(PhysicalAddress::from_u32(0x20)));

        let all = AddressSpace::new(VirtualAddress::zero(), VirtualAddress::from_u32(u32::MAX)).unwrap();
        assert_eq!(all.size(), 1 << 32);
    }

    #[test]
    fn test_address_offset() {
        let a = VirtualAddress::from_u32(0xFFFF_FFFC);
        assert_eq!(a.wrapping_add(4).to_integer(), 0);
        assert_eq!(a.wrapping_offset(DoubleWord::from_integer(-4).unwrap()).to_integer(), 0xFFFF_FFF8);
        assert_eq!(a.identity_mapped().to_integer(), 0xFFFF_FFFC);
    }
}
