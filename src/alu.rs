//! The arithmetic-logic unit.
//!
//! Every result here is computed bit by bit from [`Bits`] vectors:
//! a ripple-carry adder, Booth's multiplication and restoring division.
//! Native integer arithmetic is never used for results.
//!
//! The [`Alu`] borrows an [`Eflags`] register and updates it as a side channel of every operation.
//!
//! ```
//! use sim32::alu::Alu;
//! use sim32::bits::DoubleWord;
//! use sim32::sim::regs::Eflags;
//!
//! let mut flags = Eflags::default();
//! let max = DoubleWord::from_integer(i64::from(i32::MAX)).unwrap();
//!
//! let sum = Alu::new(&mut flags).add(&max, &max);
//! assert_eq!(sum.to_signed_integer(), -2);
//! assert!(flags.overflow());
//! assert!(!flags.carry());
//! ```

use crate::bits::{Bits, DoubleWord};
use crate::sim::regs::Eflags;

/// Errors the ALU can raise.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AluErr {
    /// The divisor of a division was zero.
    DivisionByZero
}
impl std::fmt::Display for AluErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AluErr::DivisionByZero => f.write_str("division by zero"),
        }
    }
}
impl std::error::Error for AluErr {}

/// Adds two `N`-bit vectors with a ripple-carry adder.
///
/// `chain` must hold `N + 1` entries. `chain[0]` is the carry in,
/// and `chain[k + 1]` is the carry out of the `k`-th least significant bit.
fn ripple_into<const N: usize>(a: &Bits<N>, b: &Bits<N>, carry_in: bool, chain: &mut [bool]) -> Bits<N> {
    debug_assert_eq!(chain.len(), N + 1);

    let mut sum = Bits::<N>::zero();
    chain[0] = carry_in;
    for k in 0..N {
        let i = N - 1 - k;
        let (x, y, c) = (a.bit(i), b.bit(i), chain[k]);

        sum.set_bit(i, x ^ y ^ c);
        chain[k + 1] = (x & y) | (c & (x ^ y));
    }
    sum
}

/// Adds two double words with a ripple-carry adder, from bit 31 up to bit 0.
///
/// This returns the sum and the 33-entry carry chain:
/// `chain[0]` is `carry_in`, and `chain[k + 1]` is the carry out of the `k`-th least significant bit.
/// So `chain[32]` is the carry out of the most significant bit, and `chain[31]` is the carry into it.
///
/// This does not touch any flags.
pub fn ripple(a: &DoubleWord, b: &DoubleWord, carry_in: bool) -> (DoubleWord, [bool; 33]) {
    let mut chain = [false; 33];
    let sum = ripple_into(a, b, carry_in, &mut chain);
    (sum, chain)
}

/// Computes the two's complement (`not(x) + 1`) of a value, without touching any flags.
pub fn twos_complement<const N: usize>(x: &Bits<N>) -> Bits<N> {
    let mut chain = vec![false; N + 1];
    ripple_into(&x.invert(), &Bits::zero(), true, &mut chain)
}

/// Whether the low byte of a value has an even number of ones.
fn even_parity(x: &DoubleWord) -> bool {
    x.least_significant_byte().count_ones() % 2 == 0
}

/// The arithmetic-logic unit, bound to the flags register it updates.
pub struct Alu<'f> {
    flags: &'f mut Eflags
}
impl<'f> Alu<'f> {
    /// Creates an ALU which updates the provided flags.
    pub fn new(flags: &'f mut Eflags) -> Self {
        Self { flags }
    }

    /// Sets ZF, SF and PF from a result.
    fn set_zsp(&mut self, result: &DoubleWord) {
        self.flags.set_zero(result.is_zero());
        self.flags.set_sign(result.msb());
        self.flags.set_parity(even_parity(result));
    }
    /// Runs the adder and sets every arithmetic flag from it.
    fn add_with_carry(&mut self, a: &DoubleWord, b: &DoubleWord, carry_in: bool) -> DoubleWord {
        let (sum, chain) = ripple(a, b, carry_in);
        self.flags.set_carry(chain[32]);
        self.flags.set_overflow(chain[32] != chain[31]);
        self.set_zsp(&sum);
        sum
    }

    /// `a + b`.
    pub fn add(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        self.add_with_carry(a, b, false)
    }
    /// `a + b + CF`.
    pub fn adc(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        let cf = self.flags.carry();
        self.add_with_carry(a, b, cf)
    }
    /// `a - b`, computed as `a + twos_complement(b)`.
    ///
    /// CF is the carry out of that addition.
    pub fn sub(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        self.add_with_carry(a, &twos_complement(b), false)
    }
    /// `a + twos_complement(b) + CF`.
    pub fn sbb(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        let cf = self.flags.carry();
        self.add_with_carry(a, &twos_complement(b), cf)
    }
    /// `not(x) + 1`, setting flags from that addition.
    pub fn neg(&mut self, x: &DoubleWord) -> DoubleWord {
        self.add_with_carry(&x.invert(), &DoubleWord::from_u32(1), false)
    }
    /// `x + 1`, leaving CF untouched.
    pub fn inc(&mut self, x: &DoubleWord) -> DoubleWord {
        let cf = self.flags.carry();
        let result = self.add(x, &DoubleWord::from_u32(1));
        self.flags.set_carry(cf);
        result
    }
    /// `x - 1`, leaving CF untouched.
    pub fn dec(&mut self, x: &DoubleWord) -> DoubleWord {
        let cf = self.flags.carry();
        let result = self.sub(x, &DoubleWord::from_u32(1));
        self.flags.set_carry(cf);
        result
    }
    /// Sets the flags of `a - b` without producing the result.
    pub fn cmp(&mut self, a: &DoubleWord, b: &DoubleWord) {
        self.sub(a, b);
    }

    /// Sets flags for a bitwise result: CF and OF clear, ZF/SF/PF from the result.
    fn logic(&mut self, result: DoubleWord) -> DoubleWord {
        self.flags.set_carry(false);
        self.flags.set_overflow(false);
        self.set_zsp(&result);
        result
    }
    /// Bitwise AND.
    pub fn and(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        self.logic(Bits::from_array(std::array::from_fn(|i| a.bit(i) & b.bit(i))))
    }
    /// Bitwise OR.
    pub fn or(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        self.logic(Bits::from_array(std::array::from_fn(|i| a.bit(i) | b.bit(i))))
    }
    /// Bitwise XOR.
    pub fn xor(&mut self, a: &DoubleWord, b: &DoubleWord) -> DoubleWord {
        self.logic(Bits::from_array(std::array::from_fn(|i| a.bit(i) ^ b.bit(i))))
    }
    /// Bitwise NOT.
    pub fn not(&mut self, x: &DoubleWord) -> DoubleWord {
        self.logic(x.invert())
    }

    /// Signed multiplication with Booth's algorithm, returning the low 32 bits of the product.
    ///
    /// The shift register holds the accumulator `A`, the multiplier `Q` and the extra bit `Q₋₁`.
    /// `A` carries one guard bit so that subtracting `i32::MIN` cannot overflow it.
    ///
    /// CF and OF are set when the high half of the 64-bit product is not
    /// the sign extension of the low half (i.e., when the result was truncated).
    /// ZF, SF and PF come from the truncated result.
    pub fn mul(&mut self, multiplicand: &DoubleWord, multiplier: &DoubleWord) -> DoubleWord {
        let m: Bits<33> = multiplicand.sign_extend();
        let neg_m = twos_complement(&m);

        let mut acc = Bits::<33>::zero();
        let mut q = *multiplier;
        let mut q_prev = false;
        let mut chain = [false; 34];

        for _ in 0..32 {
            match (q.lsb(), q_prev) {
                (false, true) => acc = ripple_into(&acc, &m, false, &mut chain),
                (true, false) => acc = ripple_into(&acc, &neg_m, false, &mut chain),
                _ => {}
            }
            // arithmetic shift right of A:Q:Q₋₁
            q_prev = q.lsb();
            q = q.shift_right(acc.lsb());
            acc = acc.shift_right(acc.msb());
        }

        let high: DoubleWord = acc.least_significant();
        let truncated = high.iter().any(|b| b != q.msb());
        self.flags.set_carry(truncated);
        self.flags.set_overflow(truncated);
        self.set_zsp(&q);
        q
    }

    /// Signed division with a restoring shift/subtract loop.
    ///
    /// This returns `(quotient, remainder)`. The quotient truncates towards zero,
    /// and the remainder takes the sign of the dividend.
    /// Only ZF, SF and PF are set (from the quotient); CF and OF are left as they were.
    pub fn div(&mut self, dividend: &DoubleWord, divisor: &DoubleWord) -> Result<(DoubleWord, DoubleWord), AluErr> {
        if divisor.is_zero() {
            return Err(AluErr::DivisionByZero);
        }

        let magnitude = |x: &DoubleWord| match x.msb() {
            true  => twos_complement(x),
            false => *x,
        };
        let n = magnitude(dividend);
        let d: Bits<33> = magnitude(divisor).zero_extend();
        let neg_d = twos_complement(&d);

        let mut rem = Bits::<33>::zero();
        let mut quot = DoubleWord::zero();
        let mut chain = [false; 34];
        for i in 0..32 {
            rem = rem.shift_left(n.bit(i));
            // rem - d, where the carry out means rem >= d
            let diff = ripple_into(&rem, &neg_d, false, &mut chain);
            let fits = chain[33];
            if fits {
                rem = diff;
            }
            quot.set_bit(i, fits);
        }

        let mut quotient = quot;
        if dividend.msb() != divisor.msb() {
            quotient = twos_complement(&quotient);
        }
        let mut remainder: DoubleWord = rem.least_significant();
        if dividend.msb() {
            remainder = twos_complement(&remainder);
        }

        self.set_zsp(&quotient);
        Ok((quotient, remainder))
    }

    /// The shift count encoded by an operand (its low 5 bits).
    fn shift_count(count: &DoubleWord) -> usize {
        count.least_significant::<5>().to_unsigned_integer() as usize
    }
    /// Shifts `x` one bit at a time, returning the result and the last bit shifted out.
    fn shift(x: &DoubleWord, count: usize, step: impl Fn(&DoubleWord) -> (DoubleWord, bool)) -> (DoubleWord, bool) {
        (0..count).fold((*x, false), |(acc, _), _| step(&acc))
    }
    /// Logical shift left.
    ///
    /// CF is the last bit shifted out; OF (1-bit shifts only) is the new MSB xor CF.
    /// A zero count leaves every flag alone.
    pub fn shl(&mut self, x: &DoubleWord, count: &DoubleWord) -> DoubleWord {
        let count = Self::shift_count(count);
        if count == 0 { return *x; }

        let (result, out) = Self::shift(x, count, |v| (v.shift_left(false), v.msb()));
        self.flags.set_carry(out);
        if count == 1 {
            self.flags.set_overflow(result.msb() != out);
        }
        self.set_zsp(&result);
        result
    }
    /// Logical shift right.
    ///
    /// CF is the last bit shifted out; OF (1-bit shifts only) is the original MSB.
    pub fn shr(&mut self, x: &DoubleWord, count: &DoubleWord) -> DoubleWord {
        let count = Self::shift_count(count);
        if count == 0 { return *x; }

        let (result, out) = Self::shift(x, count, |v| (v.shift_right(false), v.lsb()));
        self.flags.set_carry(out);
        if count == 1 {
            self.flags.set_overflow(x.msb());
        }
        self.set_zsp(&result);
        result
    }
    /// Arithmetic shift right.
    ///
    /// CF is the last bit shifted out; OF (1-bit shifts only) is cleared.
    pub fn sar(&mut self, x: &DoubleWord, count: &DoubleWord) -> DoubleWord {
        let count = Self::shift_count(count);
        if count == 0 { return *x; }

        let (result, out) = Self::shift(x, count, |v| (v.shift_right(v.msb()), v.lsb()));
        self.flags.set_carry(out);
        if count == 1 {
            self.flags.set_overflow(false);
        }
        self.set_zsp(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn dw(n: i64) -> DoubleWord {
        DoubleWord::from_integer(n).unwrap()
    }
    fn samples(seed: u64) -> impl Iterator<Item=DoubleWord> {
        let mut rng = StdRng::seed_from_u64(seed);
        let edges = [0u32, 1, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF];
        edges.into_iter()
            .chain(std::iter::repeat_with(move || rng.gen()).take(200))
            .map(DoubleWord::from_u32)
    }

    #[test]
    fn test_add_identities() {
        let mut flags = Eflags::default();
        let mut alu = Alu::new(&mut flags);
        for (a, b) in samples(1).zip(samples(2)) {
            assert_eq!(alu.add(&a, &DoubleWord::zero()), a);
            assert_eq!(alu.add(&a, &b), alu.add(&b, &a));
            assert_eq!(alu.add(&a, &b).to_u32(), a.to_u32().wrapping_add(b.to_u32()));
        }
    }

    #[test]
    fn test_sub_identities() {
        let mut flags = Eflags::default();
        for (a, b) in samples(3).zip(samples(4)) {
            let mut alu = Alu::new(&mut flags);
            assert_eq!(alu.sub(&a, &a), DoubleWord::zero());
            assert!(flags.zero());

            let mut alu = Alu::new(&mut flags);
            let diff = alu.sub(&a, &b);
            let neg_b = alu.neg(&b);
            assert_eq!(diff, alu.add(&a, &neg_b));
            assert_eq!(diff.to_u32(), a.to_u32().wrapping_sub(b.to_u32()));
        }
    }

    #[test]
    fn test_boolean_laws() {
        let mut flags = Eflags::default();
        let mut alu = Alu::new(&mut flags);
        for (a, b) in samples(5).zip(samples(6)) {
            let (not_a, not_b) = (alu.not(&a), alu.not(&b));
            assert_eq!(alu.not(&not_a), a);
            assert_eq!(alu.and(&a, &b), alu.and(&b, &a));
            assert_eq!(alu.or(&a, &b), alu.or(&b, &a));
            assert_eq!(alu.xor(&a, &a), DoubleWord::zero());

            // de Morgan
            let a_and_b = alu.and(&a, &b);
            assert_eq!(alu.not(&a_and_b), alu.or(&not_a, &not_b));

            assert_eq!(alu.and(&a, &b).to_u32(), a.to_u32() & b.to_u32());
            assert_eq!(alu.xor(&a, &b).to_u32(), a.to_u32() ^ b.to_u32());
        }
    }

    #[test]
    fn test_overflow_flags() {
        let mut flags = Eflags::default();
        let max = dw(i64::from(i32::MAX));
        let min = dw(i64::from(i32::MIN));

        Alu::new(&mut flags).add(&max, &max);
        assert!(flags.overflow());
        assert!(flags.sign());

        Alu::new(&mut flags).add(&dw(-1), &dw(1));
        assert!(flags.zero());
        assert!(flags.carry());
        assert!(!flags.overflow());

        Alu::new(&mut flags).sub(&min, &dw(1));
        assert!(flags.overflow());
        assert!(!flags.sign());

        // logic clears CF and OF
        Alu::new(&mut flags).or(&max, &dw(0));
        assert!(!flags.carry());
        assert!(!flags.overflow());
    }

    #[test]
    fn test_parity_low_byte() {
        let mut flags = Eflags::default();

        // 0x03 has two ones; the upper bytes have an odd count but are ignored.
        Alu::new(&mut flags).or(&DoubleWord::from_u32(0x0100_0003), &DoubleWord::zero());
        assert!(flags.parity());

        Alu::new(&mut flags).or(&DoubleWord::from_u32(0x0000_0007), &DoubleWord::zero());
        assert!(!flags.parity());

        Alu::new(&mut flags).or(&DoubleWord::zero(), &DoubleWord::zero());
        assert!(flags.parity());
    }

    #[test]
    fn test_carry_chain() {
        let (sum, chain) = ripple(&DoubleWord::from_u32(0xFFFF_FFFF), &DoubleWord::from_u32(1), false);
        assert!(sum.is_zero());
        assert!(!chain[0]);
        assert!(chain.iter().skip(1).all(|&c| c));

        let (sum, chain) = ripple(&DoubleWord::from_u32(2), &DoubleWord::from_u32(2), true);
        assert_eq!(sum.to_u32(), 5);
        assert_eq!(&chain[..4], &[true, false, true, false]);
    }

    #[test]
    fn test_adc_sbb() {
        let mut flags = Eflags::default();
        flags.set_carry(true);
        assert_eq!(Alu::new(&mut flags).adc(&dw(2), &dw(3)).to_u32(), 6);
        assert!(!flags.carry());

        flags.set_carry(true);
        assert_eq!(Alu::new(&mut flags).sbb(&dw(5), &dw(3)).to_u32(), 3);
    }

    #[test]
    fn test_inc_dec_preserve_carry() {
        let mut flags = Eflags::default();
        flags.set_carry(true);
        assert_eq!(Alu::new(&mut flags).inc(&dw(0)).to_u32(), 1);
        assert!(flags.carry());

        flags.set_carry(false);
        assert_eq!(Alu::new(&mut flags).dec(&dw(1)).to_u32(), 0);
        assert!(!flags.carry());
        assert!(flags.zero());
    }

    #[test]
    fn test_mul() {
        let mut flags = Eflags::default();
        for (a, b) in samples(7).zip(samples(8)) {
            let product = Alu::new(&mut flags).mul(&a, &b);
            let expected = i64::from(a.to_u32() as i32) * i64::from(b.to_u32() as i32);
            assert_eq!(product.to_u32(), expected as u32, "{a:?} * {b:?}");
            assert_eq!(flags.overflow(), expected != i64::from(expected as i32));
            assert_eq!(flags.carry(), flags.overflow());
        }

        let product = Alu::new(&mut flags).mul(&dw(-7), &dw(6));
        assert_eq!(product.to_signed_integer(), -42);
        assert!(!flags.overflow());
        assert!(flags.sign());
    }

    #[test]
    fn test_mul_truncates() {
        let mut flags = Eflags::default();

        // 0x10000 * 0x10000 = 2^32, which keeps only its low 32 bits.
        let product = Alu::new(&mut flags).mul(&dw(0x10000), &dw(0x10000));
        assert!(product.is_zero());
        assert!(flags.zero());
        assert!(flags.carry());
        assert!(flags.overflow());

        let min = dw(i64::from(i32::MIN));
        let product = Alu::new(&mut flags).mul(&min, &dw(-1));
        assert_eq!(product, min);
        assert!(flags.overflow());
    }

    #[test]
    fn test_div() {
        let mut flags = Eflags::default();
        flags.set_carry(true);
        flags.set_overflow(true);

        let (q, r) = Alu::new(&mut flags).div(&dw(17), &dw(5)).unwrap();
        assert_eq!((q.to_signed_integer(), r.to_signed_integer()), (3, 2));
        // CF/OF untouched
        assert!(flags.carry());
        assert!(flags.overflow());

        let (q, r) = Alu::new(&mut flags).div(&dw(-17), &dw(5)).unwrap();
        assert_eq!((q.to_signed_integer(), r.to_signed_integer()), (-3, -2));

        let (q, r) = Alu::new(&mut flags).div(&dw(17), &dw(-5)).unwrap();
        assert_eq!((q.to_signed_integer(), r.to_signed_integer()), (-3, 2));

        let (q, _) = Alu::new(&mut flags).div(&dw(3), &dw(5)).unwrap();
        assert!(q.is_zero());
        assert!(flags.zero());

        assert_eq!(Alu::new(&mut flags).div(&dw(1), &dw(0)), Err(AluErr::DivisionByZero));

        for (a, b) in samples(9).zip(samples(10)) {
            let (a_i, b_i) = (a.to_u32() as i32, b.to_u32() as i32);
            if b_i == 0 || (a_i == i32::MIN && b_i == -1) { continue; }

            let (q, r) = Alu::new(&mut flags).div(&a, &b).unwrap();
            assert_eq!(q.to_u32() as i32, a_i / b_i);
            assert_eq!(r.to_u32() as i32, a_i % b_i);
        }
    }

    #[test]
    fn test_shifts() {
        let mut flags = Eflags::default();

        let r = Alu::new(&mut flags).shl(&DoubleWord::from_u32(0xC000_0001), &dw(1));
        assert_eq!(r.to_u32(), 0x8000_0002);
        assert!(flags.carry());
        assert!(!flags.overflow());

        let r = Alu::new(&mut flags).shr(&DoubleWord::from_u32(0x8000_0003), &dw(2));
        assert_eq!(r.to_u32(), 0x2000_0000);
        assert!(flags.carry());

        let r = Alu::new(&mut flags).sar(&DoubleWord::from_u32(0x8000_0000), &dw(4));
        assert_eq!(r.to_u32(), 0xF800_0000);
        assert!(!flags.carry());

        // count 0 (only the low 5 bits count) leaves the flags alone
        flags.set_zero(true);
        let r = Alu::new(&mut flags).shl(&dw(5), &dw(32));
        assert_eq!(r.to_u32(), 5);
        assert!(flags.zero());
    }

    #[test]
    fn test_twos_complement() {
        assert_eq!(twos_complement(&dw(5)), dw(-5));
        assert_eq!(twos_complement(&dw(0)), dw(0));
        let min = dw(i64::from(i32::MIN));
        assert_eq!(twos_complement(&min), min);
    }
}
