//! Tokenizing operands.
//!
//! Once a line has been matched against a language [`Variant`], the text captured for
//! each operand is lexed into a [`Token`], which determines its value word and addressing mode.
//!
//! The recognized operand syntax is:
//! - `$5`, `$-0x10`, `$0b101`: immediates (decimal, hex, binary)
//! - `@0x100`: memory addresses
//! - `%eax`: registers, and `*%eax`: registers used indirectly
//! - `loop`: labels
//!
//! `*$` and `*@` are rejected, since only registers can be used indirectly.
//!
//! [`Variant`]: super::lang::Variant

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

use crate::isa::RegisterCode;

/// An operand of an instruction.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t]+", error = LexErr)]
pub enum Token {
    // Note, these regexes span over tokens that are technically invalid
    // (e.g., `$12ab` matches as an immediate even though it shouldn't).
    // The validator function then reports why it's invalid.

    /// An immediate value (e.g., `$9`, `$-14`, `$0x7F`, `$0b11`).
    ///
    /// Immediates range from `-2^31` to `2^32 - 1`.
    #[regex(r"\*?\$-?\w*", lex_immediate)]
    Immediate(i64),

    /// A memory address (e.g., `@4096`, `@0x1000`).
    #[regex(r"\*?@-?\w*", lex_address)]
    Address(u32),

    /// A register used directly (e.g., `%eax`).
    #[regex(r"%\w*", lex_reg)]
    Register(RegisterCode),

    /// A register whose contents are the address of the operand (e.g., `*%eax`).
    #[regex(r"\*%\w*", lex_reg)]
    IndirectRegister(RegisterCode),

    /// A label (e.g., `loop`, `handler_1`).
    #[regex(r"[A-Za-z_]\w*", |lx| lx.slice().to_string())]
    Label(String)
}

/// Any errors raised in attempting to tokenize an operand.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LexErr {
    /// Immediate cannot fit within a double word (`-2^31` to `2^32 - 1`).
    DoesNotFitDoubleWord,
    /// Address cannot fit within the address space (`0` to `2^32 - 1`).
    DoesNotFitAddress,
    /// Hex literal (starting with `0x`) has invalid hex digits.
    InvalidHex,
    /// Binary literal (starting with `0b`) has invalid binary digits.
    InvalidBinary,
    /// Decimal literal has invalid digits (i.e., not 0-9).
    InvalidNumeric,
    /// Literal has no digits.
    EmptyLiteral,
    /// Int parsing failed but the reason why is unknown.
    UnknownIntErr,
    /// Token had the format `%name`, but no register has that name.
    InvalidReg,
    /// An immediate or address was marked indirect (`*$`, `*@`).
    IndirectWithoutRegister,
    /// A symbol was used which is not allowed in operands.
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFitDoubleWord    => f.write_str("immediate does not fit in a double word"),
            LexErr::DoesNotFitAddress       => f.write_str("address does not fit in the address space"),
            LexErr::InvalidHex              => f.write_str("invalid hex literal"),
            LexErr::InvalidBinary           => f.write_str("invalid binary literal"),
            LexErr::InvalidNumeric          => f.write_str("invalid decimal literal"),
            LexErr::EmptyLiteral            => f.write_str("literal has no digits"),
            LexErr::UnknownIntErr           => f.write_str("could not parse integer"),
            LexErr::InvalidReg              => f.write_str("invalid register"),
            LexErr::IndirectWithoutRegister => f.write_str("only registers can be used indirectly"),
            LexErr::InvalidSymbol           => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFitDoubleWord    => Some(format!("the range for an immediate is [{}, {}]", i32::MIN, u32::MAX).into()),
            LexErr::DoesNotFitAddress       => Some(format!("the range for an address is [0, {}]", u32::MAX).into()),
            LexErr::InvalidHex              => Some("a hex literal starts with '0x' and consists of 0-9, A-F".into()),
            LexErr::InvalidBinary           => Some("a binary literal starts with '0b' and consists of 0 and 1".into()),
            LexErr::InvalidNumeric          => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::EmptyLiteral            => Some("there should be digits here".into()),
            LexErr::UnknownIntErr           => None,
            LexErr::InvalidReg              => Some(format!(
                "registers are {}",
                RegisterCode::ALL.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
            ).into()),
            LexErr::IndirectWithoutRegister => Some("load the address into a register and use `*%reg`".into()),
            LexErr::InvalidSymbol           => Some("this char does not occur in any operand".into()),
        }
    }
}

/// Helper that converts an int error kind to its corresponding LexErr.
fn convert_int_error(e: &IntErrorKind, invalid_digits_err: LexErr, overflow_err: LexErr) -> LexErr {
    match e {
        IntErrorKind::Empty        => LexErr::EmptyLiteral,
        IntErrorKind::InvalidDigit => invalid_digits_err,
        IntErrorKind::PosOverflow  => overflow_err,
        IntErrorKind::NegOverflow  => overflow_err,
        _ => LexErr::UnknownIntErr,
    }
}

/// Parses the body of a literal (after its sigil) into a signed value.
///
/// This accepts an optional `-`, followed by `0x` hex, `0b` binary or decimal digits.
fn parse_literal(body: &str, overflow_err: LexErr) -> Result<i128, LexErr> {
    let (negative, digits) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body)
    };

    let (radix, digits, invalid) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex, LexErr::InvalidHex)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin, LexErr::InvalidBinary)
    } else {
        (10, digits, LexErr::InvalidNumeric)
    };

    let magnitude = u64::from_str_radix(digits, radix)
        .map_err(|e| convert_int_error(e.kind(), invalid, overflow_err))?;

    Ok(match negative {
        true  => -i128::from(magnitude),
        false => i128::from(magnitude),
    })
}
fn lex_immediate(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    if lx.slice().starts_with('*') {
        return Err(LexErr::IndirectWithoutRegister);
    }

    let value = parse_literal(&lx.slice()[1..], LexErr::DoesNotFitDoubleWord)?;
    match (-(1i128 << 31)..(1i128 << 32)).contains(&value) {
        true  => Ok(value as i64),
        false => Err(LexErr::DoesNotFitDoubleWord),
    }
}
fn lex_address(lx: &Lexer<'_, Token>) -> Result<u32, LexErr> {
    if lx.slice().starts_with('*') {
        return Err(LexErr::IndirectWithoutRegister);
    }

    let value = parse_literal(&lx.slice()[1..], LexErr::DoesNotFitAddress)?;
    u32::try_from(value).map_err(|_| LexErr::DoesNotFitAddress)
}
fn lex_reg(lx: &Lexer<'_, Token>) -> Result<RegisterCode, LexErr> {
    let name = lx.slice().trim_start_matches('*');
    RegisterCode::from_name(&name[1..]).ok_or(LexErr::InvalidReg)
}

/// Lexes the text of one operand into exactly one token.
pub fn lex_operand(text: &str) -> Result<Token, LexErr> {
    let mut lexer = Token::lexer(text);
    let token = lexer.next().ok_or(LexErr::InvalidSymbol)??;
    match lexer.next() {
        None => Ok(token),
        Some(Err(e)) => Err(e),
        Some(Ok(_)) => Err(LexErr::InvalidSymbol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediates() {
        assert_eq!(lex_operand("$100"), Ok(Token::Immediate(100)));
        assert_eq!(lex_operand("$0x64"), Ok(Token::Immediate(100)));
        assert_eq!(lex_operand("$0b1100100"), Ok(Token::Immediate(100)));
        assert_eq!(lex_operand("$-0x10"), Ok(Token::Immediate(-16)));
        assert_eq!(lex_operand("$4294967295"), Ok(Token::Immediate(4294967295)));
        assert_eq!(lex_operand("$-2147483648"), Ok(Token::Immediate(-2147483648)));

        assert_eq!(lex_operand("$4294967296"), Err(LexErr::DoesNotFitDoubleWord));
        assert_eq!(lex_operand("$-2147483649"), Err(LexErr::DoesNotFitDoubleWord));
        assert_eq!(lex_operand("$99999999999999999999999"), Err(LexErr::DoesNotFitDoubleWord));
        assert_eq!(lex_operand("$12ab"), Err(LexErr::InvalidNumeric));
        assert_eq!(lex_operand("$0xZZ"), Err(LexErr::InvalidHex));
        assert_eq!(lex_operand("$0b2"), Err(LexErr::InvalidBinary));
        assert_eq!(lex_operand("$"), Err(LexErr::EmptyLiteral));
    }

    #[test]
    fn test_addresses() {
        assert_eq!(lex_operand("@0x1000"), Ok(Token::Address(0x1000)));
        assert_eq!(lex_operand("@12"), Ok(Token::Address(12)));
        assert_eq!(lex_operand("@-4"), Err(LexErr::DoesNotFitAddress));
        assert_eq!(lex_operand("@0x100000000"), Err(LexErr::DoesNotFitAddress));
    }

    #[test]
    fn test_registers() {
        assert_eq!(lex_operand("%eax"), Ok(Token::Register(RegisterCode::EAX)));
        assert_eq!(lex_operand("%EFLAGS"), Ok(Token::Register(RegisterCode::EFLAGS)));
        assert_eq!(lex_operand("*%esp"), Ok(Token::IndirectRegister(RegisterCode::ESP)));
        assert_eq!(lex_operand("%r0"), Err(LexErr::InvalidReg));
    }

    #[test]
    fn test_indirect_literals() {
        assert_eq!(lex_operand("*$5"), Err(LexErr::IndirectWithoutRegister));
        assert_eq!(lex_operand("*@0x10"), Err(LexErr::IndirectWithoutRegister));
    }

    #[test]
    fn test_labels_and_garbage() {
        assert_eq!(lex_operand("loop"), Ok(Token::Label("loop".to_string())));
        assert_eq!(lex_operand("  _start "), Ok(Token::Label("_start".to_string())));
        assert_eq!(lex_operand("#5"), Err(LexErr::InvalidSymbol));
        assert_eq!(lex_operand("loop loop"), Err(LexErr::InvalidSymbol));
        assert_eq!(lex_operand(""), Err(LexErr::InvalidSymbol));
    }
}
