//! Error interface for this crate.
//!
//! Every error type of this crate implements [`Error`], which extends
//! [`std::error::Error`] with an optional hint on how to fix the problem.
//!
//! This module also re-exports every error type, so they can be found in one place.

use std::borrow::Cow;

pub use crate::alu::AluErr;
pub use crate::asm::{AsmErr, AsmErrKind};
pub use crate::asm::lang::LangErr;
pub use crate::asm::lex::LexErr;
pub use crate::bits::{IntegerOutOfRange, ParseBitsErr, WidthMismatch};
pub use crate::sim::SimErr;

/// Unified error interface for all errors in this crate.
pub trait Error: std::error::Error {
    /// A clarifying message to help aid someone in how to fix the message.
    ///
    /// This is `None` if there is no hint to give.
    fn help(&self) -> Option<Cow<str>>;
}

impl Error for WidthMismatch {
    fn help(&self) -> Option<Cow<str>> {
        Some(format!("provide exactly {} bits", self.expected).into())
    }
}
impl Error for IntegerOutOfRange {
    fn help(&self) -> Option<Cow<str>> {
        match self.width {
            32 => Some("double words hold integers in [-2147483648, 4294967295]".into()),
            _  => None
        }
    }
}
impl Error for ParseBitsErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            ParseBitsErr::Width(e)        => e.help(),
            ParseBitsErr::InvalidDigit(_) => Some("binary strings only consist of 0 and 1".into()),
        }
    }
}
impl Error for AluErr {
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}
