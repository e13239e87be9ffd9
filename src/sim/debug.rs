//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoint`], which can be inserted into the [`Cpu`]'s
//! `breakpoints` field to cause the run loops to pause.
//!
//! [`Cpu`]: super::Cpu
use std::fmt::Write;

use crate::bits::{PhysicalAddress, VirtualAddress};
use crate::isa::RegisterCode;

use super::mem::Memory;
use super::Cpu;

/// Common breakpoints.
#[derive(PartialEq, Eq, Hash, Clone)]
pub enum Breakpoint {
    /// Break when EIP is equal to the given address.
    Eip(VirtualAddress),

    /// Break when the provided register is set to a given value.
    Reg {
        /// Register to check.
        reg: RegisterCode,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the word at the provided physical address matches a given value.
    Mem {
        /// Address to check.
        addr: PhysicalAddress,
        /// Predicate to break against.
        value: Comparator
    },
}

impl Breakpoint {
    /// Checks if a break should occur.
    pub fn check<M: Memory>(&self, cpu: &Cpu<M>) -> bool {
        match self {
            Breakpoint::Eip(expected) => *expected == cpu.regs.eip.get(),
            Breakpoint::Reg { reg, value: cmp } => cmp.check(cpu.regs.read(*reg).to_u32()),
            // Reads physical memory directly, so nothing is observed or translated.
            Breakpoint::Mem { addr, value: cmp } => cpu.mmu.ram().read_word(*addr)
                .is_ok_and(|w| cmp.check(w.to_u32())),
        }
    }

    fn fmt_bp(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Eip(expected) => {
                write!(f, "EIP == {expected}")?;
            },
            Self::Reg { reg, value } => {
                write!(f, "{reg} ")?;
                value.fmt_cmp(f)?;
            },
            Self::Mem { addr, value } => {
                write!(f, "mem[{addr}] ")?;
                value.fmt_cmp(f)?;
            },
        }
        Ok(())
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Breakpoint(")?;
        self.fmt_bp(f)?;
        f.write_char(')')
    }
}

/// Predicate checking a value against a (unsigned) reference value.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Comparator {
    /// Never breaks.
    Never,
    /// Break if the desired value is less than the provided value.
    Lt(u32),
    /// Break if the desired value is equal to the provided value.
    Eq(u32),
    /// Break if the desired value is less than or equal to the provided value.
    Le(u32),
    /// Break if the desired value is greater than the provided value.
    Gt(u32),
    /// Break if the desired value is not equal to the provided value.
    Ne(u32),
    /// Break if the desired value is greater than or equal to the provided value.
    Ge(u32),
    /// Always breaks.
    Always
}
impl Comparator {
    /// Checks if the operand passes the comparator.
    pub fn check(&self, operand: u32) -> bool {
        match *self {
            Comparator::Never  => false,
            Comparator::Lt(r)  => operand < r,
            Comparator::Eq(r)  => operand == r,
            Comparator::Le(r)  => operand <= r,
            Comparator::Gt(r)  => operand > r,
            Comparator::Ne(r)  => operand != r,
            Comparator::Ge(r)  => operand >= r,
            Comparator::Always => true,
        }
    }

    fn fmt_cmp(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Never  => f.write_str("never"),
            Comparator::Lt(r)  => write!(f, "< {r}"),
            Comparator::Eq(r)  => write!(f, "== {r}"),
            Comparator::Le(r)  => write!(f, "<= {r}"),
            Comparator::Gt(r)  => write!(f, "> {r}"),
            Comparator::Ne(r)  => write!(f, "!= {r}"),
            Comparator::Ge(r)  => write!(f, ">= {r}"),
            Comparator::Always => f.write_str("always"),
        }
    }
}
