//! The register file.
//!
//! This module consists of:
//! - [`Register`]: A named register holding one typed value.
//! - [`Eflags`]: The status register (flags, interrupt enable, privilege level).
//! - [`RegisterFile`]: Every register of the CPU.
//! - [`MachineInitStrategy`]: How the general-purpose registers are filled at startup.

use rand::rngs::StdRng;
use rand::Rng;

use crate::bits::{Byte, DoubleWord, PhysicalAddress, VirtualAddress};
use crate::isa::RegisterCode;

/// A value that a [`Register`] can hold.
///
/// Every register value converts to and from a [`DoubleWord`],
/// which is how operands see it.
pub trait RegisterValue: Copy + Default + std::fmt::Debug {
    /// The raw bits of this value.
    fn to_word(self) -> DoubleWord;
    /// Reinterprets raw bits as this value.
    fn from_word(word: DoubleWord) -> Self;
}
impl RegisterValue for DoubleWord {
    fn to_word(self) -> DoubleWord {
        self
    }
    fn from_word(word: DoubleWord) -> Self {
        word
    }
}
impl RegisterValue for VirtualAddress {
    fn to_word(self) -> DoubleWord {
        self.to_double_word()
    }
    fn from_word(word: DoubleWord) -> Self {
        Self::from_double_word(word)
    }
}
impl RegisterValue for PhysicalAddress {
    fn to_word(self) -> DoubleWord {
        self.to_double_word()
    }
    fn from_word(word: DoubleWord) -> Self {
        Self::from_double_word(word)
    }
}

/// A named register holding one value of type `T`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Register<T> {
    name: &'static str,
    content: T
}
impl<T: RegisterValue> Register<T> {
    /// Creates a register with the given name and contents.
    pub fn new(name: &'static str, content: T) -> Self {
        Self { name, content }
    }
    /// The register's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
    /// The register's contents.
    pub fn get(&self) -> T {
        self.content
    }
    /// Replaces the register's contents.
    pub fn set(&mut self, content: T) {
        self.content = content;
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for Register<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{} = {:?}", self.name, self.content)
    }
}

/// The privilege level the CPU runs at.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Privilege {
    /// Kernel mode (`00`): everything is allowed.
    Kernel,
    /// User mode (`11`): privileged instructions, kernel-only registers and kernel-only pages are denied.
    User
}

/// A wrapper over a [`Byte`] holding the status flags.
///
/// The byte is laid out as the following (bit 0 is the most significant bit):
/// - `EFLAGS[0..2]`: Privilege level (`00` = kernel, `11` = user; anything else is treated as user)
/// - `EFLAGS[2]`: Interrupt enable (IF)
/// - `EFLAGS[3]`: Carry (CF)
/// - `EFLAGS[4]`: Parity (PF)
/// - `EFLAGS[5]`: Zero (ZF)
/// - `EFLAGS[6]`: Sign (SF)
/// - `EFLAGS[7]`: Overflow (OF)
///
/// ```text
///         privilege
///         |  IF
///         |  | CF PF ZF SF OF
///         |  | |  |  |  |  |
///         V  V V  V  V  V  V
/// user:   11 1 0  1  1  0  0
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Eflags(Byte);

macro_rules! flag_bits {
    ($($(#[$m:meta])* $get:ident, $set:ident = $idx:literal);+ $(;)?) => {
        impl Eflags {
            $(
                $(#[$m])*
                pub fn $get(&self) -> bool {
                    self.0.bit($idx)
                }
                #[doc = concat!("Sets the flag read by [`Eflags::", stringify!($get), "`].")]
                pub fn $set(&mut self, value: bool) {
                    self.0.set_bit($idx, value);
                }
            )+
        }
    }
}
flag_bits! {
    /// Whether maskable interrupts are enabled (IF).
    interrupts_enabled, set_interrupts_enabled = 2;
    /// The carry flag (CF).
    carry, set_carry = 3;
    /// The parity flag (PF), set when the low byte of the last result has an even number of ones.
    parity, set_parity = 4;
    /// The zero flag (ZF).
    zero, set_zero = 5;
    /// The sign flag (SF).
    sign, set_sign = 6;
    /// The overflow flag (OF).
    overflow, set_overflow = 7;
}

impl Eflags {
    /// Creates the flags register from its raw byte.
    pub fn new(byte: Byte) -> Self {
        Self(byte)
    }
    /// The raw byte.
    pub fn get(&self) -> Byte {
        self.0
    }
    /// Replaces the raw byte.
    pub fn set(&mut self, byte: Byte) {
        self.0 = byte;
    }
    /// The current privilege level.
    pub fn privilege(&self) -> Privilege {
        match (self.0.bit(0), self.0.bit(1)) {
            (false, false) => Privilege::Kernel,
            _ => Privilege::User
        }
    }
    /// Whether the CPU is in kernel mode.
    pub fn is_kernel(&self) -> bool {
        self.privilege() == Privilege::Kernel
    }
    /// Switches to kernel mode.
    pub fn enter_kernel_mode(&mut self) {
        self.0.set_bit(0, false);
        self.0.set_bit(1, false);
    }
    /// Switches to user mode.
    pub fn enter_user_mode(&mut self) {
        self.0.set_bit(0, true);
        self.0.set_bit(1, true);
    }
    /// Whether replacing the raw byte with `byte` keeps the privilege bits and IF.
    ///
    /// User mode can only write EFLAGS when this holds.
    pub fn keeps_control_bits(&self, byte: Byte) -> bool {
        (0..=2).all(|i| self.0.bit(i) == byte.bit(i))
    }
}
impl std::fmt::Debug for Eflags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        struct Flags(Eflags);

        impl std::fmt::Debug for Flags {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let e = &self.0;
                for (set, c) in [(e.carry(), 'C'), (e.parity(), 'P'), (e.zero(), 'Z'), (e.sign(), 'S'), (e.overflow(), 'O')] {
                    f.write_char(if set { c } else { '-' })?;
                }
                Ok(())
            }
        }

        f.debug_struct("Eflags")
            .field("privilege", &self.privilege())
            .field("interrupts_enabled", &self.interrupts_enabled())
            .field("flags", &Flags(*self))
            .finish()
    }
}

/// Trait that describes types that can produce the initial contents of the general-purpose registers.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> DoubleWord;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> DoubleWord {
        DoubleWord::from_u32(rand::random())
    }
}
impl WordFiller for u32 {
    fn generate(&mut self) -> DoubleWord {
        DoubleWord::from_u32(*self)
    }
}
impl WordFiller for StdRng {
    /// This creates deterministic values from a seeded generator.
    fn generate(&mut self) -> DoubleWord {
        DoubleWord::from_u32(self.gen())
    }
}

/// Strategy used to fill `EAX`, `EBX` and `ECX` when a [`Cpu`] is created.
///
/// [`Cpu`]: super::Cpu
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each register to a known value.
    Known {
        /// The value to initialize each register to.
        value: u32
    },

    /// Initializes each register randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each register randomly and non-deterministically.
    Unseeded
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}
impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => Filler::Unseeded,
            MachineInitStrategy::Seeded { seed } => Filler::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => Filler::Known(*value),
        }
    }
}

enum Filler {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u32)
}
impl WordFiller for Filler {
    fn generate(&mut self) -> DoubleWord {
        match self {
            Filler::Unseeded  => ().generate(),
            Filler::Seeded(r) => r.generate(),
            Filler::Known(k)  => k.generate(),
        }
    }
}

/// The register file.
///
/// The fields can be accessed directly, or by [`RegisterCode`]
/// through [`RegisterFile::read`] and [`RegisterFile::write`] (which is how operands access them).
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// General-purpose register A.
    pub eax: Register<DoubleWord>,
    /// General-purpose register B.
    pub ebx: Register<DoubleWord>,
    /// General-purpose register C.
    pub ecx: Register<DoubleWord>,
    /// The stack pointer.
    pub esp: Register<VirtualAddress>,
    /// The instruction pointer.
    pub eip: Register<VirtualAddress>,
    /// The instruction register (header word of the current instruction).
    pub eir: Register<DoubleWord>,
    /// The flags register.
    pub eflags: Eflags,
    /// The interrupt table pointer.
    pub itp: Register<VirtualAddress>,
    /// The page table pointer.
    pub ptp: Register<PhysicalAddress>,
    /// The nested (host) page table pointer.
    pub nptp: Register<PhysicalAddress>,
    /// The guest page table pointer, present only while hardware virtualization is enabled.
    pub gptp: Option<Register<PhysicalAddress>>,
    /// The VM control structure pointer.
    pub vmptr: Register<PhysicalAddress>
}
impl RegisterFile {
    /// Creates a register file, filling the general-purpose registers with `filler`.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self {
            eax: Register::new("eax", filler.generate()),
            ebx: Register::new("ebx", filler.generate()),
            ecx: Register::new("ecx", filler.generate()),
            esp: Register::new("esp", Default::default()),
            eip: Register::new("eip", Default::default()),
            eir: Register::new("eir", Default::default()),
            eflags: Eflags::default(),
            itp: Register::new("itp", Default::default()),
            ptp: Register::new("ptp", Default::default()),
            nptp: Register::new("nptp", Default::default()),
            gptp: None,
            vmptr: Register::new("vmptr", Default::default()),
        }
    }

    /// Reads a register as a double word.
    ///
    /// EFLAGS reads as its byte zero-extended, and an absent GPTP reads as zero.
    pub fn read(&self, reg: RegisterCode) -> DoubleWord {
        match reg {
            RegisterCode::EAX    => self.eax.get(),
            RegisterCode::EBX    => self.ebx.get(),
            RegisterCode::ECX    => self.ecx.get(),
            RegisterCode::ESP    => self.esp.get().to_word(),
            RegisterCode::EIP    => self.eip.get().to_word(),
            RegisterCode::EIR    => self.eir.get(),
            RegisterCode::EFLAGS => self.eflags.get().zero_extend(),
            RegisterCode::ITP    => self.itp.get().to_word(),
            RegisterCode::PTP    => self.ptp.get().to_word(),
            RegisterCode::NPTP   => self.nptp.get().to_word(),
            RegisterCode::GPTP   => self.gptp.map_or(DoubleWord::zero(), |r| r.get().to_word()),
            RegisterCode::VMPTR  => self.vmptr.get().to_word(),
        }
    }

    /// Writes a double word into a register.
    ///
    /// EFLAGS keeps only the least significant byte, and writing GPTP makes it present.
    /// This does not check privilege.
    pub fn write(&mut self, reg: RegisterCode, value: DoubleWord) {
        match reg {
            RegisterCode::EAX    => self.eax.set(value),
            RegisterCode::EBX    => self.ebx.set(value),
            RegisterCode::ECX    => self.ecx.set(value),
            RegisterCode::ESP    => self.esp.set(RegisterValue::from_word(value)),
            RegisterCode::EIP    => self.eip.set(RegisterValue::from_word(value)),
            RegisterCode::EIR    => self.eir.set(value),
            RegisterCode::EFLAGS => self.eflags.set(value.least_significant_byte()),
            RegisterCode::ITP    => self.itp.set(RegisterValue::from_word(value)),
            RegisterCode::PTP    => self.ptp.set(RegisterValue::from_word(value)),
            RegisterCode::NPTP   => self.nptp.set(RegisterValue::from_word(value)),
            RegisterCode::GPTP   => {
                self.gptp.get_or_insert_with(|| Register::new("gptp", Default::default()))
                    .set(RegisterValue::from_word(value));
            },
            RegisterCode::VMPTR  => self.vmptr.set(RegisterValue::from_word(value)),
        }
    }
}
