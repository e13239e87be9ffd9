//! The instruction set.
//!
//! Both the assembler and the simulator read this module, so that
//! the two sides of the instruction encoding never drift apart.
//!
//! Every instruction is three [`DoubleWord`]s (12 bytes):
//! a header word, followed by the raw values of operand 1 and operand 2.
//!
//! The header word is laid out like so (bit 0 is the most significant bit):
//!
//! ```text
//!  type   opcode      op1  op1 type  op2  op2 type
//!  |      |           |    |         |    |
//!  V      V           V    V         V    V
//!  100 11 0000000 11 10 1010000 10 1100000      ADD $1, %eax
//!      ~~         ~~
//!      delimiters
//! ```
//!
//! The delimiters make sure that no encoded instruction is all zeros,
//! which is what the simulator treats as the halt sentinel.
//!
//! This module consists of:
//! - [`Operation`]: every operation, grouped by [`InstrType`] into three opcode tables.
//! - [`OperandType`], [`AddressingMode`], [`RegisterCode`]: the operand fields.
//! - [`Header`]: the header word, and [`Instruction`]: a fully decoded instruction.

use crate::bits::{Bits, DoubleWord};
use crate::sim::SimErr;

/// The size of one encoded instruction, in bytes.
pub const INSTRUCTION_WIDTH: u32 = 12;

/// The category of an instruction, which selects its opcode table.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub enum InstrType {
    /// Register (arithmetic and logic) instructions.
    R,
    /// Immediate (data movement, stack, and system) instructions.
    I,
    /// Jump instructions.
    J
}
impl InstrType {
    /// The 3-bit code of this instruction type.
    pub fn code(self) -> Bits<3> {
        match self {
            InstrType::R => Bits::from_array([true, false, false]),
            InstrType::I => Bits::from_array([false, true, false]),
            InstrType::J => Bits::from_array([false, false, true]),
        }
    }
    /// Looks up an instruction type from its 3-bit code.
    pub fn from_code(code: Bits<3>) -> Option<Self> {
        [InstrType::R, InstrType::I, InstrType::J].into_iter()
            .find(|t| t.code() == code)
    }
}

macro_rules! operation_table {
    ($($ty:ident: [$($name:ident = $code:literal),+ $(,)?]);+ $(;)?) => {
        /// An operation the CPU can execute.
        ///
        /// Each operation lives in the opcode table of one [`InstrType`].
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        pub enum Operation {
            $($(
                #[allow(missing_docs)]
                $name
            ),+),+
        }

        impl Operation {
            /// Every operation, in opcode table order.
            pub const ALL: &'static [Operation] = &[$($(Self::$name),+),+];

            /// The instruction type (and therefore the opcode table) of this operation.
            pub fn instr_type(self) -> InstrType {
                match self {
                    $($(Self::$name => InstrType::$ty),+),+
                }
            }
            /// The opcode of this operation within its table.
            pub fn opcode(self) -> u8 {
                match self {
                    $($(Self::$name => $code),+),+
                }
            }
            /// The canonical mnemonic of this operation.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $($(Self::$name => stringify!($name)),+),+
                }
            }
            /// Looks up an operation from its instruction type and opcode.
            pub fn from_opcode(instr_type: InstrType, opcode: u8) -> Option<Self> {
                match (instr_type, opcode) {
                    $($((InstrType::$ty, $code) => Some(Self::$name),)+)+
                    _ => None
                }
            }
        }
    }
}
operation_table! {
    R: [
        ADD = 0, ADC = 1, SUB = 2, SBB = 3, MUL = 4, DIV = 5,
        AND = 6, OR = 7, XOR = 8, NOT = 9, NEG = 10, CMP = 11,
        SHL = 12, SHR = 13, SAR = 14, INC = 15, DEC = 16
    ];
    I: [
        MOV = 0, PUSH = 1, POP = 2, PUSHF = 3, POPF = 4, CLI = 5,
        STI = 6, NOP = 7, INT = 8, IRET = 9, SYSENTER = 10, SYSEXIT = 11
    ];
    J: [
        JMP = 0, JZ = 1, JNZ = 2, JG = 3, JGE = 4, JL = 5, JLE = 6, CALL = 7, RET = 8
    ];
}

impl Operation {
    /// Looks up an operation by mnemonic (case-insensitive).
    ///
    /// `JE` and `JNE` are accepted as aliases of `JZ` and `JNZ`.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        let upper = mnemonic.to_ascii_uppercase();
        let canonical = match &*upper {
            "JE"  => "JZ",
            "JNE" => "JNZ",
            m => m
        };
        Self::ALL.iter()
            .copied()
            .find(|op| op.mnemonic() == canonical)
    }
    /// The opcode of this operation as a 7-bit field.
    pub fn opcode_bits(self) -> Bits<7> {
        Bits::from_unsigned(u64::from(self.opcode()))
            .unwrap_or_else(|_| unreachable!("opcodes fit in 7 bits"))
    }
}
impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The kind of an operand.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OperandType {
    /// No operand in this slot.
    No,
    /// A literal value (`$5`).
    Immediate,
    /// A register (`%eax`, `*%eax`).
    Register,
    /// A memory address (`@0x100`).
    Memory,
    /// A label, which the assembler resolves to an address.
    Label
}
impl OperandType {
    /// Every operand type.
    pub const ALL: [OperandType; 5] = [
        OperandType::No, OperandType::Immediate, OperandType::Register,
        OperandType::Memory, OperandType::Label
    ];

    /// The 7-bit type code of this operand type.
    pub fn code(self) -> Bits<7> {
        let code: u8 = match self {
            OperandType::No        => 0b000_0000,
            OperandType::Immediate => 0b101_0000,
            OperandType::Register  => 0b110_0000,
            OperandType::Memory    => 0b100_1000,
            OperandType::Label     => 0b100_0100,
        };
        Bits::from_unsigned(u64::from(code))
            .unwrap_or_else(|_| unreachable!("type codes fit in 7 bits"))
    }
    /// Looks up an operand type from its 7-bit type code.
    pub fn from_code(code: Bits<7>) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
    /// Whether this operand can be written to.
    pub fn is_writable(self) -> bool {
        matches!(self, OperandType::Register | OperandType::Memory)
    }
}

/// How the value of an operand is used.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AddressingMode {
    /// No operand (`00`).
    None,
    /// The operand is used as is (`10`).
    Direct,
    /// The operand holds the address of the value (`11`).
    ///
    /// Only registers can be indirect.
    Indirect
}
impl AddressingMode {
    /// The 2-bit code of this addressing mode.
    pub fn code(self) -> Bits<2> {
        match self {
            AddressingMode::None     => Bits::from_array([false, false]),
            AddressingMode::Direct   => Bits::from_array([true, false]),
            AddressingMode::Indirect => Bits::from_array([true, true]),
        }
    }
    /// Looks up an addressing mode from its 2-bit code (`01` is unrecognized).
    pub fn from_code(code: Bits<2>) -> Option<Self> {
        match (code.bit(0), code.bit(1)) {
            (false, false) => Some(AddressingMode::None),
            (true,  false) => Some(AddressingMode::Direct),
            (true,  true)  => Some(AddressingMode::Indirect),
            (false, true)  => None,
        }
    }
}

macro_rules! register_codes {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// A register, as named in operands.
        ///
        /// A register operand stores this code in its value word.
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        pub enum RegisterCode {
            $(
                #[allow(missing_docs)]
                $name = $code
            ),+
        }
        impl RegisterCode {
            /// Every register, in code order.
            pub const ALL: &'static [RegisterCode] = &[$(Self::$name),+];

            /// The lowercase assembly name of this register (e.g., `eax`).
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => const_lower!($name)),+
                }
            }
        }
    }
}
macro_rules! const_lower {
    (EAX) => { "eax" }; (EBX) => { "ebx" }; (ECX) => { "ecx" }; (ESP) => { "esp" };
    (EIP) => { "eip" }; (EIR) => { "eir" }; (EFLAGS) => { "eflags" }; (ITP) => { "itp" };
    (PTP) => { "ptp" }; (NPTP) => { "nptp" }; (GPTP) => { "gptp" }; (VMPTR) => { "vmptr" };
}
register_codes! {
    EAX = 0, EBX = 1, ECX = 2, ESP = 3, EIP = 4, EIR = 5,
    EFLAGS = 6, ITP = 7, PTP = 8, NPTP = 9, GPTP = 10, VMPTR = 11
}
impl RegisterCode {
    /// Looks up a register by its name (case-insensitive, without the `%`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(name))
    }
    /// Looks up a register from the value word of a register operand.
    pub fn from_word(word: DoubleWord) -> Option<Self> {
        let code = word.to_u32();
        Self::ALL.iter()
            .copied()
            .find(|&r| r as u32 == code)
    }
    /// The value word of a register operand naming this register.
    pub fn to_word(self) -> DoubleWord {
        DoubleWord::from_u32(self as u32)
    }
    /// Whether this register can only be written through an operand in kernel mode.
    pub fn is_kernel_only(self) -> bool {
        matches!(self, RegisterCode::EIR | RegisterCode::GPTP | RegisterCode::NPTP | RegisterCode::VMPTR)
    }
}
impl std::fmt::Display for RegisterCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// Bit indices of the header fields.
mod field {
    pub const TYPE: usize = 0;
    pub const DELIM1: usize = 3;
    pub const OPCODE: usize = 5;
    pub const DELIM2: usize = 12;
    pub const OPERANDS: [(usize, usize); 2] = [(14, 16), (23, 25)];
}
const DELIMITER: Bits<2> = Bits::from_array([true, true]);

/// The header word of an instruction, as raw fields.
///
/// The fields are not checked against the opcode and operand tables here,
/// which is what [`Header::resolve`] does.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Header {
    /// The 3-bit instruction type.
    pub instr_type: Bits<3>,
    /// The 7-bit opcode.
    pub opcode: Bits<7>,
    /// The 2-bit addressing mode and 7-bit type code of each operand.
    pub operands: [(Bits<2>, Bits<7>); 2]
}
impl Header {
    /// Packs these fields into a header word.
    pub fn encode(&self) -> DoubleWord {
        let mut word = DoubleWord::zero()
            .with_field(field::TYPE, self.instr_type)
            .with_field(field::DELIM1, DELIMITER)
            .with_field(field::OPCODE, self.opcode)
            .with_field(field::DELIM2, DELIMITER);
        for ((mode_at, type_at), (mode, kind)) in field::OPERANDS.into_iter().zip(self.operands) {
            word = word.with_field(mode_at, mode).with_field(type_at, kind);
        }
        word
    }

    /// Unpacks a header word, failing if its delimiters are missing.
    pub fn decode(word: DoubleWord) -> Result<Self, SimErr> {
        if word.field::<2>(field::DELIM1) != DELIMITER || word.field::<2>(field::DELIM2) != DELIMITER {
            return Err(SimErr::UnrecognizedInstruction);
        }

        Ok(Self {
            instr_type: word.field(field::TYPE),
            opcode: word.field(field::OPCODE),
            operands: field::OPERANDS.map(|(mode_at, type_at)| (word.field(mode_at), word.field(type_at))),
        })
    }

    /// Looks the raw fields up in the instruction tables.
    pub fn resolve(&self) -> Result<(Operation, [(AddressingMode, OperandType); 2]), SimErr> {
        let operation = InstrType::from_code(self.instr_type)
            .and_then(|t| Operation::from_opcode(t, self.opcode.to_unsigned_integer() as u8))
            .ok_or(SimErr::UnrecognizedInstruction)?;

        let mut operands = [(AddressingMode::None, OperandType::No); 2];
        for (slot, (mode, kind)) in operands.iter_mut().zip(self.operands) {
            let kind = OperandType::from_code(kind).ok_or(SimErr::UnrecognizedOperandType)?;
            let mode = AddressingMode::from_code(mode).ok_or(SimErr::UnrecognizedAddressingMode)?;
            *slot = (mode, kind);
        }
        Ok((operation, operands))
    }
}

/// One operand of a decoded instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Operand {
    /// The operand's type.
    pub kind: OperandType,
    /// The operand's addressing mode.
    pub mode: AddressingMode,
    /// The operand's raw value word.
    pub value: DoubleWord
}
impl Operand {
    /// The empty operand.
    pub const NONE: Operand = Operand {
        kind: OperandType::No,
        mode: AddressingMode::None,
        value: DoubleWord::zero()
    };

    /// Whether this slot holds an operand.
    pub fn is_present(&self) -> bool {
        self.kind != OperandType::No
    }
    /// The register this operand names, if it is a register operand.
    pub fn register(&self) -> Option<RegisterCode> {
        match self.kind {
            OperandType::Register => RegisterCode::from_word(self.value),
            _ => None
        }
    }
}
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mode == AddressingMode::Indirect {
            f.write_str("*")?;
        }
        match self.kind {
            OperandType::No        => Ok(()),
            OperandType::Immediate => write!(f, "${}", self.value.to_u32() as i32),
            OperandType::Register  => match self.register() {
                Some(r) => r.fmt(f),
                None    => write!(f, "%?{}", self.value.to_u32()),
            },
            OperandType::Memory    => write!(f, "@0x{:X}", self.value.to_u32()),
            OperandType::Label     => write!(f, "0x{:X}", self.value.to_u32()),
        }
    }
}

/// A fully decoded instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Instruction {
    /// The operation to execute.
    pub operation: Operation,
    /// Operand 1 (the source, or the only operand) and operand 2 (the target).
    pub operands: [Operand; 2]
}
impl Instruction {
    /// Encodes this instruction into its three words.
    pub fn encode(&self) -> [DoubleWord; 3] {
        let header = Header {
            instr_type: self.operation.instr_type().code(),
            opcode: self.operation.opcode_bits(),
            operands: self.operands.map(|o| (o.mode.code(), o.kind.code())),
        };
        [header.encode(), self.operands[0].value, self.operands[1].value]
    }
}
impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.operation.mnemonic())?;
        let mut present = self.operands.iter().filter(|o| o.is_present());
        if let Some(first) = present.next() {
            write!(f, " {first}")?;
            for rest in present {
                write!(f, ", {rest}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> DoubleWord {
        s.parse().unwrap()
    }

    #[test]
    fn test_opcode_tables() {
        for &op in Operation::ALL {
            assert_eq!(Operation::from_opcode(op.instr_type(), op.opcode()), Some(op));
            assert_eq!(Operation::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Operation::from_mnemonic("je"), Some(Operation::JZ));
        assert_eq!(Operation::from_mnemonic("JNE"), Some(Operation::JNZ));
        assert_eq!(Operation::from_mnemonic("HLT"), None);
        assert_eq!(Operation::from_opcode(InstrType::J, 9), None);
    }

    #[test]
    fn test_header_layout() {
        let add = Instruction {
            operation: Operation::ADD,
            operands: [
                Operand { kind: OperandType::Immediate, mode: AddressingMode::Direct, value: DoubleWord::from_u32(1) },
                Operand { kind: OperandType::Register, mode: AddressingMode::Direct, value: RegisterCode::EAX.to_word() },
            ]
        };
        let [header, v1, v2] = add.encode();
        assert_eq!(header, word("10011000000011101010000101100000"));
        assert_eq!(v1.to_u32(), 1);
        assert_eq!(v2.to_u32(), 0);

        let nop = Instruction { operation: Operation::NOP, operands: [Operand::NONE; 2] };
        assert_eq!(nop.encode()[0], word("01011000011111000000000000000000"));
    }

    #[test]
    fn test_header_decode() {
        let header = Header::decode(word("10011000000011101010000101100000")).unwrap();
        let (op, operands) = header.resolve().unwrap();
        assert_eq!(op, Operation::ADD);
        assert_eq!(operands, [
            (AddressingMode::Direct, OperandType::Immediate),
            (AddressingMode::Direct, OperandType::Register),
        ]);

        // no delimiters
        assert!(matches!(Header::decode(DoubleWord::zero()), Err(SimErr::UnrecognizedInstruction)));
        // opcode 127 in the R table
        let bad_op = Header::decode(word("10011111111111000000000000000000")).unwrap();
        assert!(matches!(bad_op.resolve(), Err(SimErr::UnrecognizedInstruction)));
        // addressing mode 01
        let bad_mode = Header::decode(word("10011000000011011010000000000000")).unwrap();
        assert!(matches!(bad_mode.resolve(), Err(SimErr::UnrecognizedAddressingMode)));
        // type code 1111111
        let bad_type = Header::decode(word("10011000000011101111111000000000")).unwrap();
        assert!(matches!(bad_type.resolve(), Err(SimErr::UnrecognizedOperandType)));
    }

    #[test]
    fn test_registers() {
        assert_eq!(RegisterCode::from_name("EAX"), Some(RegisterCode::EAX));
        assert_eq!(RegisterCode::from_name("vmptr"), Some(RegisterCode::VMPTR));
        assert_eq!(RegisterCode::from_name("r0"), None);
        assert_eq!(RegisterCode::from_word(DoubleWord::from_u32(10)), Some(RegisterCode::GPTP));
        assert_eq!(RegisterCode::from_word(DoubleWord::from_u32(12)), None);
        assert!(RegisterCode::EIR.is_kernel_only());
        assert!(!RegisterCode::EFLAGS.is_kernel_only());
    }

    #[test]
    fn test_disassembly() {
        let mov = Instruction {
            operation: Operation::MOV,
            operands: [
                Operand { kind: OperandType::Immediate, mode: AddressingMode::Direct, value: DoubleWord::from_integer(-5).unwrap() },
                Operand { kind: OperandType::Register, mode: AddressingMode::Indirect, value: RegisterCode::EBX.to_word() },
            ]
        };
        assert_eq!(mov.to_string(), "MOV $-5, *%ebx");
    }
}
