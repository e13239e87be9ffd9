//! Assembling source code into programs.
//!
//! This module converts assembly source text into a [`Program`]
//! that can be loaded into the simulator.
//!
//! Assembly is done in two passes, driven by a [`Language`] definition:
//! 1. [`locate_jump_labels`] computes the address of every label declaration.
//! 2. [`encode`] matches every remaining line against the language's instruction variants
//!     and encodes it into three double words.
//!
//! Both passes operate on the [`SourceLine`]s produced by [`preprocess`],
//! which strips comments and blank lines while keeping track of line numbers.
//!
//! The assembler module notably consists of:
//! - [`assemble`] and [`assemble_with`]: The main functions which assemble source code into a program.
//! - [`LabelTable`]: the label addresses computed by the first pass.
//! - [`Program`]: the assembled words, their origin, and the label table.
//! - [`lang`], [`lex`]: The language definition and the operand lexer.
//! - [`encoding`]: Object file formats for programs.
//!
//! ```
//! use sim32::asm::assemble;
//!
//! let program = assemble("
//!     MOV $100, %eax
//! .loop:
//!     SUB $1, %eax  ; count down
//!     CMP $0, %eax
//!     JG loop
//! ").unwrap();
//!
//! assert_eq!(program.words().len(), 4 * 3);
//! assert_eq!(program.labels().lookup("loop").map(|a| a.to_integer()), Some(12));
//! ```

pub mod encoding;
pub mod lang;
pub mod lex;

use std::borrow::Cow;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::bits::{AddressSpace, DoubleWord, Virtual, VirtualAddress};
use crate::isa::{AddressingMode, Header, INSTRUCTION_WIDTH};
use lang::{Language, Variant};
use lex::{LexErr, Token};

/// Assembles source code with the bundled language definition, placing the program at address 0.
pub fn assemble(src: &str) -> Result<Program, AsmErr> {
    assemble_with(src, Language::bundled(), VirtualAddress::zero())
}

/// Assembles source code with the given language definition, placing the program at `origin`.
pub fn assemble_with(src: &str, lang: &Language, origin: VirtualAddress) -> Result<Program, AsmErr> {
    let lines = preprocess(src, lang);
    let labels = locate_jump_labels(&lines, lang, origin)?;
    let words = encode(&lines, lang, &labels)?;

    Ok(Program { origin, words, labels })
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with the line number included.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmErrKind {
    /// No instruction variant matched the line (pass 2).
    UnrecognizedInstruction(String),
    /// More than one instruction variant matched the line (pass 2).
    AmbiguousInstruction(Vec<String>),
    /// There were multiple labels of the same name (pass 1).
    DuplicateLabel(String),
    /// A label was used but never declared (pass 2).
    UndefinedLabel(String),
    /// An operand could not be lexed (pass 2).
    Lex(LexErr),
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnrecognizedInstruction(line) => write!(f, "unrecognized instruction {line:?}"),
            Self::AmbiguousInstruction(m)       => write!(f, "ambiguous instruction, could be any of {}", m.join(", ")),
            Self::DuplicateLabel(label)         => write!(f, "label {label} was defined multiple times"),
            Self::UndefinedLabel(label)         => write!(f, "label {label} was never defined"),
            Self::Lex(e)                        => e.fmt(f),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The 1-based source line the error occurred on.
    pub line: usize
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new(kind: AsmErrKind, line: usize) -> Self {
        AsmErr { kind, line }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}
impl std::error::Error for AsmErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            AsmErrKind::Lex(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for AsmErr {
    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            AsmErrKind::UnrecognizedInstruction(_) => Some("check the mnemonic and that every operand has a type the instruction allows".into()),
            AsmErrKind::AmbiguousInstruction(_)    => Some("the language definition has overlapping instructions".into()),
            AsmErrKind::DuplicateLabel(_)          => Some("labels must be unique within a file, try renaming one of the labels".into()),
            AsmErrKind::UndefinedLabel(_)          => Some("declare the label with `.name:` before an instruction".into()),
            AsmErrKind::Lex(e)                     => crate::err::Error::help(e),
        }
    }
}

/// A line of source code that survived preprocessing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SourceLine<'s> {
    /// The 1-based line number in the original source.
    pub number: usize,
    /// The line, with comments removed and whitespace trimmed.
    pub text: Cow<'s, str>
}

/// Strips comments and surrounding whitespace from every line and drops the lines left empty.
pub fn preprocess<'s>(src: &'s str, lang: &Language) -> Vec<SourceLine<'s>> {
    src.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let text = match lang.strip_comments(line) {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
                Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
            };
            (!text.is_empty()).then_some(SourceLine { number: i + 1, text })
        })
        .collect()
}

/// The addresses of every label in a program.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct LabelTable(BTreeMap<String, VirtualAddress>);
impl LabelTable {
    /// Creates an empty label table.
    pub fn new() -> Self {
        Default::default()
    }
    /// Gets the address of a label.
    pub fn lookup(&self, label: &str) -> Option<VirtualAddress> {
        self.0.get(label).copied()
    }
    /// Gets the label bound to an address, if there is one.
    ///
    /// If several labels share the address, the alphabetically first one is returned.
    pub fn rev_lookup(&self, addr: VirtualAddress) -> Option<&str> {
        self.0.iter()
            .find(|&(_, &a)| a == addr)
            .map(|(l, _)| l.as_str())
    }
    /// Binds a label to an address, returning `false` if the label is already bound.
    pub fn insert(&mut self, label: &str, addr: VirtualAddress) -> bool {
        match self.0.entry(label.to_string()) {
            Entry::Vacant(e) => { e.insert(addr); true },
            Entry::Occupied(_) => false,
        }
    }
    /// Iterates over every label and its address, in label order.
    pub fn iter(&self) -> impl Iterator<Item=(&str, VirtualAddress)> + '_ {
        self.0.iter().map(|(l, &a)| (l.as_str(), a))
    }
    /// The number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }
    /// Whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pass 1: computes the address of every label declaration.
///
/// A label binds to the address of the next instruction:
/// `origin + 12 * (number of instructions before the declaration)`.
/// Declarations themselves take up no space.
pub fn locate_jump_labels(lines: &[SourceLine], lang: &Language, origin: VirtualAddress) -> Result<LabelTable, AsmErr> {
    let mut labels = LabelTable::new();
    let mut count: u32 = 0;

    for line in lines {
        match lang.declared_label(&line.text) {
            Some(label) => {
                let addr = origin.wrapping_add(count.wrapping_mul(INSTRUCTION_WIDTH));
                if !labels.insert(label, addr) {
                    return Err(AsmErr::new(AsmErrKind::DuplicateLabel(label.to_string()), line.number));
                }
                tracing::debug!(label, %addr, "located label");
            },
            None => count += 1,
        }
    }

    Ok(labels)
}

/// Pass 2: encodes every instruction line into three double words.
pub fn encode(lines: &[SourceLine], lang: &Language, labels: &LabelTable) -> Result<Vec<DoubleWord>, AsmErr> {
    let mut words = Vec::with_capacity(lines.len() * 3);

    for line in lines {
        if lang.declared_label(&line.text).is_some() { continue; }

        let mut matches = lang.matches(&line.text);
        let (variant, caps) = matches.next()
            .ok_or_else(|| AsmErr::new(AsmErrKind::UnrecognizedInstruction(line.text.to_string()), line.number))?;

        let rest: Vec<_> = matches.map(|(v, _)| v.mnemonic().to_string()).collect();
        if !rest.is_empty() {
            let mut candidates = vec![variant.mnemonic().to_string()];
            candidates.extend(rest);
            return Err(AsmErr::new(AsmErrKind::AmbiguousInstruction(candidates), line.number));
        }

        let operands = variant.operands().iter()
            .map(|op| {
                let text = caps.name(op.name()).map_or("", |m| m.as_str());
                encode_operand(text, labels)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|kind| AsmErr::new(kind, line.number))?;

        words.extend(encode_instruction(variant, &operands));
    }

    Ok(words)
}

/// Computes the addressing mode and value word of an operand.
fn encode_operand(text: &str, labels: &LabelTable) -> Result<(AddressingMode, DoubleWord), AsmErrKind> {
    let token = lex::lex_operand(text).map_err(AsmErrKind::Lex)?;
    let encoded = match token {
        Token::Immediate(value) => (
            AddressingMode::Direct,
            DoubleWord::from_integer(value).map_err(|_| AsmErrKind::Lex(LexErr::DoesNotFitDoubleWord))?
        ),
        Token::Address(addr) => (AddressingMode::Direct, DoubleWord::from_u32(addr)),
        Token::Register(reg) => (AddressingMode::Direct, reg.to_word()),
        Token::IndirectRegister(reg) => (AddressingMode::Indirect, reg.to_word()),
        Token::Label(label) => {
            let addr = labels.lookup(&label).ok_or(AsmErrKind::UndefinedLabel(label))?;
            (AddressingMode::Direct, addr.to_double_word())
        },
    };
    Ok(encoded)
}

/// Builds the three words of an instruction from a matched variant and its encoded operands.
fn encode_instruction(variant: &Variant, operands: &[(AddressingMode, DoubleWord)]) -> [DoubleWord; 3] {
    let mut slots = [(AddressingMode::None, crate::isa::OperandType::No, DoubleWord::zero()); 2];
    for ((slot, op), &(mode, value)) in slots.iter_mut().zip(variant.operands()).zip(operands) {
        *slot = (mode, op.kind(), value);
    }

    let header = Header {
        instr_type: variant.instr_type().code(),
        opcode: variant.opcode(),
        operands: slots.map(|(mode, kind, _)| (mode.code(), kind.code())),
    };
    [header.encode(), slots[0].2, slots[1].2]
}

/// An assembled program.
///
/// This holds the encoded instruction words, the address they are placed at,
/// and the label table. It can be loaded into the simulator with [`Cpu::load_program`]
/// and written to disk with the formats in [`encoding`].
///
/// [`Cpu::load_program`]: crate::sim::Cpu::load_program
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Program {
    origin: VirtualAddress,
    words: Vec<DoubleWord>,
    labels: LabelTable
}
impl Program {
    /// Creates a program from its parts.
    pub fn new(origin: VirtualAddress, words: Vec<DoubleWord>, labels: LabelTable) -> Self {
        Self { origin, words, labels }
    }
    /// The address of the first word.
    pub fn origin(&self) -> VirtualAddress {
        self.origin
    }
    /// The encoded words, three per instruction.
    pub fn words(&self) -> &[DoubleWord] {
        &self.words
    }
    /// The label table.
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }
    /// The number of bytes the program takes up.
    pub fn byte_len(&self) -> u64 {
        4 * self.words.len() as u64
    }
    /// The range of addresses the program occupies, or `None` if the program is empty.
    pub fn segment(&self) -> Option<AddressSpace<Virtual>> {
        let last = u32::try_from(self.byte_len().checked_sub(1)?).ok()?;
        AddressSpace::new(self.origin, self.origin.wrapping_add(last))
    }
    /// Iterates over the address and words of every instruction.
    pub fn instructions(&self) -> impl Iterator<Item=(VirtualAddress, &[DoubleWord])> + '_ {
        self.words.chunks(3)
            .enumerate()
            .map(|(i, w)| (self.origin.wrapping_add(i as u32 * INSTRUCTION_WIDTH), w))
    }
}
