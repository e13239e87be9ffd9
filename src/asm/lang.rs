//! Language definitions for the assembler.
//!
//! The assembler is data-driven: comments, labels, operand types and instructions
//! are described in a JSON document, which is deserialized into a [`LanguageDef`]
//! and then compiled into a [`Language`].
//!
//! Compiling a definition expands every instruction into its [`Variant`]s:
//! one regex per legal combination of operand types, made by substituting
//! each operand type's regex into the instruction's template.
//!
//! A default definition is bundled with this crate and is available through [`Language::bundled`].
//!
//! ```
//! use sim32::asm::lang::Language;
//!
//! let lang = Language::bundled();
//! let matches: Vec<_> = lang.matches("add $1, %eax").collect();
//! assert_eq!(matches.len(), 1);
//! assert_eq!(matches[0].0.mnemonic(), "ADD");
//! ```

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::bits::Bits;
use crate::isa::{InstrType, OperandType};

/// The maximum number of operands an instruction can have.
pub const MAX_OPERANDS: usize = 2;

/// A language definition, as written in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageDef {
    /// Regex matching a comment (which is stripped from the line).
    pub comment_format: String,
    /// Regexes for label declarations and label usages.
    pub label_formats: LabelFormats,
    /// The operand types instructions can accept.
    pub operand_types: Vec<OperandTypeDef>,
    /// The instructions.
    pub instructions: Vec<InstructionDef>
}
/// Regexes that describe labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFormats {
    /// Regex matching a whole (trimmed) line that declares a label.
    /// The first capture group is the label's name.
    pub declaration: String,
    /// Regex that a label's name must fully match.
    pub usage: String
}
/// An operand type, as written in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandTypeDef {
    /// The name instructions use to refer to this type.
    pub name: String,
    /// The 7-bit type code, as a string of `0`s and `1`s.
    pub code: String,
    /// Regex matching an operand of this type.
    pub regex: String
}
/// An instruction, as written in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionDef {
    /// The instruction's mnemonic.
    pub mnemonic: String,
    /// The 7-bit opcode, as a string of `0`s and `1`s.
    pub opcode: String,
    /// The instruction type.
    #[serde(rename = "type")]
    pub instr_type: InstrType,
    /// The operands, in encoding order.
    #[serde(default)]
    pub operands: Vec<OperandDef>,
    /// Combinations of operand types (one per operand) that are not allowed.
    #[serde(default)]
    pub illegal_combinations_of_operand_types: Vec<Vec<String>>,
    /// The instruction's regex template, with a `__NAME__` placeholder for every operand.
    pub regex: String
}
/// An operand of an instruction, as written in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandDef {
    /// The operand's name.
    pub name: String,
    /// The names of the operand types this operand accepts.
    pub allowed_types: Vec<String>
}

/// Errors raised when loading a language definition.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum LangErr {
    /// The document was not valid JSON for a language definition.
    Json(String),
    /// A regex failed to compile.
    Regex {
        /// The pattern that failed to compile.
        pattern: String,
        /// The reason it failed.
        reason: String
    },
    /// An opcode was not 7 binary digits.
    InvalidOpcode {
        /// The instruction with the opcode.
        mnemonic: String,
        /// The invalid opcode.
        opcode: String
    },
    /// An operand type code was not 7 binary digits or did not name a known operand type.
    InvalidOperandCode {
        /// The operand type with the code.
        name: String,
        /// The invalid code.
        code: String
    },
    /// An instruction referred to an operand type that was not declared.
    UnknownOperandType {
        /// The instruction referring to the type.
        mnemonic: String,
        /// The unknown type name.
        name: String
    },
    /// An instruction's template is missing an operand's placeholder.
    MissingPlaceholder {
        /// The instruction.
        mnemonic: String,
        /// The missing placeholder.
        placeholder: String
    },
    /// An operand's name cannot be used as a placeholder.
    InvalidOperandName {
        /// The instruction.
        mnemonic: String,
        /// The invalid name.
        name: String
    },
    /// An instruction declared more operands than an instruction word holds.
    TooManyOperands {
        /// The instruction.
        mnemonic: String
    }
}
impl std::fmt::Display for LangErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LangErr::Json(e) => write!(f, "invalid language definition: {e}"),
            LangErr::Regex { pattern, reason } => write!(f, "invalid regex {pattern:?}: {reason}"),
            LangErr::InvalidOpcode { mnemonic, opcode } => write!(f, "invalid opcode {opcode:?} for {mnemonic}"),
            LangErr::InvalidOperandCode { name, code } => write!(f, "invalid code {code:?} for operand type {name}"),
            LangErr::UnknownOperandType { mnemonic, name } => write!(f, "{mnemonic} refers to unknown operand type {name}"),
            LangErr::MissingPlaceholder { mnemonic, placeholder } => write!(f, "template for {mnemonic} is missing {placeholder}"),
            LangErr::InvalidOperandName { mnemonic, name } => write!(f, "invalid operand name {name:?} in {mnemonic}"),
            LangErr::TooManyOperands { mnemonic } => write!(f, "{mnemonic} has more than {MAX_OPERANDS} operands"),
        }
    }
}
impl std::error::Error for LangErr {}
impl crate::err::Error for LangErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            LangErr::Json(_) => None,
            LangErr::Regex { .. } => None,
            LangErr::InvalidOpcode { .. } => Some("opcodes are 7 binary digits, such as \"0000111\"".into()),
            LangErr::InvalidOperandCode { .. } => Some(format!(
                "operand type codes are one of {}",
                OperandType::ALL.map(|t| t.code().to_string()).join(", ")
            ).into()),
            LangErr::UnknownOperandType { .. } => Some("declare the type in `operand_types`".into()),
            LangErr::MissingPlaceholder { .. } => Some("every operand needs its placeholder in the template".into()),
            LangErr::InvalidOperandName { .. } => Some("operand names consist of letters, digits and underscores".into()),
            LangErr::TooManyOperands { .. } => None,
        }
    }
}

/// One operand slot of a [`Variant`].
#[derive(Debug, Clone)]
pub struct VariantOperand {
    name: String,
    kind: OperandType
}
impl VariantOperand {
    /// The operand's name (and the name of its capture group).
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The operand type this variant accepts in this slot.
    pub fn kind(&self) -> OperandType {
        self.kind
    }
}

/// An instruction with one fixed combination of operand types.
#[derive(Debug, Clone)]
pub struct Variant {
    mnemonic: String,
    instr_type: InstrType,
    opcode: Bits<7>,
    operands: Vec<VariantOperand>,
    regex: Regex
}
impl Variant {
    /// The mnemonic of the instruction.
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }
    /// The instruction type.
    pub fn instr_type(&self) -> InstrType {
        self.instr_type
    }
    /// The 7-bit opcode.
    pub fn opcode(&self) -> Bits<7> {
        self.opcode
    }
    /// The operands, in encoding order.
    pub fn operands(&self) -> &[VariantOperand] {
        &self.operands
    }
    /// The compiled regex matching a whole line of this variant.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// A compiled language definition.
#[derive(Debug, Clone)]
pub struct Language {
    comment: Regex,
    declaration: Regex,
    usage: Regex,
    variants: Vec<Variant>
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex, LangErr> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| LangErr::Regex { pattern: pattern.to_string(), reason: e.to_string() })
}
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Language {
    /// Loads a language definition from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, LangErr> {
        let def: LanguageDef = serde_json::from_str(json)
            .map_err(|e| LangErr::Json(e.to_string()))?;
        Self::compile(&def)
    }

    /// The language definition bundled with this crate.
    pub fn bundled() -> &'static Language {
        static BUNDLED: OnceLock<Language> = OnceLock::new();

        BUNDLED.get_or_init(|| {
            Language::from_json(include_str!("../../lang/default.json"))
                .unwrap_or_else(|e| unreachable!("bundled language definition should be valid: {e}"))
        })
    }

    /// Validates a language definition and compiles every instruction variant.
    pub fn compile(def: &LanguageDef) -> Result<Self, LangErr> {
        let comment = compile(&def.comment_format, false)?;
        let declaration = compile(&def.label_formats.declaration, false)?;
        let usage = compile(&format!("^(?:{})$", def.label_formats.usage), false)?;

        // Check operand types:
        let mut types = Vec::with_capacity(def.operand_types.len());
        for t in &def.operand_types {
            let kind = t.code.parse::<Bits<7>>().ok()
                .and_then(OperandType::from_code)
                .ok_or_else(|| LangErr::InvalidOperandCode { name: t.name.clone(), code: t.code.clone() })?;
            // Check the regex alone, so errors point at the type and not at a variant.
            compile(&t.regex, true)?;
            types.push((t.name.as_str(), kind, t.regex.as_str()));
        }
        let lookup = |mnemonic: &str, name: &str| {
            types.iter()
                .find(|(n, _, _)| *n == name)
                .copied()
                .ok_or_else(|| LangErr::UnknownOperandType { mnemonic: mnemonic.to_string(), name: name.to_string() })
        };

        let mut variants = vec![];
        for instr in &def.instructions {
            let mnemonic = instr.mnemonic.as_str();
            let opcode = instr.opcode.parse::<Bits<7>>()
                .map_err(|_| LangErr::InvalidOpcode { mnemonic: mnemonic.to_string(), opcode: instr.opcode.clone() })?;
            if instr.operands.len() > MAX_OPERANDS {
                return Err(LangErr::TooManyOperands { mnemonic: mnemonic.to_string() });
            }

            // Resolve every allowed type and check placeholders:
            let mut slots = Vec::with_capacity(instr.operands.len());
            for op in &instr.operands {
                if !is_identifier(&op.name) {
                    return Err(LangErr::InvalidOperandName { mnemonic: mnemonic.to_string(), name: op.name.clone() });
                }
                let placeholder = format!("__{}__", op.name.to_uppercase());
                if !instr.regex.contains(&placeholder) {
                    return Err(LangErr::MissingPlaceholder { mnemonic: mnemonic.to_string(), placeholder });
                }
                let allowed = op.allowed_types.iter()
                    .map(|name| lookup(mnemonic, name))
                    .collect::<Result<Vec<_>, _>>()?;
                slots.push((op.name.as_str(), placeholder, allowed));
            }
            let illegal = instr.illegal_combinations_of_operand_types.iter()
                .map(|combo| {
                    combo.iter()
                        .map(|name| lookup(mnemonic, name).map(|(n, _, _)| n))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;

            // Expand the cartesian product of allowed types:
            let mut combos: Vec<Vec<(&str, OperandType, &str)>> = vec![vec![]];
            for (_, _, allowed) in &slots {
                combos = combos.into_iter()
                    .flat_map(|prefix| allowed.iter().map(move |&t| {
                        let mut combo = prefix.clone();
                        combo.push(t);
                        combo
                    }))
                    .collect();
            }

            for combo in combos {
                let names: Vec<_> = combo.iter().map(|(n, _, _)| *n).collect();
                if illegal.contains(&names) { continue; }

                let mut pattern = instr.regex.clone();
                for ((name, placeholder, _), (_, _, type_regex)) in slots.iter().zip(&combo) {
                    pattern = pattern.replace(placeholder, &format!("(?P<{name}>{type_regex})"));
                }

                variants.push(Variant {
                    mnemonic: mnemonic.to_string(),
                    instr_type: instr.instr_type,
                    opcode,
                    operands: slots.iter().zip(&combo)
                        .map(|((name, _, _), &(_, kind, _))| VariantOperand { name: name.to_string(), kind })
                        .collect(),
                    regex: compile(&format!("^(?:{pattern})$"), true)?,
                });
            }
        }

        Ok(Self { comment, declaration, usage, variants })
    }

    /// Every compiled variant.
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Removes comments from a line.
    pub fn strip_comments<'s>(&self, line: &'s str) -> Cow<'s, str> {
        self.comment.replace_all(line, "")
    }

    /// If the (trimmed) line declares a label, this returns the label's name.
    pub fn declared_label<'s>(&self, line: &'s str) -> Option<&'s str> {
        let name = self.declaration.captures(line)?.get(1)?.as_str();
        self.usage.is_match(name).then_some(name)
    }

    /// Finds every variant that matches the (trimmed) line,
    /// alongside the captured operand text.
    pub fn matches<'a, 's>(&'a self, line: &'s str) -> impl Iterator<Item=(&'a Variant, Captures<'s>)> + 'a
        where 's: 'a
    {
        self.variants.iter()
            .filter_map(move |v| v.regex.captures(line).map(|c| (v, c)))
    }
}

#[cfg(test)]
mod tests {
    use crate::isa::Operation;

    use super::*;

    fn minimal(instructions: &str) -> String {
        format!(r#"{{
            "comment_format": ";.*$",
            "label_formats": {{ "declaration": "^\\.(\\w+):$", "usage": "\\w+" }},
            "operand_types": [
                {{ "name": "immediate", "code": "1010000", "regex": "\\$[0-9]+" }},
                {{ "name": "register", "code": "1100000", "regex": "%[a-z]+" }}
            ],
            "instructions": [{instructions}]
        }}"#)
    }

    #[test]
    fn test_bundled_matches_opcode_tables() {
        let lang = Language::bundled();
        assert!(!lang.variants().is_empty());

        for v in lang.variants() {
            let op = Operation::from_mnemonic(v.mnemonic())
                .unwrap_or_else(|| panic!("{} is not an operation", v.mnemonic()));
            assert_eq!(v.instr_type(), op.instr_type(), "{}", v.mnemonic());
            assert_eq!(v.opcode(), op.opcode_bits(), "{}", v.mnemonic());
        }
        for &op in Operation::ALL {
            assert!(lang.variants().iter().any(|v| v.mnemonic() == op.mnemonic()), "{op} has no definition");
        }
    }

    #[test]
    fn test_variants_skip_illegal_combinations() {
        let lang = Language::bundled();
        let add: Vec<_> = lang.variants().iter()
            .filter(|v| v.mnemonic() == "ADD")
            .map(|v| v.operands().iter().map(|o| o.kind()).collect::<Vec<_>>())
            .collect();

        // 3 sources x 2 targets, minus memory-memory
        assert_eq!(add.len(), 5);
        assert!(!add.contains(&vec![OperandType::Memory, OperandType::Memory]));
        assert!(add.contains(&vec![OperandType::Immediate, OperandType::Register]));
    }

    #[test]
    fn test_matching() {
        let lang = Language::bundled();
        let only = |line| {
            let m: Vec<_> = lang.matches(line).map(|(v, _)| v.mnemonic().to_string()).collect();
            m
        };
        assert_eq!(only("MOV $0x64, %eax"), ["MOV"]);
        assert_eq!(only("je loop"), ["JE"]);
        assert_eq!(only("NOP"), ["NOP"]);
        assert!(only("ADD @1, @2").is_empty());
        assert!(only("FOO %eax").is_empty());

        let (_, caps) = lang.matches("sub   *%ebx ,@12").next().unwrap();
        assert_eq!(&caps["source"], "*%ebx");
        assert_eq!(&caps["target"], "@12");
    }

    #[test]
    fn test_labels_and_comments() {
        let lang = Language::bundled();
        assert_eq!(lang.strip_comments("ADD $1, %eax ; one"), "ADD $1, %eax ");
        assert_eq!(lang.declared_label(".loop:"), Some("loop"));
        assert_eq!(lang.declared_label("loop:"), None);
        assert_eq!(lang.declared_label(".9lives:"), None);
    }

    #[test]
    fn test_invalid_definitions() {
        let instr = |opcode: &str, regex: &str, types: &str| format!(
            r#"{{ "mnemonic": "ADD", "opcode": "{opcode}", "type": "R", "regex": "{regex}",
                  "operands": [{{ "name": "source", "allowed_types": [{types}] }}] }}"#
        );

        assert!(Language::from_json(&minimal(&instr("0000000", "ADD\\\\s+__SOURCE__", r#""immediate""#))).is_ok());
        assert!(matches!(
            Language::from_json(&minimal(&instr("00000", "ADD\\\\s+__SOURCE__", r#""immediate""#))),
            Err(LangErr::InvalidOpcode { .. })
        ));
        assert!(matches!(
            Language::from_json(&minimal(&instr("0000000", "ADD", r#""immediate""#))),
            Err(LangErr::MissingPlaceholder { .. })
        ));
        assert!(matches!(
            Language::from_json(&minimal(&instr("0000000", "ADD\\\\s+__SOURCE__", r#""label""#))),
            Err(LangErr::UnknownOperandType { .. })
        ));
        assert!(matches!(
            Language::from_json(&minimal(&instr("0000000", "ADD(\\\\s+__SOURCE__", r#""immediate""#))),
            Err(LangErr::Regex { .. })
        ));
        assert!(matches!(Language::from_json("{"), Err(LangErr::Json(_))));
        assert!(matches!(
            Language::from_json(&minimal("").replace("1010000", "1111111")),
            Err(LangErr::InvalidOperandCode { .. })
        ));
    }
}
