//! Formatters which can read and write assembled programs to disk.
//!
//! The [`ObjFileFormat`] trait describes an implementation of reading/writing object files into disk.
//! This module provides an implementation of the trait:
//! - [`BinaryFormat`]: A binary representation of a program
//! - [`TextFormat`]: A text representation of a program

use crate::bits::{DoubleWord, VirtualAddress};

use super::{LabelTable, Program};

/// A trait defining object file formats.
pub trait ObjFileFormat {
    /// Representation of the serialized format.
    ///
    /// For binary formats, `[u8]` should be used.
    /// For text-based formats,`str` should be used.
    type Stream: ToOwned + ?Sized;
    /// Serializes into the stream format.
    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned;
    /// Deserializes from the stream format, returning `None`
    /// if an error occurred during deserialization.
    fn deserialize(i: &Self::Stream) -> Option<Program>;
}

// BINARY!
/// A binary format of programs.
pub struct BinaryFormat;

const BFMT_MAGIC: &[u8] = b"obj\x32\x20";
const BFMT_VER: &[u8] = b"\x00\x01";
impl ObjFileFormat for BinaryFormat {
    type Stream = [u8];

    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned {
        // The file consists of a header and an arbitrary number of data blocks.
        //
        // The header consists of:
        // - The magic number (b"obj\x32\x20")
        // - The version (2 bytes)
        //
        // Data is divided into discrete chunks, which start with one of:
        // - 0x00: code segment (exactly once)
        // - 0x01: label table entry
        //
        // Block 0x00 consists of:
        // - the identifier byte 0x00 (1 byte)
        // - the origin (4 bytes)
        // - the number of words (4 bytes)
        // - the array of words (4n bytes)
        //
        // Block 0x01 consists of:
        // - the identifier byte 0x01 (1 byte)
        // - address of the label (4 bytes)
        // - the length of the label's name (8 bytes)
        // - the label (n bytes)
        //
        // Every integer is big-endian, matching the byte order of memory.

        let mut bytes = BFMT_MAGIC.to_vec();
        bytes.extend_from_slice(BFMT_VER);

        bytes.push(0x00);
        bytes.extend(u32::to_be_bytes(p.origin().to_integer()));
        bytes.extend(u32::to_be_bytes(p.words().len() as u32));
        for word in p.words() {
            bytes.extend(u32::to_be_bytes(word.to_u32()));
        }

        for (label, addr) in p.labels().iter() {
            bytes.push(0x01);
            bytes.extend(u32::to_be_bytes(addr.to_integer()));
            bytes.extend(u64::to_be_bytes(label.len() as u64));
            bytes.extend_from_slice(label.as_bytes());
        }

        bytes
    }

    fn deserialize(mut vec: &Self::Stream) -> Option<Program> {
        let mut segment = None;
        let mut labels  = LabelTable::new();

        vec = vec.strip_prefix(BFMT_MAGIC)?
            .strip_prefix(BFMT_VER)?;

        while let Some((ident_byte, rest)) = vec.split_first() {
            vec = rest;
            match ident_byte {
                0x00 => {
                    let origin   = u32::from_be_bytes(take::<4>(&mut vec)?);
                    let data_len = u32::from_be_bytes(take::<4>(&mut vec)?);
                    let data     = take_slice(&mut vec, 4usize.checked_mul(usize::try_from(data_len).ok()?)?)?;

                    let words = data.chunks_exact(4)
                        .map(|c| <[u8; 4]>::try_from(c).ok().map(|b| DoubleWord::from_u32(u32::from_be_bytes(b))))
                        .collect::<Option<Vec<_>>>()?;

                    // Only one segment is allowed:
                    if segment.replace((VirtualAddress::from_u32(origin), words)).is_some() { return None; }
                },
                0x01 => {
                    let addr    = u32::from_be_bytes(take::<4>(&mut vec)?);
                    let str_len = usize::try_from(u64::from_be_bytes(take::<8>(&mut vec)?)).ok()?;
                    let label   = std::str::from_utf8(take_slice(&mut vec, str_len)?).ok()?;

                    if !labels.insert(label, VirtualAddress::from_u32(addr)) { return None; }
                },
                _ => return None
            }
        }

        let (origin, words) = segment?;
        Some(Program::new(origin, words, labels))
    }
}

fn take<const N: usize>(data: &mut &[u8]) -> Option<[u8; N]> {
    take_slice(data, N)
        .and_then(|slice| <[_; N]>::try_from(slice).ok())
}
fn take_slice<'a>(data: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if n > data.len() { return None; }
    let (left, right) = data.split_at(n);
    *data = right;
    Some(left)
}

// TEXT!
/// A text-based format of programs.
pub struct TextFormat;

const TFMT_MAGIC: &str = "SIM32 OBJ FILE";
const TABLE_DIV: &str = " | ";

impl ObjFileFormat for TextFormat {
    type Stream = str;

    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned {
        // ```text
        // SIM32 OBJ FILE
        //
        // .TEXT
        // <origin in hex>
        // <number of words in dec>
        // <word as 32 binary digits>
        // <...>
        //
        // .SYMBOL
        // ADDR     | LABEL
        // 0000000C | LOOP
        // ...
        // // Support for comments, as well.
        // ```
        fn _ser(p: &Program) -> Result<String, std::fmt::Error> {
            use std::fmt::Write;
            let mut buf = String::new();

            writeln!(buf, "{TFMT_MAGIC}")?;
            writeln!(buf)?;

            writeln!(buf, ".TEXT")?;
            writeln!(buf, "{:08X}", p.origin().to_integer())?;
            writeln!(buf, "{}", p.words().len())?;
            for word in p.words() {
                writeln!(buf, "{word}")?;
            }
            writeln!(buf)?;

            if !p.labels().is_empty() {
                writeln!(buf, ".SYMBOL")?;
                writeln!(buf, "ADDR    {TABLE_DIV}LABEL")?;
                for (label, addr) in p.labels().iter() {
                    writeln!(buf, "{:08X}{TABLE_DIV}{label}", addr.to_integer())?;
                }
            }

            Ok(buf)
        }

        _ser(p).unwrap_or_else(|_| unreachable!("writing to a String should not fail"))
    }

    fn deserialize(string: &Self::Stream) -> Option<Program> {
        let mut segment = None;
        let mut labels  = LabelTable::new();

        // Read all of the non-empty lines:
        let mut lines = string.trim().lines()
            .map(|l| l.split_once("//").map_or(l, |(left, _)| left)) // remove comments
            .map(str::trim_end)
            .filter(|&l| !l.trim().is_empty());
        if lines.next() != Some(TFMT_MAGIC) { return None };

        let mut line_groups = vec![];
        for line in lines {
            if line.starts_with('.') {
                line_groups.push(vec![line]);
            } else {
                line_groups.last_mut()?.push(line);
            }
        }
        for group in line_groups {
            let [header, rest @ ..] = &*group else { return None };
            match *header {
                ".TEXT" => {
                    let [origin_hex, len_str, block @ ..] = rest else { return None };
                    let origin = hex2u32(origin_hex)?;
                    let block_len = len_str.trim().parse::<usize>().ok()?;
                    if block.len() != block_len { return None; }

                    let words = block.iter()
                        .map(|l| l.trim().parse::<DoubleWord>().ok())
                        .collect::<Option<Vec<_>>>()?;
                    if segment.replace((VirtualAddress::from_u32(origin), words)).is_some() { return None; }
                },
                ".SYMBOL" => {
                    let table = parse_table(rest, ["ADDR", "LABEL"], |[addr_hex, label]| {
                        Some((hex2u32(addr_hex)?, label))
                    })?;
                    for (addr, label) in table {
                        if !labels.insert(label, VirtualAddress::from_u32(addr)) { return None; }
                    }
                },
                _ => return None
            }
        }

        let (origin, words) = segment?;
        Some(Program::new(origin, words, labels))
    }
}

fn hex2u32(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.len() == 8 {
        true => u32::from_str_radix(s, 16).ok(),
        false => None
    }
}

fn parse_table<'a, T, const N: usize>(
    contents: &[&'a str],
    columns: [&str; N],
    mut row_parser: impl FnMut([&'a str; N]) -> Option<T>,
) -> Option<Vec<T>> {
    // Accept empty tables:
    let Some((header, body)) = contents.split_first() else {
        return Some(vec![])
    };

    header.splitn(N, TABLE_DIV)
        .map(str::trim)
        .eq(columns.iter().copied())
        .then_some(())?;

    body.iter()
        .map(|l| {
            let segments: Vec<_> = l.splitn(N, TABLE_DIV).map(str::trim).collect();
            row_parser(<[_; N]>::try_from(segments).ok()?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::asm::{assemble_with, lang::Language, Program};
    use crate::bits::VirtualAddress;

    use super::{BinaryFormat, ObjFileFormat, TextFormat};

    fn program() -> Program {
        let src = "
            MOV $3, %ecx
        .loop:
            DEC %ecx
            CMP $0, %ecx
            JNZ loop
        .end:
            NOP
        ";
        assemble_with(src, Language::bundled(), VirtualAddress::from_u32(0x400)).unwrap()
    }

    #[test]
    fn test_binary_ser() {
        let program = program();
        let bytes = BinaryFormat::serialize(&program);
        assert_eq!(BinaryFormat::deserialize(&bytes), Some(program));
    }

    #[test]
    fn test_text_ser() {
        let program = program();
        let text = TextFormat::serialize(&program);
        assert!(text.starts_with("SIM32 OBJ FILE"));
        assert!(text.contains("0000040C | loop"));
        assert_eq!(TextFormat::deserialize(&text), Some(program));
    }

    #[test]
    fn test_text_comments() {
        let text = "SIM32 OBJ FILE\n// a comment\n.TEXT\n00000010\n1\n01011000011111000000000000000000 // NOP\n";
        let program = TextFormat::deserialize(text).unwrap();
        assert_eq!(program.origin().to_integer(), 0x10);
        assert_eq!(program.words().len(), 1);
        assert!(program.labels().is_empty());
    }

    #[test]
    fn test_malformed() {
        let bytes = BinaryFormat::serialize(&program());

        // truncated
        assert_eq!(BinaryFormat::deserialize(&bytes[..bytes.len() - 1]), None);
        // bad magic
        assert_eq!(BinaryFormat::deserialize(b"nope"), None);
        // no segment
        assert_eq!(BinaryFormat::deserialize(b"obj\x32\x20\x00\x01"), None);

        assert_eq!(TextFormat::deserialize("SIM32 OBJ FILE\n.TEXT\n00000000\n2\n0101\n"), None);
        assert_eq!(TextFormat::deserialize("NOT AN OBJ FILE\n.TEXT\n00000000\n0\n"), None);
        assert_eq!(TextFormat::deserialize("SIM32 OBJ FILE\n.DATA\n"), None);
    }
}
