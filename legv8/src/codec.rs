//! The instruction codec table: the static catalogue mapping mnemonic strings to
//! opcode ranges, bit-field layouts, and operand styles.
//!
//! This is the central data artifact the assembler and the VM both consult. Several
//! LEGv8 mnemonics legitimately share an 11-bit opcode prefix (the FP precision pairs,
//! and the fourteen `B.cond` variants), so a row covers an opcode *range* rather than a
//! single value, with a secondary field distinguishing rows that collide.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::constants::{self, OPCODE_PREFIX_COUNT};

/// One of the six fixed-width instruction formats.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Format {
    R,
    I,
    D,
    B,
    Cb,
    Iw,
}

impl Format {
    /// Width in bits of this format's opcode field.
    pub const fn opcode_width(self) -> u32 {
        match self {
            Format::R => constants::r::OPCODE_WIDTH,
            Format::I => constants::i_fmt::OPCODE_WIDTH,
            Format::D => constants::d::OPCODE_WIDTH,
            Format::B => constants::b::OPCODE_WIDTH,
            Format::Cb => constants::cb::OPCODE_WIDTH,
            Format::Iw => constants::iw::OPCODE_WIDTH,
        }
    }

    /// How many consecutive 11-bit prefixes one opcode value of this format spans.
    fn prefix_shift(self) -> u32 {
        constants::OPCODE_PREFIX_WIDTH - self.opcode_width()
    }
}

/// Secondary field used to disambiguate two codec entries whose opcode ranges overlap.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Discriminator {
    /// No ambiguity: this entry's opcode range is unique.
    None,
    /// R-format: the fixed value the `shamt` field carries for this entry (used by the
    /// FP family to distinguish single- from double-precision variants).
    Shamt(u8),
    /// CB-format: the fixed value the `rt` field carries for this entry (used by the
    /// fourteen `B.cond` variants to carry their condition nibble).
    Rt(u8),
}

/// Operand syntax a mnemonic expects, dispatched on by the assembler's parser.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandStyle {
    /// `Xd, Xn, Xm`
    Rrr,
    /// `Xd, Xn, #shamt` (0..=63)
    RrShamt,
    /// `Xn` — a single X register.
    R1,
    /// `Sd, Sn, Sm` or `Dd, Dn, Dm`, precision fixed by the tag.
    Frrr,
    /// `Sn, Sm` or `Dn, Dm` — FP compare.
    Frr,
    /// No operands at all (`HALT`, `DUMP`, `PRNL`).
    Empty,
    /// Optional single X register, defaulting to `X0` (`TIME`).
    Time,
    /// One register of any file; the file is encoded in the instruction (`PRNT`).
    Prnt,
    /// `Xd, Xn, #imm12`
    Imm12,
    /// `Xt, [Xn, #offset9]` where `Xt`/`St`/`Dt` is picked by the tag.
    MemOffset,
    /// `Xs, Xt, [Xn]` (`STXR`).
    Stxr,
    /// A single label (`B`, `BL`).
    Label,
    /// A fixed-condition branch and a label (`B.EQ`, ...).
    CondLabel,
    /// A register and a label (`CBZ`, `CBNZ`).
    RegLabel,
    /// `Xd, #imm16 [, LSL #shift]`
    MovImm,
}

/// Stable ordinal identifying one *executable* instruction behaviour.
///
/// Several codec table rows can share a tag (the fourteen `B.cond` rows all execute as
/// [`Tag::BCond`], reading the actual condition back out of the decoded `rt` field)
/// when the encoding differs but the runtime effect is parameterized uniformly by a
/// field that's already present in the decoded instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Tag {
    Add,
    Adds,
    Sub,
    Subs,
    And,
    Ands,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Mul,
    Sdiv,
    Udiv,
    Smulh,
    Umulh,
    Br,
    FaddS,
    FaddD,
    FsubS,
    FsubD,
    FmulS,
    FmulD,
    FdivS,
    FdivD,
    FcmpS,
    FcmpD,
    Addi,
    Addis,
    Subi,
    Subis,
    Andi,
    Andis,
    Orri,
    Eori,
    Ldur,
    Stur,
    Ldurb,
    Sturb,
    Ldurh,
    Sturh,
    Ldursw,
    Sturw,
    LdurS,
    SturS,
    LdurD,
    SturD,
    Ldxr,
    Stxr,
    B,
    Bl,
    Cbz,
    Cbnz,
    BCond,
    Movz,
    Movk,
    Halt,
    Dump,
    Prnt,
    Prnl,
    Time,
}

/// One row of the codec table: a format, an opcode value (in the format's own native
/// width, *not* yet expanded to the 11-bit prefix range), an optional discriminator,
/// the operand syntax, the flag-setting discipline, and the mnemonic aliases that
/// select this row.
#[derive(Clone, Copy, Debug)]
pub struct CodecEntry {
    pub tag: Tag,
    pub format: Format,
    pub opcode: u16,
    pub discriminator: Discriminator,
    pub operand_style: OperandStyle,
    pub sets_flags: bool,
    pub mnemonics: &'static [&'static str],
    pub description: &'static str,
}

impl CodecEntry {
    /// The inclusive `[start, end]` range of 11-bit opcode prefixes this entry occupies.
    pub fn opcode_range(&self) -> (u16, u16) {
        let shift = self.format.prefix_shift();
        let start = (self.opcode as u32) << shift;
        let end = start + ((1u32 << shift) - 1);
        (start as u16, end as u16)
    }
}

/// Condition codes for `B.cond`, in the canonical NZCV-predicate order used by the
/// fourteen `BCond` codec rows. The numeric value is the 4-bit discriminator carried
/// in the decoded instruction's `rt` field.
pub const CONDITIONS: &[(&str, u8)] = &[
    ("EQ", 0b0000),
    ("NE", 0b0001),
    ("HS", 0b0010),
    ("LO", 0b0011),
    ("MI", 0b0100),
    ("PL", 0b0101),
    ("VS", 0b0110),
    ("VC", 0b0111),
    ("HI", 0b1000),
    ("LS", 0b1001),
    ("GE", 0b1010),
    ("LT", 0b1011),
    ("GT", 0b1100),
    ("LE", 0b1101),
];

fn bcond_table() -> Vec<CodecEntry> {
    // Mnemonics are leaked once into 'static storage; the table is built exactly once
    // per process, so this isn't an unbounded leak.
    CONDITIONS
        .iter()
        .map(|&(name, value)| {
            let dotted: &'static str = Box::leak(format!("B.{name}").into_boxed_str());
            let joined: &'static str = Box::leak(format!("B{name}").into_boxed_str());
            let mnemonics: &'static [&'static str] = Box::leak(vec![dotted, joined].into_boxed_slice());
            let description: &'static str = Box::leak(format!("branch if {name}").into_boxed_str());
            CodecEntry {
                tag: Tag::BCond,
                format: Format::Cb,
                opcode: 0b01010100,
                discriminator: Discriminator::Rt(value),
                operand_style: OperandStyle::CondLabel,
                sets_flags: false,
                mnemonics,
                description,
            }
        })
        .collect()
}

/// Builds the full codec table. Called once and cached behind [`table`].
fn build_table() -> Vec<CodecEntry> {
    let mut rows = vec![
        CodecEntry { tag: Tag::Add, format: Format::R, opcode: 0b10001011000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["ADD"], description: "add" },
        CodecEntry { tag: Tag::Adds, format: Format::R, opcode: 0b10101011000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: true, mnemonics: &["ADDS"], description: "add, set flags" },
        CodecEntry { tag: Tag::Sub, format: Format::R, opcode: 0b11001011000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["SUB"], description: "subtract" },
        CodecEntry { tag: Tag::Subs, format: Format::R, opcode: 0b11101011000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: true, mnemonics: &["SUBS"], description: "subtract, set flags" },
        CodecEntry { tag: Tag::And, format: Format::R, opcode: 0b10001010000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["AND"], description: "bitwise and" },
        CodecEntry { tag: Tag::Ands, format: Format::R, opcode: 0b11101010000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: true, mnemonics: &["ANDS"], description: "bitwise and, set flags" },
        CodecEntry { tag: Tag::Orr, format: Format::R, opcode: 0b10101010000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["ORR"], description: "bitwise or" },
        CodecEntry { tag: Tag::Eor, format: Format::R, opcode: 0b11001010000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["EOR"], description: "bitwise xor" },
        CodecEntry { tag: Tag::Lsl, format: Format::R, opcode: 0b11010011011, discriminator: Discriminator::None, operand_style: OperandStyle::RrShamt, sets_flags: false, mnemonics: &["LSL"], description: "logical shift left" },
        CodecEntry { tag: Tag::Lsr, format: Format::R, opcode: 0b11010011010, discriminator: Discriminator::None, operand_style: OperandStyle::RrShamt, sets_flags: false, mnemonics: &["LSR"], description: "logical shift right" },
        CodecEntry { tag: Tag::Mul, format: Format::R, opcode: 0b10011011000, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["MUL"], description: "multiply, low 64 bits" },
        CodecEntry { tag: Tag::Sdiv, format: Format::R, opcode: 0b10011010110, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["SDIV"], description: "signed divide" },
        CodecEntry { tag: Tag::Udiv, format: Format::R, opcode: 0b10011010010, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["UDIV"], description: "unsigned divide" },
        CodecEntry { tag: Tag::Smulh, format: Format::R, opcode: 0b10011011010, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["SMULH"], description: "signed multiply, high 64 bits" },
        CodecEntry { tag: Tag::Umulh, format: Format::R, opcode: 0b10011011110, discriminator: Discriminator::None, operand_style: OperandStyle::Rrr, sets_flags: false, mnemonics: &["UMULH"], description: "unsigned multiply, high 64 bits" },
        CodecEntry { tag: Tag::Br, format: Format::R, opcode: 0b11010110000, discriminator: Discriminator::None, operand_style: OperandStyle::R1, sets_flags: false, mnemonics: &["BR"], description: "branch to register" },

        CodecEntry { tag: Tag::FaddS, format: Format::R, opcode: 0b00011100000, discriminator: Discriminator::Shamt(0), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FADDS"], description: "float add, single precision" },
        CodecEntry { tag: Tag::FaddD, format: Format::R, opcode: 0b00011100000, discriminator: Discriminator::Shamt(1), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FADDD"], description: "float add, double precision" },
        CodecEntry { tag: Tag::FsubS, format: Format::R, opcode: 0b00011100010, discriminator: Discriminator::Shamt(0), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FSUBS"], description: "float subtract, single precision" },
        CodecEntry { tag: Tag::FsubD, format: Format::R, opcode: 0b00011100010, discriminator: Discriminator::Shamt(1), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FSUBD"], description: "float subtract, double precision" },
        CodecEntry { tag: Tag::FmulS, format: Format::R, opcode: 0b00011100100, discriminator: Discriminator::Shamt(0), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FMULS"], description: "float multiply, single precision" },
        CodecEntry { tag: Tag::FmulD, format: Format::R, opcode: 0b00011100100, discriminator: Discriminator::Shamt(1), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FMULD"], description: "float multiply, double precision" },
        CodecEntry { tag: Tag::FdivS, format: Format::R, opcode: 0b00011100110, discriminator: Discriminator::Shamt(0), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FDIVS"], description: "float divide, single precision" },
        CodecEntry { tag: Tag::FdivD, format: Format::R, opcode: 0b00011100110, discriminator: Discriminator::Shamt(1), operand_style: OperandStyle::Frrr, sets_flags: false, mnemonics: &["FDIVD"], description: "float divide, double precision" },
        CodecEntry { tag: Tag::FcmpS, format: Format::R, opcode: 0b00011101000, discriminator: Discriminator::Shamt(0), operand_style: OperandStyle::Frr, sets_flags: true, mnemonics: &["FCMPS"], description: "float compare, single precision" },
        CodecEntry { tag: Tag::FcmpD, format: Format::R, opcode: 0b00011101000, discriminator: Discriminator::Shamt(1), operand_style: OperandStyle::Frr, sets_flags: true, mnemonics: &["FCMPD"], description: "float compare, double precision" },

        CodecEntry { tag: Tag::Addi, format: Format::I, opcode: 0b1001000100, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: false, mnemonics: &["ADDI"], description: "add immediate" },
        CodecEntry { tag: Tag::Addis, format: Format::I, opcode: 0b1011000100, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: true, mnemonics: &["ADDIS"], description: "add immediate, set flags" },
        CodecEntry { tag: Tag::Subi, format: Format::I, opcode: 0b1101000100, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: false, mnemonics: &["SUBI"], description: "subtract immediate" },
        CodecEntry { tag: Tag::Subis, format: Format::I, opcode: 0b1111000100, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: true, mnemonics: &["SUBIS"], description: "subtract immediate, set flags" },
        CodecEntry { tag: Tag::Andi, format: Format::I, opcode: 0b1001001000, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: false, mnemonics: &["ANDI"], description: "bitwise and immediate" },
        CodecEntry { tag: Tag::Andis, format: Format::I, opcode: 0b1111001000, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: true, mnemonics: &["ANDIS"], description: "bitwise and immediate, set flags" },
        CodecEntry { tag: Tag::Orri, format: Format::I, opcode: 0b1011001000, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: false, mnemonics: &["ORRI"], description: "bitwise or immediate" },
        CodecEntry { tag: Tag::Eori, format: Format::I, opcode: 0b1101001000, discriminator: Discriminator::None, operand_style: OperandStyle::Imm12, sets_flags: false, mnemonics: &["EORI"], description: "bitwise xor immediate" },

        CodecEntry { tag: Tag::Ldur, format: Format::D, opcode: 0b11111000010, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDUR"], description: "load 8 bytes" },
        CodecEntry { tag: Tag::Stur, format: Format::D, opcode: 0b11111000000, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["STUR"], description: "store 8 bytes" },
        CodecEntry { tag: Tag::Ldurb, format: Format::D, opcode: 0b00111000010, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDURB"], description: "load 1 byte, zero-extend" },
        CodecEntry { tag: Tag::Sturb, format: Format::D, opcode: 0b00111000000, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["STURB"], description: "store 1 byte" },
        CodecEntry { tag: Tag::Ldurh, format: Format::D, opcode: 0b01111000010, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDURH"], description: "load 2 bytes, zero-extend" },
        CodecEntry { tag: Tag::Sturh, format: Format::D, opcode: 0b01111000000, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["STURH"], description: "store 2 bytes" },
        CodecEntry { tag: Tag::Ldursw, format: Format::D, opcode: 0b10111000100, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDURSW"], description: "load 4 bytes, sign-extend" },
        CodecEntry { tag: Tag::Sturw, format: Format::D, opcode: 0b10111000000, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["STURW"], description: "store the low 4 bytes" },
        CodecEntry { tag: Tag::LdurS, format: Format::D, opcode: 0b10111100010, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDURS"], description: "load 4 bytes as float" },
        CodecEntry { tag: Tag::SturS, format: Format::D, opcode: 0b10111100000, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["STURS"], description: "store 4 bytes as float" },
        CodecEntry { tag: Tag::LdurD, format: Format::D, opcode: 0b11111100010, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDURD"], description: "load 8 bytes as float" },
        CodecEntry { tag: Tag::SturD, format: Format::D, opcode: 0b11111100000, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["STURD"], description: "store 8 bytes as float" },
        CodecEntry { tag: Tag::Ldxr, format: Format::D, opcode: 0b11001000010, discriminator: Discriminator::None, operand_style: OperandStyle::MemOffset, sets_flags: false, mnemonics: &["LDXR"], description: "load exclusive (plain aligned load)" },
        CodecEntry { tag: Tag::Stxr, format: Format::D, opcode: 0b11001000000, discriminator: Discriminator::None, operand_style: OperandStyle::Stxr, sets_flags: false, mnemonics: &["STXR"], description: "store exclusive (plain aligned store)" },

        CodecEntry { tag: Tag::B, format: Format::B, opcode: 0b000101, discriminator: Discriminator::None, operand_style: OperandStyle::Label, sets_flags: false, mnemonics: &["B"], description: "branch" },
        CodecEntry { tag: Tag::Bl, format: Format::B, opcode: 0b100101, discriminator: Discriminator::None, operand_style: OperandStyle::Label, sets_flags: false, mnemonics: &["BL"], description: "branch with link" },

        CodecEntry { tag: Tag::Cbz, format: Format::Cb, opcode: 0b10110100, discriminator: Discriminator::None, operand_style: OperandStyle::RegLabel, sets_flags: false, mnemonics: &["CBZ"], description: "branch if register is zero" },
        CodecEntry { tag: Tag::Cbnz, format: Format::Cb, opcode: 0b10110101, discriminator: Discriminator::None, operand_style: OperandStyle::RegLabel, sets_flags: false, mnemonics: &["CBNZ"], description: "branch if register is nonzero" },

        CodecEntry { tag: Tag::Movz, format: Format::Iw, opcode: 0b110100101, discriminator: Discriminator::None, operand_style: OperandStyle::MovImm, sets_flags: false, mnemonics: &["MOVZ"], description: "move 16-bit immediate, zeroing other bits" },
        CodecEntry { tag: Tag::Movk, format: Format::Iw, opcode: 0b111100101, discriminator: Discriminator::None, operand_style: OperandStyle::MovImm, sets_flags: false, mnemonics: &["MOVK"], description: "move 16-bit immediate into one slot, keeping the rest" },

        CodecEntry { tag: Tag::Halt, format: Format::I, opcode: 0b1111111111, discriminator: Discriminator::None, operand_style: OperandStyle::Empty, sets_flags: false, mnemonics: &["HALT"], description: "stop execution" },
        CodecEntry { tag: Tag::Dump, format: Format::I, opcode: 0b1111111110, discriminator: Discriminator::None, operand_style: OperandStyle::Empty, sets_flags: false, mnemonics: &["DUMP"], description: "log a state-dump marker" },
        CodecEntry { tag: Tag::Prnt, format: Format::I, opcode: 0b1111111011, discriminator: Discriminator::None, operand_style: OperandStyle::Prnt, sets_flags: false, mnemonics: &["PRNT"], description: "print a register" },
        CodecEntry { tag: Tag::Prnl, format: Format::I, opcode: 0b1111111101, discriminator: Discriminator::None, operand_style: OperandStyle::Empty, sets_flags: false, mnemonics: &["PRNL"], description: "print a newline" },
        CodecEntry { tag: Tag::Time, format: Format::I, opcode: 0b1111111100, discriminator: Discriminator::None, operand_style: OperandStyle::Time, sets_flags: false, mnemonics: &["TIME"], description: "write milliseconds since epoch" },
    ];

    rows.extend(bcond_table());
    rows
}

/// Sentinel stored in the fast opcode-prefix table when more than one codec entry's
/// range claims that prefix; the decoder falls back to the discriminator scan.
pub const AMBIGUOUS: i16 = -1;

pub struct CodecTable {
    entries: Vec<CodecEntry>,
    mnemonics: HashMap<&'static str, usize>,
    /// `entries[i]` index, or [`AMBIGUOUS`], keyed by 11-bit opcode prefix.
    prefix_lookup: Vec<i16>,
}

impl CodecTable {
    pub fn entries(&self) -> &[CodecEntry] {
        &self.entries
    }

    pub fn by_mnemonic(&self, mnemonic: &str) -> Option<&CodecEntry> {
        self.mnemonics.get(mnemonic).map(|&i| &self.entries[i])
    }

    /// Resolves a raw 32-bit word's top 11 bits to a codec entry, consulting the
    /// discriminator-scan fallback for ambiguous prefixes.
    pub fn decode_prefix(&self, prefix: u16, shamt: u8, rt: u8) -> Option<&CodecEntry> {
        let slot = self.prefix_lookup[prefix as usize];
        if slot >= 0 {
            return Some(&self.entries[slot as usize]);
        }
        if slot != AMBIGUOUS {
            return None;
        }
        self.entries.iter().find(|entry| {
            let (start, end) = entry.opcode_range();
            if !(start..=end).contains(&prefix) {
                return false;
            }
            match entry.discriminator {
                Discriminator::None => true,
                Discriminator::Shamt(v) => v == shamt,
                Discriminator::Rt(v) => v == rt,
            }
        })
    }

    /// Validates that two entries whose opcode ranges overlap carry distinct
    /// discriminators. Called once when the table is first built, and
    /// exercised directly by tests; a violation is a build-time defect in the table,
    /// not a runtime condition a caller can recover from.
    fn verify(entries: &[CodecEntry]) {
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                let (a_start, a_end) = a.opcode_range();
                let (b_start, b_end) = b.opcode_range();
                let overlap = a_start <= b_end && b_start <= a_end;
                if !overlap {
                    continue;
                }
                let distinguishable = match (a.discriminator, b.discriminator) {
                    (Discriminator::Shamt(x), Discriminator::Shamt(y)) => x != y,
                    (Discriminator::Rt(x), Discriminator::Rt(y)) => x != y,
                    _ => false,
                };
                assert!(
                    distinguishable,
                    "codec table invariant violated: {:?} and {:?} overlap without a distinguishing discriminator",
                    a.tag, b.tag
                );
            }
        }
    }

    fn build() -> CodecTable {
        let entries = build_table();
        Self::verify(&entries);

        let mut mnemonics = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            for &m in entry.mnemonics {
                let previous = mnemonics.insert(m, i);
                assert!(previous.is_none(), "duplicate mnemonic in codec table: {m}");
            }
        }

        // i16::MIN means "no entry claims this prefix"; AMBIGUOUS means "more than
        // one entry claims it, scan for the discriminator"; any other value is the
        // index of the single entry that claims it.
        let mut prefix_lookup = vec![i16::MIN; OPCODE_PREFIX_COUNT];
        for (i, entry) in entries.iter().enumerate() {
            let (start, end) = entry.opcode_range();
            for prefix in start..=end {
                let slot = &mut prefix_lookup[prefix as usize];
                *slot = if *slot == i16::MIN { i as i16 } else { AMBIGUOUS };
            }
        }

        CodecTable { entries, mnemonics, prefix_lookup }
    }
}

static TABLE: OnceLock<CodecTable> = OnceLock::new();

/// Returns the process-wide codec table, building and validating it on first use.
pub fn table() -> &'static CodecTable {
    TABLE.get_or_init(CodecTable::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_builds_without_panicking() {
        let t = table();
        assert!(t.entries().len() > 60);
    }

    #[test]
    fn every_mnemonic_round_trips_to_its_own_entry() {
        let t = table();
        for entry in t.entries() {
            for &m in entry.mnemonics {
                let found = t.by_mnemonic(m).expect("mnemonic registered");
                assert_eq!(found.tag, entry.tag);
            }
        }
    }

    #[test]
    fn fp_family_shares_opcode_range_but_differs_by_shamt() {
        let t = table();
        let adds = t.by_mnemonic("FADDS").unwrap();
        let addd = t.by_mnemonic("FADDD").unwrap();
        assert_eq!(adds.opcode_range(), addd.opcode_range());
        assert_ne!(adds.discriminator, addd.discriminator);
    }

    #[test]
    fn bcond_has_fourteen_conditions_with_both_spellings() {
        let t = table();
        assert!(t.by_mnemonic("B.EQ").is_some());
        assert!(t.by_mnemonic("BEQ").is_some());
        let count = t.entries().iter().filter(|e| e.tag == Tag::BCond).count();
        assert_eq!(count, CONDITIONS.len());
    }

    #[test]
    fn decode_prefix_resolves_ambiguous_fp_slot_via_shamt() {
        let t = table();
        let (start, _) = t.by_mnemonic("FADDS").unwrap().opcode_range();
        let single = t.decode_prefix(start, 0, 0).unwrap();
        let double = t.decode_prefix(start, 1, 0).unwrap();
        assert_eq!(single.tag, Tag::FaddS);
        assert_eq!(double.tag, Tag::FaddD);
    }

    #[test]
    fn decode_prefix_resolves_ambiguous_cb_slot_via_rt() {
        let t = table();
        let (start, _) = t.by_mnemonic("B.EQ").unwrap().opcode_range();
        let eq = t.decode_prefix(start, 0, 0b0000).unwrap();
        let ne = t.decode_prefix(start, 0, 0b0001).unwrap();
        assert_eq!(eq.tag, Tag::BCond);
        assert_eq!(ne.tag, Tag::BCond);
    }

    #[test]
    fn unclaimed_prefix_decodes_to_none() {
        let t = table();
        // 0 is not claimed by any codec entry's opcode range.
        assert!(t.decode_prefix(0, 0, 0).is_none());
    }

    #[test]
    fn unique_entries_occupy_a_single_fast_slot() {
        let t = table();
        let add = t.by_mnemonic("ADD").unwrap();
        let (start, end) = add.opcode_range();
        assert_eq!(start, end);
        assert_eq!(t.decode_prefix(start, 0, 0).unwrap().tag, Tag::Add);
    }
}
