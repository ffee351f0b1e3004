//! Drives the lexer line by line, consults the codec table, and emits packed words.
//! Errors are accumulated rather than thrown; a line that fails to parse is skipped up
//! to its next newline so the rest of the file still assembles.

use std::ops::Range;

use legv8::codec::{self, CodecEntry, Format, OperandStyle, Tag};
use legv8::constants;
use legv8::decode::{self, Fields};

use crate::error::{AssemblerError, ErrorKind};
use crate::labels::{LabelTable, PendingFormat, PendingRef, PendingTable};
use crate::lexer::{Lexer, RegFile, Token};

/// The result of assembling one source file: the packed instruction stream, one
/// source span per instruction (where its mnemonic began, for diagnostics), the final
/// label table, and every diagnostic recorded along the way.
pub struct Assembled {
    pub words: Vec<u32>,
    pub spans: Vec<Range<usize>>,
    pub labels: LabelTable,
    pub errors: Vec<AssemblerError>,
}

impl Assembled {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn assemble(source: &str) -> Assembled {
    let mut a = Assembler::new(source);
    a.run();
    a.finish()
}

struct ParsedOperands<'a> {
    fields: Fields,
    label: Option<(&'a str, Range<usize>)>,
}

fn simple(fields: Fields) -> ParsedOperands<'static> {
    ParsedOperands { fields, label: None }
}

struct Assembler<'a> {
    lexer: Lexer<'a>,
    cur: Token<'a>,
    span: Range<usize>,
    words: Vec<u32>,
    spans: Vec<Range<usize>>,
    labels: LabelTable,
    pending: PendingTable,
    errors: Vec<AssemblerError>,
}

impl<'a> Assembler<'a> {
    fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let (cur, span) = lexer.next_token();
        Assembler {
            lexer,
            cur,
            span,
            words: Vec::new(),
            spans: Vec::new(),
            labels: LabelTable::new(),
            pending: PendingTable::new(),
            errors: Vec::new(),
        }
    }

    fn advance(&mut self) {
        let (tok, span) = self.lexer.next_token();
        self.cur = tok;
        self.span = span;
    }

    fn error(&mut self, kind: ErrorKind, span: Range<usize>) {
        self.errors.push(AssemblerError::new(kind, span));
    }

    /// Consumes tokens through the next newline (or EOF) so the rest of the file can
    /// still assemble after a malformed line.
    fn recover_to_newline(&mut self) {
        while !matches!(self.cur, Token::Newline | Token::Eof) {
            self.advance();
        }
        if matches!(self.cur, Token::Newline) {
            self.advance();
        }
    }

    fn expect_end_of_statement(&mut self) {
        match self.cur {
            Token::Newline => self.advance(),
            Token::Eof => {}
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: "newline", got }, self.span.clone());
                self.recover_to_newline();
            }
        }
    }

    fn expect_register(&mut self, file: RegFile, what: &'static str) -> Option<u8> {
        match self.cur {
            Token::Register(f, idx) if f == file => {
                let idx = idx;
                self.advance();
                Some(idx)
            }
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: what, got }, self.span.clone());
                None
            }
        }
    }

    fn expect_comma(&mut self) -> Option<()> {
        match self.cur {
            Token::Comma => {
                self.advance();
                Some(())
            }
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: "','", got }, self.span.clone());
                None
            }
        }
    }

    fn expect_lbracket(&mut self) -> Option<()> {
        match self.cur {
            Token::LBracket => {
                self.advance();
                Some(())
            }
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: "'['", got }, self.span.clone());
                None
            }
        }
    }

    fn expect_rbracket(&mut self) -> Option<()> {
        match self.cur {
            Token::RBracket => {
                self.advance();
                Some(())
            }
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: "']'", got }, self.span.clone());
                None
            }
        }
    }

    fn expect_integer(&mut self, what: &'static str) -> Option<(i64, Range<usize>)> {
        match self.cur {
            Token::Integer(v) => {
                let span = self.span.clone();
                self.advance();
                Some((v, span))
            }
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: what, got }, self.span.clone());
                None
            }
        }
    }

    fn expect_label(&mut self) -> Option<(&'a str, Range<usize>)> {
        match self.cur {
            Token::Identifier(name) => {
                let span = self.span.clone();
                self.advance();
                Some((name, span))
            }
            Token::DotIdentifier(_) => {
                let span = self.span.clone();
                self.error(ErrorKind::DotLabel, span.clone());
                self.advance();
                None
            }
            _ => {
                let got = describe(&self.cur);
                self.error(ErrorKind::ExpectedToken { expected: "label", got }, self.span.clone());
                None
            }
        }
    }

    fn run(&mut self) {
        loop {
            match self.cur {
                Token::Eof => break,
                Token::Newline => self.advance(),
                Token::Colon => {
                    let span = self.span.clone();
                    self.error(ErrorKind::EmptyLabel, span);
                    self.recover_to_newline();
                }
                Token::Identifier(name) => self.identifier_line(name),
                Token::DotIdentifier(name) => self.dotted_line(name),
                _ => {
                    let got = describe(&self.cur);
                    let span = self.span.clone();
                    self.error(ErrorKind::UnexpectedToken(got), span);
                    self.recover_to_newline();
                }
            }
        }
    }

    fn identifier_line(&mut self, name: &'a str) {
        let mnemonic_span = self.span.clone();
        self.advance();
        if matches!(self.cur, Token::Colon) {
            let colon_end = self.span.end;
            self.advance();
            self.define_label(name, mnemonic_span.start..colon_end);
            self.expect_end_of_statement();
            return;
        }
        self.assemble_mnemonic(name, mnemonic_span);
    }

    fn dotted_line(&mut self, name: &'a str) {
        let mnemonic_span = self.span.clone();
        self.advance();
        if matches!(self.cur, Token::Colon) {
            let colon_end = self.span.end;
            self.advance();
            self.error(ErrorKind::DotLabel, mnemonic_span.start..colon_end);
            self.recover_to_newline();
            return;
        }
        self.assemble_mnemonic(name, mnemonic_span);
    }

    fn define_label(&mut self, name: &str, span: Range<usize>) {
        if self.labels.contains(name) {
            self.error(ErrorKind::DuplicateLabelName(name.to_string()), span);
            return;
        }
        let instr_index = self.words.len();
        self.labels.define(name, instr_index);
        for pending in self.pending.take(name) {
            self.patch_pending_ref(pending, instr_index);
        }
    }

    fn assemble_mnemonic(&mut self, mnemonic: &'a str, mnemonic_span: Range<usize>) {
        match mnemonic {
            "MOV" => self.pseudo_mov(mnemonic_span),
            "LDA" => self.pseudo_lda(mnemonic_span),
            "CMP" => self.pseudo_cmp(mnemonic_span),
            "CMPI" => self.pseudo_cmpi(mnemonic_span),
            _ => match codec::table().by_mnemonic(mnemonic) {
                Some(entry) => self.assemble_entry(entry, mnemonic_span),
                None => {
                    self.error(ErrorKind::UnknownMnemonic, mnemonic_span);
                    self.recover_to_newline();
                }
            },
        }
    }

    fn assemble_entry(&mut self, entry: &'static CodecEntry, mnemonic_span: Range<usize>) {
        let Some(parsed) = self.parse_operands(entry) else {
            self.recover_to_newline();
            return;
        };
        self.expect_end_of_statement();

        let instr_index = self.words.len();
        self.words.push(decode::encode(entry, &parsed.fields));
        self.spans.push(mnemonic_span);

        if let Some((name, label_span)) = parsed.label {
            let format = match entry.format {
                Format::B => PendingFormat::B,
                Format::Cb => PendingFormat::Cb,
                _ => unreachable!("only B/CB formats carry a label operand"),
            };
            self.resolve_or_defer(name, label_span, instr_index, format);
        }
    }

    fn parse_operands(&mut self, entry: &CodecEntry) -> Option<ParsedOperands<'a>> {
        use OperandStyle::*;
        match entry.operand_style {
            Rrr => {
                let rd = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let rn = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let rm = self.expect_register(RegFile::X, "X register")?;
                Some(simple(Fields { rd, rn, rm, ..Default::default() }))
            }
            RrShamt => {
                let rd = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let rn = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let (shamt, span) = self.expect_integer("shift amount")?;
                if !(0..=63).contains(&shamt) {
                    self.error(ErrorKind::ShiftAmountOverflow, span);
                    return None;
                }
                Some(simple(Fields { rd, rn, shamt: shamt as u8, ..Default::default() }))
            }
            R1 => {
                let rn = self.expect_register(RegFile::X, "X register")?;
                Some(simple(Fields { rn, ..Default::default() }))
            }
            Frrr => {
                let file = fp_file_for_tag(entry.tag);
                let rd = self.expect_register(file, fp_register_name(file))?;
                self.expect_comma()?;
                let rn = self.expect_register(file, fp_register_name(file))?;
                self.expect_comma()?;
                let rm = self.expect_register(file, fp_register_name(file))?;
                Some(simple(Fields { rd, rn, rm, ..Default::default() }))
            }
            Frr => {
                let file = fp_file_for_tag(entry.tag);
                let rn = self.expect_register(file, fp_register_name(file))?;
                self.expect_comma()?;
                let rm = self.expect_register(file, fp_register_name(file))?;
                Some(simple(Fields { rn, rm, ..Default::default() }))
            }
            Empty => Some(simple(Fields::default())),
            Time => match self.cur {
                Token::Register(RegFile::X, idx) => {
                    self.advance();
                    Some(simple(Fields { rd: idx, ..Default::default() }))
                }
                _ => Some(simple(Fields { rd: 0, ..Default::default() })),
            },
            Prnt => match self.cur {
                Token::Register(RegFile::X, idx) => {
                    self.advance();
                    Some(simple(Fields { rd: idx, rn: 0, ..Default::default() }))
                }
                Token::Register(RegFile::S, idx) => {
                    self.advance();
                    Some(simple(Fields { rd: idx, rn: 1, ..Default::default() }))
                }
                Token::Register(RegFile::D, idx) => {
                    self.advance();
                    Some(simple(Fields { rd: idx, rn: 2, ..Default::default() }))
                }
                _ => {
                    let got = describe(&self.cur);
                    self.error(ErrorKind::ExpectedToken { expected: "register", got }, self.span.clone());
                    None
                }
            },
            Imm12 => {
                let rd = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let rn = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let (imm, span) = self.expect_integer("immediate")?;
                if !fits_signed(imm, 12) {
                    self.error(ErrorKind::ImmediateOverflow, span);
                    return None;
                }
                Some(simple(Fields { rd, rn, imm, ..Default::default() }))
            }
            MemOffset => {
                let file = mem_file_for_tag(entry.tag);
                let rd = self.expect_register(file, fp_register_name(file))?;
                self.expect_comma()?;
                self.expect_lbracket()?;
                let rn = self.expect_register(RegFile::X, "X register")?;
                let address = if matches!(self.cur, Token::Comma) {
                    self.advance();
                    let (offset, span) = self.expect_integer("offset")?;
                    if !(0..=511).contains(&offset) {
                        self.error(ErrorKind::LoadStoreOffsetOverflow, span);
                        return None;
                    }
                    offset
                } else {
                    0
                };
                self.expect_rbracket()?;
                Some(simple(Fields { rd, rn, address, ..Default::default() }))
            }
            Stxr => {
                let status = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let data = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                self.expect_lbracket()?;
                let base = self.expect_register(RegFile::X, "X register")?;
                self.expect_rbracket()?;
                Some(simple(Fields { rd: data, rn: base, address: status as i64, ..Default::default() }))
            }
            Label | CondLabel => {
                let (name, span) = self.expect_label()?;
                Some(ParsedOperands { fields: Fields::default(), label: Some((name, span)) })
            }
            RegLabel => {
                let rd = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let (name, span) = self.expect_label()?;
                Some(ParsedOperands { fields: Fields { rd, ..Default::default() }, label: Some((name, span)) })
            }
            MovImm => {
                let rd = self.expect_register(RegFile::X, "X register")?;
                self.expect_comma()?;
                let (imm, imm_span) = self.expect_integer("16-bit immediate")?;
                if !(0..=0xFFFF).contains(&imm) {
                    self.error(ErrorKind::MovImmediateOverflow, imm_span);
                    return None;
                }
                let shamt = if matches!(self.cur, Token::Comma) {
                    self.advance();
                    match self.cur {
                        Token::Identifier("LSL") => self.advance(),
                        _ => {
                            let got = describe(&self.cur);
                            self.error(ErrorKind::MovNoLsl, self.span.clone());
                            let _ = got;
                            return None;
                        }
                    }
                    let (shift, shift_span) = self.expect_integer("shift amount")?;
                    if ![0, 16, 32, 48].contains(&shift) {
                        self.error(ErrorKind::MovShiftOverflow, shift_span);
                        return None;
                    }
                    (shift / 16) as u8
                } else {
                    0
                };
                Some(simple(Fields { rd, imm, shamt, ..Default::default() }))
            }
        }
    }

    fn pseudo_mov(&mut self, mnemonic_span: Range<usize>) {
        let Some(rd) = self.expect_register(RegFile::X, "X register") else {
            self.recover_to_newline();
            return;
        };
        if self.expect_comma().is_none() {
            self.recover_to_newline();
            return;
        }
        let Some(rn) = self.expect_register(RegFile::X, "X register") else {
            self.recover_to_newline();
            return;
        };
        self.expect_end_of_statement();
        let entry = codec::table().by_mnemonic("ADD").expect("ADD is a core mnemonic");
        self.words.push(decode::encode(entry, &Fields { rd, rn, rm: constants::XZR, ..Default::default() }));
        self.spans.push(mnemonic_span);
    }

    fn pseudo_cmp(&mut self, mnemonic_span: Range<usize>) {
        let Some(rn) = self.expect_register(RegFile::X, "X register") else {
            self.recover_to_newline();
            return;
        };
        if self.expect_comma().is_none() {
            self.recover_to_newline();
            return;
        }
        let Some(rm) = self.expect_register(RegFile::X, "X register") else {
            self.recover_to_newline();
            return;
        };
        self.expect_end_of_statement();
        let entry = codec::table().by_mnemonic("SUBS").expect("SUBS is a core mnemonic");
        self.words.push(decode::encode(entry, &Fields { rd: constants::XZR, rn, rm, ..Default::default() }));
        self.spans.push(mnemonic_span);
    }

    fn pseudo_cmpi(&mut self, mnemonic_span: Range<usize>) {
        let Some(rn) = self.expect_register(RegFile::X, "X register") else {
            self.recover_to_newline();
            return;
        };
        if self.expect_comma().is_none() {
            self.recover_to_newline();
            return;
        }
        let Some((imm, span)) = self.expect_integer("immediate") else {
            self.recover_to_newline();
            return;
        };
        if !fits_signed(imm, 12) {
            self.error(ErrorKind::ImmediateOverflow, span);
            self.recover_to_newline();
            return;
        }
        self.expect_end_of_statement();
        let entry = codec::table().by_mnemonic("SUBIS").expect("SUBIS is a core mnemonic");
        self.words.push(decode::encode(entry, &Fields { rd: constants::XZR, rn, imm, ..Default::default() }));
        self.spans.push(mnemonic_span);
    }

    /// `LDA Xd, label` expands to 1-2 `MOVZ`/`MOVK` instructions loading the label's
    /// absolute byte address. Labels only ever name positions in the text
    /// segment, whose addresses never exceed 32 bits here, so at most the low two
    /// 16-bit halves are ever nonzero — the upper two `MOVK`s the general rule allows
    /// for are never needed by this assembler.
    fn pseudo_lda(&mut self, mnemonic_span: Range<usize>) {
        let Some(rd) = self.expect_register(RegFile::X, "X register") else {
            self.recover_to_newline();
            return;
        };
        if self.expect_comma().is_none() {
            self.recover_to_newline();
            return;
        }
        let Some((name, label_span)) = self.expect_label() else {
            self.recover_to_newline();
            return;
        };
        self.expect_end_of_statement();

        let movz = codec::table().by_mnemonic("MOVZ").expect("MOVZ is a core mnemonic");
        let movk = codec::table().by_mnemonic("MOVK").expect("MOVK is a core mnemonic");

        if let Some(target_idx) = self.labels.get(name) {
            let address = constants::TEXT_START + target_idx as u64 * constants::INSTRUCTION_BYTES;
            let h0 = (address & 0xFFFF) as i64;
            let h1 = ((address >> 16) & 0xFFFF) as i64;
            self.spans.push(mnemonic_span.clone());
            self.words.push(decode::encode(movz, &Fields { rd, imm: h0, shamt: 0, ..Default::default() }));
            if h1 != 0 {
                self.spans.push(mnemonic_span);
                self.words.push(decode::encode(movk, &Fields { rd, imm: h1, shamt: 1, ..Default::default() }));
            }
        } else {
            let movz_idx = self.words.len();
            self.spans.push(mnemonic_span.clone());
            self.words.push(decode::encode(movz, &Fields { rd, imm: 0, shamt: 0, ..Default::default() }));
            let movk_idx = self.words.len();
            self.spans.push(mnemonic_span);
            self.words.push(decode::encode(movk, &Fields { rd, imm: 0, shamt: 1, ..Default::default() }));
            self.pending.push(
                name,
                PendingRef {
                    instruction_index: movz_idx,
                    format: PendingFormat::Lda { instructions: [movz_idx, movk_idx] },
                    span: label_span,
                },
            );
        }
    }

    fn resolve_or_defer(&mut self, name: &'a str, span: Range<usize>, instr_index: usize, format: PendingFormat) {
        if let Some(target_idx) = self.labels.get(name) {
            self.patch_pending_ref(PendingRef { instruction_index: instr_index, format, span }, target_idx);
        } else {
            self.pending.push(name, PendingRef { instruction_index: instr_index, format, span });
        }
    }

    fn patch_pending_ref(&mut self, r: PendingRef, target_idx: usize) {
        match r.format {
            PendingFormat::B => self.patch_branch(r.instruction_index, target_idx, 26, r.span),
            PendingFormat::Cb => self.patch_branch(r.instruction_index, target_idx, 19, r.span),
            PendingFormat::Lda { instructions } => self.patch_lda(instructions, target_idx),
        }
    }

    fn patch_branch(&mut self, instr_index: usize, target_idx: usize, width: u32, span: Range<usize>) {
        let offset = target_idx as i64 - instr_index as i64;
        if !fits_signed(offset, width) {
            self.error(ErrorKind::UnimplementedFarJump, span);
            return;
        }
        self.patch_word_field(instr_index, |fields| fields.address = offset);
    }

    fn patch_lda(&mut self, instructions: [usize; 2], target_idx: usize) {
        let address = constants::TEXT_START + target_idx as u64 * constants::INSTRUCTION_BYTES;
        let h0 = (address & 0xFFFF) as i64;
        let h1 = ((address >> 16) & 0xFFFF) as i64;
        self.patch_word_field(instructions[0], |fields| fields.imm = h0);
        self.patch_word_field(instructions[1], |fields| fields.imm = h1);
    }

    fn patch_word_field(&mut self, instr_index: usize, patch: impl FnOnce(&mut Fields)) {
        let word = self.words[instr_index];
        let decoded = decode::decode(word).expect("a previously-encoded word must decode");
        let mut fields = decoded.fields;
        patch(&mut fields);
        self.words[instr_index] = decode::encode(decoded.entry, &fields);
    }

    fn finish(self) -> Assembled {
        let mut errors = self.errors;
        for (name, r) in self.pending.into_unresolved() {
            errors.push(AssemblerError::new(ErrorKind::UndefinedLabel(name), r.span));
        }
        errors.sort_by_key(|e| e.span.start);
        Assembled { words: self.words, spans: self.spans, labels: self.labels, errors }
    }
}

fn fits_signed(value: i64, width: u32) -> bool {
    let min = -(1i64 << (width - 1));
    let max = (1i64 << (width - 1)) - 1;
    (min..=max).contains(&value)
}

fn fp_file_for_tag(tag: Tag) -> RegFile {
    match tag {
        Tag::FaddS | Tag::FsubS | Tag::FmulS | Tag::FdivS | Tag::FcmpS => RegFile::S,
        _ => RegFile::D,
    }
}

fn mem_file_for_tag(tag: Tag) -> RegFile {
    match tag {
        Tag::LdurS | Tag::SturS => RegFile::S,
        Tag::LdurD | Tag::SturD => RegFile::D,
        _ => RegFile::X,
    }
}

fn fp_register_name(file: RegFile) -> &'static str {
    match file {
        RegFile::X => "X register",
        RegFile::S => "S register",
        RegFile::D => "D register",
    }
}

fn describe(tok: &Token) -> String {
    match *tok {
        Token::Eof => "end of file".to_string(),
        Token::Newline => "newline".to_string(),
        Token::Identifier(s) => format!("identifier '{s}'"),
        Token::DotIdentifier(s) => format!("identifier '{s}'"),
        Token::Integer(v) => format!("integer '{v}'"),
        Token::Register(file, idx) => {
            let letter = match file {
                RegFile::X => 'X',
                RegFile::S => 'S',
                RegFile::D => 'D',
            };
            format!("register '{letter}{idx}'")
        }
        Token::Colon => "':'".to_string(),
        Token::Comma => "','".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::Invalid(c) => format!("invalid character '{c}'"),
    }
}
