//! The fetch-decode-execute loop.

use std::io::Write;

use crate::codec::Tag;
use crate::constants::{self, TEXT_END, TEXT_START, XZR};
use crate::decode::{self, Fields};
use crate::exception::{AccessKind, BreakKind, Exception, ExceptionKind};
use crate::memory::Memory;
use crate::registers::{FpDoubleRegisters, FpSingleRegisters, Flags, GpRegisters};
use crate::Address;

/// The VM's run state. No transition is valid out of [`State::Halted`] or
/// [`State::Faulted`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Running,
    Halted,
    Faulted,
}

/// The complete machine: register files, flags, memory, program counter, and an
/// injected output sink for `PRNT`/`PRNL`/`DUMP`.
pub struct Vm<W: Write> {
    pub gp: GpRegisters,
    pub fs: FpSingleRegisters,
    pub fd: FpDoubleRegisters,
    pub flags: Flags,
    pub memory: Memory,
    pub pc: u64,
    pub state: State,
    pub exception: Option<Exception>,
    out: W,
}

impl<W: Write> Vm<W> {
    pub fn new(memory: Memory, out: W) -> Self {
        Vm {
            gp: GpRegisters::new(),
            fs: FpSingleRegisters::default(),
            fd: FpDoubleRegisters::default(),
            flags: Flags::default(),
            memory,
            pc: 0,
            state: State::Running,
            exception: None,
            out,
        }
    }

    /// Consumes the machine and returns its output sink, e.g. to inspect what `PRNT`
    /// and `PRNL` wrote when `W` is an in-memory buffer.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Runs until the machine halts or faults.
    pub fn run(&mut self) {
        while self.state == State::Running {
            self.step();
        }
    }

    /// Executes exactly one instruction. A no-op once the machine is no longer
    /// running: each call either advances PC by one instruction or populates the
    /// exception slot.
    pub fn step(&mut self) {
        if self.state != State::Running {
            return;
        }

        if self.pc >= self.memory.text_word_count() {
            self.state = State::Halted;
            return;
        }

        let word = match self.memory.load_aligned(self.pc) {
            Ok(word) => word,
            Err(_) => {
                self.raise(ExceptionKind::Instr);
                return;
            }
        };

        let decoded = match decode::decode(word) {
            Some(d) => d,
            None => {
                log::trace!("pc={}: word 0x{word:08X} did not decode", self.pc);
                self.raise(ExceptionKind::Instr);
                return;
            }
        };

        self.execute(decoded.entry.tag, decoded.entry.format, &decoded.fields, decoded.entry.sets_flags);
    }

    fn raise(&mut self, kind: ExceptionKind) {
        log::trace!("pc={}: exception raised: {kind}", self.pc);
        self.exception = Some(Exception { kind, pc: self.pc });
        self.state = State::Faulted;
    }

    fn is_branch_tag(tag: Tag) -> bool {
        matches!(
            tag,
            Tag::B | Tag::Bl | Tag::Br | Tag::BCond | Tag::Cbz | Tag::Cbnz
        )
    }

    fn execute(&mut self, tag: Tag, format: crate::codec::Format, f: &Fields, sets_flags: bool) {
        use Tag::*;

        match tag {
            Add | Adds => self.alu_add(format, f, sets_flags),
            Sub | Subs => self.alu_sub(format, f, sets_flags),
            And | Ands => self.alu_bitwise(format, f, sets_flags, |a, b| a & b),
            Orr => self.alu_bitwise(format, f, false, |a, b| a | b),
            Eor => self.alu_bitwise(format, f, false, |a, b| a ^ b),
            Lsl => {
                let v = (self.gp.read_unsigned(f.rn) << f.shamt) as i64;
                self.gp.write(f.rd, v);
            }
            Lsr => {
                let v = (self.gp.read_unsigned(f.rn) >> f.shamt) as i64;
                self.gp.write(f.rd, v);
            }
            Mul => {
                let v = self.gp.read(f.rn).wrapping_mul(self.gp.read(f.rm));
                self.gp.write(f.rd, v);
            }
            Sdiv => {
                let divisor = self.gp.read(f.rm);
                if divisor == 0 {
                    self.raise(ExceptionKind::FpeDivisionByZero);
                    return;
                }
                let v = self.gp.read(f.rn).wrapping_div(divisor);
                self.gp.write(f.rd, v);
            }
            Udiv => {
                let divisor = self.gp.read_unsigned(f.rm);
                if divisor == 0 {
                    self.raise(ExceptionKind::FpeDivisionByZero);
                    return;
                }
                let v = (self.gp.read_unsigned(f.rn) / divisor) as i64;
                self.gp.write(f.rd, v);
            }
            Smulh => {
                let v = (((self.gp.read(f.rn) as i128) * (self.gp.read(f.rm) as i128)) >> 64) as i64;
                self.gp.write(f.rd, v);
            }
            Umulh => {
                let v = (((self.gp.read_unsigned(f.rn) as u128) * (self.gp.read_unsigned(f.rm) as u128)) >> 64) as i64;
                self.gp.write(f.rd, v);
            }
            Br => {
                let target = self.gp.read_unsigned(f.rn);
                self.branch_to_byte_address(target);
                return;
            }

            FaddS => { let v = self.fs.read(f.rn) + self.fs.read(f.rm); self.fs.write(f.rd, v); }
            FaddD => { let v = self.fd.read(f.rn) + self.fd.read(f.rm); self.fd.write(f.rd, v); }
            FsubS => { let v = self.fs.read(f.rn) - self.fs.read(f.rm); self.fs.write(f.rd, v); }
            FsubD => { let v = self.fd.read(f.rn) - self.fd.read(f.rm); self.fd.write(f.rd, v); }
            FmulS => { let v = self.fs.read(f.rn) * self.fs.read(f.rm); self.fs.write(f.rd, v); }
            FmulD => { let v = self.fd.read(f.rn) * self.fd.read(f.rm); self.fd.write(f.rd, v); }
            FdivS => {
                if self.fs.read(f.rm) == 0.0 {
                    self.raise(ExceptionKind::FpeDivisionByZero);
                    return;
                }
                let v = self.fs.read(f.rn) / self.fs.read(f.rm);
                self.fs.write(f.rd, v);
            }
            FdivD => {
                if self.fd.read(f.rm) == 0.0 {
                    self.raise(ExceptionKind::FpeDivisionByZero);
                    return;
                }
                let v = self.fd.read(f.rn) / self.fd.read(f.rm);
                self.fd.write(f.rd, v);
            }
            FcmpS => {
                let (a, b) = (self.fs.read(f.rn), self.fs.read(f.rm));
                self.flags = fcmp_flags(a as f64, b as f64);
            }
            FcmpD => {
                let (a, b) = (self.fd.read(f.rn), self.fd.read(f.rm));
                self.flags = fcmp_flags(a, b);
            }

            Addi | Addis => self.alu_add(format, f, sets_flags),
            Subi | Subis => self.alu_sub(format, f, sets_flags),
            Andi | Andis => self.alu_bitwise(format, f, sets_flags, |a, b| a & b),
            Orri => self.alu_bitwise(format, f, false, |a, b| a | b),
            Eori => self.alu_bitwise(format, f, false, |a, b| a ^ b),

            Ldur | Stur | Ldurb | Sturb | Ldurh | Sturh | Ldursw | Sturw | Ldxr | Stxr | LdurS
            | SturS | LdurD | SturD => {
                if !self.memory_op(tag, f) {
                    return;
                }
            }

            B => {
                self.branch_relative(f.address);
                return;
            }
            Bl => {
                let link = TEXT_START + (self.pc + 1) * constants::INSTRUCTION_BYTES;
                self.gp.write(30, link as i64);
                self.branch_relative(f.address);
                return;
            }
            BCond => {
                if self.flags.test(f.rd) {
                    self.branch_relative(f.address);
                } else {
                    self.pc += 1;
                }
                return;
            }
            Cbz => {
                if self.gp.read(f.rd) == 0 {
                    self.branch_relative(f.address);
                } else {
                    self.pc += 1;
                }
                return;
            }
            Cbnz => {
                if self.gp.read(f.rd) != 0 {
                    self.branch_relative(f.address);
                } else {
                    self.pc += 1;
                }
                return;
            }

            Movz => {
                let v = (f.imm as i64) << (16 * f.shamt);
                self.gp.write(f.rd, v);
            }
            Movk => {
                let shift = 16 * f.shamt as u32;
                let mask = !(0xFFFFu64 << shift);
                let current = self.gp.read_unsigned(f.rd);
                let v = (current & mask) | ((f.imm as u64) << shift);
                self.gp.write(f.rd, v as i64);
            }

            Halt => {
                self.raise(ExceptionKind::Bkpt(BreakKind::Halt));
                return;
            }
            Dump => {
                log::debug!("dump!");
            }
            Prnt => self.prnt(f),
            Prnl => {
                let _ = writeln!(self.out);
            }
            Time => {
                let millis = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                self.gp.write(f.rd, millis);
            }
        }

        if !Self::is_branch_tag(tag) {
            self.gp.zero_xzr();
            self.pc += 1;
        }
    }

    /// I-format entries carry their second operand in `imm`; R-format entries carry it
    /// in register `rm`.
    fn second_operand(&self, format: crate::codec::Format, f: &Fields) -> i64 {
        match format {
            crate::codec::Format::I => f.imm,
            _ => self.gp.read(f.rm),
        }
    }

    fn alu_add(&mut self, format: crate::codec::Format, f: &Fields, sets_flags: bool) {
        let a = self.gp.read(f.rn);
        let b = self.second_operand(format, f);
        let (result, flags) = add_with_flags(a, b);
        self.gp.write(f.rd, result);
        if sets_flags {
            self.flags = flags;
        }
    }

    fn alu_sub(&mut self, format: crate::codec::Format, f: &Fields, sets_flags: bool) {
        let a = self.gp.read(f.rn);
        let b = self.second_operand(format, f);
        let (result, flags) = sub_with_flags(a, b);
        self.gp.write(f.rd, result);
        if sets_flags {
            self.flags = flags;
        }
    }

    fn alu_bitwise(&mut self, format: crate::codec::Format, f: &Fields, sets_flags: bool, op: impl Fn(i64, i64) -> i64) {
        let a = self.gp.read(f.rn);
        let b = self.second_operand(format, f);
        let result = op(a, b);
        self.gp.write(f.rd, result);
        if sets_flags {
            self.flags.negative = result < 0;
            self.flags.zero = result == 0;
        }
    }

    fn prnt(&mut self, f: &Fields) {
        let line = match f.rn {
            0 => format!("X{}: 0x{:016X} ({})", f.rd, self.gp.read_unsigned(f.rd), self.gp.read(f.rd)),
            1 => {
                let v = self.fs.read(f.rd);
                format!("S{}: {v:e} ({v})", f.rd)
            }
            _ => {
                let v = self.fd.read(f.rd);
                format!("D{}: {v:e} ({v})", f.rd)
            }
        };
        let _ = writeln!(self.out, "{line}");
    }

    fn branch_relative(&mut self, offset: i64) {
        let target = self.pc as i64 + offset;
        if target < 0 || target as u64 > self.memory.text_word_count() {
            self.raise(ExceptionKind::Pc);
            return;
        }
        self.pc = target as u64;
    }

    fn branch_to_byte_address(&mut self, addr: u64) {
        if addr < TEXT_START || addr >= TEXT_END || addr % constants::INSTRUCTION_BYTES != 0 {
            self.raise(ExceptionKind::Pc);
            return;
        }
        self.pc = (addr - TEXT_START) / constants::INSTRUCTION_BYTES;
    }

    fn memory_op(&mut self, tag: Tag, f: &Fields) -> bool {
        let base = self.gp.read_unsigned(f.rn);
        // STXR has no offset operand (`[Xn]` only); its `address` field instead carries
        // the status register index, so it must not be folded into the effective address.
        let addr: Address = if matches!(tag, Tag::Stxr) { base } else { base.wrapping_add(f.address as u64) };

        let result = match tag {
            Tag::Ldur => self.memory.load_i64(addr).map(|v| self.gp.write(f.rd, v)),
            Tag::Ldurb => self.memory.load_i8(addr).map(|v| self.gp.write(f.rd, v as u8 as i64)),
            Tag::Ldurh => self.memory.load_i16(addr).map(|v| self.gp.write(f.rd, v as u16 as i64)),
            Tag::Ldursw => self.memory.load_i32(addr).map(|v| self.gp.write(f.rd, v as i64)),
            Tag::Ldxr => self.memory.load_i64(addr).map(|v| self.gp.write(f.rd, v)),
            Tag::LdurS => self.memory.load_f32(addr).map(|v| self.fs.write(f.rd, v)),
            Tag::LdurD => self.memory.load_f64(addr).map(|v| self.fd.write(f.rd, v)),
            Tag::Stur => self.memory.store_i64(addr, self.gp.read(f.rd)),
            Tag::Sturb => self.memory.store_i8(addr, self.gp.read(f.rd) as i8),
            Tag::Sturh => self.memory.store_i16(addr, self.gp.read(f.rd) as i16),
            Tag::Sturw => self.memory.store_i32(addr, self.gp.read(f.rd) as i32),
            Tag::SturS => self.memory.store_f32(addr, self.fs.read(f.rd)),
            Tag::SturD => self.memory.store_f64(addr, self.fd.read(f.rd)),
            Tag::Stxr => {
                let store = self.memory.store_i64(addr, self.gp.read(f.rd));
                if store.is_ok() {
                    let status = f.address;
                    if status < 0 || status as usize >= constants::REGISTER_COUNT {
                        self.raise(ExceptionKind::Instr);
                        return false;
                    }
                    self.gp.write(status as u8, 0);
                }
                store
            }
            _ => unreachable!("memory_op called with non-memory tag"),
        };

        let kind = if matches!(tag, Tag::Stur | Tag::Sturb | Tag::Sturh | Tag::Sturw | Tag::SturS | Tag::SturD | Tag::Stxr) {
            AccessKind::Store
        } else {
            AccessKind::Load
        };

        if result.is_err() {
            self.raise(ExceptionKind::Data { kind, addr });
            return false;
        }
        true
    }
}

fn add_with_flags(a: i64, b: i64) -> (i64, Flags) {
    let (result_u, carry) = (a as u64).overflowing_add(b as u64);
    let (result, overflow) = a.overflowing_add(b);
    debug_assert_eq!(result as u64, result_u);
    (result, Flags { negative: result < 0, zero: result == 0, carry, overflow })
}

fn sub_with_flags(a: i64, b: i64) -> (i64, Flags) {
    let (result_u, borrow) = (a as u64).overflowing_sub(b as u64);
    let (result, overflow) = a.overflowing_sub(b);
    debug_assert_eq!(result as u64, result_u);
    (result, Flags { negative: result < 0, zero: result == 0, carry: !borrow, overflow })
}

/// FCMP's packed NZCV indicator: equal -> (0,1,1,0), less -> (1,0,0,0),
/// greater -> (0,0,1,0), unordered (NaN involved) -> (0,0,1,1).
fn fcmp_flags(a: f64, b: f64) -> Flags {
    if a.is_nan() || b.is_nan() {
        return Flags { negative: false, zero: false, carry: true, overflow: true };
    }
    if a == b {
        Flags { negative: false, zero: true, carry: true, overflow: false }
    } else if a < b {
        Flags { negative: true, zero: false, carry: false, overflow: false }
    } else {
        Flags { negative: false, zero: false, carry: true, overflow: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::decode::{encode, Fields};

    fn vm_with(words: &[(&str, Fields)]) -> Vm<Vec<u8>> {
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for (mnemonic, fields) in words {
            let entry = codec::table().by_mnemonic(mnemonic).unwrap();
            bytes.extend_from_slice(&encode(entry, fields).to_be_bytes());
        }
        Vm::new(Memory::new(bytes, false), Vec::new())
    }

    #[test]
    fn add_writes_the_sum_and_advances_pc() {
        let mut vm = vm_with(&[("ADD", Fields { rd: 2, rn: 0, rm: 1, ..Default::default() }), ("HALT", Fields::default())]);
        vm.gp.write(0, 10);
        vm.gp.write(1, 32);
        vm.step();
        assert_eq!(vm.gp.read(2), 42);
        assert_eq!(vm.pc, 1);
        assert_eq!(vm.state, State::Running);
    }

    #[test]
    fn subs_updates_flags_but_add_does_not() {
        let mut vm = vm_with(&[("SUBS", Fields { rd: 0, rn: 1, rm: 2, ..Default::default() }), ("HALT", Fields::default())]);
        vm.gp.write(1, 5);
        vm.gp.write(2, 5);
        vm.step();
        assert!(vm.flags.zero);
    }

    #[test]
    fn sdiv_by_zero_raises_a_floating_point_exception() {
        let mut vm = vm_with(&[("SDIV", Fields { rd: 0, rn: 1, rm: 2, ..Default::default() }), ("HALT", Fields::default())]);
        vm.gp.write(1, 7);
        vm.gp.write(2, 0);
        vm.step();
        assert_eq!(vm.state, State::Faulted);
        assert_eq!(vm.exception.unwrap().kind, ExceptionKind::FpeDivisionByZero);
    }

    #[test]
    fn halt_raises_a_breakpoint_exception() {
        let mut vm = vm_with(&[("HALT", Fields::default())]);
        vm.step();
        assert_eq!(vm.state, State::Faulted);
        assert_eq!(vm.exception.unwrap().kind, ExceptionKind::Bkpt(BreakKind::Halt));
    }

    #[test]
    fn running_off_the_end_of_text_halts_cleanly() {
        let mut vm = vm_with(&[("ADD", Fields { rd: 0, rn: 0, rm: 0, ..Default::default() })]);
        vm.step();
        assert_eq!(vm.state, State::Running);
        vm.step();
        assert_eq!(vm.state, State::Halted);
        assert!(vm.exception.is_none());
    }

    #[test]
    fn bcond_branches_only_when_the_condition_holds() {
        // B.EQ +2 ; ADD (skipped) ; HALT (landed on)
        let beq = codec::table().by_mnemonic("B.EQ").unwrap();
        let halt = codec::table().by_mnemonic("HALT").unwrap();
        let add = codec::table().by_mnemonic("ADD").unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode(beq, &Fields { address: 2, ..Default::default() }).to_be_bytes());
        bytes.extend_from_slice(&encode(add, &Fields { rd: 5, ..Default::default() }).to_be_bytes());
        bytes.extend_from_slice(&encode(halt, &Fields::default()).to_be_bytes());
        let mut vm = Vm::new(Memory::new(bytes, false), Vec::new());
        vm.flags.zero = true;
        vm.step();
        assert_eq!(vm.pc, 2);
        assert_eq!(vm.gp.read(5), 0);
    }

    #[test]
    fn stxr_zeroes_the_status_register_on_success() {
        let stxr = codec::table().by_mnemonic("STXR").unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(
            &encode(stxr, &Fields { rd: 1, rn: 2, address: 9, ..Default::default() }).to_be_bytes(),
        );
        bytes.extend_from_slice(&encode(codec::table().by_mnemonic("HALT").unwrap(), &Fields::default()).to_be_bytes());
        let mut vm = Vm::new(Memory::new(bytes, false), Vec::new());
        vm.gp.write(1, 0xABCD);
        vm.gp.write(2, constants::TEXT_END);
        vm.gp.write(9, 1);
        vm.step();
        assert_eq!(vm.state, State::Running);
        assert_eq!(vm.gp.read(9), 0);
        assert_eq!(vm.memory.load_i64(constants::TEXT_END).unwrap(), 0xABCD);
    }

    #[test]
    fn prnt_and_prnl_write_to_the_output_sink() {
        let prnt = codec::table().by_mnemonic("PRNT").unwrap();
        let prnl = codec::table().by_mnemonic("PRNL").unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode(prnt, &Fields { rd: 0, rn: 0, ..Default::default() }).to_be_bytes());
        bytes.extend_from_slice(&encode(prnl, &Fields::default()).to_be_bytes());
        let mut vm = Vm::new(Memory::new(bytes, false), Vec::new());
        vm.gp.write(0, 7);
        vm.step();
        vm.step();
        assert_eq!(vm.into_output(), b"X0: 0x0000000000000007 (7)\n\n".to_vec());
    }
}
