//! End-to-end scenarios: assemble source, load the result into a VM, and check
//! observable behavior.

use legv8::constants;
use legv8::exception::{BreakKind, ExceptionKind};
use legv8::memory::Memory;
use legv8::vm::{State, Vm};
use legv8_asm::{assemble, ErrorKind};

fn run(source: &str) -> (Vm<Vec<u8>>, legv8_asm::Assembled) {
    let assembled = assemble(source);
    assert!(assembled.errors.is_empty(), "unexpected assembler errors: {:?}", assembled.errors);
    let mut bytes = Vec::with_capacity(assembled.words.len() * 4);
    for word in &assembled.words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    let memory = Memory::new(bytes, false);
    let mut vm = Vm::new(memory, Vec::new());
    vm.run();
    let words = assembled.words.clone();
    let labels_len = assembled.labels.iter().count();
    let _ = (words, labels_len);
    (vm, assembled)
}

#[test]
fn empty_program_assembles_to_nothing() {
    let assembled = assemble("");
    assert!(assembled.words.is_empty());
    assert!(assembled.errors.is_empty());
}

#[test]
fn empty_program_with_only_blank_lines() {
    let assembled = assemble("\n\n   \n\t\n");
    assert!(assembled.words.is_empty());
    assert!(assembled.errors.is_empty());
}

#[test]
fn movz_prnt_halt_prints_the_loaded_value() {
    let (vm, _) = run("MOVZ X0, #42\nPRNT X0\nHALT\n");
    let state = vm.state;
    let exception = vm.exception.clone();
    let output = String::from_utf8(vm.into_output()).unwrap();
    assert_eq!(output, "X0: 0x000000000000002A (42)\n");
    assert_eq!(state, State::Faulted);
    assert_eq!(exception.unwrap().kind, ExceptionKind::Bkpt(BreakKind::Halt));
}

#[test]
fn conditional_branch_skips_the_print() {
    let source = "\
MOVZ X0, #0
CMPI X0, #0
B.EQ skip
PRNT X0
skip:
HALT
";
    let (vm, _) = run(source);
    let exception = vm.exception;
    let output = String::from_utf8(vm.into_output()).unwrap();
    assert_eq!(output, "", "PRNT must not execute once B.EQ takes the branch");
    assert_eq!(exception.unwrap().kind, ExceptionKind::Bkpt(BreakKind::Halt));
}

#[test]
fn sdiv_by_zero_raises_a_floating_point_exception() {
    let source = "\
MOVZ X0, #5
MOVZ X1, #0
SDIV X2, X0, X1
HALT
";
    let (vm, _) = run(source);
    assert_eq!(vm.state, State::Faulted);
    assert_eq!(vm.exception.unwrap().kind, ExceptionKind::FpeDivisionByZero);
}

#[test]
fn iterative_fibonacci_to_f29() {
    let source = "\
MOVZ X0, #0
MOVZ X1, #1
MOVZ X2, #29
loop:
CBZ X2, done
ADD X3, X0, X1
ADD X0, X1, XZR
ADD X1, X3, XZR
SUBI X2, X2, #1
B loop
done:
PRNT X0
HALT
";
    let (vm, _) = run(source);
    let output = String::from_utf8(vm.into_output()).unwrap();
    assert_eq!(output, "X0: 0x000000000007E8F5 (514229)\n");
}

#[test]
fn mov_cmp_cmpi_lda_pseudo_instructions_expand() {
    let source = "\
MOV X0, X1
CMP X0, X1
CMPI X0, #4
target:
LDA X2, target
HALT
";
    let assembled = assemble(source);
    assert!(assembled.errors.is_empty(), "{:?}", assembled.errors);
    // MOV -> 1 word, CMP -> 1 word, CMPI -> 1 word, LDA (backward ref, low half only
    // nonzero since `target` is the fourth instruction) -> 1 word, HALT -> 1 word.
    assert_eq!(assembled.words.len(), 5);

    let mov = legv8::decode::decode(assembled.words[0]).unwrap();
    assert_eq!(mov.entry.tag, legv8::codec::Tag::Add);
    assert_eq!(mov.fields.rm, constants::XZR);

    let cmp = legv8::decode::decode(assembled.words[1]).unwrap();
    assert_eq!(cmp.entry.tag, legv8::codec::Tag::Subs);
    assert_eq!(cmp.fields.rd, constants::XZR);

    let cmpi = legv8::decode::decode(assembled.words[2]).unwrap();
    assert_eq!(cmpi.entry.tag, legv8::codec::Tag::Subis);
    assert_eq!(cmpi.fields.imm, 4);

    let lda = legv8::decode::decode(assembled.words[3]).unwrap();
    assert_eq!(lda.entry.tag, legv8::codec::Tag::Movz);
    assert_eq!(lda.fields.rd, 2);
    let target_address = constants::TEXT_START + 3 * constants::INSTRUCTION_BYTES;
    assert_eq!(lda.fields.imm, (target_address & 0xFFFF) as i64);
}

#[test]
fn forward_label_reference_resolves_after_the_fact() {
    let source = "\
B forward
HALT
forward:
PRNT X0
HALT
";
    let assembled = assemble(source);
    assert!(assembled.errors.is_empty(), "{:?}", assembled.errors);
    let b = legv8::decode::decode(assembled.words[0]).unwrap();
    assert_eq!(b.entry.tag, legv8::codec::Tag::B);
    assert_eq!(b.fields.address, 2);
}

#[test]
fn unknown_mnemonic_is_reported_with_its_span() {
    let assembled = assemble("BOGUS X0, X0\n");
    assert_eq!(assembled.errors.len(), 1);
    assert_eq!(assembled.errors[0].kind, ErrorKind::UnknownMnemonic);
    assert_eq!(assembled.errors[0].span, 0..5);
}

#[test]
fn undefined_label_is_reported_once_the_file_ends() {
    let assembled = assemble("B nowhere\nHALT\n");
    assert_eq!(assembled.errors.len(), 1);
    match &assembled.errors[0].kind {
        ErrorKind::UndefinedLabel(name) => assert_eq!(name, "nowhere"),
        other => panic!("expected UndefinedLabel, got {other:?}"),
    }
}

#[test]
fn duplicate_label_definitions_are_reported() {
    let assembled = assemble("again:\nHALT\nagain:\nHALT\n");
    assert_eq!(assembled.errors.len(), 1);
    match &assembled.errors[0].kind {
        ErrorKind::DuplicateLabelName(name) => assert_eq!(name, "again"),
        other => panic!("expected DuplicateLabelName, got {other:?}"),
    }
}

#[test]
fn a_syntax_error_recovers_at_the_next_line() {
    let assembled = assemble("ADD X0, X1\nHALT\n");
    // ADD requires three register operands; only two are given.
    assert_eq!(assembled.errors.len(), 1);
    assert!(matches!(assembled.errors[0].kind, ErrorKind::ExpectedToken { .. }));
    // Recovery should not prevent the HALT on the next line from assembling.
    assert_eq!(assembled.words.len(), 1);
    assert_eq!(legv8::decode::decode(assembled.words[0]).unwrap().entry.tag, legv8::codec::Tag::Halt);
}
