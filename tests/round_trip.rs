//! Conversions between assembly text, instruction lists and machine code.

use asmtool::bytecode::decode_instruction;
use asmtool::{
  assemble_structs_to_bytecode, assemble_text_to_bytecode, assemble_text_to_structs,
  disassemble_bytecode_to_structs, disassemble_bytecode_to_text, disassemble_structs_to_text,
  AsmError, Instruction, ListingOptions, Operand
};

const FIXTURE_BYTES: [u8; 34] = [
  0x62, 0x19, 0x01, 0x00, 0x00, 0x00,
  0x62, 0x1D, 0x02, 0x00, 0x00, 0x00,
  0x62, 0x21, 0x03, 0x00, 0x00, 0x00,
  0x62, 0x25, 0x04, 0x00, 0x00, 0x00,
  0x45, 0x31, 0x12, 0x05, 0x20, 0xC8, 0xF2, 0x00,
  0x88, 0x00
];

const FIXTURE_TEXT: &str = "\
mov r6, 1;
mov r7, 2;
mov r8, 3;
mov r9, 4;
device_store i32, 0xF, r6_r7_r8_r9, r17_r18, 4, signed;
stop;
";

/// Statements in canonical form, covering every instruction kind and operand shape.
const CANONICAL: &str = "\
mov r6, 1;
mov r6h, 65535;
mov r3l, 0;
mov r100, 70000;
mov r2, 4294967295;
device_load i8, 0x0, r6, r2_r3, 0, signed;
device_load u16norm, 0x3, r10l_r10h, u2_u3, r4, unsigned;
device_load s8norm, 0x5, r20h_r21l, u0_u1, r255, signed;
device_store rgb10a2, 0xA, r1_r2, r30_r31, -12, signed;
device_store srgba8, 0xF, r1_r2_r3_r4, r8_r9, 16376, signed;
device_store format13, 0x1, r1, r2_r3, -2048, signed;
device_load rgb9e5, 0x7, r4_r5_r6, r126_r127, 1, signed;
wait;
ret r7;
stop;
";

#[test]
fn fixture_text_assembles_to_fixture_bytes() {
  assert_eq!(assemble_text_to_bytecode(FIXTURE_TEXT).unwrap(), FIXTURE_BYTES.to_vec());
}

#[test]
fn fixture_bytes_disassemble_to_fixture_text() {
  let text = disassemble_bytecode_to_text(&FIXTURE_BYTES, &ListingOptions::default()).unwrap();
  assert_eq!(text, FIXTURE_TEXT);
}

#[test]
fn canonical_text_survives_both_directions() {
  let structs = assemble_text_to_structs(CANONICAL).unwrap();
  assert_eq!(disassemble_structs_to_text(&structs), CANONICAL);

  let bytecode = assemble_structs_to_bytecode(&structs).unwrap();
  let decoded: Vec<Instruction> =
    disassemble_bytecode_to_structs(&bytecode)
      .unwrap()
      .into_iter()
      .map(|encoded| encoded.instruction)
      .collect();
  assert_eq!(decoded, structs);
  assert_eq!(assemble_structs_to_bytecode(&decoded).unwrap(), bytecode);
}

#[test]
fn annotated_listing_reassembles() {
  let options = ListingOptions { print_offsets: true };
  let listing = disassemble_bytecode_to_text(&FIXTURE_BYTES, &options).unwrap();

  assert!(listing.starts_with("0000: 62 19 01 00 00 00"));
  assert!(listing.contains("0018: 45 31 12 05 20 C8 F2 00 device_store"));
  assert!(listing.contains("0020: 88 00"));
  assert_eq!(assemble_text_to_bytecode(&listing).unwrap(), FIXTURE_BYTES.to_vec());
}

#[test]
fn decoded_instructions_keep_their_bytes() {
  let decoded = disassemble_bytecode_to_structs(&FIXTURE_BYTES).unwrap();
  let offsets: Vec<usize> = decoded.iter().map(|d| d.offset).collect();
  assert_eq!(offsets, vec![0, 6, 12, 18, 24, 32]);

  let rebuilt: Vec<u8> = decoded.iter().flat_map(|d| d.bytes.clone()).collect();
  assert_eq!(rebuilt, FIXTURE_BYTES.to_vec());

  let store = decode_instruction(&FIXTURE_BYTES, 24).unwrap();
  assert_eq!(store.len(), 8);
}

#[test]
fn long_mov_uses_eight_bytes() {
  let bytecode = assemble_text_to_bytecode("mov r6, 70000").unwrap();
  assert_eq!(bytecode.len(), 8);
  assert_eq!(bytecode[1] & 0x80, 0x80);

  let half = assemble_text_to_bytecode("mov r6l, 70000").unwrap();
  assert_eq!(half.len(), 6);
}

#[test]
fn unencodable_operands_are_rejected() {
  assert!(matches!(
    assemble_text_to_bytecode("mov r6, -1"),
    Err(AsmError::FieldConstraintViolation { .. })
  ));
  assert!(matches!(
    assemble_text_to_bytecode("mov r6, 4294967296"),
    Err(AsmError::FieldConstraintViolation { .. })
  ));
  assert!(matches!(
    assemble_text_to_bytecode("device_load i8, 0x1, r1, r2_r3, 2049, signed"),
    Err(AsmError::FieldConstraintViolation { field: "memory_offset", .. })
  ));
  assert!(matches!(
    assemble_text_to_bytecode("device_load i8, 0x1, r1, r2_r3, 4, unsigned"),
    Err(AsmError::FieldConstraintViolation { field: "memory_offset", .. })
  ));
  assert!(matches!(
    assemble_text_to_bytecode("device_load i8, 0x1, r1, r200_r201, 4, signed"),
    Err(AsmError::FieldConstraintViolation { field: "memory_base", .. })
  ));
}

#[test]
fn nothing_is_returned_after_a_failure() {
  let error = assemble_text_to_bytecode("mov r6, 1\nmov r7, -5\nstop").unwrap_err();
  assert!(matches!(error, AsmError::FieldConstraintViolation { .. }));

  // The first two instructions are fine, the third is cut short.
  let truncated = &FIXTURE_BYTES[..28];
  assert_eq!(
    disassemble_bytecode_to_structs(truncated),
    Err(AsmError::BufferBoundsExceeded { offset: 24, needed: 8, available: 4 })
  );
  assert_eq!(
    disassemble_bytecode_to_structs(&[0x88, 0x00, 0x7F, 0x00]),
    Err(AsmError::UnknownOpcode { offset: 2, opcode: 0x7F })
  );
}

#[test]
fn operand_printing_matches_parsing() {
  for text in ["r0", "r127h", "r5l", "r17_r18", "u8_u9", "-7", "2047"] {
    let operand = asmtool::bytecode::parse_operand(text).unwrap();
    assert_eq!(operand.to_string(), text);
  }
  assert_eq!(asmtool::bytecode::parse_operand("r9").unwrap(), Operand::Reg32(9));
}
