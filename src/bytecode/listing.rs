//! Text disassembly. Plain output is one `;`-terminated statement per line. Annotated output
//! prefixes each line with the instruction's byte offset and raw bytes, and still assembles.

use super::{EncodedInstruction, Instruction, MAX_INSTRUCTION_BYTES};

/// Selects the shape of disassembled text.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ListingOptions {
  /// Prefix each line with `<offset>: <bytes>`.
  pub print_offsets: bool,
}

/// Width of the byte column: `MAX_INSTRUCTION_BYTES` bytes printed as `XX ` each.
const BYTE_COLUMN_WIDTH: usize = MAX_INSTRUCTION_BYTES * 3;

pub fn disassemble_structs_to_text(instructions: &[Instruction]) -> String {
  instructions
    .iter()
    .map(|instruction| format!("{};\n", instruction))
    .collect()
}

/// Formats decoded instructions, optionally annotated with where they came from.
pub fn listing(instructions: &[EncodedInstruction], options: &ListingOptions) -> String {
  let mut text = String::new();

  for encoded in instructions {
    if options.print_offsets {
      let bytes: Vec<String> = encoded.bytes.iter().map(|b| format!("{:02X}", b)).collect();
      text.push_str(&format!(
        "{:04X}: {:<width$}",
        encoded.offset,
        bytes.join(" "),
        width = BYTE_COLUMN_WIDTH
      ));
    }
    text.push_str(&format!("{};\n", encoded.instruction));
  }

  text
}
