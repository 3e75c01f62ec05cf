/*!
  Assembler, disassembler and emulator for a tile-based GPU instruction set.

  A program has three representations: assembly text, a list of `Instruction`s and packed
  machine code. The instruction list is the hub; every conversion goes through it:

    text  --assemble_text_to_structs-->      Vec<Instruction>  --assemble_structs_to_bytecode-->  bytes
    bytes --disassemble_bytecode_to_structs--> Vec<EncodedInstruction> --listing-->               text

  The emulator executes an instruction list against an `EmulatorState`, reproducing the values
  real hardware writes to memory.
*/

pub mod bits;
pub mod bytecode;
pub mod emulator;
pub mod error;
pub mod formats;
pub mod operand;

pub use bytecode::{
  assemble_structs_to_bytecode, assemble_text_to_structs, disassemble_bytecode_to_structs,
  disassemble_structs_to_text, listing, EncodedInstruction, Format, Instruction, ListingOptions,
  MemoryAccess
};
pub use emulator::{emulate_bytecode, emulate_instructions, EmulatorState, Exit};
pub use error::{AsmError, Result};
pub use operand::{Operand, OperandSource};

/// Assembles text straight to machine code.
pub fn assemble_text_to_bytecode(text: &str) -> Result<Vec<u8>> {
  assemble_structs_to_bytecode(&assemble_text_to_structs(text)?)
}

/// Disassembles machine code straight to text.
pub fn disassemble_bytecode_to_text(bytecode: &[u8], options: &ListingOptions) -> Result<String> {
  Ok(listing(&disassemble_bytecode_to_structs(bytecode)?, options))
}
