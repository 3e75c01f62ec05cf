/*!

  Machine code is a back-to-back stream of little-endian instructions with no header, padding
  or slot table. Every instruction begins with a 7 bit opcode, and the instruction's own fields
  decide how many bytes it occupies, so the stream can only be walked front to back:

    Load/Store:  8 bytes
    Mov:         4 bytes (16 bit destination) or 6 bytes (32 bit destination),
                 plus 2 more when the long flag widens the immediate to 32 bits
    Ret, Stop,
    Wait:        2 bytes

  The structured form of an instruction is the `Instruction` sum type, one variant per
  instruction kind. Text, bytes and the emulator all meet at a `Vec<Instruction>`.

  Opcodes and memory formats are plain enums carrying their numeric codes, so converting a field
  to an enum variant is `try_from` and converting a variant to its assembly spelling is
  `to_string`.

*/

mod assembly;
mod binary;
mod instruction;
mod listing;

pub use assembly::{assemble_text_to_structs, parse_operand, MAX_TOKENS};
pub use binary::{
  assemble_structs_to_bytecode, decode_instruction, disassemble_bytecode_to_structs,
  encode_instruction, encode_instruction_into, instruction_size, MAX_INSTRUCTION_BYTES
};
pub use instruction::{EncodedInstruction, Instruction, MemoryAccess, RegisterList};
pub use listing::{disassemble_structs_to_text, listing, ListingOptions};

use strum_macros::{Display as StrumDisplay, EnumIter, EnumString};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Seven bit opcodes, read from bits 0..=6 of an instruction's first byte.
#[derive(
  TryFromPrimitive, IntoPrimitive,
  Clone,            Copy,          Eq, PartialEq, Debug, Hash
)]
#[repr(u8)]
pub enum Opcode {
  Load  = 0x05,
  Stop  = 0x08,
  Ret   = 0x14,
  Wait  = 0x38,
  Store = 0x45,
  Mov   = 0x62,
}

/// The full 16 bit encoding of `stop`.
pub const STOP_WORD: u64 = 0x0088;
/// The full 16 bit encoding of `wait`.
pub const WAIT_WORD: u64 = 0x0038;

impl Opcode {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }
}

/**
  Memory element layouts for `device_load`/`device_store`. The code is a 4 bit field; codes
  11 through 15 have no known meaning but are kept so that they survive a round trip through
  text and bytes.
*/
#[derive(
  StrumDisplay, EnumString, EnumIter,  TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,       Eq,        PartialEq,        Debug,         Hash
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Format {
  I8        = 0,
  I16       = 1,
  I32       = 2,
  U8Norm    = 3,
  S8Norm    = 4,
  U16Norm   = 5,
  S16Norm   = 6,
  Rgb10A2   = 7,
  Srgba8    = 8,
  Rg11B10F  = 9,
  Rgb9E5    = 10,
  Format11  = 11,
  Format12  = 12,
  Format13  = 13,
  Format14  = 14,
  Format15  = 15,
}

impl Format {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  /// Size in bytes of one memory element, or `None` for the unnamed codes.
  pub fn element_size(&self) -> Option<usize> {
    match self {
      | Format::I8
      | Format::U8Norm
      | Format::S8Norm  => Some(1),

      | Format::I16
      | Format::U16Norm
      | Format::S16Norm => Some(2),

      | Format::I32
      | Format::Rgb10A2
      | Format::Srgba8
      | Format::Rg11B10F
      | Format::Rgb9E5  => Some(4),

      _                 => None
    }
  }

  /// Packed formats hold up to four channels in one 32 bit element; lanes select channels.
  pub fn is_packed(&self) -> bool {
    matches!(self, Format::Rgb10A2 | Format::Srgba8 | Format::Rg11B10F | Format::Rgb9E5)
  }

  /// Formats whose register-side value is an integer rather than a float.
  pub fn is_integer(&self) -> bool {
    matches!(self, Format::I8 | Format::I16 | Format::I32)
  }
}

/// Assembly mnemonics. `device_load`/`device_store` both map onto the load/store layout.
#[derive(
  StrumDisplay, EnumString, EnumIter,
  Clone,        Copy,       Eq,        PartialEq, Debug, Hash
)]
#[strum(serialize_all = "snake_case")]
pub enum Mnemonic {
  Mov,
  DeviceLoad,
  DeviceStore,
  Ret,
  Stop,
  Wait,
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::TryFrom;
  use std::str::FromStr;
  use strum::IntoEnumIterator;

  #[test]
  fn format_names_round_trip() {
    for format in Format::iter() {
      assert_eq!(Format::from_str(&format.to_string()).ok(), Some(format));
      assert_eq!(Format::try_from(format.code()).ok(), Some(format));
    }
    assert_eq!(Format::U16Norm.to_string(), "u16norm");
    assert_eq!(Format::Rg11B10F.to_string(), "rg11b10f");
    assert_eq!(Format::Format13.to_string(), "format13");
    assert!(Format::try_from(16u8).is_err());
  }

  #[test]
  fn mnemonics_use_snake_case() {
    assert_eq!(Mnemonic::DeviceStore.to_string(), "device_store");
    assert_eq!(Mnemonic::from_str("device_load").ok(), Some(Mnemonic::DeviceLoad));
    assert!(Mnemonic::from_str("fadd").is_err());
  }

  #[test]
  fn opcodes_are_seven_bits() {
    assert_eq!(Opcode::try_from(0x45u8).ok(), Some(Opcode::Store));
    assert_eq!(STOP_WORD & 0x7F, Opcode::Stop.code() as u64);
    assert_eq!(WAIT_WORD & 0x7F, Opcode::Wait.code() as u64);
  }
}
