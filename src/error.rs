//! The crate-wide error type. Every assembler, disassembler and emulator entry point reports
//! failures through `AsmError`, and nothing is written to caller-visible output once one is
//! raised.

use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AsmError {
  /// A register or immediate token that does not follow the operand grammar.
  #[error("malformed operand `{token}`: {reason}")]
  MalformedOperand {
    token  : String,
    reason : String
  },

  #[error("line {line}: unknown mnemonic `{mnemonic}`")]
  UnknownMnemonic {
    line     : usize,
    mnemonic : String
  },

  #[error("unknown format name `{name}`")]
  UnknownFormatName {
    name: String
  },

  /// Unrecognized leading opcode bits while scanning bytecode.
  #[error("unknown opcode {opcode:#04x} at byte offset {offset:#x}")]
  UnknownOpcode {
    offset : usize,
    opcode : u8
  },

  /// A value that cannot be represented in, or is not permitted by, an encoded field.
  #[error("field `{field}`: {reason}")]
  FieldConstraintViolation {
    field  : &'static str,
    reason : String
  },

  /// Decode attempted past the end of the byte buffer.
  #[error("instruction at byte offset {offset:#x} needs {needed} bytes, only {available} remain")]
  BufferBoundsExceeded {
    offset    : usize,
    needed    : usize,
    available : usize
  },

  /// Structural problems with an assembly line: token count, mask literal, signedness keyword.
  #[error("line {line}: {reason}")]
  Syntax {
    line   : usize,
    reason : String
  },

  /// An internal sanity check failed. These indicate corrupted machine code or machine state
  /// rather than a user typo.
  #[error("invariant violated at {offset:#x}: {reason}")]
  InvariantViolation {
    offset : usize,
    reason : String
  },

  /// The emulator was handed an instruction whose operands it cannot execute.
  #[error("cannot execute `{instruction}`: {reason}")]
  Unsupported {
    instruction : String,
    reason      : String
  },

  #[error("memory access at byte address {address:#x} is outside the {len} byte data buffer")]
  OutOfBounds {
    address : u64,
    len     : usize
  },
}

impl AsmError {
  pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> AsmError {
    AsmError::FieldConstraintViolation { field, reason: reason.into() }
  }

  pub(crate) fn operand(token: impl Into<String>, reason: impl Into<String>) -> AsmError {
    AsmError::MalformedOperand { token: token.into(), reason: reason.into() }
  }

  /// Tags a field violation found while decoding with the byte offset of its instruction.
  pub(crate) fn at(self, offset: usize) -> AsmError {
    match self {
      AsmError::FieldConstraintViolation { field, reason } => AsmError::FieldConstraintViolation {
        field,
        reason: format!("{} (instruction at byte offset {:#x})", reason, offset)
      },
      other => other,
    }
  }

  /// True for internal sanity-check failures, as opposed to malformed input.
  pub fn is_invariant_violation(&self) -> bool {
    matches!(self, AsmError::InvariantViolation { .. })
  }
}

pub type Result<T> = std::result::Result<T, AsmError>;
