/*!
  Operands and their encoded forms.

  An `Operand` names where a value comes from or goes to: an immediate constant, a 32-bit
  register, one 16-bit half of a register, an adjacent register pair or an adjacent uniform
  pair. The same operand is encoded differently depending on the field it lands in, so each
  field role gets its own `encode_*`/`decode_*` pair. Each decode is the exact inverse of its
  encode.

  Raw field values reserve their least significant bit for half selection (or leave it zero),
  which is why register indices are shifted left by one before they are packed.
*/

use std::fmt::{Display, Formatter};
use std::ops::Add;

use crate::error::{AsmError, Result};

/// Register, half-register, and pair indices.
pub type RegisterIndex = u32;

/// Register-coded memory offsets must name one of the first 256 registers.
pub const MAX_OFFSET_REGISTER: RegisterIndex = 0xFF;
/// Eight-bit raw fields hold `index << 1`, which bounds these roles to 128 registers.
pub const MAX_FIELD_REGISTER: RegisterIndex = 0x7F;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Operand {
  Immediate(i64),
  /// Bits 0..16 of a 32-bit register.
  Reg16Low(RegisterIndex),
  /// Bits 16..32 of a 32-bit register.
  Reg16High(RegisterIndex),
  Reg32(RegisterIndex),
  /// `r<N>_r<N+1>`, low word first.
  Reg64Pair(RegisterIndex),
  /// `u<N>_u<N+1>`, low word first.
  Uniform64Pair(RegisterIndex),
}

impl Operand {
  /// Converts a half-register slot number (`2 * index + high`) to an operand.
  pub fn from_half_slot(slot: RegisterIndex) -> Operand {
    match slot & 1 {
      0 => Operand::Reg16Low(slot >> 1),
      _ => Operand::Reg16High(slot >> 1),
    }
  }

  /// The half-register slot number of a 16-bit operand.
  pub fn half_slot(&self) -> Option<RegisterIndex> {
    match self {
      Operand::Reg16Low(i)  => Some(i << 1),
      Operand::Reg16High(i) => Some((i << 1) | 1),
      _                     => None
    }
  }

  /// The register (or first register of a pair) this operand names.
  pub fn register_index(&self) -> Option<RegisterIndex> {
    match self {
      Operand::Immediate(_)     => None,
      | Operand::Reg16Low(i)
      | Operand::Reg16High(i)
      | Operand::Reg32(i)
      | Operand::Reg64Pair(i)
      | Operand::Uniform64Pair(i) => Some(*i)
    }
  }
}

impl Display for Operand {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Operand::Immediate(value)   => write!(f, "{}", value),
      Operand::Reg16Low(i)        => write!(f, "r{}l", i),
      Operand::Reg16High(i)       => write!(f, "r{}h", i),
      Operand::Reg32(i)           => write!(f, "r{}", i),
      Operand::Reg64Pair(i)       => write!(f, "r{}_r{}", i, i + 1),
      Operand::Uniform64Pair(i)   => write!(f, "u{}_u{}", i, i + 1),
    }
  }
}

/// Steps to the next lane of a register list. Half registers advance one half at a time.
/// Indices saturate rather than wrap.
impl Add<RegisterIndex> for Operand {
  type Output = Operand;
  fn add(self, rhs: RegisterIndex) -> Operand {
    match self {
      Operand::Immediate(value)   => Operand::Immediate(value.saturating_add(rhs as i64)),
      Operand::Reg32(i)           => Operand::Reg32(i.saturating_add(rhs)),
      Operand::Reg64Pair(i)       => Operand::Reg64Pair(i.saturating_add(rhs)),
      Operand::Uniform64Pair(i)   => Operand::Uniform64Pair(i.saturating_add(rhs)),
      | Operand::Reg16Low(_)
      | Operand::Reg16High(_)     => {
        // Both arms carry a half slot.
        Operand::from_half_slot(self.half_slot().unwrap_or_default().saturating_add(rhs))
      }
    }
  }
}

/// An operand plus the sign-extension flag that memory-offset fields carry.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct OperandSource {
  pub operand     : Operand,
  pub sign_extend : bool,
}

impl OperandSource {
  pub fn new(operand: Operand) -> OperandSource {
    OperandSource { operand, sign_extend: false }
  }

  pub fn signed(operand: Operand) -> OperandSource {
    OperandSource { operand, sign_extend: true }
  }
}

impl From<Operand> for OperandSource {
  fn from(operand: Operand) -> OperandSource {
    OperandSource::new(operand)
  }
}

impl Display for OperandSource {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.operand)
  }
}


// region Memory offset

/// The encoded form of a memory offset, before shift compression.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RawOffset {
  /// The signed immediate, or the register index shifted left by one.
  pub value       : i64,
  pub immediate   : bool,
  /// Set when a register offset is *not* sign-extended.
  pub zero_extend : bool,
}

pub fn encode_memory_offset(src: &OperandSource) -> Result<RawOffset> {
  match src.operand {

    Operand::Immediate(value) => {
      if !src.sign_extend {
        return Err(AsmError::field("memory_offset", "immediate offsets must be sign extended"));
      }
      Ok(RawOffset { value, immediate: true, zero_extend: false })
    }

    Operand::Reg32(index) => {
      if index > MAX_OFFSET_REGISTER {
        return Err(AsmError::field(
          "memory_offset",
          format!("register r{} is beyond r{}", index, MAX_OFFSET_REGISTER)
        ));
      }
      Ok(RawOffset {
        value       : (index as i64) << 1,
        immediate   : false,
        zero_extend : !src.sign_extend
      })
    }

    other => Err(AsmError::field(
      "memory_offset",
      format!("`{}` is neither an immediate nor a 32-bit register", other)
    )),
  }
}

pub fn decode_memory_offset(raw: RawOffset) -> Result<OperandSource> {
  if raw.immediate {
    return Ok(OperandSource::signed(Operand::Immediate(raw.value)));
  }
  if raw.value & 1 != 0 || raw.value < 0 || raw.value >> 1 > MAX_OFFSET_REGISTER as i64 {
    return Err(AsmError::field(
      "memory_offset",
      format!("raw register offset {:#x} does not name a register", raw.value)
    ));
  }
  Ok(OperandSource {
    operand     : Operand::Reg32((raw.value >> 1) as RegisterIndex),
    sign_extend : !raw.zero_extend
  })
}

// endregion

// region Memory base

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RawBase {
  pub value   : u32,
  pub uniform : bool,
}

pub fn encode_memory_base(src: &OperandSource) -> Result<RawBase> {
  let (index, uniform) =
    match src.operand {
      Operand::Reg64Pair(i)     => (i, false),
      Operand::Uniform64Pair(i) => (i, true),
      other => {
        return Err(AsmError::field(
          "memory_base",
          format!("`{}` is not a register or uniform pair", other)
        ));
      }
    };
  require_field_register("memory_base", index)?;
  Ok(RawBase { value: index << 1, uniform })
}

pub fn decode_memory_base(raw: RawBase) -> Result<OperandSource> {
  if raw.value & 1 != 0 {
    return Err(AsmError::field("memory_base", format!("odd raw pair index {:#x}", raw.value)));
  }
  let operand = match raw.uniform {
    true  => Operand::Uniform64Pair(raw.value >> 1),
    false => Operand::Reg64Pair(raw.value >> 1),
  };
  Ok(OperandSource::new(operand))
}

// endregion

// region Memory register list

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RawRegisterList {
  pub value    : u32,
  pub is_32bit : bool,
}

pub fn encode_memory_reg(src: &OperandSource) -> Result<RawRegisterList> {
  match src.operand {
    Operand::Reg32(index) => {
      require_field_register("memory_reg", index)?;
      Ok(RawRegisterList { value: index << 1, is_32bit: true })
    }
    | Operand::Reg16Low(index)
    | Operand::Reg16High(index) => {
      require_field_register("memory_reg", index)?;
      let slot = src.operand.half_slot().unwrap_or_default();
      Ok(RawRegisterList { value: slot, is_32bit: false })
    }
    other => Err(AsmError::field(
      "memory_reg",
      format!("`{}` is not a 32-bit or 16-bit register", other)
    )),
  }
}

pub fn decode_memory_reg(raw: RawRegisterList) -> Result<OperandSource> {
  match raw.is_32bit {
    true if raw.value & 1 != 0 => Err(AsmError::field(
      "memory_reg",
      format!("odd raw 32-bit register {:#x}", raw.value)
    )),
    true  => Ok(OperandSource::new(Operand::Reg32(raw.value >> 1))),
    false => Ok(OperandSource::new(Operand::from_half_slot(raw.value))),
  }
}

// endregion

// region ALU destination

/// Destination flag bit marking a full 32-bit register. The flag's low bit does not affect
/// the destination.
pub const ALU_DEST_FLAG_32BIT: u8 = 2;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RawAluDest {
  pub value : u32,
  pub flag  : u8,
}

pub fn encode_alu_dest(src: &OperandSource) -> Result<RawAluDest> {
  match src.operand {
    Operand::Reg32(index) => {
      require_field_register("alu_dest", index)?;
      Ok(RawAluDest { value: index << 1, flag: ALU_DEST_FLAG_32BIT })
    }
    | Operand::Reg16Low(index)
    | Operand::Reg16High(index) => {
      require_field_register("alu_dest", index)?;
      Ok(RawAluDest { value: src.operand.half_slot().unwrap_or_default(), flag: 0 })
    }
    other => Err(AsmError::field(
      "alu_dest",
      format!("`{}` cannot be written by an ALU instruction", other)
    )),
  }
}

pub fn decode_alu_dest(raw: RawAluDest) -> Result<OperandSource> {
  match raw.flag & ALU_DEST_FLAG_32BIT != 0 {
    true if raw.value & 1 != 0 => Err(AsmError::field(
      "alu_dest",
      format!("odd raw 32-bit register {:#x}", raw.value)
    )),
    true  => Ok(OperandSource::new(Operand::Reg32(raw.value >> 1))),
    false => Ok(OperandSource::new(Operand::from_half_slot(raw.value))),
  }
}

// endregion

fn require_field_register(field: &'static str, index: RegisterIndex) -> Result<()> {
  match index > MAX_FIELD_REGISTER {
    true  => Err(AsmError::field(field, format!("register {} is beyond {}", index, MAX_FIELD_REGISTER))),
    false => Ok(())
  }
}
