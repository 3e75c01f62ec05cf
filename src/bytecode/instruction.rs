use std::fmt::{Display, Formatter};

use crate::operand::{Operand, OperandSource, RegisterIndex};
use super::{Format, Mnemonic, Opcode};

/// The operands shared by `device_load` and `device_store`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MemoryAccess {
  pub format        : Format,
  /// Four bits; each set bit transfers one lane.
  pub lane_mask     : u8,
  /// First register of the transferred run.
  pub memory_reg    : OperandSource,
  pub memory_base   : OperandSource,
  pub memory_offset : OperandSource,
}

impl MemoryAccess {
  /// The number of registers transferred.
  pub fn lane_count(&self) -> u32 {
    (self.lane_mask & 0xF).count_ones()
  }

  /**
    Pairs each transferred register with its lane position, in ascending lane order. The `k`-th
    set bit of the mask moves register `memory_reg + k` to or from lane `p`, where `p` is that
    bit's position.
  */
  pub fn lanes(&self) -> impl Iterator<Item = (Operand, u32)> + '_ {
    (0..4u32)
      .filter(move |p| self.lane_mask & (1 << p) != 0)
      .enumerate()
      .map(move |(k, p)| (self.memory_reg.operand + k as RegisterIndex, p))
  }

  fn register_list(&self) -> RegisterList {
    RegisterList { first: self.memory_reg.operand, count: self.lane_count().max(1) }
  }
}

/// Holds the unencoded components of an instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Instruction {
  /// [Opcode:7][Format:3][Reg:6][Base:4][Offset:4][Flags:8][Offset:4][Base:4][Reg:2]...
  Load(MemoryAccess),
  Store(MemoryAccess),
  /// [Opcode:7][DestFlag:2][Dest:6][Long:1][Immediate:16|32]...[DestHigh:2]
  Mov {
    dest     : OperandSource,
    source   : OperandSource,
    /// Low bit of the destination flag. Only bit 1 of the flag selects the destination width;
    /// this one is kept so decoded machine code encodes back unchanged. Text does not carry it.
    flag_low : bool
  },
  /// [Opcode:7][Reserved:2][Reg:7]
  Ret {
    reg: RegisterIndex
  },
  Stop,
  Wait,
}

impl Instruction {
  /// A `mov` with a clear low destination flag bit, as the assembler writes it.
  pub fn mov(dest: OperandSource, source: OperandSource) -> Instruction {
    Instruction::Mov { dest, source, flag_low: false }
  }

  pub fn opcode(&self) -> Opcode {
    match self {
      Instruction::Load(_)      => Opcode::Load,
      Instruction::Store(_)     => Opcode::Store,
      Instruction::Mov { .. }   => Opcode::Mov,
      Instruction::Ret { .. }   => Opcode::Ret,
      Instruction::Stop         => Opcode::Stop,
      Instruction::Wait         => Opcode::Wait,
    }
  }

  pub fn mnemonic(&self) -> Mnemonic {
    match self {
      Instruction::Load(_)      => Mnemonic::DeviceLoad,
      Instruction::Store(_)     => Mnemonic::DeviceStore,
      Instruction::Mov { .. }   => Mnemonic::Mov,
      Instruction::Ret { .. }   => Mnemonic::Ret,
      Instruction::Stop         => Mnemonic::Stop,
      Instruction::Wait         => Mnemonic::Wait,
    }
  }
}

/// Prints in assembly syntax, without the trailing `;`.
impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {

      | Instruction::Load(access)
      | Instruction::Store(access) => {
        write!(
          f,
          "{} {}, 0x{:X}, {}, {}, {}, {}",
          self.mnemonic(),
          access.format,
          access.lane_mask,
          access.register_list(),
          access.memory_base,
          access.memory_offset,
          match access.memory_offset.sign_extend {
            true  => "signed",
            false => "unsigned"
          }
        )
      }

      Instruction::Mov { dest, source, .. } => {
        write!(f, "{} {}, {}", self.mnemonic(), dest, source)
      }

      Instruction::Ret { reg } => {
        write!(f, "{} r{}", self.mnemonic(), reg)
      }

      | Instruction::Stop
      | Instruction::Wait => {
        write!(f, "{}", self.mnemonic())
      }

    }
  }
}

/// A run of consecutive registers written underscore-joined, e.g. `r6_r7_r8_r9` or `r3h_r4l`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegisterList {
  pub first : Operand,
  pub count : u32,
}

impl Display for RegisterList {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let names: Vec<String> =
      (0..self.count)
        .map(|i| (self.first + i).to_string())
        .collect();
    write!(f, "{}", names.join("_"))
  }
}

/// A decoded instruction together with where it came from and the bytes it was decoded from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedInstruction {
  pub instruction : Instruction,
  /// Byte offset of the instruction within its program.
  pub offset      : usize,
  pub bytes       : Vec<u8>,
}

impl EncodedInstruction {
  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn store(lane_mask: u8, first: Operand) -> MemoryAccess {
    MemoryAccess {
      format        : Format::I32,
      lane_mask,
      memory_reg    : first.into(),
      memory_base   : Operand::Reg64Pair(17).into(),
      memory_offset : OperandSource::signed(Operand::Immediate(4)),
    }
  }

  #[test]
  fn prints_register_lists_by_population_count() {
    let instruction = Instruction::Store(store(0xF, Operand::Reg32(6)));
    assert_eq!(
      instruction.to_string(),
      "device_store i32, 0xF, r6_r7_r8_r9, r17_r18, 4, signed"
    );

    let instruction = Instruction::Load(store(0x5, Operand::Reg16High(2)));
    assert_eq!(
      instruction.to_string(),
      "device_load i32, 0x5, r2h_r3l, r17_r18, 4, signed"
    );
  }

  #[test]
  fn lanes_pack_registers_and_keep_positions() {
    let access = store(0b1010, Operand::Reg32(8));
    let lanes: Vec<(Operand, u32)> = access.lanes().collect();
    assert_eq!(lanes, vec![(Operand::Reg32(8), 1), (Operand::Reg32(9), 3)]);
  }

  #[test]
  fn prints_scalar_instructions() {
    let mov = Instruction::mov(Operand::Reg32(6).into(), Operand::Immediate(1).into());
    assert_eq!(mov.to_string(), "mov r6, 1");
    let flagged = Instruction::Mov {
      dest     : Operand::Reg32(6).into(),
      source   : Operand::Immediate(1).into(),
      flag_low : true
    };
    assert_eq!(flagged.to_string(), "mov r6, 1");
    assert_eq!(flagged.opcode(), Opcode::Mov);
    assert_eq!(Instruction::Ret { reg: 3 }.to_string(), "ret r3");
    assert_eq!(Instruction::Stop.to_string(), "stop");
  }
}
