//! An instruction-level emulator for the modelled subset of the instruction set. It is not a
//! timing model: it only reproduces the values that real hardware writes to memory.
//!
//! The machine has a 256 entry register file, a 256 entry uniform file and one flat data buffer.
//! Register `r0` must read as zero when execution starts.

use std::fmt::{Display, Formatter};

use half::f16;
use lazy_static::lazy_static;
use prettytable::{format as TableFormat, row, table, Table};
use tracing::debug;
#[cfg(feature = "trace_computation")]
use tracing::trace;

use crate::bytecode::{
  disassemble_bytecode_to_structs, Format, Instruction, MemoryAccess
};
use crate::error::{AsmError, Result};
use crate::formats::{load_scalar, pack, store_scalar, unpack, LaneValue};
use crate::operand::{Operand, OperandSource, RegisterIndex};

pub const REGISTER_COUNT: usize = 256;
pub const UNIFORM_COUNT: usize = 256;

/// How execution ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Exit {
  Ret(RegisterIndex),
  Stop,
  /// The instruction list ran out without a terminator.
  EndOfProgram,
}

/// Registers, uniforms, and the data buffer that loads and stores address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmulatorState {
  registers : Vec<u32>,
  uniforms  : Vec<u32>,
  data      : Vec<u8>,
}

impl EmulatorState {

  // region Display methods

  fn make_register_table<I>(name: char, cells: I) -> Table
    where I: Iterator<Item = (usize, u32)>
  {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for (i, value) in cells {
      table.add_row(row![r->format!("{}[{}] =", name, i), format!("{:#010x}", value)]);
    }
    table
  }

  // endregion

  // region Low-level utility methods

  /// A machine with every register zero and a zero-filled data buffer of `data_len` bytes.
  pub fn new(data_len: usize) -> EmulatorState {
    EmulatorState::with_data(vec![0; data_len])
  }

  /// A machine whose data buffer starts out as `data`.
  pub fn with_data(data: Vec<u8>) -> EmulatorState {
    EmulatorState {
      registers : vec![0; REGISTER_COUNT],
      uniforms  : vec![0; UNIFORM_COUNT],
      data
    }
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn into_data(self) -> Vec<u8> {
    self.data
  }

  pub fn reg(&self, index: RegisterIndex) -> u32 {
    self.registers.get(index as usize).copied().unwrap_or(0)
  }

  /// Writes outside the register file are ignored.
  pub fn set_reg(&mut self, index: RegisterIndex, value: u32) {
    if let Some(slot) = self.registers.get_mut(index as usize) {
      *slot = value;
    }
  }

  pub fn uniform(&self, index: RegisterIndex) -> u32 {
    self.uniforms.get(index as usize).copied().unwrap_or(0)
  }

  pub fn set_uniform(&mut self, index: RegisterIndex, value: u32) {
    if let Some(slot) = self.uniforms.get_mut(index as usize) {
      *slot = value;
    }
  }

  /// Reads half slot `2 * index + high`.
  pub fn half(&self, slot: RegisterIndex) -> u16 {
    (self.reg(slot >> 1) >> (16 * (slot & 1))) as u16
  }

  /// Replaces one 16 bit half, preserving the other.
  pub fn set_half(&mut self, slot: RegisterIndex, value: u16) {
    let shift = 16 * (slot & 1);
    let word = self.reg(slot >> 1) & !(0xFFFF << shift) | (value as u32) << shift;
    self.set_reg(slot >> 1, word);
  }

  /// Reads the 32 bit word at word index `index` of the data buffer.
  pub fn read_u32(&self, index: usize) -> Option<u32> {
    let start = index.checked_mul(4)?;
    let bytes = self.data.get(start..start.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
  }

  pub fn write_u32(&mut self, index: usize, value: u32) -> Result<()> {
    self.write_element((index as u64).saturating_mul(4), 4, value)
  }

  /// The 32 bit view of the data buffer, ignoring a trailing partial word.
  pub fn data_words(&self) -> Vec<u32> {
    (0..self.data.len() / 4).filter_map(|i| self.read_u32(i)).collect()
  }

  fn read_element(&self, address: u64, size: usize) -> Result<u32> {
    let range = self.element_range(address, size)?;
    Ok(
      self.data[range]
        .iter()
        .enumerate()
        .fold(0u32, |value, (i, byte)| value | (*byte as u32) << (8 * i))
    )
  }

  fn write_element(&mut self, address: u64, size: usize, value: u32) -> Result<()> {
    let range = self.element_range(address, size)?;
    for (i, byte) in self.data[range].iter_mut().enumerate() {
      *byte = (value >> (8 * i)) as u8;
    }
    Ok(())
  }

  fn element_range(&self, address: u64, size: usize) -> Result<std::ops::Range<usize>> {
    usize::try_from(address)
      .ok()
      .and_then(|start| Some(start..start.checked_add(size)?))
      .filter(|range| range.end <= self.data.len())
      .ok_or(AsmError::OutOfBounds { address, len: self.data.len() })
  }

  // endregion

  // region Operands

  fn read_operand(&self, operand: &Operand) -> u32 {
    match *operand {
      Operand::Immediate(value) => value as u32,
      Operand::Reg32(i)         => self.reg(i),
      _                         => operand.half_slot().map(|slot| self.half(slot) as u32).unwrap_or(0),
    }
  }

  fn write_operand(&mut self, operand: &Operand, value: u32) {
    match *operand {
      Operand::Reg32(i) => self.set_reg(i, value),
      _ => {
        if let Some(slot) = operand.half_slot() {
          self.set_half(slot, value as u16);
        }
      }
    }
  }

  /// Reads a register lane in the representation `format` expects.
  fn read_lane(&self, operand: &Operand, format: Format) -> LaneValue {
    match (operand.half_slot(), format.is_integer()) {
      (None, true)        => LaneValue::Int(self.read_operand(operand)),
      (None, false)       => LaneValue::Float(f32::from_bits(self.read_operand(operand))),
      (Some(slot), true)  => LaneValue::Int(self.half(slot) as u32),
      (Some(slot), false) => LaneValue::Float(f16::from_bits(self.half(slot)).to_f32()),
    }
  }

  fn write_lane(&mut self, operand: &Operand, value: LaneValue) {
    match (operand.half_slot(), value) {
      (None, LaneValue::Int(v))          => self.write_operand(operand, v),
      (None, LaneValue::Float(f))        => self.write_operand(operand, f.to_bits()),
      (Some(slot), LaneValue::Int(v))    => self.set_half(slot, v as u16),
      (Some(slot), LaneValue::Float(f))  => self.set_half(slot, f16::from_f32(f).to_bits()),
    }
  }

  fn pair_value(&self, base: &Operand) -> u64 {
    match *base {
      Operand::Reg64Pair(i)     => self.reg(i) as u64 | (self.reg(i + 1) as u64) << 32,
      Operand::Uniform64Pair(i) => self.uniform(i) as u64 | (self.uniform(i + 1) as u64) << 32,
      _                         => 0,
    }
  }

  fn offset_value(&self, offset: &OperandSource) -> i64 {
    match offset.operand {
      Operand::Immediate(value) => value,
      Operand::Reg32(i) if offset.sign_extend => self.reg(i) as i32 as i64,
      Operand::Reg32(i)         => self.reg(i) as i64,
      _                         => 0,
    }
  }

  // endregion

  // region Instructions

  fn mov(&mut self, dest: &OperandSource, source: &OperandSource) {
    let value = self.read_operand(&source.operand);
    self.write_operand(&dest.operand, value);
  }

  fn element_address(&self, access: &MemoryAccess, element: i64, size: usize) -> Result<u64> {
    let base = self.pair_value(&access.memory_base.operand);
    let address = (base as i64).wrapping_add(element.wrapping_mul(size as i64));
    match address < 0 {
      true  => Err(AsmError::OutOfBounds { address: address as u64, len: self.data.len() }),
      false => Ok(address as u64)
    }
  }

  /**
    Moves memory elements into registers. Scalar formats read element `offset + p` for lane `p`;
    packed formats read the single element at `offset` and hand channel `p` to lane `p`.
  */
  fn load(&mut self, access: &MemoryAccess) -> Result<()> {
    let offset = self.offset_value(&access.memory_offset);
    let size = element_size(access)?;

    if access.format.is_packed() {
      let word = self.read_element(self.element_address(access, offset, size)?, size)?;
      let channels = unpack(access.format, word).ok_or_else(|| unsupported_format(access))?;
      for (register, p) in access.lanes() {
        self.write_lane(&register, LaneValue::Float(channels[p as usize]));
      }
      return Ok(());
    }

    for (register, p) in access.lanes() {
      let address = self.element_address(access, offset.wrapping_add(p as i64), size)?;
      let element = self.read_element(address, size)?;
      let value = load_scalar(access.format, element).ok_or_else(|| unsupported_format(access))?;
      self.write_lane(&register, value);
    }
    Ok(())
  }

  fn store(&mut self, access: &MemoryAccess) -> Result<()> {
    let offset = self.offset_value(&access.memory_offset);
    let size = element_size(access)?;

    if access.format.is_packed() {
      let address = self.element_address(access, offset, size)?;
      let mut values: [Option<f32>; 4] = [None; 4];
      for (register, p) in access.lanes() {
        values[p as usize] = Some(self.read_lane(&register, access.format).as_float());
      }
      let word = self.read_element(address, size)?;
      let packed = pack(access.format, word, values).ok_or_else(|| unsupported_format(access))?;
      return self.write_element(address, size, packed);
    }

    for (register, p) in access.lanes() {
      let address = self.element_address(access, offset.wrapping_add(p as i64), size)?;
      let lane = self.read_lane(&register, access.format);
      let element = store_scalar(access.format, lane).ok_or_else(|| unsupported_format(access))?;
      self.write_element(address, size, element)?;
    }
    Ok(())
  }

  fn step(&mut self, instruction: &Instruction) -> Result<Option<Exit>> {
    match instruction {
      Instruction::Load(access)             => self.load(access)?,
      Instruction::Store(access)            => self.store(access)?,
      Instruction::Mov { dest, source, .. } => self.mov(dest, source),
      // A synchronization fence; every access here completes immediately.
      Instruction::Wait                     => {}
      Instruction::Ret { reg }              => return Ok(Some(Exit::Ret(*reg))),
      Instruction::Stop                     => return Ok(Some(Exit::Stop)),
    }
    Ok(None)
  }

  // endregion

}

fn element_size(access: &MemoryAccess) -> Result<usize> {
  access.format.element_size().ok_or_else(|| unsupported_format(access))
}

fn unsupported_format(access: &MemoryAccess) -> AsmError {
  AsmError::Unsupported {
    instruction : format!("{} memory access", access.format),
    reason      : format!("format {} has no known element layout", access.format.code())
  }
}

// region Validation

fn require_register(instruction: &Instruction, operand: &Operand, limit: usize) -> Result<()> {
  let highest = match *operand {
    Operand::Reg64Pair(i) | Operand::Uniform64Pair(i) => i as usize + 1,
    _ => operand.register_index().unwrap_or(0) as usize,
  };
  match highest < limit {
    true  => Ok(()),
    false => Err(unsupported(instruction, format!("`{}` is outside the register file", operand)))
  }
}

fn unsupported(instruction: &Instruction, reason: impl Into<String>) -> AsmError {
  AsmError::Unsupported { instruction: instruction.to_string(), reason: reason.into() }
}

/// Rejects anything the emulator cannot execute before any state changes.
fn check_executable(instruction: &Instruction) -> Result<()> {
  match instruction {

    | Instruction::Load(access)
    | Instruction::Store(access) => {
      if access.format.element_size().is_none() {
        return Err(unsupported(instruction, format!("format {} has no known element layout", access.format.code())));
      }
      match access.memory_reg.operand {
        Operand::Reg32(_) | Operand::Reg16Low(_) | Operand::Reg16High(_) => {}
        other => return Err(unsupported(instruction, format!("`{}` cannot hold lanes", other))),
      }
      let last_lane = access.memory_reg.operand + access.lane_count().saturating_sub(1);
      require_register(instruction, &access.memory_reg.operand, REGISTER_COUNT)?;
      require_register(instruction, &last_lane, REGISTER_COUNT)?;

      match access.memory_base.operand {
        Operand::Reg64Pair(_)     => require_register(instruction, &access.memory_base.operand, REGISTER_COUNT)?,
        Operand::Uniform64Pair(_) => require_register(instruction, &access.memory_base.operand, UNIFORM_COUNT)?,
        other => return Err(unsupported(instruction, format!("`{}` is not an address pair", other))),
      }
      match access.memory_offset.operand {
        Operand::Immediate(_) => {}
        Operand::Reg32(_)     => require_register(instruction, &access.memory_offset.operand, REGISTER_COUNT)?,
        other => return Err(unsupported(instruction, format!("`{}` cannot be an offset", other))),
      }
      Ok(())
    }

    Instruction::Mov { dest, source, .. } => {
      match dest.operand {
        Operand::Reg32(_) | Operand::Reg16Low(_) | Operand::Reg16High(_) => {}
        other => return Err(unsupported(instruction, format!("`{}` is not a writable register", other))),
      }
      match source.operand {
        Operand::Reg64Pair(_) | Operand::Uniform64Pair(_) => {
          return Err(unsupported(instruction, "64 bit sources are not modelled"));
        }
        _ => {}
      }
      require_register(instruction, &dest.operand, REGISTER_COUNT)?;
      require_register(instruction, &source.operand, REGISTER_COUNT)
    }

    Instruction::Ret { reg } => require_register(instruction, &Operand::Reg32(*reg), REGISTER_COUNT),

    | Instruction::Stop
    | Instruction::Wait => Ok(()),
  }
}

// endregion

/**
  Runs `instructions` in order until `ret`, `stop` or the end of the list.

  The program is checked up front and runs against a copy of `state`, which replaces `state`
  only if execution succeeds. A failing program therefore leaves `state` exactly as it was.
*/
pub fn emulate_instructions(instructions: &[Instruction], state: &mut EmulatorState) -> Result<Exit> {
  if state.reg(0) != 0 {
    return Err(AsmError::InvariantViolation {
      offset : 0,
      reason : format!("r0 must read as zero on entry, found {:#x}", state.reg(0))
    });
  }
  for instruction in instructions {
    check_executable(instruction)?;
  }

  let mut working = state.clone();
  let mut exit = Exit::EndOfProgram;

  for (cursor, instruction) in instructions.iter().enumerate() {
    debug!(cursor, %instruction, "executing");
    let outcome = working.step(instruction)?;

    #[cfg(feature = "trace_computation")]
    trace!("after `{}`:\n{}", instruction, working);

    if let Some(terminal) = outcome {
      exit = terminal;
      break;
    }
  }

  *state = working;
  Ok(exit)
}

/// Decodes `bytecode` and runs it against `state`.
pub fn emulate_bytecode(bytecode: &[u8], state: &mut EmulatorState) -> Result<Exit> {
  let instructions: Vec<Instruction> =
    disassemble_bytecode_to_structs(bytecode)?
      .into_iter()
      .map(|decoded| decoded.instruction)
      .collect();
  emulate_instructions(&instructions, state)
}


lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

/// Shows the non-zero registers and uniforms next to the data buffer's words.
impl Display for EmulatorState {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let nonzero = |cells: &[u32]| -> Vec<(usize, u32)> {
      cells.iter().copied().enumerate().filter(|(_, v)| *v != 0).collect()
    };

    let r_table = EmulatorState::make_register_table('r', nonzero(&self.registers).into_iter());
    let u_table = EmulatorState::make_register_table('u', nonzero(&self.uniforms).into_iter());
    let d_table = EmulatorState::make_register_table('D', self.data_words().into_iter().enumerate());

    let mut combined_table = table!([r_table, u_table, d_table]);

    combined_table.set_titles(row![ub->"Registers", ub->"Uniforms", ub->"Data"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    write!(f, "{}", combined_table)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn mov(dest: Operand, value: i64) -> Instruction {
    Instruction::mov(dest.into(), Operand::Immediate(value).into())
  }

  fn access(format: Format, lane_mask: u8, first: Operand, offset: i64) -> MemoryAccess {
    MemoryAccess {
      format,
      lane_mask,
      memory_reg    : first.into(),
      memory_base   : Operand::Reg64Pair(17).into(),
      memory_offset : OperandSource::signed(Operand::Immediate(offset)),
    }
  }

  #[test]
  fn half_moves_preserve_the_other_half() {
    let mut state = EmulatorState::new(0);
    let program = [
      mov(Operand::Reg32(3), 0x1111_2222),
      mov(Operand::Reg16High(3), 0xABCD),
      Instruction::Stop,
    ];
    assert_eq!(emulate_instructions(&program, &mut state), Ok(Exit::Stop));
    assert_eq!(state.reg(3), 0xABCD_2222);
  }

  #[test]
  fn stores_and_loads_scalar_lanes() {
    let mut state = EmulatorState::new(64);
    let program = [
      mov(Operand::Reg32(4), 0x0102_0304),
      mov(Operand::Reg32(5), 0xFFFF_FFFF),
      Instruction::Store(access(Format::I16, 0b0101, Operand::Reg32(4), 2)),
      Instruction::Load(access(Format::I16, 0b0011, Operand::Reg32(10), 2)),
      Instruction::Ret { reg: 10 },
    ];
    assert_eq!(emulate_instructions(&program, &mut state), Ok(Exit::Ret(10)));
    // Lane 0 lands at element 2, lane 2 at element 4.
    assert_eq!(&state.data()[4..10], &[0x04, 0x03, 0x00, 0x00, 0xFF, 0xFF]);
    assert_eq!(state.reg(10), 0x0304);
    assert_eq!(state.reg(11), 0);
  }

  #[test]
  fn base_pairs_offset_the_address() {
    let mut state = EmulatorState::new(16);
    state.set_reg(17, 8);
    let program = [
      mov(Operand::Reg32(1), 7),
      Instruction::Store(access(Format::I8, 0x1, Operand::Reg32(1), 1)),
    ];
    assert_eq!(emulate_instructions(&program, &mut state), Ok(Exit::EndOfProgram));
    assert_eq!(state.data()[9], 7);
  }

  #[test]
  fn uniform_bases_and_register_offsets() {
    let mut state = EmulatorState::new(32);
    state.set_uniform(2, 4);
    state.set_reg(9, 3);
    let mut store = access(Format::I32, 0x1, Operand::Reg32(1), 0);
    store.memory_base = Operand::Uniform64Pair(2).into();
    store.memory_offset = Operand::Reg32(9).into();
    let program = [mov(Operand::Reg32(1), 0xAA), Instruction::Store(store), Instruction::Stop];

    emulate_instructions(&program, &mut state).unwrap();
    assert_eq!(state.read_u32(4), Some(0xAA));
  }

  #[test]
  fn normalized_loads_produce_floats() {
    let mut state = EmulatorState::with_data(vec![0xFF, 0x00, 0x7F, 0x80]);
    let program = [
      Instruction::Load(access(Format::U8Norm, 0x3, Operand::Reg32(2), 0)),
      Instruction::Load(access(Format::S8Norm, 0x3, Operand::Reg16Low(8), 2)),
    ];
    emulate_instructions(&program, &mut state).unwrap();
    assert_eq!(f32::from_bits(state.reg(2)), 1.0);
    assert_eq!(f32::from_bits(state.reg(3)), 0.0);
    assert_eq!(f16::from_bits(state.half(16)).to_f32(), 1.0);
    assert_eq!(f16::from_bits(state.half(17)).to_f32(), -1.0);
  }

  #[test]
  fn packed_stores_touch_only_masked_channels() {
    let mut state = EmulatorState::new(8);
    state.write_u32(1, 0xFFFF_FFFF).unwrap();
    state.set_reg(5, 0.0f32.to_bits());
    let program = [Instruction::Store(access(Format::Rgb10A2, 0b0010, Operand::Reg32(5), 1))];
    emulate_instructions(&program, &mut state).unwrap();
    assert_eq!(state.read_u32(1), Some(0xFFF0_03FF));
  }

  #[test]
  fn failures_leave_the_state_untouched() {
    let mut state = EmulatorState::new(4);
    let program = [
      mov(Operand::Reg32(1), 5),
      Instruction::Store(access(Format::I32, 0x1, Operand::Reg32(1), 1)),
    ];
    assert!(matches!(
      emulate_instructions(&program, &mut state),
      Err(AsmError::OutOfBounds { address: 4, len: 4 })
    ));
    assert_eq!(state, EmulatorState::new(4));

    let reserved = [Instruction::Load(access(Format::Format12, 0x1, Operand::Reg32(1), 0))];
    assert!(matches!(emulate_instructions(&reserved, &mut state), Err(AsmError::Unsupported { .. })));
  }

  #[test]
  fn zero_register_is_checked_on_entry() {
    let mut state = EmulatorState::new(4);
    state.set_reg(0, 1);
    let error = emulate_instructions(&[Instruction::Stop], &mut state).unwrap_err();
    assert!(error.is_invariant_violation());
  }

  #[test]
  fn renders_state_as_tables() {
    let mut state = EmulatorState::new(8);
    state.set_reg(6, 0x42);
    let text = state.to_string();
    assert!(text.contains("r[6] ="));
    assert!(text.contains("0x00000042"));
  }
}
