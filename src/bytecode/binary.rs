/*!
  This module is responsible for the encoding and decoding of binary instructions.

  Each layout is written as a sequence of `set_bits`/`get_bits` calls over the instruction's
  own byte span. Multi-part fields are split low bits first. For example the 12 bit load/store
  offset lives at bits 20..=23, 32..=35 and 56..=63.

  Encoding writes into a zeroed scratch buffer. Since `set_bits` only ORs, a dirty buffer would
  corrupt the result silently, so `encode_instruction_into` refuses one.
*/

use std::convert::TryFrom;

use tracing::{debug, trace, warn};

use crate::bits::{get_bits, set_bits, sign_extend};
use crate::error::{AsmError, Result};
use crate::operand::{
  decode_alu_dest, decode_memory_base, decode_memory_offset, decode_memory_reg,
  encode_alu_dest, encode_memory_base, encode_memory_offset, encode_memory_reg,
  Operand, OperandSource, RawAluDest, RawBase, RawOffset, RawRegisterList, ALU_DEST_FLAG_32BIT,
  MAX_FIELD_REGISTER
};
use super::{EncodedInstruction, Format, Instruction, MemoryAccess, Opcode, STOP_WORD, WAIT_WORD};

/// The longest instruction, a long-form 32 bit `mov` or any load/store.
pub const MAX_INSTRUCTION_BYTES: usize = 8;

const MEMORY_INSTRUCTION_BYTES: usize = 8;
const SHORT_INSTRUCTION_BYTES: usize = 2;

// Fixed load/store bits observed on hardware. Their meaning is unknown; they are reproduced
// verbatim and checked on decode.
const FILLER_BIT_26: u64 = 1;
const FILLER_BITS_28_31: u64 = 0;
const FILLER_BITS_44_46: u64 = 4;
const FILLER_BITS_50_51: u64 = 0;
/// Load/store long flag. Only the set form has been observed.
const MEMORY_LONG_FLAG: u64 = 1;

const MAX_OFFSET_SHIFT: u32 = 3;
const OFFSET_FIELD_BITS: usize = 12;

// region Sizes

/**
  Returns the size in bytes of the instruction starting at `bytes[0]`. `offset` is only used for
  error reporting.
*/
pub fn instruction_size(bytes: &[u8], offset: usize) -> Result<usize> {
  let first = *bytes.first().ok_or(AsmError::BufferBoundsExceeded {
    offset,
    needed    : 1,
    available : 0
  })?;
  let opcode = Opcode::try_from(first & 0x7F)
    .map_err(|_| AsmError::UnknownOpcode { offset, opcode: first & 0x7F })?;

  match opcode {
    | Opcode::Load
    | Opcode::Store => Ok(MEMORY_INSTRUCTION_BYTES),

    | Opcode::Ret
    | Opcode::Stop
    | Opcode::Wait  => Ok(SHORT_INSTRUCTION_BYTES),

    Opcode::Mov     => {
      // The destination flag and long flag live in the first two bytes.
      if bytes.len() < 2 {
        return Err(AsmError::BufferBoundsExceeded { offset, needed: 2, available: bytes.len() });
      }
      let flag = get_bits(bytes, 7, 8) as u8;
      let long = get_bits(bytes, 15, 15) == 1;
      Ok(mov_size(flag & ALU_DEST_FLAG_32BIT != 0, long))
    }
  }
}

fn mov_size(dest_is_32bit: bool, long: bool) -> usize {
  let base = match dest_is_32bit {
    true  => 6,
    false => 4
  };
  match long {
    true  => base + 2,
    false => base
  }
}

// endregion

// region Encoding

/**
  Encodes one instruction into `buffer`, returning the number of bytes written.

  `buffer` must be all zeroes and at least `MAX_INSTRUCTION_BYTES` long. Fields are ORed into
  place, so leftover bits from an earlier instruction would merge with the new one.
*/
pub fn encode_instruction_into(instruction: &Instruction, buffer: &mut [u8]) -> Result<usize> {
  if buffer.len() < MAX_INSTRUCTION_BYTES || buffer.iter().any(|b| *b != 0) {
    return Err(AsmError::InvariantViolation {
      offset : 0,
      reason : "instructions must be encoded into a zeroed scratch buffer".to_string()
    });
  }

  let size =
    match instruction {
      | Instruction::Load(access)
      | Instruction::Store(access) => encode_memory(instruction.opcode(), access, buffer)?,
      Instruction::Mov { dest, source, flag_low } => {
        encode_mov(dest, &source.operand, *flag_low, buffer)?
      }
      Instruction::Ret { reg }     => encode_ret(*reg, buffer)?,
      Instruction::Stop            => encode_fixed(STOP_WORD, buffer),
      Instruction::Wait            => encode_fixed(WAIT_WORD, buffer),
    };

  trace!(%instruction, size, "encoded instruction");
  Ok(size)
}

/// Encodes one instruction into a freshly allocated byte vector.
pub fn encode_instruction(instruction: &Instruction) -> Result<Vec<u8>> {
  let mut scratch = [0u8; MAX_INSTRUCTION_BYTES];
  let size = encode_instruction_into(instruction, &mut scratch)?;
  Ok(scratch[..size].to_vec())
}

/**
  Encodes a program into back-to-back machine code. Each instruction is built in its own
  scratch buffer and appended only once it has encoded successfully.
*/
pub fn assemble_structs_to_bytecode(instructions: &[Instruction]) -> Result<Vec<u8>> {
  let mut bytecode: Vec<u8> = Vec::with_capacity(instructions.len() * MAX_INSTRUCTION_BYTES);

  for instruction in instructions {
    let encoded = encode_instruction(instruction)?;
    debug!(offset = bytecode.len(), %instruction, "assembled");
    bytecode.extend_from_slice(&encoded);
  }

  Ok(bytecode)
}

/**
  Drops trailing zero bits from an offset so it fits the 12 bit field. Returns the field value
  and the shift. Immediates are signed, register offsets are not.
*/
fn compress_offset(raw: &RawOffset) -> Result<(u64, u64)> {
  let shift = match raw.value {
    0     => 0,
    value => value.trailing_zeros().min(MAX_OFFSET_SHIFT)
  };
  let shifted = raw.value >> shift;

  let limit = 1i64 << OFFSET_FIELD_BITS;
  let fits = match raw.immediate {
    true  => shifted >= -(limit >> 1) && shifted < (limit >> 1),
    false => shifted >= 0 && shifted < limit
  };
  if !fits {
    return Err(AsmError::field(
      "memory_offset",
      format!("offset {} does not fit 12 bits after a shift of {}", raw.value, shift)
    ));
  }

  Ok(((shifted as u64) & (limit as u64 - 1), shift as u64))
}

fn encode_memory(opcode: Opcode, access: &MemoryAccess, data: &mut [u8]) -> Result<usize> {
  let data = &mut data[..MEMORY_INSTRUCTION_BYTES];

  let offset = encode_memory_offset(&access.memory_offset)?;
  let (mut offset_field, shift) = compress_offset(&offset)?;
  let base = encode_memory_base(&access.memory_base)?;
  let reg = encode_memory_reg(&access.memory_reg)?;
  if access.lane_mask > 0xF {
    return Err(AsmError::field("lane_mask", format!("{:#x} is wider than 4 bits", access.lane_mask)));
  }

  let mut format = access.format.code() as u64;
  let mut reg_value = reg.value as u64;
  let mut base_value = base.value as u64;

  set_bits(data, 0, 6, opcode.code() as u64);
  set_bits(data, 7, 9, format);
  format >>= 3;
  set_bits(data, 10, 15, reg_value);
  reg_value >>= 6;
  set_bits(data, 16, 19, base_value);
  base_value >>= 4;
  set_bits(data, 20, 23, offset_field);
  offset_field >>= 4;
  set_bits(data, 24, 24, offset.immediate as u64);
  set_bits(data, 25, 25, offset.zero_extend as u64);
  set_bits(data, 26, 26, FILLER_BIT_26);
  set_bits(data, 27, 27, base.uniform as u64);
  set_bits(data, 28, 31, FILLER_BITS_28_31);
  set_bits(data, 32, 35, offset_field);
  offset_field >>= 4;
  set_bits(data, 36, 39, base_value);
  set_bits(data, 40, 41, reg_value);
  set_bits(data, 42, 43, shift);
  set_bits(data, 44, 46, FILLER_BITS_44_46);
  set_bits(data, 47, 47, MEMORY_LONG_FLAG);
  set_bits(data, 48, 48, format);
  set_bits(data, 49, 49, reg.is_32bit as u64);
  set_bits(data, 50, 51, FILLER_BITS_50_51);
  set_bits(data, 52, 55, access.lane_mask as u64);
  set_bits(data, 56, 63, offset_field);

  Ok(MEMORY_INSTRUCTION_BYTES)
}

fn encode_mov(dest: &OperandSource, source: &Operand, flag_low: bool, data: &mut [u8]) -> Result<usize> {
  let raw = encode_alu_dest(dest)?;
  let dest_operand = dest.operand;

  let value = match *source {
    Operand::Immediate(value) if (0..=u32::max_value() as i64).contains(&value) => value as u64,
    Operand::Immediate(value) => {
      return Err(AsmError::field("mov_immediate", format!("{} does not fit 32 bits", value)));
    }
    other => {
      return Err(AsmError::field(
        "mov_source",
        format!("only immediate sources can be encoded, found `{}`", other)
      ));
    }
  };

  let long = value > u16::max_value() as u64;
  if long {
    warn!(dest = %dest_operand, value, "emitting long-form mov, an encoding not yet confirmed on hardware");
  }

  let size = mov_size(raw.flag == ALU_DEST_FLAG_32BIT, long);
  let data = &mut data[..size];

  let (immediate_end, high_start) = match long {
    true  => (47, 60),
    false => (31, 44)
  };
  let high = (raw.value >> 6) as u64;
  if high != 0 && (high_start + 1) / 8 >= size {
    return Err(AsmError::field(
      "alu_dest",
      format!("`{}` needs destination bits that a {} byte mov cannot hold", dest_operand, size)
    ));
  }

  set_bits(data, 0, 6, Opcode::Mov.code() as u64);
  set_bits(data, 7, 8, (raw.flag | flag_low as u8) as u64);
  set_bits(data, 9, 14, raw.value as u64);
  set_bits(data, 15, 15, long as u64);
  set_bits(data, 16, immediate_end, value);
  set_bits(data, high_start, high_start + 1, high);

  Ok(size)
}

fn encode_ret(reg: u32, data: &mut [u8]) -> Result<usize> {
  if reg > MAX_FIELD_REGISTER {
    return Err(AsmError::field("ret_reg", format!("r{} is beyond r{}", reg, MAX_FIELD_REGISTER)));
  }
  let data = &mut data[..SHORT_INSTRUCTION_BYTES];
  set_bits(data, 0, 6, Opcode::Ret.code() as u64);
  set_bits(data, 9, 15, reg as u64);
  Ok(SHORT_INSTRUCTION_BYTES)
}

fn encode_fixed(word: u64, data: &mut [u8]) -> usize {
  set_bits(&mut data[..SHORT_INSTRUCTION_BYTES], 0, 15, word);
  SHORT_INSTRUCTION_BYTES
}

// endregion

// region Decoding

/**
  Decodes the instruction starting at `bytes[offset]`. The result keeps a copy of the bytes it
  was decoded from.
*/
pub fn decode_instruction(bytes: &[u8], offset: usize) -> Result<EncodedInstruction> {
  let rest = bytes.get(offset..).unwrap_or(&[]);
  let size = instruction_size(rest, offset)?;
  if rest.len() < size {
    return Err(AsmError::BufferBoundsExceeded { offset, needed: size, available: rest.len() });
  }
  let data = &rest[..size];

  let instruction =
    match Opcode::try_from(data[0] & 0x7F) {
      Ok(Opcode::Load)  => Instruction::Load(decode_memory(data, offset)?),
      Ok(Opcode::Store) => Instruction::Store(decode_memory(data, offset)?),
      Ok(Opcode::Mov)   => decode_mov(data, offset)?,
      Ok(Opcode::Ret)   => decode_ret(data, offset)?,
      Ok(Opcode::Stop)  => decode_fixed(data, offset, STOP_WORD, Instruction::Stop)?,
      Ok(Opcode::Wait)  => decode_fixed(data, offset, WAIT_WORD, Instruction::Wait)?,
      Err(_)            => return Err(AsmError::UnknownOpcode { offset, opcode: data[0] & 0x7F }),
    };

  Ok(EncodedInstruction { instruction, offset, bytes: data.to_vec() })
}

/// Scans a program front to back; each decoded length locates the next opcode.
pub fn disassemble_bytecode_to_structs(bytes: &[u8]) -> Result<Vec<EncodedInstruction>> {
  let mut instructions = Vec::new();
  let mut offset = 0;

  while offset < bytes.len() {
    let decoded = decode_instruction(bytes, offset)?;
    debug!(offset, len = decoded.len(), instruction = %decoded.instruction, "decoded");
    offset += decoded.len();
    instructions.push(decoded);
  }

  Ok(instructions)
}

fn check_filler(data: &[u8], offset: usize, start: usize, end: usize, expected: u64) -> Result<()> {
  let found = get_bits(data, start, end);
  match found == expected {
    true  => Ok(()),
    false => Err(AsmError::InvariantViolation {
      offset,
      reason: format!("fixed bits {}..={} are {:#x}, expected {:#x}", start, end, found, expected)
    })
  }
}

fn decode_memory(data: &[u8], offset: usize) -> Result<MemoryAccess> {
  check_filler(data, offset, 26, 26, FILLER_BIT_26)?;
  check_filler(data, offset, 28, 31, FILLER_BITS_28_31)?;
  check_filler(data, offset, 44, 46, FILLER_BITS_44_46)?;
  check_filler(data, offset, 50, 51, FILLER_BITS_50_51)?;
  if get_bits(data, 47, 47) != MEMORY_LONG_FLAG {
    return Err(AsmError::field("memory_long_flag", "the short load/store form is not supported").at(offset));
  }

  let format = get_bits(data, 7, 9) | get_bits(data, 48, 48) << 3;
  let reg    = get_bits(data, 10, 15) | get_bits(data, 40, 41) << 6;
  let base   = get_bits(data, 16, 19) | get_bits(data, 36, 39) << 4;
  let offset_field =
    get_bits(data, 20, 23) | get_bits(data, 32, 35) << 4 | get_bits(data, 56, 63) << 8;
  let immediate   = get_bits(data, 24, 24) == 1;
  let zero_extend = get_bits(data, 25, 25) == 1;
  let uniform     = get_bits(data, 27, 27) == 1;
  let shift       = get_bits(data, 42, 43);
  let is_32bit    = get_bits(data, 49, 49) == 1;
  let lane_mask   = get_bits(data, 52, 55) as u8;

  if immediate && zero_extend {
    return Err(AsmError::field("memory_offset", "immediate offsets are always sign extended").at(offset));
  }

  let unshifted = match immediate {
    true  => sign_extend(offset_field, OFFSET_FIELD_BITS),
    false => offset_field as i64
  };
  let raw_offset = RawOffset { value: unshifted << shift, immediate, zero_extend };

  // Only the encoder's own choice of shift re-encodes to the same bits.
  let canonical = compress_offset(&raw_offset).map_err(|e| e.at(offset))?;
  if canonical != (offset_field, shift) {
    return Err(AsmError::field(
      "memory_offset",
      format!(
        "offset {} is stored with shift {} where {} is expected",
        raw_offset.value, shift, canonical.1
      )
    ).at(offset));
  }

  let format = Format::try_from(format as u8)
    .map_err(|_| AsmError::field("format", format!("{:#x} is not a 4 bit format code", format)).at(offset))?;

  Ok(MemoryAccess {
    format,
    lane_mask,
    memory_reg    : decode_memory_reg(RawRegisterList { value: reg as u32, is_32bit }).map_err(|e| e.at(offset))?,
    memory_base   : decode_memory_base(RawBase { value: base as u32, uniform }).map_err(|e| e.at(offset))?,
    memory_offset : decode_memory_offset(raw_offset).map_err(|e| e.at(offset))?,
  })
}

fn decode_mov(data: &[u8], offset: usize) -> Result<Instruction> {
  let flag = get_bits(data, 7, 8) as u8;
  let long = get_bits(data, 15, 15) == 1;

  let (immediate, high) = match long {
    true  => (get_bits(data, 16, 47), get_bits(data, 60, 61)),
    false => (get_bits(data, 16, 31), get_bits(data, 44, 45))
  };

  // The 32 bit forms have bits that no field claims.
  let unclaimed: &[(usize, usize)] = match (flag & ALU_DEST_FLAG_32BIT != 0, long) {
    (true, false) => &[(32, 43), (46, 47)],
    (true, true)  => &[(48, 59), (62, 63)],
    (false, _)    => &[],
  };
  for &(start, end) in unclaimed {
    check_filler(data, offset, start, end, 0)?;
  }
  if long && immediate <= u16::max_value() as u64 {
    return Err(AsmError::field(
      "mov_long_flag",
      format!("immediate {:#x} fits the short form", immediate)
    ).at(offset));
  }

  let raw = get_bits(data, 9, 14) | high << 6;

  Ok(Instruction::Mov {
    dest     : decode_alu_dest(RawAluDest { value: raw as u32, flag }).map_err(|e| e.at(offset))?,
    source   : Operand::Immediate(immediate as i64).into(),
    flag_low : flag & 1 == 1
  })
}

fn decode_ret(data: &[u8], offset: usize) -> Result<Instruction> {
  if get_bits(data, 7, 8) != 0 {
    return Err(AsmError::field("ret_reserved", "bits 7..=8 must be zero").at(offset));
  }
  Ok(Instruction::Ret { reg: get_bits(data, 9, 15) as u32 })
}

fn decode_fixed(data: &[u8], offset: usize, word: u64, instruction: Instruction) -> Result<Instruction> {
  check_filler(data, offset, 0, 15, word)?;
  Ok(instruction)
}

// endregion
