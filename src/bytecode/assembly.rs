/*!
  The human readable textual form of bytecode is called assembly. This module parses assembly
  into `Instruction`s; `listing` goes the other way.

  A program is a sequence of statements separated by `;` or line breaks. `#` starts a comment
  that runs to the end of the line. Tokens are separated by commas and/or whitespace:

    device_store i32, 0xF, r6_r7_r8_r9, r17_r18, 4, signed;
    mov r6, 1;
    stop;

  Annotated listings are accepted too. A leading `<offset>: <byte> <byte> ...` prefix is skipped,
  so the output of an annotated disassembly assembles back to the same program.
*/

use std::str::FromStr;

use nom::{
  branch::alt,
  bytes::complete::{tag_no_case, take_till1, take_while1, take_while_m_n},
  character::complete::{char as one_char, digit1, hex_digit1, one_of, space0, space1},
  combinator::{all_consuming, eof, map, map_res, opt, peek, recognize, value},
  multi::{many0, separated_list0, separated_list1},
  sequence::{delimited, pair, preceded, terminated, tuple},
  IResult
};
use tracing::debug;

use crate::error::{AsmError, Result};
use crate::operand::{Operand, OperandSource, RegisterIndex};
use super::{Format, Instruction, MemoryAccess, Mnemonic};

/// Statements with more tokens than this are rejected outright.
pub const MAX_TOKENS: usize = 10;

// region Lexical parsers

fn is_separator(c: char) -> bool {
  c == ',' || c.is_whitespace()
}

fn is_hex(c: char) -> bool {
  c.is_ascii_hexdigit()
}

/// One hex byte of an annotation, e.g. `C8`. Must stand alone so that `device_load` is not
/// mistaken for the byte `de`.
fn annotation_byte(input: &str) -> IResult<&str, &str> {
  terminated(take_while_m_n(2, 2, is_hex), peek(alt((space1, eof))))(input)
}

/// `0018: 45 31 12 05 20 C8 F2 00`
fn annotation(input: &str) -> IResult<&str, ()> {
  value(
    (),
    tuple((space0, hex_digit1, one_char(':'), many0(preceded(space1, annotation_byte))))
  )(input)
}

fn separator(input: &str) -> IResult<&str, &str> {
  take_while1(is_separator)(input)
}

fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
  preceded(
    opt(annotation),
    delimited(
      opt(separator),
      separated_list0(separator, take_till1(is_separator)),
      opt(separator)
    )
  )(input)
}

fn index(input: &str) -> IResult<&str, RegisterIndex> {
  map_res(digit1, |digits: &str| digits.parse::<RegisterIndex>())(input)
}

/// `r6`, `r6l` or `r6h`
fn register(input: &str) -> IResult<&str, Operand> {
  let (rest, (_, i, half)) = tuple((one_char('r'), index, opt(one_of("lh"))))(input)?;
  let operand = match half {
    Some('l') => Operand::Reg16Low(i),
    Some(_)   => Operand::Reg16High(i),
    None      => Operand::Reg32(i),
  };
  Ok((rest, operand))
}

/// `r6_r7` or `u4_u5`. Both halves must come from the same bank; adjacency is checked later.
fn register_pair(input: &str) -> IResult<&str, (char, RegisterIndex, RegisterIndex)> {
  let (rest, bank) = one_of("ru")(input)?;
  let (rest, first) = index(rest)?;
  let (rest, second) = preceded(pair(one_char('_'), one_char(bank)), index)(rest)?;
  Ok((rest, (bank, first, second)))
}

fn immediate(input: &str) -> IResult<&str, i64> {
  map_res(recognize(pair(opt(one_char('-')), digit1)), |text: &str| text.parse::<i64>())(input)
}

fn lane_mask(input: &str) -> IResult<&str, u8> {
  map_res(preceded(tag_no_case("0x"), hex_digit1), |digits| u8::from_str_radix(digits, 16))(input)
}

enum Lexeme {
  Pair {
    bank   : char,
    first  : RegisterIndex,
    second : RegisterIndex
  },
  Single(Operand),
}

fn lexeme(input: &str) -> IResult<&str, Lexeme> {
  alt((
    map(register_pair, |(bank, first, second)| Lexeme::Pair { bank, first, second }),
    map(register, Lexeme::Single),
    map(immediate, |v| Lexeme::Single(Operand::Immediate(v))),
  ))(input)
}

// endregion

// region Operands

/// Parses a single operand token: a register, half register, register or uniform pair, or a
/// decimal immediate.
pub fn parse_operand(token: &str) -> Result<Operand> {
  let (_, lexeme) = all_consuming(lexeme)(token).map_err(|_| {
    AsmError::operand(token, "expected a register, register pair, uniform pair or decimal immediate")
  })?;

  match lexeme {
    Lexeme::Single(operand) => Ok(operand),
    Lexeme::Pair { bank, first, second } if first.checked_add(1) == Some(second) => {
      match bank {
        'u' => Ok(Operand::Uniform64Pair(first)),
        _   => Ok(Operand::Reg64Pair(first)),
      }
    }
    Lexeme::Pair { .. } => Err(AsmError::field(
      "register_pair",
      format!("`{}` does not name two adjacent registers", token)
    )),
  }
}

/// Parses `r6_r7_r8_r9`-style lists, returning the first register. The list must name exactly
/// `count` consecutive lanes.
fn parse_register_list(token: &str, count: u32) -> Result<Operand> {
  let (_, registers) = all_consuming(separated_list1(one_char('_'), register))(token)
    .map_err(|_| AsmError::operand(token, "expected underscore-joined registers"))?;

  let first = registers[0];
  if registers.len() != count as usize {
    return Err(AsmError::field(
      "memory_reg",
      format!("the lane mask transfers {} registers but `{}` names {}", count, token, registers.len())
    ));
  }
  for (i, register) in registers.iter().enumerate() {
    if *register != first + i as RegisterIndex {
      return Err(AsmError::field(
        "memory_reg",
        format!("lane {} of `{}` should be `{}`", i, token, first + i as RegisterIndex)
      ));
    }
  }
  Ok(first)
}

fn parse_lane_mask(token: &str, line: usize) -> Result<u8> {
  match all_consuming(lane_mask)(token) {
    Ok((_, mask)) if mask <= 0xF => Ok(mask),
    _ => Err(AsmError::Syntax {
      line,
      reason: format!("lane mask `{}` is not a hex literal between 0x0 and 0xF", token)
    }),
  }
}

fn parse_signedness(token: &str, line: usize) -> Result<bool> {
  match token {
    "signed"   => Ok(true),
    "unsigned" => Ok(false),
    other      => Err(AsmError::Syntax {
      line,
      reason: format!("expected `signed` or `unsigned`, found `{}`", other)
    }),
  }
}

// endregion

// region Statements

fn expect_operands(mnemonic: Mnemonic, tokens: &[&str], operands: usize, line: usize) -> Result<()> {
  match tokens.len() - 1 == operands {
    true  => Ok(()),
    false => Err(AsmError::Syntax {
      line,
      reason: format!("`{}` takes {} operands, found {}", mnemonic, operands, tokens.len() - 1)
    }),
  }
}

fn parse_memory_access(tokens: &[&str], line: usize) -> Result<MemoryAccess> {
  let format = Format::from_str(tokens[1])
    .map_err(|_| AsmError::UnknownFormatName { name: tokens[1].to_string() })?;
  let lane_mask = parse_lane_mask(tokens[2], line)?;
  let count = lane_mask.count_ones().max(1);

  Ok(MemoryAccess {
    format,
    lane_mask,
    memory_reg    : parse_register_list(tokens[3], count)?.into(),
    memory_base   : parse_operand(tokens[4])?.into(),
    memory_offset : OperandSource {
      operand     : parse_operand(tokens[5])?,
      sign_extend : parse_signedness(tokens[6], line)?
    },
  })
}

/// `tokens` is non-empty; `tokens[0]` is the mnemonic.
fn parse_statement(tokens: &[&str], line: usize) -> Result<Instruction> {
  let mnemonic = Mnemonic::from_str(tokens[0]).map_err(|_| AsmError::UnknownMnemonic {
    line,
    mnemonic: tokens[0].to_string()
  })?;

  match mnemonic {

    Mnemonic::Mov => {
      expect_operands(mnemonic, tokens, 2, line)?;
      Ok(Instruction::mov(parse_operand(tokens[1])?.into(), parse_operand(tokens[2])?.into()))
    }

    Mnemonic::DeviceLoad => {
      expect_operands(mnemonic, tokens, 6, line)?;
      Ok(Instruction::Load(parse_memory_access(tokens, line)?))
    }

    Mnemonic::DeviceStore => {
      expect_operands(mnemonic, tokens, 6, line)?;
      Ok(Instruction::Store(parse_memory_access(tokens, line)?))
    }

    Mnemonic::Ret => {
      expect_operands(mnemonic, tokens, 1, line)?;
      match parse_operand(tokens[1])? {
        Operand::Reg32(reg) => Ok(Instruction::Ret { reg }),
        _ => Err(AsmError::operand(tokens[1], "`ret` takes a 32-bit register")),
      }
    }

    Mnemonic::Stop => {
      expect_operands(mnemonic, tokens, 0, line)?;
      Ok(Instruction::Stop)
    }

    Mnemonic::Wait => {
      expect_operands(mnemonic, tokens, 0, line)?;
      Ok(Instruction::Wait)
    }

  }
}

// endregion

/**
  Parses an assembly program. Line numbers in errors are 1-based. Nothing is returned unless
  every statement parses.
*/
pub fn assemble_text_to_structs(text: &str) -> Result<Vec<Instruction>> {
  let mut instructions = Vec::new();

  for (index, raw_line) in text.lines().enumerate() {
    let line = index + 1;
    let code = match raw_line.find('#') {
      Some(comment) => &raw_line[..comment],
      None          => raw_line
    };

    for statement in code.split(';') {
      let (_, tokens) = all_consuming(tokens)(statement).map_err(|_| AsmError::Syntax {
        line,
        reason: format!("cannot split `{}` into tokens", statement.trim())
      })?;

      if tokens.is_empty() {
        continue;
      }
      if tokens.len() > MAX_TOKENS {
        return Err(AsmError::Syntax {
          line,
          reason: format!("{} tokens, at most {} are allowed", tokens.len(), MAX_TOKENS)
        });
      }

      let instruction = parse_statement(&tokens, line)?;
      debug!(line, %instruction, "parsed");
      instructions.push(instruction);
    }
  }

  Ok(instructions)
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_operands() {
    assert_eq!(parse_operand("r6").unwrap(), Operand::Reg32(6));
    assert_eq!(parse_operand("r6l").unwrap(), Operand::Reg16Low(6));
    assert_eq!(parse_operand("r12h").unwrap(), Operand::Reg16High(12));
    assert_eq!(parse_operand("r17_r18").unwrap(), Operand::Reg64Pair(17));
    assert_eq!(parse_operand("u4_u5").unwrap(), Operand::Uniform64Pair(4));
    assert_eq!(parse_operand("-12").unwrap(), Operand::Immediate(-12));
  }

  #[test]
  fn rejects_bad_operands() {
    assert!(matches!(parse_operand("x3"), Err(AsmError::MalformedOperand { .. })));
    assert!(matches!(parse_operand("r6_u7"), Err(AsmError::MalformedOperand { .. })));
    assert!(matches!(parse_operand("r6q"), Err(AsmError::MalformedOperand { .. })));
    assert!(matches!(
      parse_operand("r6_r8"),
      Err(AsmError::FieldConstraintViolation { field: "register_pair", .. })
    ));
  }

  #[test]
  fn parses_the_store_fixture() {
    let program = assemble_text_to_structs(
      "device_store i32, 0xF, r6_r7_r8_r9, r17_r18, 4, signed;"
    ).unwrap();
    assert_eq!(
      program,
      vec![Instruction::Store(MemoryAccess {
        format        : Format::I32,
        lane_mask     : 0xF,
        memory_reg    : Operand::Reg32(6).into(),
        memory_base   : Operand::Reg64Pair(17).into(),
        memory_offset : OperandSource::signed(Operand::Immediate(4)),
      })]
    );
  }

  #[test]
  fn separators_and_comments() {
    let text = "
      mov r6,1 ; mov r7 , 2   # two on one line

      wait
      stop;;
    ";
    let program = assemble_text_to_structs(text).unwrap();
    assert_eq!(program.len(), 4);
    assert_eq!(program[3], Instruction::Stop);
  }

  #[test]
  fn skips_listing_annotations() {
    let text = "0000: 62 19 01 00 00 00       mov r6, 1;\n\
                0006: 45 31 12 05 20 C8 F2 00 device_load i32, 0x1, r6, u2_u3, r4, unsigned;";
    let program = assemble_text_to_structs(text).unwrap();
    assert_eq!(program[0].to_string(), "mov r6, 1");
    assert_eq!(program[1].to_string(), "device_load i32, 0x1, r6, u2_u3, r4, unsigned");
  }

  #[test]
  fn register_lists_follow_the_mask() {
    let program = assemble_text_to_structs("device_load i16, 0x7, r6h_r7l_r7h, r2_r3, 0, signed").unwrap();
    match program[0] {
      Instruction::Load(access) => assert_eq!(access.memory_reg.operand, Operand::Reg16High(6)),
      _ => panic!("expected a load"),
    }

    let zero_mask = assemble_text_to_structs("device_load i8, 0x0, r6, r2_r3, 0, signed").unwrap();
    assert_eq!(zero_mask[0].to_string(), "device_load i8, 0x0, r6, r2_r3, 0, signed");

    let short = assemble_text_to_structs("device_load i8, 0x3, r6, r2_r3, 0, signed");
    assert!(matches!(short, Err(AsmError::FieldConstraintViolation { field: "memory_reg", .. })));
    let gap = assemble_text_to_structs("device_load i8, 0x3, r6_r8, r2_r3, 0, signed");
    assert!(matches!(gap, Err(AsmError::FieldConstraintViolation { field: "memory_reg", .. })));
  }

  #[test]
  fn reports_lines_and_names() {
    let error = assemble_text_to_structs("stop\nfadd r1, r2").unwrap_err();
    assert_eq!(error, AsmError::UnknownMnemonic { line: 2, mnemonic: "fadd".to_string() });

    let error = assemble_text_to_structs("device_load rgba, 0x1, r6, r2_r3, 0, signed").unwrap_err();
    assert_eq!(error, AsmError::UnknownFormatName { name: "rgba".to_string() });

    let error = assemble_text_to_structs("mov r1").unwrap_err();
    assert!(matches!(error, AsmError::Syntax { line: 1, .. }));

    let error = assemble_text_to_structs("device_load i8, 0x10, r6, r2_r3, 0, signed").unwrap_err();
    assert!(matches!(error, AsmError::Syntax { .. }));

    let error = assemble_text_to_structs("device_load i8, 0x1, r6, r2_r3, 0, maybe").unwrap_err();
    assert!(matches!(error, AsmError::Syntax { .. }));

    let error = assemble_text_to_structs("stop 1 2 3 4 5 6 7 8 9 10").unwrap_err();
    assert!(matches!(error, AsmError::Syntax { .. }));
  }

  #[test]
  fn ret_takes_a_register() {
    assert_eq!(assemble_text_to_structs("ret r3").unwrap(), vec![Instruction::Ret { reg: 3 }]);
    assert!(assemble_text_to_structs("ret 3").is_err());
  }
}
