//! Conversions between memory elements and register lanes for every `Format`.
//!
//! Scalar formats move one element per lane. Packed formats hold a whole colour in one 32 bit
//! word, and each lane selects a channel of that word. Store-side float to integer conversions
//! clamp to the representable range and then truncate, as the hardware does.

use crate::bytecode::Format;

/// What a register lane holds after a load, or must hold before a store.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LaneValue {
  Int(u32),
  Float(f32),
}

impl LaneValue {
  /// The integer view. Floats are truncated toward zero.
  pub fn as_int(&self) -> u32 {
    match *self {
      LaneValue::Int(value)   => value,
      LaneValue::Float(value) => value as i32 as u32,
    }
  }

  /// The float view. Integers are interpreted as IEEE single-precision bits.
  pub fn as_float(&self) -> f32 {
    match *self {
      LaneValue::Int(bits)    => f32::from_bits(bits),
      LaneValue::Float(value) => value,
    }
  }
}

// region Normalized integers

pub const U8_NORM_MAX: u32 = 0xFF;
pub const S8_NORM_MAX: i32 = 0x7F;
pub const U16_NORM_MAX: u32 = 0xFFFF;
pub const S16_NORM_MAX: i32 = 0x7FFF;

pub fn unorm_to_float(value: u32, max: u32) -> f32 {
  value as f32 / max as f32
}

/// Clamps to `[0, 1]` and truncates. NaN stores as zero.
pub fn float_to_unorm(value: f32, max: u32) -> u32 {
  (value.clamp(0.0, 1.0) * max as f32) as u32
}

/// The most negative code maps to -1.0 just like its neighbour does.
pub fn snorm_to_float(value: i32, max: i32) -> f32 {
  (value as f32 / max as f32).max(-1.0)
}

pub fn float_to_snorm(value: f32, max: i32) -> i32 {
  (value.clamp(-1.0, 1.0) * max as f32) as i32
}

// endregion

// region sRGB

pub fn linear_to_srgb(value: f32) -> f32 {
  if value >= 1.0 {
    1.0
  } else if value < 0.0031308 {
    value * 12.92
  } else {
    1.055 * value.powf(1.0 / 2.4) - 0.055
  }
}

pub fn srgb_to_linear(value: f32) -> f32 {
  if value < 0.04045 {
    value / 12.92
  } else {
    ((value + 0.055) / 1.055).powf(2.4)
  }
}

// endregion

// region Minifloats

/// Unsigned floats with a 5 bit exponent (bias 15) and `mantissa_bits` of mantissa.
pub fn minifloat_to_float(bits: u32, mantissa_bits: u32) -> f32 {
  let mantissa = bits & ((1 << mantissa_bits) - 1);
  let exponent = (bits >> mantissa_bits) & 0x1F;
  let scale = (1u32 << mantissa_bits) as f32;

  match exponent {
    0    => mantissa as f32 / scale * 2f32.powi(-14),
    0x1F => match mantissa {
      0 => f32::INFINITY,
      _ => f32::NAN
    },
    e    => 2f32.powi(e as i32 - 15) * (1.0 + mantissa as f32 / scale),
  }
}

/**
  Encodes with one extra bit of mantissa precision and then adds 1 to the pattern before
  dropping that bit, which rounds halves up. A carry out of the mantissa correctly bumps the
  exponent. Negative values and -0 become 0; finite values past the largest finite pattern
  saturate to it.
*/
pub fn float_to_minifloat(value: f32, mantissa_bits: u32) -> u32 {
  let max_finite = (0x1E << mantissa_bits) | ((1 << mantissa_bits) - 1);

  if value.is_nan() {
    return (0x1F << mantissa_bits) | 1;
  }
  if value <= 0.0 {
    return 0;
  }
  if value.is_infinite() {
    return 0x1F << mantissa_bits;
  }

  let bits = value.to_bits();
  let exponent = ((bits >> 23) & 0xFF) as i32 - 127 + 15;

  let pattern =
    match exponent <= 0 {
      // Denormal: count units of 2^(-14 - mantissa_bits - 1).
      true  => (value * 2f32.powi(14 + mantissa_bits as i32 + 1)) as u32,
      false => {
        let mantissa = (bits & 0x7F_FFFF) >> (23 - mantissa_bits - 1);
        ((exponent as u32) << (mantissa_bits + 1)) | mantissa
      }
    };

  ((pattern + 1) >> 1).min(max_finite)
}

// endregion

// region Shared exponent

const RGB9E5_MANTISSA_BITS: i32 = 9;
const RGB9E5_EXPONENT_BIAS: i32 = 15;
const RGB9E5_MAX_EXPONENT: i32 = 31;

fn rgb9e5_max() -> f64 {
  let mantissa_max = ((1 << RGB9E5_MANTISSA_BITS) - 1) as f64 / (1 << RGB9E5_MANTISSA_BITS) as f64;
  mantissa_max * 2f64.powi(RGB9E5_MAX_EXPONENT - RGB9E5_EXPONENT_BIAS)
}

pub fn rgb9e5_to_floats(word: u32) -> [f32; 3] {
  let exponent = (word >> 27) as i32;
  let scale = 2f64.powi(exponent - RGB9E5_EXPONENT_BIAS - RGB9E5_MANTISSA_BITS);
  [
    ((word & 0x1FF) as f64 * scale) as f32,
    (((word >> 9) & 0x1FF) as f64 * scale) as f32,
    (((word >> 18) & 0x1FF) as f64 * scale) as f32,
  ]
}

/**
  Shared-exponent encoding: clamp each channel, derive the exponent from the largest channel,
  bump it if the largest mantissa would round up to 2^9, then quantize all three channels
  against it.
*/
pub fn floats_to_rgb9e5(rgb: [f32; 3]) -> u32 {
  let max = rgb9e5_max();
  let clamped: Vec<f64> =
    rgb.iter()
       .map(|c| match c.is_nan() {
         true  => 0.0,
         false => (*c as f64).max(0.0).min(max)
       })
       .collect();
  let max_channel = clamped.iter().cloned().fold(0.0f64, f64::max);

  let floor_log2 = match max_channel > 0.0 {
    true  => max_channel.log2().floor() as i32,
    false => i32::min_value()
  };
  let mut exponent = floor_log2.max(-RGB9E5_EXPONENT_BIAS - 1) + 1 + RGB9E5_EXPONENT_BIAS;

  let denominator = |e: i32| 2f64.powi(e - RGB9E5_EXPONENT_BIAS - RGB9E5_MANTISSA_BITS);
  let max_mantissa = (max_channel / denominator(exponent) + 0.5).floor() as u32;
  if max_mantissa == 1 << RGB9E5_MANTISSA_BITS {
    exponent += 1;
  }

  let quantize = |c: f64| ((c / denominator(exponent) + 0.5).floor() as u32).min(0x1FF);
  quantize(clamped[0])
    | quantize(clamped[1]) << 9
    | quantize(clamped[2]) << 18
    | (exponent as u32) << 27
}

// endregion

// region Per-format lane conversion

/**
  Converts one scalar memory element (zero-extended little-endian bits) to a lane value.
  Returns `None` for packed or unnamed formats.

  `i8` and `i16` zero-extend into the register. An instruction's `signed`/`unsigned` keyword
  only governs its register offset, never the element.
*/
pub fn load_scalar(format: Format, element: u32) -> Option<LaneValue> {
  let value = match format {
    Format::I8      => LaneValue::Int(element & 0xFF),
    Format::I16     => LaneValue::Int(element & 0xFFFF),
    Format::I32     => LaneValue::Int(element),
    Format::U8Norm  => LaneValue::Float(unorm_to_float(element & 0xFF, U8_NORM_MAX)),
    Format::S8Norm  => LaneValue::Float(snorm_to_float(element as u8 as i8 as i32, S8_NORM_MAX)),
    Format::U16Norm => LaneValue::Float(unorm_to_float(element & 0xFFFF, U16_NORM_MAX)),
    Format::S16Norm => LaneValue::Float(snorm_to_float(element as u16 as i16 as i32, S16_NORM_MAX)),
    _               => return None,
  };
  Some(value)
}

/// Converts a lane value to the bits of one scalar memory element. Callers write only the
/// element's low `element_size` bytes.
pub fn store_scalar(format: Format, lane: LaneValue) -> Option<u32> {
  let element = match format {
    | Format::I8
    | Format::I16
    | Format::I32     => lane.as_int(),
    Format::U8Norm    => float_to_unorm(lane.as_float(), U8_NORM_MAX),
    Format::S8Norm    => float_to_snorm(lane.as_float(), S8_NORM_MAX) as u32,
    Format::U16Norm   => float_to_unorm(lane.as_float(), U16_NORM_MAX),
    Format::S16Norm   => float_to_snorm(lane.as_float(), S16_NORM_MAX) as u32,
    _                 => return None,
  };
  Some(element)
}

const RGB10A2_SHIFTS: [u32; 4] = [0, 10, 20, 30];
const RGB10A2_MAXES: [u32; 4] = [0x3FF, 0x3FF, 0x3FF, 0x3];
const RG11B10F_SHIFTS: [u32; 3] = [0, 11, 22];
const RG11B10F_MANTISSAS: [u32; 3] = [6, 6, 5];

/// Decodes all four channels of a packed element. Missing alpha channels read as 1.0.
pub fn unpack(format: Format, word: u32) -> Option<[f32; 4]> {
  let channels = match format {

    Format::Rgb10A2 => {
      let mut channels = [0.0; 4];
      for c in 0..4 {
        let bits = (word >> RGB10A2_SHIFTS[c]) & RGB10A2_MAXES[c];
        channels[c] = unorm_to_float(bits, RGB10A2_MAXES[c]);
      }
      channels
    }

    Format::Srgba8 => {
      let mut channels = [0.0; 4];
      for c in 0..4 {
        let encoded = unorm_to_float((word >> (8 * c)) & 0xFF, U8_NORM_MAX);
        channels[c] = match c {
          3 => encoded,
          _ => srgb_to_linear(encoded)
        };
      }
      channels
    }

    Format::Rg11B10F => {
      let mut channels = [1.0; 4];
      for c in 0..3 {
        let width = RG11B10F_MANTISSAS[c] + 5;
        let bits = (word >> RG11B10F_SHIFTS[c]) & ((1 << width) - 1);
        channels[c] = minifloat_to_float(bits, RG11B10F_MANTISSAS[c]);
      }
      channels
    }

    Format::Rgb9E5 => {
      let [r, g, b] = rgb9e5_to_floats(word);
      [r, g, b, 1.0]
    }

    _ => return None,
  };
  Some(channels)
}

/**
  Writes the channels present in `values` into `word`, leaving the others untouched. Shared
  exponent words are decoded, merged and re-encoded as a whole.
*/
pub fn pack(format: Format, word: u32, values: [Option<f32>; 4]) -> Option<u32> {
  let packed = match format {

    Format::Rgb10A2 => {
      let mut word = word;
      for (c, value) in values.iter().enumerate() {
        if let Some(value) = value {
          let mask = RGB10A2_MAXES[c] << RGB10A2_SHIFTS[c];
          word = (word & !mask) | float_to_unorm(*value, RGB10A2_MAXES[c]) << RGB10A2_SHIFTS[c];
        }
      }
      word
    }

    Format::Srgba8 => {
      let mut word = word;
      for (c, value) in values.iter().enumerate() {
        if let Some(value) = value {
          let encoded = match c {
            3 => *value,
            _ => linear_to_srgb(value.clamp(0.0, 1.0))
          };
          word = (word & !(0xFF << (8 * c))) | float_to_unorm(encoded, U8_NORM_MAX) << (8 * c);
        }
      }
      word
    }

    Format::Rg11B10F => {
      let mut word = word;
      for (c, value) in values.iter().take(3).enumerate() {
        if let Some(value) = value {
          let width = RG11B10F_MANTISSAS[c] + 5;
          let mask = ((1u32 << width) - 1) << RG11B10F_SHIFTS[c];
          word = (word & !mask) | float_to_minifloat(*value, RG11B10F_MANTISSAS[c]) << RG11B10F_SHIFTS[c];
        }
      }
      word
    }

    Format::Rgb9E5 => {
      match values.iter().take(3).any(Option::is_some) {
        false => word,
        true  => {
          let mut rgb = rgb9e5_to_floats(word);
          for (c, value) in values.iter().take(3).enumerate() {
            if let Some(value) = value {
              rgb[c] = *value;
            }
          }
          floats_to_rgb9e5(rgb)
        }
      }
    }

    _ => return None,
  };
  Some(packed)
}

// endregion
