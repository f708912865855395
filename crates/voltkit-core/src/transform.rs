//! Value transform pipeline.
//!
//! Transforms are pure functions applied to a parsed value, composed
//! left-to-right into a [`Pipeline`]. They can be constructed directly or
//! compiled from the string DSL used by schema definitions and configs:
//! `"abs"`, `"scale:0.1"`, `"clamp:0:100"`, `"hex_enable_list:0:3"`.
//!
//! Compilation fails fast on unknown names or malformed arguments;
//! execution fails with a typed error carrying the transform name and the
//! offending input.

use std::str::FromStr;

use crate::error::TransformError;
use crate::value::Value;

/// A single named value transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// `v → |v|`
    Abs,
    /// `v → v · f`, always producing a float.
    Scale(f64),
    /// `v → v − k`, always producing a float.
    Minus(f64),
    /// `v → v AND mask` on the integer view.
    Bitmask(u64),
    /// `v → v >> n`; arithmetic for signed values, logical for unsigned.
    Shift(u32),
    /// `v → max(lo, min(hi, v))`; in-range values pass through unchanged.
    Clamp { lo: f64, hi: f64 },
    /// Decode a bit-packed enable register: split the integer into 2-bit
    /// chunks (`mode` 0) or 1-bit chunks (`mode` 1) starting at the LSB and
    /// return the `index`-th chunk.
    HexEnableList { mode: u8, index: u8 },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Abs => "abs",
            Transform::Scale(_) => "scale",
            Transform::Minus(_) => "minus",
            Transform::Bitmask(_) => "bitmask",
            Transform::Shift(_) => "shift",
            Transform::Clamp { .. } => "clamp",
            Transform::HexEnableList { .. } => "hex_enable_list",
        }
    }

    /// Apply this transform to `value`.
    pub fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        match self {
            Transform::Abs => match value {
                Value::Int(v) => Ok(Value::Int(v.saturating_abs())),
                Value::UInt(v) => Ok(Value::UInt(*v)),
                Value::Float(v) => Ok(Value::Float(v.abs())),
                other => Err(self.bad_input(other, "not numeric")),
            },
            Transform::Scale(factor) => {
                let v = self.numeric(value)?;
                Ok(Value::Float(v * factor))
            }
            Transform::Minus(offset) => {
                let v = self.numeric(value)?;
                Ok(Value::Float(v - offset))
            }
            Transform::Bitmask(mask) => {
                let v = self.integer(value)?;
                Ok(Value::UInt((v as u64) & mask))
            }
            Transform::Shift(bits) => match value {
                Value::Int(v) => Ok(Value::Int(
                    v.checked_shr(*bits).unwrap_or(if *v < 0 { -1 } else { 0 }),
                )),
                Value::UInt(v) => Ok(Value::UInt(v.checked_shr(*bits).unwrap_or(0))),
                Value::Float(_) => {
                    let v = self.integer(value)?;
                    Ok(Value::Int(v.checked_shr(*bits).unwrap_or(0)))
                }
                other => Err(self.bad_input(other, "not an integer")),
            },
            Transform::Clamp { lo, hi } => {
                let v = self.numeric(value)?;
                if v < *lo {
                    Ok(Value::Float(*lo))
                } else if v > *hi {
                    Ok(Value::Float(*hi))
                } else {
                    Ok(value.clone())
                }
            }
            Transform::HexEnableList { mode, index } => {
                let width = if *mode == 0 { 2u32 } else { 1u32 };
                let v = self.integer(value)? as u64;
                let shift = u32::from(*index) * width;
                let chunk = v.checked_shr(shift).unwrap_or(0) & ((1u64 << width) - 1);
                Ok(Value::UInt(chunk))
            }
        }
    }

    fn numeric(&self, value: &Value) -> Result<f64, TransformError> {
        value
            .as_f64()
            .ok_or_else(|| self.bad_input(value, "not numeric"))
    }

    fn integer(&self, value: &Value) -> Result<i64, TransformError> {
        value
            .as_i64()
            .ok_or_else(|| self.bad_input(value, "not an integer"))
    }

    fn bad_input(&self, value: &Value, reason: &str) -> TransformError {
        TransformError::Apply {
            name: self.name(),
            input: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse the DSL form `name` or `name:arg1:arg2`.
impl FromStr for Transform {
    type Err = TransformError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut parts = spec.split(':');
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        let bad_args = || TransformError::BadArgs {
            name: name.to_string(),
            args: args.join(":"),
        };

        match (name, args.as_slice()) {
            ("abs", []) => Ok(Transform::Abs),
            ("scale", [f]) => f.parse().map(Transform::Scale).map_err(|_| bad_args()),
            ("minus", [k]) => k.parse().map(Transform::Minus).map_err(|_| bad_args()),
            ("bitmask", [mask]) => parse_mask(mask).map(Transform::Bitmask).ok_or_else(bad_args),
            ("shift", [n]) => n.parse().map(Transform::Shift).map_err(|_| bad_args()),
            ("clamp", [lo, hi]) => {
                let lo: f64 = lo.parse().map_err(|_| bad_args())?;
                let hi: f64 = hi.parse().map_err(|_| bad_args())?;
                if lo > hi {
                    return Err(bad_args());
                }
                Ok(Transform::Clamp { lo, hi })
            }
            ("hex_enable_list", [mode, index]) => {
                let mode: u8 = mode.parse().map_err(|_| bad_args())?;
                let index: u8 = index.parse().map_err(|_| bad_args())?;
                let width = if mode == 0 { 2 } else { 1 };
                if mode > 1 || u32::from(index) * width >= 64 {
                    return Err(bad_args());
                }
                Ok(Transform::HexEnableList { mode, index })
            }
            ("abs" | "scale" | "minus" | "bitmask" | "shift" | "clamp" | "hex_enable_list", _) => {
                Err(bad_args())
            }
            _ => Err(TransformError::Unknown(name.to_string())),
        }
    }
}

/// Accept `0x3FFF`-style hex and plain decimal masks.
fn parse_mask(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Abs => write!(f, "abs"),
            Transform::Scale(v) => write!(f, "scale:{v}"),
            Transform::Minus(v) => write!(f, "minus:{v}"),
            Transform::Bitmask(mask) => write!(f, "bitmask:0x{mask:X}"),
            Transform::Shift(n) => write!(f, "shift:{n}"),
            Transform::Clamp { lo, hi } => write!(f, "clamp:{lo}:{hi}"),
            Transform::HexEnableList { mode, index } => {
                write!(f, "hex_enable_list:{mode}:{index}")
            }
        }
    }
}

/// An ordered transform pipeline, applied left-to-right.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    steps: Vec<Transform>,
}

impl Pipeline {
    pub fn new(steps: Vec<Transform>) -> Self {
        Self { steps }
    }

    /// Compile a pipeline from DSL specs, failing fast on the first bad one.
    pub fn compile<I, S>(specs: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let steps = specs
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    /// Run the pipeline over `value`.
    pub fn apply(&self, value: Value) -> Result<Value, TransformError> {
        let mut acc = value;
        for step in &self.steps {
            acc = step.apply(&acc)?;
        }
        Ok(acc)
    }

    /// Canonical DSL rendering, used in conflict diagnostics.
    pub fn spec_string(&self) -> String {
        self.steps
            .iter()
            .map(Transform::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<Vec<Transform>> for Pipeline {
    fn from(steps: Vec<Transform>) -> Self {
        Pipeline::new(steps)
    }
}

impl<const N: usize> From<[Transform; N]> for Pipeline {
    fn from(steps: [Transform; N]) -> Self {
        Pipeline::new(steps.to_vec())
    }
}
