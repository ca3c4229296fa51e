//! Model execution
//!
//! [`DenseEngine`] is the reference engine: a bundle holds a `model.json`
//! with a weight matrix and a bias vector, and each input row `x` yields
//! `W·x + b`. Input bytes are a little-endian tensor of the model's input
//! type and shape.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{DataType, Model};
use crate::{RegistryError, RegistryResult};

/// File holding a dense model's parameters
pub const DENSE_MODEL_FILE: &str = "model.json";

/// Result of one model run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Output tensor name
    pub name: String,
    pub shape: Vec<i64>,
    /// Row-major output values
    pub values: Vec<f64>,
}

/// Runs a stored model against raw input bytes
#[cfg_attr(test, mockall::automock)]
pub trait InferenceEngine: Send + Sync {
    fn run(&self, model: &Model, input: &[u8]) -> RegistryResult<Prediction>;
}

#[derive(Debug, Deserialize)]
struct DenseLayer {
    /// One row per output
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl DenseLayer {
    fn load(dir: &Path) -> RegistryResult<Self> {
        let path = dir.join(DENSE_MODEL_FILE);
        let bytes = fs::read(&path)
            .map_err(|e| RegistryError::Inference(format!("reading {}: {}", path.display(), e)))?;
        let layer: DenseLayer = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Inference(format!("parsing {}: {}", path.display(), e)))?;

        let inputs = layer.weights.first().map(Vec::len).unwrap_or(0);
        if inputs == 0 || layer.weights.iter().any(|row| row.len() != inputs) {
            return Err(RegistryError::Inference("weights must be a non-empty rectangular matrix".to_string()));
        }
        if layer.bias.len() != layer.weights.len() {
            return Err(RegistryError::Inference(format!(
                "bias has {} entries for {} outputs",
                layer.bias.len(),
                layer.weights.len()
            )));
        }
        Ok(layer)
    }

    fn inputs(&self) -> usize {
        self.weights[0].len()
    }

    fn apply(&self, x: &[f64]) -> impl Iterator<Item = f64> + '_ {
        let x = x.to_vec();
        self.weights
            .iter()
            .zip(&self.bias)
            .map(move |(row, b)| row.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>() + b)
    }
}

/// Reference engine for single dense-layer models
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseEngine;

impl InferenceEngine for DenseEngine {
    fn run(&self, model: &Model, input: &[u8]) -> RegistryResult<Prediction> {
        let layer = DenseLayer::load(Path::new(&model.location))?;
        let values = decode_tensor(model.input.datatype, input)?;
        let shape = resolve_shape(&model.input.shape, values.len())?;

        let width = layer.inputs();
        if values.len() % width != 0 {
            return Err(RegistryError::MalformedInput(format!(
                "{} values do not form rows of {} features",
                values.len(),
                width
            )));
        }
        let rows = values.len() / width;
        let outputs = layer.weights.len();

        let mut result = Vec::with_capacity(rows * outputs);
        for row in values.chunks(width) {
            result.extend(layer.apply(row));
        }

        debug!(input_shape = ?shape, rows, outputs, "dense model {} evaluated", model.name);
        Ok(Prediction {
            name: model.output.name.clone(),
            shape: vec![rows as i64, outputs as i64],
            values: result,
        })
    }
}

/// Fill in a single `-1` dimension from the element count and check the total
pub fn resolve_shape(shape: &[i64], elements: usize) -> RegistryResult<Vec<i64>> {
    let known = shape
        .iter()
        .filter(|&&d| d != -1)
        .try_fold(1i64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| RegistryError::MalformedInput(format!("shape {:?} overflows the element count", shape)))?;
    let unknown = shape.iter().position(|&d| d == -1);
    let elements = elements as i64;

    let mut resolved = shape.to_vec();
    match unknown {
        Some(index) => {
            if known == 0 || elements % known != 0 {
                return Err(RegistryError::MalformedInput(format!(
                    "{} elements do not fit shape {:?}",
                    elements, shape
                )));
            }
            resolved[index] = elements / known;
        }
        None if known != elements => {
            return Err(RegistryError::MalformedInput(format!(
                "expected {} elements for shape {:?}, got {}",
                known, shape, elements
            )));
        }
        None => {}
    }
    Ok(resolved)
}

/// Decode little-endian elements of `datatype` as f64
pub fn decode_tensor(datatype: DataType, bytes: &[u8]) -> RegistryResult<Vec<f64>> {
    if datatype.is_complex() {
        return Err(RegistryError::UnsupportedDataType(format!(
            "{} inputs cannot be evaluated by a dense model",
            datatype
        )));
    }
    let size = datatype.size();
    if bytes.is_empty() || bytes.len() % size != 0 {
        return Err(RegistryError::MalformedInput(format!(
            "{} bytes is not a whole number of {} elements",
            bytes.len(),
            datatype
        )));
    }

    let values = bytes
        .chunks_exact(size)
        .map(|c| match datatype {
            DataType::Float => f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
            DataType::Double => f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
            DataType::Int8 => c[0] as i8 as f64,
            DataType::Uint8 => c[0] as f64,
            DataType::Bool => if c[0] != 0 { 1.0 } else { 0.0 },
            DataType::Int16 => i16::from_le_bytes([c[0], c[1]]) as f64,
            DataType::Uint16 => u16::from_le_bytes([c[0], c[1]]) as f64,
            DataType::Int32 => i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
            DataType::Uint32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
            DataType::Int64 => i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64,
            DataType::Uint64 => u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64,
            DataType::Half => half_to_f64(u16::from_le_bytes([c[0], c[1]])),
            // bfloat16 is the high half of an f32
            DataType::Bfloat16 => f32::from_bits((u16::from_le_bytes([c[0], c[1]]) as u32) << 16) as f64,
            DataType::Complex64 | DataType::Complex128 => f64::NAN,
        })
        .collect();
    Ok(values)
}

/// IEEE 754 binary16 to f64
fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let fraction = (bits & 0x03ff) as f64;

    match exponent {
        0 => sign * fraction * 2f64.powi(-24),
        0x1f if fraction == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        _ => sign * (1.0 + fraction / 1024.0) * 2f64.powi(exponent - 15),
    }
}
