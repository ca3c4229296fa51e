//! Model records and tensor descriptions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{RegistryError, RegistryResult};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    Complex64,
    Complex128,
    Half,
    Bfloat16,
}

impl DataType {
    /// Every supported type, in declaration order
    pub const ALL: [DataType; 15] = [
        DataType::Float,
        DataType::Double,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::Uint8,
        DataType::Uint16,
        DataType::Uint32,
        DataType::Uint64,
        DataType::Bool,
        DataType::Complex64,
        DataType::Complex128,
        DataType::Half,
        DataType::Bfloat16,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Bool => "bool",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
            DataType::Half => "half",
            DataType::Bfloat16 => "bfloat16",
        }
    }

    /// Bytes per element in the little-endian wire encoding
    pub fn size(&self) -> usize {
        match self {
            DataType::Int8 | DataType::Uint8 | DataType::Bool => 1,
            DataType::Int16 | DataType::Uint16 | DataType::Half | DataType::Bfloat16 => 2,
            DataType::Float | DataType::Int32 | DataType::Uint32 => 4,
            DataType::Double | DataType::Int64 | DataType::Uint64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataType::Complex64 | DataType::Complex128)
    }
}

impl FromStr for DataType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "complex" is an alias of complex64
        if s == "complex" {
            return Ok(DataType::Complex64);
        }
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| RegistryError::UnsupportedDataType(s.to_string()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named model input or output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Operation name in the model graph
    pub name: String,
    pub datatype: DataType,
    /// Dimensions; at most one may be -1
    pub shape: Vec<i64>,
    /// Output index of the operation
    pub idx: i32,
}

impl TensorSpec {
    /// Build a spec from the string arguments clients send
    pub fn parse(name: &str, datatype: &str, shape: &str, idx: &str) -> RegistryResult<Self> {
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument("tensor name cannot be empty".to_string()));
        }
        let idx = idx
            .trim()
            .parse::<i32>()
            .map_err(|e| RegistryError::InvalidArgument(format!("tensor index {:?}: {}", idx, e)))?;
        if idx < 0 {
            return Err(RegistryError::InvalidArgument(format!("tensor index {} is negative", idx)));
        }

        Ok(Self {
            name: name.to_string(),
            datatype: datatype.parse()?,
            shape: parse_shape(shape)?,
            idx,
        })
    }
}

/// Largest number of elements a shape's known dimensions may describe
pub const MAX_TENSOR_ELEMENTS: i64 = 1 << 32;

/// Parse a comma separated shape such as `"1,4"` or `"-1,28,28"`
pub fn parse_shape(shape: &str) -> RegistryResult<Vec<i64>> {
    let dims = shape
        .split(',')
        .map(|dim| {
            dim.trim()
                .parse::<i64>()
                .map_err(|e| RegistryError::InvalidArgument(format!("shape {:?}: {}", shape, e)))
        })
        .collect::<RegistryResult<Vec<i64>>>()?;

    if dims.iter().any(|&d| d < -1) {
        return Err(RegistryError::InvalidArgument(format!("shape {:?} has a negative dimension", shape)));
    }
    if dims.iter().filter(|&&d| d == -1).count() > 1 {
        return Err(RegistryError::InvalidArgument(format!("shape {:?} has more than one unknown dimension", shape)));
    }
    let elements = dims.iter().filter(|&&d| d != -1).fold(1i64, |acc, &d| acc.saturating_mul(d));
    if elements > MAX_TENSOR_ELEMENTS {
        return Err(RegistryError::InvalidArgument(format!(
            "shape {:?} describes more than {} elements",
            shape, MAX_TENSOR_ELEMENTS
        )));
    }
    Ok(dims)
}

/// A stored model, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Content identifier the bundle was fetched by
    pub id: String,
    pub name: String,
    /// Hex SHA-256 of the unpacked bundle
    pub hash: String,
    /// Directory the bundle was unpacked into
    pub location: String,
    pub input: TensorSpec,
    pub output: TensorSpec,
    pub creator: String,
    pub allowed_users: Vec<String>,
    /// Transaction that paid for and stored the upload
    #[serde(default)]
    pub upload_tx: String,
}

impl Model {
    /// Whether `user` may run this model
    pub fn is_allowed(&self, user: &str) -> bool {
        self.allowed_users.iter().any(|id| id == user)
    }

    /// Grant `user` access; fails if it already has it
    pub fn authorize(&mut self, user: &str) -> RegistryResult<()> {
        if self.is_allowed(user) {
            return Err(RegistryError::AlreadyAuthorized(user.to_string()));
        }
        self.allowed_users.push(user.to_string());
        Ok(())
    }

    /// The public projection of this record
    pub fn view(&self) -> ModelView {
        ModelView {
            name: self.name.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }
}

/// What readers learn about a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelView {
    pub name: String,
    pub input: TensorSpec,
    pub output: TensorSpec,
}

/// Payload of the `ModelUse` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUse {
    pub creator: String,
    pub model: String,
    pub hash: String,
    pub price: i64,
    pub user: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_names() {
        assert_eq!("complex".parse::<DataType>().unwrap(), DataType::Complex64);
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
            assert_eq!(serde_json::to_value(dt).unwrap(), dt.as_str());
        }
        assert!(matches!(
            "float16".parse::<DataType>(),
            Err(RegistryError::UnsupportedDataType(_))
        ));
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("1,4").unwrap(), vec![1, 4]);
        assert_eq!(parse_shape(" -1, 3 ").unwrap(), vec![-1, 3]);
        assert!(parse_shape("1,,4").is_err());
        assert!(parse_shape("-1,-1").is_err());
        assert!(parse_shape("2,-3").is_err());
        assert!(parse_shape("").is_err());
    }

    #[test]
    fn test_parse_shape_bounds_element_count() {
        assert_eq!(parse_shape("-1,65536,65536").unwrap(), vec![-1, 65536, 65536]);
        assert!(parse_shape("65536,65536,2").is_err());
        assert!(parse_shape("9223372036854775807,2").is_err());
        assert!(TensorSpec::parse("x", "float", "9223372036854775807,2", "0").is_err());
        assert_eq!(parse_shape("9223372036854775807,0").unwrap(), vec![i64::MAX, 0]);
    }

    #[test]
    fn test_tensor_spec_parse() {
        let spec = TensorSpec::parse("serving_default_x", "float", "1,4", "0").unwrap();
        assert_eq!(spec.datatype, DataType::Float);
        assert_eq!(spec.shape, vec![1, 4]);

        assert!(TensorSpec::parse("x", "float", "1,4", "first").is_err());
        assert!(TensorSpec::parse("x", "string", "1,4", "0").is_err());
        assert!(TensorSpec::parse("", "float", "1,4", "0").is_err());
    }

    #[test]
    fn test_authorize_is_not_idempotent() {
        let spec = TensorSpec::parse("x", "float", "1", "0").unwrap();
        let mut model = Model {
            id: "cid".to_string(),
            name: "m1".to_string(),
            hash: String::new(),
            location: String::new(),
            input: spec.clone(),
            output: spec,
            creator: "alice".to_string(),
            allowed_users: vec!["alice".to_string()],
            upload_tx: "tx-1".to_string(),
        };

        model.authorize("bob").unwrap();
        assert!(model.is_allowed("bob"));
        assert!(matches!(model.authorize("bob"), Err(RegistryError::AlreadyAuthorized(_))));
        assert_eq!(model.allowed_users.len(), 2);

        let view = serde_json::to_value(model.view()).unwrap();
        assert!(view.get("hash").is_none());
        assert!(view.get("allowed_users").is_none());
        assert!(view.get("upload_tx").is_none());
    }
}
