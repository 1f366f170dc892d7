use std::fmt;

use serde::de::DeserializeOwned;

/// A deserialization failure with the JSON path at which it happened.
#[derive(Debug, Clone)]
pub struct PathError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at JSON path {} → {}", self.path, self.message)
    }
}

fn with_path<E: fmt::Display>(err: serde_path_to_error::Error<E>) -> PathError {
    PathError {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    }
}

/// Deserialize JSON text, reporting where in the document it went wrong.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, PathError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize(de).map_err(with_path)
}

/// Same as [`from_str_with_path`] for an already-decoded value.
pub fn from_value_with_path<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, PathError> {
    serde_path_to_error::deserialize(value).map_err(with_path)
}
