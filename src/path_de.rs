use serde::de::DeserializeOwned;

use crate::error::ErrorKind;

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, ErrorKind> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        ErrorKind::Definition(format!("at JSON path {path} → {}", err.into_inner()))
    })
}

/// Same, for an already-parsed document.
pub fn from_value_with_path<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ErrorKind> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        ErrorKind::Definition(format!("at JSON path {path} → {}", err.into_inner()))
    })
}
