use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdError {
    #[error("Resource id '{0}' is not valid base64")]
    Encoding(String),

    #[error("Resource id must decode to '<database>.<name>', got '{0}'")]
    Format(String),
}

/// Terraform id of a user or role: base64 of `<database>.<name>`.
pub fn encode_id(database: &str, name: &str) -> String {
    STANDARD.encode(format!("{}.{}", database, name))
}

/// Split an id back into `(database, name)`.
///
/// Database names cannot contain dots, so the first dot separates the parts
/// and the name keeps any further dots.
pub fn decode_id(id: &str) -> Result<(String, String), IdError> {
    let bytes = STANDARD
        .decode(id.trim())
        .map_err(|_| IdError::Encoding(id.to_string()))?;
    let decoded = String::from_utf8(bytes).map_err(|_| IdError::Encoding(id.to_string()))?;

    match decoded.split_once('.') {
        Some((database, name)) if !database.is_empty() && !name.is_empty() => {
            Ok((database.to_string(), name.to_string()))
        }
        _ => Err(IdError::Format(decoded)),
    }
}
