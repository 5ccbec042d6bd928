use serde::de::DeserializeOwned;

use crate::error::CollaboratorError;

/// Deserialize a collaborator payload with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(what: &'static str, src: &str) -> Result<T, CollaboratorError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| decode_error(what, err))
}

pub fn from_slice_with_path<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, CollaboratorError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| decode_error(what, err))
}

fn decode_error(what: &'static str, err: serde_path_to_error::Error<serde_json::Error>) -> CollaboratorError {
    let path = err.path().to_string();
    CollaboratorError::Decode { what, reason: format!("at JSON path {path} → {}", err.into_inner()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Row {
        #[allow(dead_code)]
        limits: Limits,
    }

    #[derive(Debug, Deserialize)]
    struct Limits {
        #[allow(dead_code)]
        cpu: String,
    }

    #[test]
    fn error_names_the_failing_path() {
        let err = from_str_with_path::<Row>("presets", r#"{"limits": {"cpu": 4}}"#).unwrap_err();
        match err {
            CollaboratorError::Decode { what, reason } => {
                assert_eq!(what, "presets");
                assert!(reason.contains("limits.cpu"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
