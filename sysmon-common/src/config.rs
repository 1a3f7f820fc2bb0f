use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::OperationKind;

/// Ordered cycle of operations driven by the FSM runner, loaded from a JSON
/// document of the form `{"states": ["open", "read", "write"]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmConfig {
    pub states: Vec<OperationKind>,
}

impl FsmConfig {
    /// Load the state cycle from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate the state cycle. Nothing is returned unless every
    /// entry is a recognised operation and there is at least one.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(content)?;
        let entries = match document.get("states") {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(ConfigError::NotAnArray),
            None => return Err(ConfigError::MissingStates),
        };
        if entries.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut states = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let name = entry.as_str().ok_or(ConfigError::NotAString { index })?;
            let op = name
                .parse::<OperationKind>()
                .map_err(|_| ConfigError::UnknownOperation {
                    index,
                    name: name.to_string(),
                })?;
            states.push(op);
        }
        Ok(Self { states })
    }

    /// `open -> read -> write (loops back)`
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self.states.iter().map(|op| op.name()).collect();
        format!("{} (loops back)", names.join(" -> "))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    MissingStates,
    NotAnArray,
    Empty,
    NotAString { index: usize },
    UnknownOperation { index: usize, name: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON parse error: {}", e),
            ConfigError::MissingStates => write!(f, "missing 'states' key"),
            ConfigError::NotAnArray => write!(f, "'states' must be an array"),
            ConfigError::Empty => write!(f, "FSM must have at least one state"),
            ConfigError::NotAString { index } => write!(f, "state {} is not a string", index),
            ConfigError::UnknownOperation { index, name } => {
                write!(f, "invalid syscall in state {}: {}", index, name)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_three_state_cycle() {
        let config = FsmConfig::parse(r#"{"states": ["open", "read", "write"]}"#).unwrap();
        assert_eq!(
            config.states,
            vec![OperationKind::Open, OperationKind::Read, OperationKind::Write]
        );
        assert_eq!(config.describe(), "open -> read -> write (loops back)");
    }

    #[test]
    fn rejects_unknown_operation() {
        let err = FsmConfig::parse(r#"{"states": ["open", "delete"]}"#).unwrap_err();
        match err {
            ConfigError::UnknownOperation { index, name } => {
                assert_eq!(index, 1);
                assert_eq!(name, "delete");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_cycle() {
        assert!(matches!(
            FsmConfig::parse(r#"{"states": []}"#),
            Err(ConfigError::Empty)
        ));
    }

    #[test]
    fn rejects_malformed_structure() {
        assert!(matches!(FsmConfig::parse("{not json"), Err(ConfigError::Json(_))));
        assert!(matches!(
            FsmConfig::parse(r#"{"states": "open"}"#),
            Err(ConfigError::NotAnArray)
        ));
        assert!(matches!(
            FsmConfig::parse(r#"{"cycle": ["open"]}"#),
            Err(ConfigError::MissingStates)
        ));
        assert!(matches!(
            FsmConfig::parse(r#"{"states": ["open", 3]}"#),
            Err(ConfigError::NotAString { index: 1 })
        ));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"states": ["write"]}}"#).unwrap();
        let config = FsmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.states, vec![OperationKind::Write]);

        let missing = file.path().with_extension("missing");
        assert!(matches!(FsmConfig::from_file(missing), Err(ConfigError::Io(_))));
    }
}
