use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BackendError;

/// Named constructor arguments for a backend factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendArgs(Map<String, Value>);

impl BackendArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Fetch a required argument, naming it in the error when absent or mistyped.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, BackendError> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| BackendError::MissingArgument(name.to_string()))?;
        decode(name, value)
    }

    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, BackendError> {
        match self.0.get(name) {
            Some(value) => decode(name, value),
            None => Ok(default),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, BackendError> {
        self.0.get(name).map(|v| decode(name, v)).transpose()
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, BackendError> {
    T::deserialize(value).map_err(|e| BackendError::InvalidArgument {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl From<Map<String, Value>> for BackendArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reports_missing_name() {
        let args = BackendArgs::new().with("min_area", 10);
        let err = args.require::<String>("class_label").unwrap_err();
        assert!(matches!(err, BackendError::MissingArgument(ref n) if n == "class_label"));
        assert!(err.to_string().contains("class_label"));
    }

    #[test]
    fn test_mistyped_argument() {
        let args = BackendArgs::new().with("min_area", "lots");
        assert!(matches!(
            args.require::<u32>("min_area"),
            Err(BackendError::InvalidArgument { ref name, .. }) if name == "min_area"
        ));
    }

    #[test]
    fn test_defaults_and_optionals() {
        let args = BackendArgs::new().with("min_red", 200);
        assert_eq!(args.get_or::<u8>("min_red", 150).unwrap(), 200);
        assert_eq!(args.get_or::<u8>("max_blue", 100).unwrap(), 100);
        assert_eq!(args.get::<u16>("max_depth_mm").unwrap(), None);
    }
}
