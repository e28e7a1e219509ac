//! A transformation job read from one JSON document: the sheet, the
//! processor configuration and the values of the top-level parameters.

use crate::error::TransformError;
use serde::{Deserialize, Serialize};
use sluice_engine::{ProcessorConfig, TransformDef};
use sluice_types::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformJob {
    pub sheet: TransformDef,
    pub config: ProcessorConfig,
    /// Parameter values keyed by lexical QName.
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl TransformJob {
    pub fn from_json(json: &str) -> Result<Self, TransformError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &str) -> Result<Self, TransformError> {
        let json = std::fs::read_to_string(path).map_err(|source| TransformError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Parameter values converted to engine values. Only strings, numbers
    /// and booleans have an engine counterpart.
    pub fn parameter_values(&self) -> Result<Vec<(String, Value)>, TransformError> {
        self.parameters
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => Value::from(s.as_str()),
                    serde_json::Value::Bool(b) => Value::from(*b),
                    serde_json::Value::Number(n) => match n.as_f64() {
                        Some(n) => Value::from(n),
                        None => return Err(TransformError::Parameter(name.clone())),
                    },
                    _ => return Err(TransformError::Parameter(name.clone())),
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_reads_all_sections() {
        let job = TransformJob::from_json(
            r#"{
                "sheet": {"group": {"templates": [{"pattern": "/", "body": [{"kind": "text", "text": "x"}]}]}},
                "config": {"strict": true},
                "parameters": {"who": "world", "n": 2, "flag": true}
            }"#,
        )
        .unwrap();
        assert!(job.config.strict);
        assert_eq!(job.sheet.group.templates.len(), 1);
        let values = job.parameter_values().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].0, "flag");
    }

    #[test]
    fn structured_parameters_are_rejected() {
        let job = TransformJob::from_json(r#"{"parameters": {"list": [1, 2]}}"#).unwrap();
        assert!(matches!(job.parameter_values(), Err(TransformError::Parameter(name)) if name == "list"));
    }

    #[test]
    fn missing_job_file_reports_its_path() {
        let err = TransformJob::from_file("/nonexistent/job.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/job.json"));
    }
}
