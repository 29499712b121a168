// Engine Configuration
//
// Settings for the replay engine, loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::invariants::InvariantEngine;

/// What a batch says about entities it does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsencePolicy {
    /// Absence means nothing; the entity keeps its active version.
    #[default]
    Retain,

    /// Absence means the entity is gone; its active version is expired
    /// at the batch date and no successor is inserted.
    ExpireAbsent,
}

/// Replay engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub absence_policy: AbsencePolicy,

    /// Fixed attribute schema. When set, every record must carry exactly
    /// these attribute names.
    pub tracked_attributes: Option<Vec<String>>,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Invariants matching this configuration.
    pub fn invariants(&self) -> InvariantEngine {
        InvariantEngine::standard(self.absence_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.absence_policy, AbsencePolicy::Retain);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"
        {
          "absence_policy": "expire_absent",
          "tracked_attributes": ["name", "quantity"]
        }
        "#;

        let config = EngineConfig::from_json(json).unwrap();

        assert_eq!(config.absence_policy, AbsencePolicy::ExpireAbsent);
        assert_eq!(
            config.tracked_attributes,
            Some(vec!["name".to_string(), "quantity".to_string()])
        );
        assert_eq!(config.invariants().len(), 4);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(EngineConfig::from_json(r#"{ "absense_policy": "retain" }"#).is_err());
    }
}
