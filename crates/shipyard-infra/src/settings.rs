//! Settings resolver backed by the `[settings]` table of `shipyard.toml`.

use std::collections::BTreeMap;

use shipyard_core::collaborator::{CollaboratorError, SettingsResolver};
use shipyard_types::config::ShipyardConfig;

#[derive(Debug, Clone, Default)]
pub struct StaticSettingsResolver {
    settings: BTreeMap<String, serde_json::Value>,
}

impl StaticSettingsResolver {
    pub fn new(settings: BTreeMap<String, serde_json::Value>) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &ShipyardConfig) -> Self {
        Self::new(config.settings.clone())
    }

    pub fn with_setting(mut self, id: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(id.into(), value);
        self
    }
}

impl SettingsResolver for StaticSettingsResolver {
    fn get(&self, setting_id: &str) -> Result<serde_json::Value, CollaboratorError> {
        self.settings
            .get(setting_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::ConfigurationNotFound(setting_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_known_settings_only() {
        let resolver =
            StaticSettingsResolver::default().with_setting("aws-prod", json!({ "region": "us-east-1" }));
        assert_eq!(resolver.get("aws-prod").unwrap()["region"], "us-east-1");

        let err = resolver.get("gcp-prod").unwrap_err();
        assert_eq!(err.to_string(), "configuration not found: gcp-prod");
    }

    #[test]
    fn built_from_config_settings() {
        let config: ShipyardConfig = toml::from_str(
            r#"
[settings.aws-stage]
region = "eu-central-1"
role = "deployer"
"#,
        )
        .unwrap();
        let resolver = StaticSettingsResolver::from_config(&config);
        assert_eq!(resolver.get("aws-stage").unwrap()["role"], "deployer");
    }
}
