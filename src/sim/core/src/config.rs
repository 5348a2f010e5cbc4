use serde::Deserialize;
use thiserror::Error;

use crate::event::SimTime;

// === RuntimeConfig === //

/// Tunables for a [`Sim`](crate::sim::Sim) instance. Every section and key is optional in the TOML
/// source; missing values fall back to [`Default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	pub dictionaries: DictionaryConfig,
	pub scheduler: SchedulerConfig,
	pub objects: ObjectConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DictionaryConfig {
	/// Bucket count of the ID dictionary. Fixed for the lifetime of the runtime.
	pub id_table_size: usize,

	/// Initial bucket count of the global name dictionary.
	pub name_table_size: usize,

	/// Initial bucket count of each group's private name dictionary.
	pub group_name_table_size: usize,
}

impl Default for DictionaryConfig {
	fn default() -> Self {
		Self {
			id_table_size: 4096,
			name_table_size: 29,
			group_name_table_size: 29,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
	pub start_time: SimTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectConfig {
	/// Whether group name dictionaries log a warning when a name is inserted twice.
	pub warn_on_duplicate_names: bool,
}

impl Default for ObjectConfig {
	fn default() -> Self {
		Self {
			warn_on_duplicate_names: true,
		}
	}
}

impl RuntimeConfig {
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config = toml::from_str::<Self>(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let dicts = &self.dictionaries;

		if !dicts.id_table_size.is_power_of_two() {
			return Err(ConfigError::IdTableSize(dicts.id_table_size));
		}

		if dicts.name_table_size == 0 || dicts.group_name_table_size == 0 {
			return Err(ConfigError::NameTableSize);
		}

		Ok(())
	}
}

// === Error types === //

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to parse runtime config")]
	Parse(#[from] toml::de::Error),
	#[error("id table size {0} is not a power of two")]
	IdTableSize(usize),
	#[error("name table sizes must be non-zero")]
	NameTableSize,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn partial_config_uses_defaults() {
		let config = RuntimeConfig::from_toml_str(
			r#"
			[dictionaries]
			id_table_size = 256

			[scheduler]
			start_time = 1000
			"#,
		)
		.unwrap();

		assert_eq!(config.dictionaries.id_table_size, 256);
		assert_eq!(config.dictionaries.name_table_size, 29);
		assert_eq!(config.scheduler.start_time, 1000);
		assert!(config.objects.warn_on_duplicate_names);
	}

	#[test]
	fn rejects_bad_table_sizes() {
		assert!(matches!(
			RuntimeConfig::from_toml_str("[dictionaries]\nid_table_size = 100"),
			Err(ConfigError::IdTableSize(100))
		));
		assert!(matches!(
			RuntimeConfig::from_toml_str("[dictionaries]\nname_table_size = 0"),
			Err(ConfigError::NameTableSize)
		));
		assert!(matches!(
			RuntimeConfig::from_toml_str("[bogus]"),
			Err(ConfigError::Parse(_))
		));
	}
}
