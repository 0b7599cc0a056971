use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use int_enum::IntEnum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use tally_utils::error::FileIOError;

use crate::util::version_manager::{ManagedVersion, VersionManager, VersionManagerError};

use super::DeviceClass;

/// DEVICE_STATE_CONFIG_NAME is the name of the file which stores the DeviceConfig
pub const DEVICE_STATE_CONFIG_NAME: &str = "device_state.tallyconfig";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeviceCredentials {
	pub device_id: Uuid,
	pub store_id: Uuid,
	/// The sole bearer secret for this device.
	pub token: String,
	pub display_name: String,
	pub device_class: DeviceClass,
}

/// Identity and sync watermark for this device, stored as a JSON file on
/// disk next to the embedded datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
	/// Set once registration succeeds, cleared on disconnect.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credentials: Option<DeviceCredentials>,
	/// Remote changes with `updated_at` up to this instant are already
	/// applied locally. Never regresses.
	#[serde(default)]
	pub checkpoint: Option<DateTime<Utc>>,
	#[serde(default)]
	pub last_synced_at: Option<DateTime<Utc>>,
	version: DeviceConfigVersion,
}

impl Default for DeviceConfig {
	fn default() -> Self {
		Self {
			credentials: None,
			checkpoint: None,
			last_synced_at: None,
			version: Self::LATEST_VERSION,
		}
	}
}

#[derive(
	IntEnum, Debug, Clone, Copy, Eq, PartialEq, strum::Display, Serialize_repr, Deserialize_repr,
)]
#[repr(u64)]
pub enum DeviceConfigVersion {
	/// Pre-versioning: flat `device_id`/`store_id`/`token` keys.
	V0 = 0,
	/// Credentials nested under one key.
	V1 = 1,
	/// Millisecond `last_synced_timestamp` replaced by an RFC 3339
	/// `checkpoint`.
	V2 = 2,
}

#[derive(Error, Debug)]
pub enum DeviceConfigError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	VersionManager(#[from] VersionManagerError),
	#[error("serialization error: {0}")]
	SerdeJson(#[from] serde_json::Error),
}

impl ManagedVersion<DeviceConfigVersion> for DeviceConfig {
	const LATEST_VERSION: DeviceConfigVersion = DeviceConfigVersion::V2;
	const VERSION_FIELD: &'static str = "version";

	type MigrationError = DeviceConfigError;

	fn from_latest_version() -> Option<Self> {
		Some(Self::default())
	}
}

impl DeviceConfig {
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, DeviceConfigError> {
		let path = path.as_ref();

		VersionManager::<Self, DeviceConfigVersion>::migrate_and_load(
			path,
			|current, next| async move {
				match (current, next) {
					(DeviceConfigVersion::V0, DeviceConfigVersion::V1) => {
						let mut config: Map<String, Value> =
							serde_json::from_slice(&fs::read(path).await.map_err(|e| {
								FileIOError::from((
									path,
									e,
									"Failed to read device config file for migration",
								))
							})?)
							.map_err(VersionManagerError::SerdeJson)?;

						let credentials = ["device_id", "store_id", "token"]
							.into_iter()
							.map(|key| (key, config.remove(key)))
							.collect::<Vec<_>>();

						// Only nest when the flat keys were actually there;
						// an unregistered V0 file stays unregistered.
						if credentials.iter().all(|(_, value)| value.is_some()) {
							let mut nested = Map::new();

							for (key, value) in credentials {
								nested.insert(
									key.to_string(),
									value.expect("checked above"),
								);
							}

							nested.insert(
								String::from("display_name"),
								config
									.remove("device_name")
									.unwrap_or_else(|| json!("Unknown Device")),
							);
							nested.insert(
								String::from("device_class"),
								config
									.remove("device_class")
									.unwrap_or_else(|| json!(DeviceClass::default())),
							);

							config.insert(String::from("credentials"), Value::Object(nested));
						} else {
							config.remove("device_name");
							config.remove("device_class");
						}

						fs::write(
							path,
							serde_json::to_vec(&config).map_err(VersionManagerError::SerdeJson)?,
						)
						.await
						.map_err(|e| FileIOError::from((path, e)))?;
					}

					(DeviceConfigVersion::V1, DeviceConfigVersion::V2) => {
						let mut config: Map<String, Value> =
							serde_json::from_slice(&fs::read(path).await.map_err(|e| {
								FileIOError::from((
									path,
									e,
									"Failed to read device config file for migration",
								))
							})?)
							.map_err(VersionManagerError::SerdeJson)?;

						let checkpoint = config
							.remove("last_synced_timestamp")
							.and_then(|value| value.as_i64())
							.and_then(|millis| Utc.timestamp_millis_opt(millis).single());

						config.insert(String::from("checkpoint"), json!(checkpoint));

						fs::write(
							path,
							serde_json::to_vec(&config).map_err(VersionManagerError::SerdeJson)?,
						)
						.await
						.map_err(|e| FileIOError::from((path, e)))?;
					}

					_ => {
						return Err(VersionManagerError::UnexpectedMigration {
							current_version: current.into(),
							next_version: next.into(),
						}
						.into())
					}
				}

				Ok(())
			},
		)
		.await
	}

	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), DeviceConfigError> {
		VersionManager::<Self, DeviceConfigVersion>::save(path, self)
			.await
			.map_err(Into::into)
	}

	#[must_use]
	pub fn is_registered(&self) -> bool {
		self.credentials.is_some()
	}
}
