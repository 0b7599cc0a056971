use std::{any::type_name, fmt::Display, future::Future, marker::PhantomData, path::Path};

use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::{fs, io};
use tracing::info;

use tally_utils::error::FileIOError;

#[derive(Error, Debug)]
pub enum VersionManagerError {
	#[error("config file does not exist")]
	ConfigFileDoesNotExist,
	#[error("error while converting integer to version enum")]
	IntConversion,
	#[error("config file was written by a newer build: version {current}")]
	NewerThanLatest { current: u64 },
	#[error("unexpected migration: {current_version} -> {next_version}")]
	UnexpectedMigration {
		current_version: u64,
		next_version: u64,
	},
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("serialization error: {0}")]
	SerdeJson(#[from] serde_json::Error),
}

pub trait Version: Display + Copy + TryFrom<u64> + Into<u64> + 'static {}

impl<T: Display + Copy + TryFrom<u64> + Into<u64> + 'static> Version for T {}

/// A JSON config file that carries its own version number and is migrated
/// version by version on load.
///
/// Files predating the version field are treated as the zero version.
pub trait ManagedVersion<V: Version>: Serialize + DeserializeOwned + 'static {
	const LATEST_VERSION: V;
	/// Name of the JSON field holding the version number.
	const VERSION_FIELD: &'static str;

	type MigrationError: std::error::Error + Display + From<VersionManagerError> + 'static;

	/// Fresh config to write when no file exists yet.
	fn from_latest_version() -> Option<Self> {
		None
	}
}

pub struct VersionManager<T, V> {
	_marker: PhantomData<(T, V)>,
}

impl<T: ManagedVersion<V>, V: Version> VersionManager<T, V> {
	/// Loads `path`, running every pending `(current, next)` migration in
	/// order first. `migrate_fn` edits the file in place; the version field
	/// is stamped afterwards.
	pub async fn migrate_and_load<Fut>(
		path: impl AsRef<Path>,
		migrate_fn: impl Fn(V, V) -> Fut,
	) -> Result<T, T::MigrationError>
	where
		Fut: Future<Output = Result<(), T::MigrationError>>,
	{
		let path = path.as_ref();

		match fs::read(path).await {
			Ok(bytes) => Self::migrate(path, &bytes, migrate_fn).await,

			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				if let Some(config) = T::from_latest_version() {
					Self::save(path, &config)
						.await
						.map_err(T::MigrationError::from)?;

					return Ok(config);
				}

				Err(VersionManagerError::ConfigFileDoesNotExist.into())
			}

			Err(e) => Err(VersionManagerError::FileIO(FileIOError::from((path, e))).into()),
		}
	}

	pub async fn save(path: impl AsRef<Path>, config: &T) -> Result<(), VersionManagerError> {
		let path = path.as_ref();

		fs::write(
			path,
			serde_json::to_vec_pretty(config).map_err(VersionManagerError::SerdeJson)?,
		)
		.await
		.map_err(|e| FileIOError::from((path, e, "Failed to write config file")).into())
	}

	async fn migrate<Fut>(
		path: &Path,
		bytes: &[u8],
		migrate_fn: impl Fn(V, V) -> Fut,
	) -> Result<T, T::MigrationError>
	where
		Fut: Future<Output = Result<(), T::MigrationError>>,
	{
		let config: Map<String, Value> =
			serde_json::from_slice(bytes).map_err(VersionManagerError::SerdeJson)?;

		let current = config
			.get(T::VERSION_FIELD)
			.and_then(Value::as_u64)
			.unwrap_or(0);
		let latest: u64 = T::LATEST_VERSION.into();

		if current > latest {
			return Err(VersionManagerError::NewerThanLatest { current }.into());
		}

		for (current, next) in (current..=latest).tuple_windows() {
			let (Ok(current), Ok(next)) = (V::try_from(current), V::try_from(next)) else {
				return Err(VersionManagerError::IntConversion.into());
			};

			info!("Running {} migrator: {current} -> {next}", type_name::<T>());

			migrate_fn(current, next).await?;
		}

		// Re-read after the migrators edited the file, then stamp the
		// version field they are not responsible for.
		let bytes = fs::read(path)
			.await
			.map_err(|e| VersionManagerError::FileIO(FileIOError::from((path, e))))?;

		let mut config: Map<String, Value> =
			serde_json::from_slice(&bytes).map_err(VersionManagerError::SerdeJson)?;

		config.insert(T::VERSION_FIELD.to_string(), json!(latest));

		fs::write(
			path,
			serde_json::to_vec_pretty(&config).map_err(VersionManagerError::SerdeJson)?,
		)
		.await
		.map_err(|e| VersionManagerError::FileIO(FileIOError::from((path, e))))?;

		serde_json::from_value(Value::Object(config))
			.map_err(|e| VersionManagerError::SerdeJson(e).into())
	}
}
