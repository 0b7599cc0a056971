//! Device identity.
//!
//! A device is registered once against the cloud store, receiving an
//! opaque credential token; identity and the sync checkpoint persist in a
//! versioned local config file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::RemoteError;

pub mod config;
pub mod registration;

use config::DeviceConfigError;

#[derive(
	Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
	#[default]
	Desktop,
	Mobile,
	Web,
}

impl DeviceClass {
	#[must_use]
	pub fn from_env() -> Self {
		#[cfg(any(target_os = "ios", target_os = "android"))]
		return Self::Mobile;

		#[cfg(target_arch = "wasm32")]
		return Self::Web;

		#[cfg(not(any(target_os = "ios", target_os = "android", target_arch = "wasm32")))]
		Self::Desktop
	}
}

/// Lifecycle of this device's registration against the cloud store.
///
/// `NotConfigured` means no remote is wired up at all; `Error` requires
/// re-registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationState {
	NotConfigured,
	NotRegistered,
	Registering,
	Registered,
	Error,
}

#[derive(Error, Debug)]
pub enum RegistrationError {
	#[error("no remote store is configured")]
	NoRemote,
	#[error("device is not registered")]
	NotRegistered,
	#[error("device is not known to the remote store")]
	UnknownDevice,
	#[error("device was deactivated remotely")]
	Deactivated,
	#[error("credential token does not match the remote registration")]
	TokenMismatch,
	#[error(transparent)]
	Remote(#[from] RemoteError),
	#[error(transparent)]
	Config(#[from] DeviceConfigError),
}
