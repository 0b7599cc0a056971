use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
	device::config::DeviceConfigError,
	ledger::LedgerError,
	store::{LocalStoreError, RemoteError},
};

mod actor;
pub mod manager;
pub mod pull;
pub mod push;

pub use pull::{PullReport, TablePullError};
pub use push::{PushReport, RecordPushError};

/// Identity threaded through every push/pull call, so multiple devices can
/// be simulated inside one process.
#[derive(Clone, Debug)]
pub struct SyncContext {
	pub device_id: Uuid,
	pub store_id: Uuid,
	pub token: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SyncPhase {
	NotConfigured,
	Offline,
	Connecting,
	Syncing,
	Synced,
	Error,
}

/// Read-only snapshot consumed by the UI layer, published on a watch
/// channel on every transition.
#[derive(Clone, Debug, Serialize)]
pub struct SyncStatus {
	pub phase: SyncPhase,
	pub is_online: bool,
	pub pending_count: u64,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
	pub consecutive_failures: u32,
}

impl Default for SyncStatus {
	fn default() -> Self {
		Self {
			phase: SyncPhase::Offline,
			is_online: true,
			pending_count: 0,
			last_synced_at: None,
			last_error: None,
			consecutive_failures: 0,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
	NotConfigured,
	Offline,
	NotRegistered,
	AlreadySyncing,
}

/// Result of one push-then-pull cycle. Partial success (some records moved,
/// some collected into `errors`) is still a success.
#[derive(Debug, Default)]
pub struct SyncOutcome {
	pub success: bool,
	pub skipped: Option<SkipReason>,
	pub pushed: usize,
	pub pulled: usize,
	pub errors: Vec<String>,
}

impl SyncOutcome {
	pub(crate) fn skipped(reason: SkipReason) -> Self {
		Self {
			skipped: Some(reason),
			..Default::default()
		}
	}
}

/// Fatal cycle errors. Anything caught at record or table granularity is
/// reported through the cycle's error list instead.
#[derive(Error, Debug)]
pub enum SyncError {
	#[error(transparent)]
	Ledger(#[from] LedgerError),
	#[error(transparent)]
	Local(#[from] LocalStoreError),
	#[error(transparent)]
	Remote(#[from] RemoteError),
	#[error(transparent)]
	Config(#[from] DeviceConfigError),
}
