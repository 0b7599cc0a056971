use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A mutation captured from a synchronized table, queued for upload.
///
/// The payload is a full snapshot of the record at capture time, in local
/// field naming. Multiple changes to the same record are each kept and
/// pushed independently; the remote's upsert semantics make them converge.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct PendingChange {
	pub id: Uuid,
	pub table: String,
	pub record_id: String,
	pub action: ChangeAction,
	pub payload: Map<String, Value>,
	pub captured_at: DateTime<Utc>,
	/// Capture order within a device, disambiguating same-millisecond changes.
	pub seq: u64,
	#[serde(default)]
	pub synced: bool,
}

impl Debug for PendingChange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingChange")
			.field("id", &self.id.to_string())
			.field("table", &self.table)
			.field("record_id", &self.record_id)
			.field("action", &self.action)
			.field("seq", &self.seq)
			.finish()
	}
}

#[derive(
	Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeAction {
	Insert,
	Update,
	Delete,
}
