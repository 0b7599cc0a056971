use crate::device::DeviceClass;

use tally_sync::ChangeAction;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

mod memory;

pub use memory::MemoryLocalStore;

/// A record as stored in either datastore: a flat JSON map keyed by its
/// `"id"` field.
pub type Row = Map<String, Value>;

#[derive(Error, Debug)]
pub enum LocalStoreError {
	#[error("row in table '{table}' is missing its id")]
	MissingId { table: String },
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// Per-table surface of the embedded datastore.
///
/// `put` has upsert semantics. Implementations are expected to be cheap to
/// call from the orchestrator's perspective; the engine never holds a call
/// across a network suspension point.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
	async fn get(&self, table: &str, id: &str) -> Result<Option<Row>, LocalStoreError>;
	async fn put(&self, table: &str, row: Row) -> Result<(), LocalStoreError>;
	async fn delete(&self, table: &str, id: &str) -> Result<(), LocalStoreError>;
	async fn bulk_add(&self, table: &str, rows: Vec<Row>) -> Result<(), LocalStoreError>;
	async fn clear(&self, table: &str) -> Result<(), LocalStoreError>;
	async fn count(&self, table: &str) -> Result<u64, LocalStoreError>;
	async fn to_array(&self, table: &str) -> Result<Vec<Row>, LocalStoreError>;
}

#[derive(Error, Debug)]
pub enum RemoteError {
	#[error("remote unreachable: {0}")]
	Unreachable(String),
	#[error("rejected by remote: {0}")]
	Rejected(String),
	#[error("credential rejected by remote")]
	Unauthorized,
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoreRecord {
	pub id: Uuid,
	pub owner_identity: String,
	pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeviceRecord {
	pub id: Uuid,
	pub store_id: Uuid,
	pub token: String,
	pub display_name: String,
	pub device_class: DeviceClass,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditEntry {
	pub store_id: Uuid,
	pub device_id: Uuid,
	pub table: String,
	pub record_id: String,
	pub action: ChangeAction,
	pub payload: Row,
	pub recorded_at: DateTime<Utc>,
}

/// Client surface of the cloud relational store.
///
/// Data-plane contract: `select_since` returns rows whose `store_id`
/// matches and whose `updated_at` is strictly greater than `after`, in
/// ascending `updated_at` order, at most `limit` rows. `upsert` is keyed on
/// the row's `id`; `delete` filters on both id and store. The audit log is
/// append-only.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
	async fn select_since(
		&self,
		table: &str,
		store_id: Uuid,
		after: DateTime<Utc>,
		limit: u32,
	) -> Result<Vec<Row>, RemoteError>;
	async fn upsert(&self, table: &str, row: Row) -> Result<(), RemoteError>;
	async fn delete(&self, table: &str, record_id: &str, store_id: Uuid)
		-> Result<(), RemoteError>;
	async fn append_audit(&self, entry: AuditEntry) -> Result<(), RemoteError>;

	async fn find_store_by_owner(
		&self,
		owner_identity: &str,
	) -> Result<Option<StoreRecord>, RemoteError>;
	async fn find_accepted_membership(
		&self,
		identity: &str,
	) -> Result<Option<StoreRecord>, RemoteError>;
	async fn create_store(&self, store: StoreRecord) -> Result<(), RemoteError>;

	async fn register_device(&self, device: DeviceRecord) -> Result<(), RemoteError>;
	async fn fetch_device(&self, device_id: Uuid) -> Result<Option<DeviceRecord>, RemoteError>;
	async fn deactivate_device(&self, device_id: Uuid) -> Result<(), RemoteError>;
	async fn touch_device(
		&self,
		device_id: Uuid,
		last_sync_at: DateTime<Utc>,
	) -> Result<(), RemoteError>;
}

pub(crate) fn row_id(table: &str, row: &Row) -> Result<String, LocalStoreError> {
	row.get("id")
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| LocalStoreError::MissingId {
			table: table.to_string(),
		})
}
