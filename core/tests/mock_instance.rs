use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use tally_core::{
	AuditEntry, DeviceRecord, MemoryLocalStore, OwnerIdentity, RemoteError, RemoteStore, Row,
	StoreRecord, SyncManager, SyncStatus,
};

/// Shared in-memory rendition of the cloud relational store, with failure
/// injection and per-endpoint call counters.
#[derive(Default)]
pub struct MockRemote {
	data: Mutex<RemoteData>,
	latency_ms: AtomicU64,
	pub select_calls: AtomicU64,
	pub upsert_calls: AtomicU64,
	pub delete_calls: AtomicU64,
	pub audit_calls: AtomicU64,
}

#[derive(Default)]
struct RemoteData {
	tables: HashMap<String, BTreeMap<String, Row>>,
	stores: Vec<StoreRecord>,
	devices: HashMap<Uuid, DeviceRecord>,
	// (identity, store) pairs with an accepted team invitation
	memberships: Vec<(String, Uuid)>,
	audit: Vec<AuditEntry>,
	failing_upserts: HashSet<(String, String)>,
	failing_tables: HashSet<String>,
}

impl MockRemote {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn set_latency(&self, latency: Duration) {
		self.latency_ms
			.store(latency.as_millis() as u64, Ordering::Release);
	}

	pub fn data_plane_calls(&self) -> u64 {
		self.select_calls.load(Ordering::Acquire)
			+ self.upsert_calls.load(Ordering::Acquire)
			+ self.delete_calls.load(Ordering::Acquire)
			+ self.audit_calls.load(Ordering::Acquire)
	}

	pub async fn seed_store(&self, owner_identity: &str, name: &str) -> Uuid {
		let store = StoreRecord {
			id: Uuid::now_v7(),
			owner_identity: owner_identity.to_string(),
			name: name.to_string(),
		};

		let id = store.id;
		self.data.lock().await.stores.push(store);

		id
	}

	pub async fn seed_accepted_invite(&self, identity: &str, store_id: Uuid) {
		self.data
			.lock()
			.await
			.memberships
			.push((identity.to_string(), store_id));
	}

	pub async fn seed_row(
		&self,
		table: &str,
		store_id: Uuid,
		id: &str,
		fields: Value,
		updated_at: DateTime<Utc>,
	) {
		let Value::Object(mut row) = fields else {
			panic!("seed_row expects an object");
		};

		row.insert(String::from("id"), json!(id));
		row.insert(String::from("store_id"), json!(store_id));
		row.insert(
			String::from("updated_at"),
			json!(updated_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
		);

		self.data
			.lock()
			.await
			.tables
			.entry(table.to_string())
			.or_default()
			.insert(id.to_string(), row);
	}

	pub async fn fail_upsert(&self, table: &str, record_id: &str) {
		self.data
			.lock()
			.await
			.failing_upserts
			.insert((table.to_string(), record_id.to_string()));
	}

	pub async fn fail_table(&self, table: &str) {
		self.data
			.lock()
			.await
			.failing_tables
			.insert(table.to_string());
	}

	pub async fn clear_failures(&self) {
		let mut data = self.data.lock().await;

		data.failing_upserts.clear();
		data.failing_tables.clear();
	}

	pub async fn rows(&self, table: &str) -> Vec<Row> {
		self.data
			.lock()
			.await
			.tables
			.get(table)
			.map(|rows| rows.values().cloned().collect())
			.unwrap_or_default()
	}

	pub async fn row(&self, table: &str, id: &str) -> Option<Row> {
		self.data
			.lock()
			.await
			.tables
			.get(table)
			.and_then(|rows| rows.get(id))
			.cloned()
	}

	pub async fn stores(&self) -> Vec<StoreRecord> {
		self.data.lock().await.stores.clone()
	}

	pub async fn device(&self, device_id: Uuid) -> Option<DeviceRecord> {
		self.data.lock().await.devices.get(&device_id).cloned()
	}

	pub async fn set_device_active(&self, device_id: Uuid, active: bool) {
		if let Some(device) = self.data.lock().await.devices.get_mut(&device_id) {
			device.active = active;
		}
	}

	pub async fn audit_entries(&self) -> Vec<AuditEntry> {
		self.data.lock().await.audit.clone()
	}

	async fn simulate_latency(&self) {
		let latency = self.latency_ms.load(Ordering::Acquire);

		if latency > 0 {
			tokio::time::sleep(Duration::from_millis(latency)).await;
		}
	}
}

fn row_updated_at(row: &Row) -> Option<DateTime<Utc>> {
	row.get("updated_at")
		.and_then(Value::as_str)
		.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
		.map(|parsed| parsed.with_timezone(&Utc))
}

#[async_trait]
impl RemoteStore for MockRemote {
	async fn select_since(
		&self,
		table: &str,
		store_id: Uuid,
		after: DateTime<Utc>,
		limit: u32,
	) -> Result<Vec<Row>, RemoteError> {
		self.select_calls.fetch_add(1, Ordering::AcqRel);
		self.simulate_latency().await;

		let data = self.data.lock().await;

		if data.failing_tables.contains(table) {
			return Err(RemoteError::Unreachable(format!(
				"injected failure for table '{table}'"
			)));
		}

		let mut rows = data
			.tables
			.get(table)
			.map(|rows| {
				rows.values()
					.filter(|row| {
						row.get("store_id").and_then(Value::as_str)
							== Some(store_id.to_string().as_str())
					})
					.filter(|row| row_updated_at(row).is_some_and(|at| at > after))
					.cloned()
					.collect::<Vec<_>>()
			})
			.unwrap_or_default();

		rows.sort_by_key(|row| row_updated_at(row));
		rows.truncate(limit as usize);

		Ok(rows)
	}

	async fn upsert(&self, table: &str, row: Row) -> Result<(), RemoteError> {
		self.upsert_calls.fetch_add(1, Ordering::AcqRel);
		self.simulate_latency().await;

		let id = row
			.get("id")
			.and_then(Value::as_str)
			.ok_or_else(|| RemoteError::Rejected(String::from("row without id")))?
			.to_string();

		let mut data = self.data.lock().await;

		if data.failing_upserts.contains(&(table.to_string(), id.clone())) {
			return Err(RemoteError::Rejected(format!(
				"injected rejection for {table}/{id}"
			)));
		}

		data.tables
			.entry(table.to_string())
			.or_default()
			.insert(id, row);

		Ok(())
	}

	async fn delete(
		&self,
		table: &str,
		record_id: &str,
		store_id: Uuid,
	) -> Result<(), RemoteError> {
		self.delete_calls.fetch_add(1, Ordering::AcqRel);
		self.simulate_latency().await;

		let mut data = self.data.lock().await;

		if let Some(rows) = data.tables.get_mut(table) {
			let matches_store = rows
				.get(record_id)
				.and_then(|row| row.get("store_id"))
				.and_then(Value::as_str)
				== Some(store_id.to_string().as_str());

			if matches_store {
				rows.remove(record_id);
			}
		}

		Ok(())
	}

	async fn append_audit(&self, entry: AuditEntry) -> Result<(), RemoteError> {
		self.audit_calls.fetch_add(1, Ordering::AcqRel);

		self.data.lock().await.audit.push(entry);

		Ok(())
	}

	async fn find_store_by_owner(
		&self,
		owner_identity: &str,
	) -> Result<Option<StoreRecord>, RemoteError> {
		Ok(self
			.data
			.lock()
			.await
			.stores
			.iter()
			.find(|store| store.owner_identity == owner_identity)
			.cloned())
	}

	async fn find_accepted_membership(
		&self,
		identity: &str,
	) -> Result<Option<StoreRecord>, RemoteError> {
		let data = self.data.lock().await;

		Ok(data
			.memberships
			.iter()
			.find(|(member, _)| member == identity)
			.and_then(|(_, store_id)| data.stores.iter().find(|store| store.id == *store_id))
			.cloned())
	}

	async fn create_store(&self, store: StoreRecord) -> Result<(), RemoteError> {
		self.data.lock().await.stores.push(store);

		Ok(())
	}

	async fn register_device(&self, device: DeviceRecord) -> Result<(), RemoteError> {
		self.data.lock().await.devices.insert(device.id, device);

		Ok(())
	}

	async fn fetch_device(&self, device_id: Uuid) -> Result<Option<DeviceRecord>, RemoteError> {
		Ok(self.data.lock().await.devices.get(&device_id).cloned())
	}

	async fn deactivate_device(&self, device_id: Uuid) -> Result<(), RemoteError> {
		if let Some(device) = self.data.lock().await.devices.get_mut(&device_id) {
			device.active = false;
		}

		Ok(())
	}

	async fn touch_device(
		&self,
		device_id: Uuid,
		last_sync_at: DateTime<Utc>,
	) -> Result<(), RemoteError> {
		if let Some(device) = self.data.lock().await.devices.get_mut(&device_id) {
			device.last_sync_at = Some(last_sync_at);
		}

		Ok(())
	}
}

/// One simulated device: its own local store, device config dir and sync
/// manager, talking to a shared [`MockRemote`].
pub struct Instance {
	pub local: Arc<MemoryLocalStore>,
	pub remote: Arc<MockRemote>,
	pub manager: SyncManager,
	pub status_rx: watch::Receiver<SyncStatus>,
	pub config_dir: TempDir,
}

impl Instance {
	pub async fn new(remote: &Arc<MockRemote>) -> Self {
		let config_dir = tempfile::tempdir().expect("failed to create temp dir");
		let local = Arc::new(MemoryLocalStore::new());

		let (manager, status_rx) = SyncManager::new(
			Arc::clone(&local) as Arc<dyn tally_core::LocalStore>,
			Some(Arc::clone(remote) as Arc<dyn RemoteStore>),
			config_dir.path(),
		)
		.await
		.expect("failed to create sync manager");

		Self {
			local,
			remote: Arc::clone(remote),
			manager,
			status_rx,
			config_dir,
		}
	}

	pub async fn without_remote() -> Self {
		let config_dir = tempfile::tempdir().expect("failed to create temp dir");
		let local = Arc::new(MemoryLocalStore::new());

		let (manager, status_rx) = SyncManager::new(
			Arc::clone(&local) as Arc<dyn tally_core::LocalStore>,
			None,
			config_dir.path(),
		)
		.await
		.expect("failed to create sync manager");

		Self {
			local,
			remote: MockRemote::new(),
			manager,
			status_rx,
			config_dir,
		}
	}

	pub async fn new_registered(remote: &Arc<MockRemote>, owner_id: &str) -> Self {
		let instance = Self::new(remote).await;

		instance
			.manager
			.register(&OwnerIdentity {
				id: owner_id.to_string(),
				display_name: owner_id.to_string(),
			})
			.await
			.expect("registration failed");

		instance
	}

	pub async fn store_id(&self) -> Uuid {
		self.credentials().await.store_id
	}

	pub async fn device_id(&self) -> Uuid {
		self.credentials().await.device_id
	}

	async fn credentials(&self) -> tally_core::DeviceCredentials {
		self.manager
			.config()
			.await
			.credentials
			.expect("instance is not registered")
	}
}

/// Waits until the published status satisfies `condition`, or panics after
/// five seconds.
pub async fn wait_for_status(
	rx: &mut watch::Receiver<SyncStatus>,
	condition: impl Fn(&SyncStatus) -> bool,
) {
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if condition(&rx.borrow()) {
				break;
			}

			rx.changed().await.expect("status channel closed");
		}
	})
	.await
	.expect("status condition not reached in time");
}
