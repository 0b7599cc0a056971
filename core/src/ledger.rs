use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{trace, warn};
use uuid::Uuid;

use tally_sync::{naming, ChangeAction, PendingChange, RecordPayload};

use crate::{
	device::config::DeviceConfig,
	store::{LocalStore, LocalStoreError, Row},
};

/// Reserved local table holding queued changes. Deliberately absent from
/// the sync allow-list so the ledger never captures itself.
pub const LEDGER_TABLE: &str = "pendingChanges";

#[derive(Error, Debug)]
pub enum LedgerError {
	#[error("payload is missing its record id")]
	MissingRecordId,
	#[error(transparent)]
	Local(#[from] LocalStoreError),
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Append-only log of local mutations awaiting upload.
///
/// Entries are kept until the remote acknowledges them; repeated changes to
/// one record each get their own entry and converge through remote upserts.
pub struct ChangeLedger {
	local: Arc<dyn LocalStore>,
	config: Arc<RwLock<DeviceConfig>>,
	// Serializes write-wrapper pairs so a row write and its ledger entry
	// land together.
	write_lock: Mutex<()>,
	seq: AtomicU64,
}

impl ChangeLedger {
	pub async fn new(
		local: Arc<dyn LocalStore>,
		config: Arc<RwLock<DeviceConfig>>,
	) -> Result<Self, LedgerError> {
		let next_seq = local
			.to_array(LEDGER_TABLE)
			.await?
			.iter()
			.filter_map(|row| row.get("seq").and_then(Value::as_u64))
			.max()
			.map_or(0, |max| max + 1);

		Ok(Self {
			local,
			config,
			write_lock: Mutex::new(()),
			seq: AtomicU64::new(next_seq),
		})
	}

	/// Captures one mutation. Local writes must never block on sync
	/// bookkeeping, so this silently no-ops for tables outside the
	/// allow-list and for unregistered devices.
	pub async fn record(
		&self,
		table: &str,
		record_id: &str,
		action: ChangeAction,
		payload: Row,
	) -> Result<(), LedgerError> {
		if !naming::is_synchronized(table) {
			trace!(%table, "Skipping change capture for non-synchronized table;");
			return Ok(());
		}

		if !self.config.read().await.is_registered() {
			trace!(%table, "Skipping change capture for unregistered device;");
			return Ok(());
		}

		let change = PendingChange {
			id: Uuid::new_v4(),
			table: table.to_string(),
			record_id: record_id.to_string(),
			action,
			payload,
			captured_at: Utc::now(),
			seq: self.seq.fetch_add(1, Ordering::AcqRel),
			synced: false,
		};

		self.append(change).await
	}

	/// Write-wrapper: performs the local-store write and appends the
	/// matching ledger entry under one lock, so no mutation becomes visible
	/// without its pending change.
	pub async fn apply(
		&self,
		table: &str,
		action: ChangeAction,
		payload: RecordPayload,
	) -> Result<(), LedgerError> {
		let record_id = payload.record_id().ok_or(LedgerError::MissingRecordId)?;
		let record = payload.into_record();

		let _guard = self.write_lock.lock().await;

		match action {
			ChangeAction::Delete => self.local.delete(table, &record_id).await?,
			ChangeAction::Insert | ChangeAction::Update => {
				self.local.put(table, record.clone()).await?;
			}
		}

		self.record(table, &record_id, action, record).await
	}

	/// Unsynced entries in capture order.
	pub async fn list(&self) -> Result<Vec<PendingChange>, LedgerError> {
		let mut changes = self
			.local
			.to_array(LEDGER_TABLE)
			.await?
			.into_iter()
			.filter_map(
				|row| match serde_json::from_value::<PendingChange>(Value::Object(row)) {
					Ok(change) => Some(change),
					Err(e) => {
						warn!(?e, "Dropping malformed ledger entry;");
						None
					}
				},
			)
			.filter(|change| !change.synced)
			.collect::<Vec<_>>();

		changes.sort_unstable_by_key(|change| (change.captured_at, change.seq));

		Ok(changes)
	}

	pub async fn remove(&self, id: Uuid) -> Result<(), LedgerError> {
		self.local
			.delete(LEDGER_TABLE, &id.to_string())
			.await
			.map_err(Into::into)
	}

	pub async fn count(&self) -> Result<u64, LedgerError> {
		self.local.count(LEDGER_TABLE).await.map_err(Into::into)
	}

	async fn append(&self, change: PendingChange) -> Result<(), LedgerError> {
		let Value::Object(row) = serde_json::to_value(&change)? else {
			unreachable!("pending changes serialize to objects");
		};

		self.local.put(LEDGER_TABLE, row).await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		device::{
			config::DeviceCredentials,
			DeviceClass,
		},
		store::MemoryLocalStore,
	};

	use tally_sync::Product;

	use super::*;

	async fn ledger(registered: bool) -> ChangeLedger {
		let mut config = DeviceConfig::default();

		if registered {
			config.credentials = Some(DeviceCredentials {
				device_id: Uuid::new_v4(),
				store_id: Uuid::new_v4(),
				token: String::from("test-token"),
				display_name: String::from("Test Register"),
				device_class: DeviceClass::Desktop,
			});
		}

		ChangeLedger::new(
			Arc::new(MemoryLocalStore::new()),
			Arc::new(RwLock::new(config)),
		)
		.await
		.unwrap()
	}

	fn product(id: &str, name: &str) -> RecordPayload {
		RecordPayload::Product(Product {
			id: id.to_string(),
			name: name.to_string(),
			price_cents: 100,
			sku: None,
			category: None,
			stock_quantity: 0,
		})
	}

	#[tokio::test]
	async fn unregistered_devices_capture_nothing() {
		let ledger = ledger(false).await;

		ledger
			.apply("products", ChangeAction::Insert, product("p1", "Coke"))
			.await
			.unwrap();

		// The local write itself still happened.
		assert_eq!(ledger.local.count("products").await.unwrap(), 1);
		assert_eq!(ledger.count().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn non_synchronized_tables_are_ignored() {
		let ledger = ledger(true).await;

		ledger
			.record(
				"settings",
				"s1",
				ChangeAction::Update,
				serde_json::Map::new(),
			)
			.await
			.unwrap();

		assert_eq!(ledger.count().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn entries_come_back_in_capture_order() {
		let ledger = ledger(true).await;

		for (id, name) in [("p1", "Coke"), ("p2", "Pepsi"), ("p3", "Fanta")] {
			ledger
				.apply("products", ChangeAction::Insert, product(id, name))
				.await
				.unwrap();
		}

		let changes = ledger.list().await.unwrap();

		assert_eq!(
			changes
				.iter()
				.map(|change| change.record_id.as_str())
				.collect::<Vec<_>>(),
			["p1", "p2", "p3"]
		);
		assert!(changes.windows(2).all(|pair| pair[0].seq < pair[1].seq));
	}

	#[tokio::test]
	async fn removal_is_per_entry() {
		let ledger = ledger(true).await;

		ledger
			.apply("products", ChangeAction::Insert, product("p1", "Coke"))
			.await
			.unwrap();
		ledger
			.apply("products", ChangeAction::Update, product("p1", "Coke Zero"))
			.await
			.unwrap();

		let changes = ledger.list().await.unwrap();
		assert_eq!(changes.len(), 2);

		ledger.remove(changes[0].id).await.unwrap();

		let remaining = ledger.list().await.unwrap();
		assert_eq!(remaining.len(), 1);
		assert_eq!(remaining[0].action, ChangeAction::Update);
	}
}
