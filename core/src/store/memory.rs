use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{row_id, LocalStore, LocalStoreError, Row};

/// In-memory [`LocalStore`] adapter.
///
/// Tables are keyed by row id, so iteration order is stable. Used by the
/// test harness and as a stand-in where no embedded datastore is wired up.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
	tables: RwLock<HashMap<String, BTreeMap<String, Row>>>,
}

impl MemoryLocalStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
	async fn get(&self, table: &str, id: &str) -> Result<Option<Row>, LocalStoreError> {
		Ok(self
			.tables
			.read()
			.await
			.get(table)
			.and_then(|rows| rows.get(id))
			.cloned())
	}

	async fn put(&self, table: &str, row: Row) -> Result<(), LocalStoreError> {
		let id = row_id(table, &row)?;

		self.tables
			.write()
			.await
			.entry(table.to_string())
			.or_default()
			.insert(id, row);

		Ok(())
	}

	async fn delete(&self, table: &str, id: &str) -> Result<(), LocalStoreError> {
		if let Some(rows) = self.tables.write().await.get_mut(table) {
			rows.remove(id);
		}

		Ok(())
	}

	async fn bulk_add(&self, table: &str, rows: Vec<Row>) -> Result<(), LocalStoreError> {
		let mut tables = self.tables.write().await;
		let entries = tables.entry(table.to_string()).or_default();

		for row in rows {
			let id = row_id(table, &row)?;
			entries.insert(id, row);
		}

		Ok(())
	}

	async fn clear(&self, table: &str) -> Result<(), LocalStoreError> {
		self.tables.write().await.remove(table);

		Ok(())
	}

	async fn count(&self, table: &str) -> Result<u64, LocalStoreError> {
		Ok(self
			.tables
			.read()
			.await
			.get(table)
			.map_or(0, |rows| rows.len() as u64))
	}

	async fn to_array(&self, table: &str) -> Result<Vec<Row>, LocalStoreError> {
		Ok(self
			.tables
			.read()
			.await
			.get(table)
			.map(|rows| rows.values().cloned().collect())
			.unwrap_or_default())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn row(id: &str, name: &str) -> Row {
		let serde_json::Value::Object(row) = json!({ "id": id, "name": name }) else {
			unreachable!()
		};

		row
	}

	#[tokio::test]
	async fn put_is_an_upsert() {
		let store = MemoryLocalStore::new();

		store.put("products", row("p1", "Coke")).await.unwrap();
		store.put("products", row("p1", "Pepsi")).await.unwrap();

		assert_eq!(store.count("products").await.unwrap(), 1);
		assert_eq!(
			store.get("products", "p1").await.unwrap(),
			Some(row("p1", "Pepsi"))
		);
	}

	#[tokio::test]
	async fn rows_without_id_are_rejected() {
		let store = MemoryLocalStore::new();

		let serde_json::Value::Object(nameless) = json!({ "name": "no id" }) else {
			unreachable!()
		};

		assert!(matches!(
			store.put("products", nameless).await,
			Err(LocalStoreError::MissingId { .. })
		));
	}
}
