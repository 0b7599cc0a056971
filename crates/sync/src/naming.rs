//! Field and table naming conventions.
//!
//! Local tables and fields follow the embedded store's camelCase
//! convention; the cloud store uses snake_case. Translation is pure and
//! bidirectional, applied to every record before upload and after
//! download. The table registry doubles as the sync allow-list: a table
//! absent from it never reaches the ledger or the engines.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

pub struct TableMapping {
	pub local: &'static str,
	pub remote: &'static str,
}

/// Every synchronized table, local name first.
pub const TABLES: &[TableMapping] = &[
	TableMapping {
		local: "products",
		remote: "products",
	},
	TableMapping {
		local: "customers",
		remote: "customers",
	},
	TableMapping {
		local: "invoices",
		remote: "invoices",
	},
	TableMapping {
		local: "invoiceItems",
		remote: "invoice_items",
	},
];

static LOCAL_TO_REMOTE: Lazy<HashMap<&'static str, &'static str>> =
	Lazy::new(|| TABLES.iter().map(|t| (t.local, t.remote)).collect());

static REMOTE_TO_LOCAL: Lazy<HashMap<&'static str, &'static str>> =
	Lazy::new(|| TABLES.iter().map(|t| (t.remote, t.local)).collect());

pub fn remote_table(local: &str) -> Option<&'static str> {
	LOCAL_TO_REMOTE.get(local).copied()
}

pub fn local_table(remote: &str) -> Option<&'static str> {
	REMOTE_TO_LOCAL.get(remote).copied()
}

pub fn is_synchronized(local: &str) -> bool {
	LOCAL_TO_REMOTE.contains_key(local)
}

/// Renames a record's top-level keys from local camelCase to the remote's
/// snake_case. Values are left untouched.
pub fn to_remote_record(record: &Map<String, Value>) -> Map<String, Value> {
	record
		.iter()
		.map(|(key, value)| (snake_case(key), value.clone()))
		.collect()
}

/// Renames a record's top-level keys from remote snake_case to the local
/// camelCase convention.
pub fn to_local_record(record: &Map<String, Value>) -> Map<String, Value> {
	record
		.iter()
		.map(|(key, value)| (camel_case(key), value.clone()))
		.collect()
}

pub fn snake_case(field: &str) -> String {
	let mut out = String::with_capacity(field.len() + 4);

	for c in field.chars() {
		if c.is_ascii_uppercase() {
			out.push('_');
			out.push(c.to_ascii_lowercase());
		} else {
			out.push(c);
		}
	}

	out
}

pub fn camel_case(field: &str) -> String {
	let mut out = String::with_capacity(field.len());
	let mut upper_next = false;

	for c in field.chars() {
		if c == '_' {
			upper_next = true;
		} else if upper_next {
			out.push(c.to_ascii_uppercase());
			upper_next = false;
		} else {
			out.push(c);
		}
	}

	out
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn field_conversion_round_trips() {
		assert_eq!(snake_case("priceCents"), "price_cents");
		assert_eq!(snake_case("id"), "id");
		assert_eq!(camel_case("price_cents"), "priceCents");
		assert_eq!(camel_case("id"), "id");
		assert_eq!(camel_case(&snake_case("stockQuantity")), "stockQuantity");
	}

	#[test]
	fn table_registry_is_the_allow_list() {
		assert_eq!(remote_table("invoiceItems"), Some("invoice_items"));
		assert_eq!(local_table("invoice_items"), Some("invoiceItems"));
		assert!(is_synchronized("products"));
		assert!(!is_synchronized("pendingChanges"));
		assert!(!is_synchronized("settings"));
	}

	#[test]
	fn record_translation_renames_keys_only() {
		let local = json!({
			"id": "p1",
			"priceCents": 250,
			"stockQuantity": 12,
		});

		let Value::Object(local) = local else {
			unreachable!()
		};

		let remote = to_remote_record(&local);

		assert_eq!(remote.get("price_cents"), Some(&json!(250)));
		assert_eq!(remote.get("stock_quantity"), Some(&json!(12)));
		assert_eq!(to_local_record(&remote), local);
	}
}
