//! Typed schemas for the synchronized tables.
//!
//! Payloads authored through these types are validated snapshots; anything
//! a given build does not know about yet travels as
//! [`RecordPayload::Opaque`] and still syncs untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
	pub id: String,
	pub name: String,
	pub price_cents: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sku: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category: Option<String>,
	#[serde(default)]
	pub stock_quantity: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
	pub id: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_id: Option<String>,
	pub total_cents: i64,
	pub status: InvoiceStatus,
	pub issued_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvoiceStatus {
	Draft,
	Issued,
	Paid,
	Void,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
	pub id: String,
	pub invoice_id: String,
	pub product_id: String,
	pub quantity: i64,
	pub unit_price_cents: i64,
}

/// A full record snapshot, typed where the table is known.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordPayload {
	Product(Product),
	Customer(Customer),
	Invoice(Invoice),
	InvoiceItem(InvoiceItem),
	Opaque(Map<String, Value>),
}

impl RecordPayload {
	/// Local table this payload belongs to, for the typed variants.
	pub fn table(&self) -> Option<&'static str> {
		match self {
			Self::Product(_) => Some("products"),
			Self::Customer(_) => Some("customers"),
			Self::Invoice(_) => Some("invoices"),
			Self::InvoiceItem(_) => Some("invoiceItems"),
			Self::Opaque(_) => None,
		}
	}

	/// Decodes a local record into the table's typed schema, falling back
	/// to [`Self::Opaque`] for unknown tables or shapes newer than this
	/// build.
	pub fn decode(table: &str, record: Map<String, Value>) -> Self {
		let value = Value::Object(record);

		let decoded = match table {
			"products" => serde_json::from_value(value.clone()).map(Self::Product),
			"customers" => serde_json::from_value(value.clone()).map(Self::Customer),
			"invoices" => serde_json::from_value(value.clone()).map(Self::Invoice),
			"invoiceItems" => serde_json::from_value(value.clone()).map(Self::InvoiceItem),
			_ => return Self::opaque_from(value),
		};

		decoded.unwrap_or_else(|_| Self::opaque_from(value))
	}

	/// Serializes back into a local record map.
	pub fn into_record(self) -> Map<String, Value> {
		let value = match self {
			Self::Product(product) => serde_json::to_value(product),
			Self::Customer(customer) => serde_json::to_value(customer),
			Self::Invoice(invoice) => serde_json::to_value(invoice),
			Self::InvoiceItem(item) => serde_json::to_value(item),
			Self::Opaque(record) => return record,
		}
		.expect("typed payloads always serialize to an object");

		match value {
			Value::Object(record) => record,
			_ => unreachable!("typed payloads serialize to objects"),
		}
	}

	pub fn record_id(&self) -> Option<String> {
		match self {
			Self::Product(Product { id, .. })
			| Self::Customer(Customer { id, .. })
			| Self::Invoice(Invoice { id, .. })
			| Self::InvoiceItem(InvoiceItem { id, .. }) => Some(id.clone()),
			Self::Opaque(record) => record.get("id").and_then(Value::as_str).map(str::to_string),
		}
	}

	fn opaque_from(value: Value) -> Self {
		match value {
			Value::Object(record) => Self::Opaque(record),
			_ => Self::Opaque(Map::new()),
		}
	}
}
