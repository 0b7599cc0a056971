use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use tally_sync::naming;

use crate::store::{LocalStore, RemoteStore, Row};

use super::{SyncContext, SyncError};

/// Remote rows fetched per table per cycle. Anything beyond the cap is
/// picked up by the next cycle through the advanced checkpoint.
pub(crate) const PULL_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct TablePullError {
	pub table: String,
	pub message: String,
}

impl fmt::Display for TablePullError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.table, self.message)
	}
}

#[derive(Debug, Default)]
pub struct PullReport {
	pub count: usize,
	pub errors: Vec<TablePullError>,
	/// Highest `updated_at` applied; the orchestrator advances the
	/// checkpoint to it once the pass finishes without a fatal error.
	pub latest_applied: Option<DateTime<Utc>>,
}

/// Downloads remote changes past the checkpoint for every synchronized
/// table and applies them locally. Remote is authoritative once fetched; a
/// failing table is skipped for this cycle without aborting the others.
#[instrument(skip_all, fields(store_id = %ctx.store_id))]
pub async fn pull(
	ctx: &SyncContext,
	local: &dyn LocalStore,
	remote: &dyn RemoteStore,
	checkpoint: Option<DateTime<Utc>>,
) -> Result<PullReport, SyncError> {
	let after = checkpoint.unwrap_or(DateTime::UNIX_EPOCH);

	let mut report = PullReport::default();

	for mapping in naming::TABLES {
		match pull_table(ctx, local, remote, mapping, after).await {
			Ok((applied, latest)) => {
				report.count += applied;
				report.latest_applied = report.latest_applied.max(latest);
			}

			Err(message) => {
				warn!(table = mapping.local, %message, "Skipping table for this cycle;");

				report.errors.push(TablePullError {
					table: mapping.local.to_string(),
					message,
				});
			}
		}
	}

	Ok(report)
}

async fn pull_table(
	ctx: &SyncContext,
	local: &dyn LocalStore,
	remote: &dyn RemoteStore,
	mapping: &naming::TableMapping,
	after: DateTime<Utc>,
) -> Result<(usize, Option<DateTime<Utc>>), String> {
	let rows = remote
		.select_since(mapping.remote, ctx.store_id, after, PULL_PAGE_SIZE)
		.await
		.map_err(|e| e.to_string())?;

	let mut applied = 0;
	let mut latest = None;

	for row in rows {
		let Some(updated_at) = row_updated_at(&row) else {
			return Err(format!(
				"row without a valid updated_at in '{}'",
				mapping.remote
			));
		};

		local
			.put(mapping.local, naming::to_local_record(&row))
			.await
			.map_err(|e| e.to_string())?;

		applied += 1;
		latest = latest.max(Some(updated_at));
	}

	if applied > 0 {
		debug!(table = mapping.local, count = applied, "Applied remote changes;");
	}

	Ok((applied, latest))
}

fn row_updated_at(row: &Row) -> Option<DateTime<Utc>> {
	row.get("updated_at")
		.and_then(Value::as_str)
		.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
		.map(|parsed| parsed.with_timezone(&Utc))
}
