use std::{
	collections::{BTreeMap, HashMap},
	fmt,
};

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, instrument, warn};

use tally_sync::{naming, ChangeAction, PendingChange};

use crate::{
	ledger::ChangeLedger,
	store::{AuditEntry, RemoteStore},
};

use super::{SyncContext, SyncError};

/// Upper bound on in-flight remote writes per table. Batching bounds
/// memory and IO concurrency only; it provides no atomicity.
pub(crate) const PUSH_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct RecordPushError {
	pub table: String,
	pub record_id: String,
	pub message: String,
}

impl fmt::Display for RecordPushError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}: {}", self.table, self.record_id, self.message)
	}
}

#[derive(Debug, Default)]
pub struct PushReport {
	pub count: usize,
	pub errors: Vec<RecordPushError>,
}

/// Uploads every pending ledger entry, batched per table, isolating
/// failures per record: a poisoned record never blocks its siblings.
#[instrument(skip_all, fields(device_id = %ctx.device_id))]
pub async fn push(
	ctx: &SyncContext,
	ledger: &ChangeLedger,
	remote: &dyn RemoteStore,
) -> Result<PushReport, SyncError> {
	let changes = ledger.list().await?;

	let mut by_table = BTreeMap::<String, Vec<PendingChange>>::new();

	for change in changes {
		by_table
			.entry(change.table.clone())
			.or_default()
			.push(change);
	}

	let mut report = PushReport::default();

	for (table, changes) in by_table {
		let Some(remote_table) = naming::remote_table(&table) else {
			// Allow-listed at capture time, so the registry shrank since.
			// The entries are kept; no mutation is ever dropped silently.
			for change in &changes {
				report.errors.push(RecordPushError {
					table: table.clone(),
					record_id: change.record_id.clone(),
					message: String::from("table is no longer synchronized"),
				});
			}

			continue;
		};

		// Distinct records fan out with bounded concurrency; changes to the
		// same record replay sequentially in capture order, since only
		// writes to different rows are independent.
		let mut chains = Vec::<Vec<PendingChange>>::new();

		{
			let mut chain_by_record = HashMap::<String, usize>::new();

			for change in changes {
				match chain_by_record.get(&change.record_id) {
					Some(&index) => chains[index].push(change),
					None => {
						chain_by_record.insert(change.record_id.clone(), chains.len());
						chains.push(vec![change]);
					}
				}
			}
		}

		for batch in chains.chunks(PUSH_BATCH_SIZE) {
			for (pushed, error) in join_all(
				batch
					.iter()
					.map(|chain| push_chain(ctx, remote, ledger, remote_table, chain)),
			)
			.await
			{
				report.count += pushed;
				report.errors.extend(error);
			}
		}
	}

	if report.count > 0 || !report.errors.is_empty() {
		debug!(
			pushed = report.count,
			failed = report.errors.len(),
			"Push pass finished;"
		);
	}

	Ok(report)
}

async fn push_chain(
	ctx: &SyncContext,
	remote: &dyn RemoteStore,
	ledger: &ChangeLedger,
	remote_table: &str,
	chain: &[PendingChange],
) -> (usize, Option<RecordPushError>) {
	let mut pushed = 0;

	for change in chain {
		if let Err(e) = push_one(ctx, remote, ledger, remote_table, change).await {
			// The rest of the chain stays queued; retrying it before this
			// entry would replay the record's history out of order.
			return (pushed, Some(e));
		}

		pushed += 1;
	}

	(pushed, None)
}

async fn push_one(
	ctx: &SyncContext,
	remote: &dyn RemoteStore,
	ledger: &ChangeLedger,
	remote_table: &str,
	change: &PendingChange,
) -> Result<(), RecordPushError> {
	let record_error = |message: String| RecordPushError {
		table: change.table.clone(),
		record_id: change.record_id.clone(),
		message,
	};

	match change.action {
		ChangeAction::Insert | ChangeAction::Update => {
			let mut row = naming::to_remote_record(&change.payload);

			row.insert(String::from("id"), json!(change.record_id));
			row.insert(String::from("store_id"), json!(ctx.store_id));
			row.insert(
				String::from("updated_at"),
				json!(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
			);

			remote
				.upsert(remote_table, row)
				.await
				.map_err(|e| record_error(e.to_string()))?;
		}

		ChangeAction::Delete => {
			remote
				.delete(remote_table, &change.record_id, ctx.store_id)
				.await
				.map_err(|e| record_error(e.to_string()))?;
		}
	}

	// The entry leaves the ledger only now that the remote acknowledged
	// it; if the removal itself fails, the next cycle re-pushes an
	// idempotent upsert.
	ledger
		.remove(change.id)
		.await
		.map_err(|e| record_error(e.to_string()))?;

	if let Err(e) = remote
		.append_audit(AuditEntry {
			store_id: ctx.store_id,
			device_id: ctx.device_id,
			table: change.table.clone(),
			record_id: change.record_id.clone(),
			action: change.action,
			payload: change.payload.clone(),
			recorded_at: Utc::now(),
		})
		.await
	{
		warn!(
			table = %change.table,
			record_id = %change.record_id,
			?e,
			"Failed to append audit log entry;",
		);
	}

	Ok(())
}
