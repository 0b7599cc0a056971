#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod device;
pub mod ledger;
pub mod store;
pub mod sync;
pub mod util;

pub use device::{
	config::{DeviceConfig, DeviceCredentials},
	registration::OwnerIdentity,
	DeviceClass, RegistrationError, RegistrationState,
};
pub use ledger::{ChangeLedger, LedgerError};
pub use store::{
	AuditEntry, DeviceRecord, LocalStore, LocalStoreError, MemoryLocalStore, RemoteError,
	RemoteStore, Row, StoreRecord,
};
pub use sync::{
	manager::SyncManager, SkipReason, SyncContext, SyncError, SyncOutcome, SyncPhase, SyncStatus,
};

pub use tally_sync::{
	naming, ChangeAction, Customer, Invoice, InvoiceItem, InvoiceStatus, PendingChange, Product,
	RecordPayload,
};
