use std::{
	fmt,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicU32, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use chrono::{DateTime, Utc};
use tokio::{
	spawn,
	sync::{watch, Mutex, Notify, RwLock},
	task::JoinHandle,
};
use tracing::{debug, info, warn};

use tally_sync::{ChangeAction, RecordPayload};
use tally_utils::report_error;

use crate::{
	device::{
		config::{DeviceConfig, DeviceCredentials, DEVICE_STATE_CONFIG_NAME},
		registration::{self, OwnerIdentity},
		RegistrationError, RegistrationState,
	},
	ledger::{ChangeLedger, LedgerError},
	store::{LocalStore, RemoteStore},
};

use super::{
	actor::{run_actor, Stopper},
	pull::pull,
	push::push,
	SkipReason, SyncContext, SyncError, SyncOutcome, SyncPhase, SyncStatus,
};

/// State shared between the manager, the engines and the timer actor.
pub struct SharedState {
	pub(crate) local: Arc<dyn LocalStore>,
	pub(crate) remote: Option<Arc<dyn RemoteStore>>,
	pub(crate) ledger: ChangeLedger,
	pub(crate) config: Arc<RwLock<DeviceConfig>>,
	pub(crate) config_path: PathBuf,
	pub(crate) registration: RwLock<RegistrationState>,
	pub(crate) is_online: AtomicBool,
	pub(crate) syncing: AtomicBool,
	pub(crate) status_tx: watch::Sender<SyncStatus>,
	pub(crate) trigger: Notify,
	pub(crate) failures: AtomicU32,
}

impl SharedState {
	pub(crate) fn publish(&self, update: impl FnOnce(&mut SyncStatus)) {
		self.status_tx.send_modify(update);
	}

	pub(crate) async fn context(&self) -> Option<SyncContext> {
		self.config
			.read()
			.await
			.credentials
			.as_ref()
			.map(|credentials| SyncContext {
				device_id: credentials.device_id,
				store_id: credentials.store_id,
				token: credentials.token.clone(),
			})
	}
}

struct ActorHandle {
	stop_tx: chan::Sender<()>,
	handle: JoinHandle<()>,
}

/// Coordinates push-then-pull cycles: single-flight guard, periodic and
/// event-triggered scheduling, status ownership.
pub struct SyncManager {
	shared: Arc<SharedState>,
	actor: Mutex<Option<ActorHandle>>,
}

impl fmt::Debug for SyncManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncManager").finish()
	}
}

impl SyncManager {
	/// Loads the device config from `data_dir` and wires the engine up.
	/// Status updates are received on the returned [`watch::Receiver`].
	pub async fn new(
		local: Arc<dyn LocalStore>,
		remote: Option<Arc<dyn RemoteStore>>,
		data_dir: impl AsRef<Path>,
	) -> Result<(Self, watch::Receiver<SyncStatus>), SyncError> {
		let config_path = data_dir.as_ref().join(DEVICE_STATE_CONFIG_NAME);
		let config = Arc::new(RwLock::new(DeviceConfig::load(&config_path).await?));

		let ledger = ChangeLedger::new(Arc::clone(&local), Arc::clone(&config)).await?;

		let initial_registration = if remote.is_none() {
			RegistrationState::NotConfigured
		} else if config.read().await.is_registered() {
			RegistrationState::Registered
		} else {
			RegistrationState::NotRegistered
		};

		let (status_tx, status_rx) = watch::channel(SyncStatus {
			phase: if remote.is_none() {
				SyncPhase::NotConfigured
			} else {
				SyncPhase::Offline
			},
			pending_count: ledger.count().await?,
			last_synced_at: config.read().await.last_synced_at,
			..Default::default()
		});

		Ok((
			Self {
				shared: Arc::new(SharedState {
					local,
					remote,
					ledger,
					config,
					config_path,
					registration: RwLock::new(initial_registration),
					is_online: AtomicBool::new(true),
					syncing: AtomicBool::new(false),
					status_tx,
					trigger: Notify::new(),
					failures: AtomicU32::new(0),
				}),
				actor: Mutex::new(None),
			},
			status_rx,
		))
	}

	#[must_use]
	pub fn status(&self) -> SyncStatus {
		self.shared.status_tx.borrow().clone()
	}

	#[must_use]
	pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
		self.shared.status_tx.subscribe()
	}

	#[must_use]
	pub fn ledger(&self) -> &ChangeLedger {
		&self.shared.ledger
	}

	pub async fn registration_state(&self) -> RegistrationState {
		*self.shared.registration.read().await
	}

	pub async fn checkpoint(&self) -> Option<DateTime<Utc>> {
		self.shared.config.read().await.checkpoint
	}

	/// Snapshot of the persisted device config.
	pub async fn config(&self) -> DeviceConfig {
		self.shared.config.read().await.clone()
	}

	/// Write-wrapper over the ledger that also refreshes the published
	/// pending count.
	pub async fn apply(
		&self,
		table: &str,
		action: ChangeAction,
		payload: RecordPayload,
	) -> Result<(), LedgerError> {
		self.shared.ledger.apply(table, action, payload).await?;

		if let Ok(pending) = self.shared.ledger.count().await {
			self.shared.publish(|status| status.pending_count = pending);
		}

		Ok(())
	}

	/// Connectivity input from the platform; an offline to online
	/// transition requests an immediate cycle.
	pub fn set_online(&self, online: bool) {
		let was_online = self.shared.is_online.swap(online, Ordering::AcqRel);

		self.shared.publish(|status| {
			status.is_online = online;

			if !online {
				status.phase = SyncPhase::Offline;
			}
		});

		if online && !was_online {
			debug!("Connectivity restored; requesting a sync cycle;");
			self.shared.trigger.notify_one();
		}
	}

	pub async fn sync_now(&self) -> SyncOutcome {
		sync_cycle(&self.shared).await
	}

	/// Starts the periodic timer actor. Idempotent.
	pub async fn start(&self, period: Duration) {
		let mut actor = self.actor.lock().await;

		if actor.is_some() {
			warn!("Sync timer already running;");
			return;
		}

		let (stop_tx, stop_rx) = chan::bounded(1);

		*actor = Some(ActorHandle {
			stop_tx,
			handle: spawn(run_actor(
				Arc::clone(&self.shared),
				period,
				Stopper(stop_rx),
			)),
		});

		info!(?period, "Started periodic sync;");
	}

	/// Stops scheduling new cycles; an in-flight cycle finishes.
	pub async fn stop(&self) {
		let Some(ActorHandle { stop_tx, handle }) = self.actor.lock().await.take() else {
			return;
		};

		stop_tx.send(()).await.ok();
		handle.await.ok();
	}

	/// Registers this device, adopting an existing store for the owner (or
	/// one shared through an accepted team invitation) before creating a
	/// fresh one.
	pub async fn register(&self, owner: &OwnerIdentity) -> Result<(), RegistrationError> {
		let Some(remote) = self.shared.remote.as_deref() else {
			return Err(RegistrationError::NoRemote);
		};

		*self.shared.registration.write().await = RegistrationState::Registering;

		let device = match registration::register_or_adopt(remote, owner).await {
			Ok(device) => device,
			Err(e) => {
				*self.shared.registration.write().await = RegistrationState::Error;
				return Err(e);
			}
		};

		let persisted = {
			let mut config = self.shared.config.write().await;
			let mut updated = config.clone();

			updated.credentials = Some(DeviceCredentials {
				device_id: device.id,
				store_id: device.store_id,
				token: device.token.clone(),
				display_name: device.display_name.clone(),
				device_class: device.device_class,
			});

			match updated.save(&self.shared.config_path).await {
				Ok(()) => {
					*config = updated;
					Ok(())
				}
				Err(e) => Err(e),
			}
		};

		if let Err(e) = persisted {
			*self.shared.registration.write().await = RegistrationState::Error;
			return Err(e.into());
		}

		*self.shared.registration.write().await = RegistrationState::Registered;

		Ok(())
	}

	/// Startup liveness check of the persisted credentials.
	pub async fn verify_device(&self) -> Result<(), RegistrationError> {
		let Some(remote) = self.shared.remote.as_deref() else {
			return Err(RegistrationError::NoRemote);
		};

		let Some(credentials) = self.shared.config.read().await.credentials.clone() else {
			return Err(RegistrationError::NotRegistered);
		};

		match registration::verify(remote, &credentials).await {
			Ok(_) => {
				*self.shared.registration.write().await = RegistrationState::Registered;
				Ok(())
			}
			Err(e) => {
				warn!(%e, "Device verification failed; re-registration required;");
				*self.shared.registration.write().await = RegistrationState::Error;
				Err(e)
			}
		}
	}

	/// Deactivates the device remotely (best-effort) and always clears the
	/// local credentials and checkpoint.
	pub async fn disconnect(&self) -> Result<(), RegistrationError> {
		let credentials = self.shared.config.read().await.credentials.clone();

		if let (Some(remote), Some(credentials)) = (self.shared.remote.as_deref(), credentials) {
			if let Err(e) = remote.deactivate_device(credentials.device_id).await {
				warn!(?e, "Failed to deactivate device remotely;");
			}
		}

		{
			let mut config = self.shared.config.write().await;

			config.credentials = None;
			config.checkpoint = None;
			config.last_synced_at = None;
		}

		*self.shared.registration.write().await = RegistrationState::NotRegistered;

		self.shared.publish(|status| {
			status.last_synced_at = None;
		});

		// The in-memory credentials are gone even if persisting the cleared
		// config fails.
		let config = self.shared.config.read().await.clone();
		config.save(&self.shared.config_path).await?;

		Ok(())
	}
}

/// One guarded push-then-pull cycle. Skips (offline, unregistered, already
/// syncing) are not errors; fatal errors flip the status to
/// [`SyncPhase::Error`] and leave checkpoint and backlog untouched.
pub(crate) async fn sync_cycle(shared: &Arc<SharedState>) -> SyncOutcome {
	let Some(remote) = shared.remote.clone() else {
		if shared.status_tx.borrow().phase != SyncPhase::NotConfigured {
			shared.publish(|status| status.phase = SyncPhase::NotConfigured);
		}

		return SyncOutcome::skipped(SkipReason::NotConfigured);
	};

	if !shared.is_online.load(Ordering::Acquire) {
		debug!("Skipping sync cycle while offline;");
		return SyncOutcome::skipped(SkipReason::Offline);
	}

	let Some(ctx) = shared.context().await else {
		debug!("Skipping sync cycle for unregistered device;");
		return SyncOutcome::skipped(SkipReason::NotRegistered);
	};

	if shared
		.syncing
		.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
		.is_err()
	{
		return SyncOutcome::skipped(SkipReason::AlreadySyncing);
	}

	shared.publish(|status| {
		status.phase = SyncPhase::Connecting;
		status.last_error = None;
	});

	let outcome = run_cycle(shared, &ctx, remote.as_ref()).await;

	shared.syncing.store(false, Ordering::Release);

	match outcome {
		Ok(outcome) => {
			shared.failures.store(0, Ordering::Release);

			let pending = match shared.ledger.count().await {
				Ok(pending) => Some(pending),
				Err(e) => {
					warn!(?e, "Failed to refresh pending count;");
					None
				}
			};

			let last_synced_at = shared.config.read().await.last_synced_at;

			shared.publish(|status| {
				status.phase = SyncPhase::Synced;
				status.last_synced_at = last_synced_at;
				status.consecutive_failures = 0;

				if let Some(pending) = pending {
					status.pending_count = pending;
				}
			});

			outcome
		}

		Err(e) => {
			let failures = shared.failures.fetch_add(1, Ordering::AcqRel) + 1;

			warn!(%e, failures, "Sync cycle failed;");

			shared.publish(|status| {
				status.phase = SyncPhase::Error;
				status.last_error = Some(e.to_string());
				status.consecutive_failures = failures;
			});

			SyncOutcome {
				errors: vec![e.to_string()],
				..Default::default()
			}
		}
	}
}

async fn run_cycle(
	shared: &SharedState,
	ctx: &SyncContext,
	remote: &dyn RemoteStore,
) -> Result<SyncOutcome, SyncError> {
	shared.publish(|status| status.phase = SyncPhase::Syncing);

	let push_report = push(ctx, &shared.ledger, remote).await?;

	if let Ok(pending) = shared.ledger.count().await {
		shared.publish(|status| status.pending_count = pending);
	}

	let checkpoint = shared.config.read().await.checkpoint;

	let pull_report = pull(ctx, shared.local.as_ref(), remote, checkpoint).await?;

	let now = Utc::now();

	{
		let mut config = shared.config.write().await;
		let mut updated = config.clone();

		// The checkpoint only moves forward, and only after a pull pass
		// without a fatal error. Nothing is committed in memory unless it
		// also reached disk.
		if let Some(latest) = pull_report.latest_applied {
			updated.checkpoint = updated.checkpoint.max(Some(latest));
		}

		updated.last_synced_at = Some(now);

		updated.save(&shared.config_path).await?;

		*config = updated;
	}

	report_error(&remote.touch_device(ctx.device_id, now).await);

	Ok(SyncOutcome {
		success: true,
		skipped: None,
		pushed: push_report.count,
		pulled: pull_report.count,
		errors: push_report
			.errors
			.iter()
			.map(ToString::to_string)
			.chain(pull_report.errors.iter().map(ToString::to_string))
			.collect(),
	})
}
