use rand::{distributions::Alphanumeric, Rng};
use tracing::debug;
use uuid::Uuid;

use crate::store::{DeviceRecord, RemoteStore, StoreRecord};

use super::{config::DeviceCredentials, DeviceClass, RegistrationError};

/// Authenticated identity of the person operating this device, as issued
/// by the auth layer.
#[derive(Clone, Debug)]
pub struct OwnerIdentity {
	pub id: String,
	pub display_name: String,
}

const TOKEN_LEN: usize = 48;

/// Resolves the store this identity belongs to and registers the current
/// device against it: an owned store first, then a store reachable through
/// an accepted team invitation, otherwise a new store created for the
/// owner.
pub async fn register_or_adopt(
	remote: &dyn RemoteStore,
	owner: &OwnerIdentity,
) -> Result<DeviceRecord, RegistrationError> {
	let store = resolve_store(remote, owner).await?;

	let device = DeviceRecord {
		id: Uuid::now_v7(),
		store_id: store.id,
		token: mint_token(),
		display_name: device_display_name(),
		device_class: DeviceClass::from_env(),
		last_sync_at: None,
		active: true,
	};

	remote.register_device(device.clone()).await?;

	debug!(device_id = %device.id, store_id = %store.id, "Registered device;");

	Ok(device)
}

/// Startup liveness check against the remote registration.
pub async fn verify(
	remote: &dyn RemoteStore,
	credentials: &DeviceCredentials,
) -> Result<DeviceRecord, RegistrationError> {
	let device = remote
		.fetch_device(credentials.device_id)
		.await?
		.ok_or(RegistrationError::UnknownDevice)?;

	if !device.active {
		return Err(RegistrationError::Deactivated);
	}

	if device.token != credentials.token {
		return Err(RegistrationError::TokenMismatch);
	}

	Ok(device)
}

async fn resolve_store(
	remote: &dyn RemoteStore,
	owner: &OwnerIdentity,
) -> Result<StoreRecord, RegistrationError> {
	if let Some(store) = remote.find_store_by_owner(&owner.id).await? {
		return Ok(store);
	}

	if let Some(store) = remote.find_accepted_membership(&owner.id).await? {
		debug!(store_id = %store.id, "Adopting store via accepted team invitation;");
		return Ok(store);
	}

	let store = StoreRecord {
		id: Uuid::now_v7(),
		owner_identity: owner.id.clone(),
		name: format!("{}'s store", owner.display_name),
	};

	remote.create_store(store.clone()).await?;

	debug!(store_id = %store.id, "Created store for first-time owner;");

	Ok(store)
}

fn mint_token() -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(TOKEN_LEN)
		.map(char::from)
		.collect()
}

fn device_display_name() -> String {
	let mut name = whoami::devicename();
	name.truncate(255);
	name
}
