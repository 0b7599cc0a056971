use std::{pin::pin, sync::Arc, time::Duration};

use async_channel as chan;
use futures::{stream, StreamExt};
use futures_concurrency::stream::Merge;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error};

use super::manager::{sync_cycle, SharedState};

/// Signals the timer actor to wind down; an in-flight cycle finishes, no
/// new ones are scheduled.
pub(crate) struct Stopper(pub(crate) chan::Receiver<()>);

enum StreamMessage {
	Tick,
	Requested,
	Stop,
}

/// Periodic sync driver: interval ticks, manual trigger notifications and
/// the stop signal, merged into one stream.
pub(crate) async fn run_actor(shared: Arc<SharedState>, period: Duration, stop: Stopper) {
	let mut timer = interval(period);
	timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let triggers = stream::unfold(Arc::clone(&shared), |shared| async move {
		shared.trigger.notified().await;
		Some(((), shared))
	});

	let mut msg_stream = pin!((
		IntervalStream::new(timer).map(|_| StreamMessage::Tick),
		triggers.map(|()| StreamMessage::Requested),
		stop.0.map(|()| StreamMessage::Stop),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Tick | StreamMessage::Requested => {
				let outcome = sync_cycle(&shared).await;

				if !outcome.success && outcome.skipped.is_none() {
					error!(
						errors = ?outcome.errors,
						"Sync cycle failed; retrying on the next tick;",
					);
				}
			}

			StreamMessage::Stop => {
				debug!("Sync timer actor stopped;");
				break;
			}
		}
	}
}
