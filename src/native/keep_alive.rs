use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Handle,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::Shared;

/// Spawns the task sending a ping every `interval` while the connection lives.
///
/// The task only holds a weak reference to the connection and ends when it is disposed.
/// Returns `None` outside of a tokio runtime.
pub(super) fn spawn<S>(shared: &Arc<Shared<S>>, interval: Duration) -> Option<JoinHandle<()>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let handle = Handle::try_current().ok()?;
    let shared = Arc::downgrade(shared);

    Some(handle.spawn(run(shared, interval)))
}

async fn run<S>(weak: Weak<Shared<S>>, interval: Duration)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let Some(shutdown) = weak.upgrade().map(|shared| shared.shutdown.clone()) else {
        return;
    };

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(shared) = weak.upgrade() else {
            break;
        };

        if let Err(_err) = shared.keep_alive().await {
            #[cfg(feature = "logging")]
            log::debug!("keep-alive ping failed: {_err}");
            break;
        }
    }
}
