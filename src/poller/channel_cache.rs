//! Periodic refresh of the channel metadata cache.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::ChannelFiller;

use super::Poller;

/// Refresh cadence. The jitter keeps a restarted fleet from lining up.
const FILL_INTERVAL: Duration = Duration::from_secs(10 * 60);
const FILL_JITTER: Duration = Duration::from_secs(60);
const FILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the channel cache filler until shutdown.
pub async fn run(filler: Arc<ChannelFiller>, shutdown: CancellationToken) {
    let poller = Poller::new(
        "channel_cache_filler",
        FILL_INTERVAL,
        FILL_JITTER,
        FILL_TIMEOUT,
        move || {
            let filler = Arc::clone(&filler);
            async move { filler.fill().await.map_err(Into::into) }
        },
    );

    poller.run(shutdown).await;
}
