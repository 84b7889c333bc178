use crate::ChainwatchActor;
use async_trait::async_trait;
use chainwatch_core::{ChainClient, HeadBroadcastable, HeadTracker, HeadTrackerError};
use chainwatch_storage::HeadStorage;
use std::sync::Arc;
use tracing::error;

/// Drives a started [`HeadTracker`] until its cancellation token fires.
#[derive(Debug, derive_more::Constructor)]
pub struct HeadTrackerActor<C, DB, B> {
    tracker: Arc<HeadTracker<C, DB, B>>,
}

#[async_trait]
impl<C, DB, B> ChainwatchActor for HeadTrackerActor<C, DB, B>
where
    C: ChainClient + Clone + 'static,
    DB: HeadStorage + 'static,
    B: HeadBroadcastable + 'static,
{
    type Error = HeadTrackerError;

    async fn start(self) -> Result<(), Self::Error> {
        self.tracker.run().await.inspect_err(|err| {
            error!(target: "chainwatch::service", %err, "Head tracker failed");
        })
    }
}
