//! Consumers attached by the binary: they log every new longest chain and every confirmed log.

use async_trait::async_trait;
use chainwatch_core::{Broadcast, HeadTrackable, LogListener};
use chainwatch_types::{Head, JobId};
use tracing::{info, warn};

/// Logs every new longest chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadLogger;

#[async_trait]
impl HeadTrackable for HeadLogger {
    async fn on_new_longest_chain(&self, head: Head) {
        info!(
            target: "chainwatch::consumer",
            number = head.number,
            hash = %head.hash,
            chain_length = head.chain_length(),
            "New longest chain"
        );
    }
}

/// Logs every confirmed log once, then marks it consumed.
#[derive(Debug, Clone, Copy)]
pub struct LogLogger {
    job_id: JobId,
}

impl LogLogger {
    /// Creates a consumer acknowledging logs on behalf of `job_id`.
    pub const fn new(job_id: JobId) -> Self {
        Self { job_id }
    }
}

#[async_trait]
impl LogListener for LogLogger {
    fn on_connect(&self) {
        info!(target: "chainwatch::consumer", job_id = self.job_id, "Log subscription connected");
    }

    fn on_disconnect(&self) {
        warn!(target: "chainwatch::consumer", job_id = self.job_id, "Log subscription lost");
    }

    async fn handle_log(&self, broadcast: Broadcast) {
        match broadcast.was_already_consumed() {
            Ok(false) => {}
            Ok(true) => return,
            Err(err) => {
                warn!(target: "chainwatch::consumer", %err, "Failed to read consumption record");
                return;
            }
        }

        let log = broadcast.raw_log();
        info!(
            target: "chainwatch::consumer",
            address = %log.address,
            block_number = log.block_number,
            block_hash = %log.block_hash,
            log_index = log.log_index,
            tx_hash = %log.tx_hash,
            event_id = ?log.event_id(),
            "Confirmed log"
        );

        if let Err(err) = broadcast.mark_consumed() {
            warn!(target: "chainwatch::consumer", %err, "Failed to mark log consumed");
        }
    }

    fn job_id(&self) -> JobId {
        self.job_id
    }
}
