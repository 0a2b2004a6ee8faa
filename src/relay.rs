use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::platform::{LinkButton, Notification, Notifier};
use crate::sms::extract::compute_identity;
use crate::sms::format::format_message;
use crate::sms::NUMBER;
use crate::source::{FetchError, RecordSource};
use crate::state::{DedupState, StateFile};

/// Counters shared with the heartbeat job
#[derive(Debug, Default)]
pub struct RelayStats {
    pub cycles: AtomicU64,
    pub delivered: AtomicU64,
    pub duplicates: AtomicU64,
    pub failed_deliveries: AtomicU64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What a single poll cycle ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to relay this cycle
    NoRecord,
    /// The fetch failed; logged and skipped
    FetchFailed,
    /// Newest record was already delivered
    Duplicate,
    /// Newest record could not be rendered
    FormatFailed,
    /// Delivered to at least one destination and recorded
    Delivered { succeeded: usize, attempted: usize },
    /// Every destination failed; state left untouched so the record is retried
    Undelivered { attempted: usize },
}

/// Loop timing.
///
/// After a panicked cycle the loop sleeps `error_backoff` in place of
/// `check_interval`, not both.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub check_interval: Duration,
    pub error_backoff: Duration,
}

/// Where and how notifications are delivered
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Chat ids or `@channel` usernames, attempted in order
    pub destinations: Vec<String>,
    pub buttons: Vec<Vec<LinkButton>>,
    pub footer: String,
}

/// Polls a [`RecordSource`] and relays new records through a [`Notifier`].
pub struct Relay<S, N> {
    source: S,
    notifier: N,
    delivery: Delivery,
    state: DedupState,
    state_file: StateFile,
    schedule: Schedule,
    stats: Arc<RelayStats>,
}

impl<S: RecordSource, N: Notifier> Relay<S, N> {
    pub fn new(
        source: S,
        notifier: N,
        delivery: Delivery,
        state_file: StateFile,
        schedule: Schedule,
        stats: Arc<RelayStats>,
    ) -> Self {
        let state = state_file.load();
        Self {
            source,
            notifier,
            delivery,
            state,
            state_file,
            schedule,
            stats,
        }
    }

    pub fn state(&self) -> &DedupState {
        &self.state
    }

    /// Run one fetch → dedup → format → dispatch → persist pass.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        RelayStats::bump(&self.stats.cycles);

        let record = match self.source.fetch_latest().await {
            Ok(Some(record)) => record,
            Ok(None) => return CycleOutcome::NoRecord,
            Err(e) => {
                error!("{}", e);
                if let FetchError::MalformedJson { excerpt, .. } = &e {
                    debug!("Raw response: {}", excerpt);
                }
                return CycleOutcome::FetchFailed;
            }
        };

        let uid = compute_identity(&record);
        if self.state.contains(&uid) {
            debug!("Already relayed {}", uid);
            RelayStats::bump(&self.stats.duplicates);
            return CycleOutcome::Duplicate;
        }

        let Some(text) = format_message(&record, &self.delivery.footer) else {
            return CycleOutcome::FormatFailed;
        };
        let notification = Notification {
            text,
            buttons: self.delivery.buttons.clone(),
        };

        let attempted = self.delivery.destinations.len();
        let mut succeeded = 0;
        for destination in &self.delivery.destinations {
            match self.notifier.deliver(&notification, destination).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    error!("Error sending to chat {}: {:#}", destination, e);
                    RelayStats::bump(&self.stats.failed_deliveries);
                }
            }
        }

        if succeeded == 0 {
            warn!("Delivery failed for all {} chats, will retry {}", attempted, uid);
            return CycleOutcome::Undelivered { attempted };
        }

        info!(
            "New OTP sent to {}/{} chats for number: {}",
            succeeded,
            attempted,
            record.text_lossy(NUMBER).unwrap_or_default()
        );
        RelayStats::bump(&self.stats.delivered);

        // No await between here and the end of the cycle: the update and the
        // write land together or not at all.
        self.state.record(uid);
        if let Err(e) = self.state_file.save(&self.state) {
            error!("Error saving state: {:#}", e);
        }

        CycleOutcome::Delivered {
            succeeded,
            attempted,
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// A panic inside a cycle is logged and followed by the longer back-off
    /// sleep instead of the regular interval.
    ///
    /// Cancellation drops an in-flight cycle. If some destinations already
    /// received the record, it is not recorded and they get it again after
    /// a restart.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Relay started: {} destinations, checking every {}s",
            self.delivery.destinations.len(),
            self.schedule.check_interval.as_secs()
        );
        let schedule = self.schedule;

        loop {
            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            let delay = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = cycle => match result {
                    Ok(CycleOutcome::Delivered { succeeded, attempted }) if succeeded < attempted => {
                        warn!("Partial delivery: {} of {} chats failed", attempted - succeeded, attempted);
                        schedule.check_interval
                    }
                    Ok(CycleOutcome::Undelivered { attempted }) => {
                        debug!("Nothing delivered to {} chats, retrying next cycle", attempted);
                        schedule.check_interval
                    }
                    Ok(outcome) => {
                        debug!("Cycle finished: {:?}", outcome);
                        schedule.check_interval
                    }
                    Err(panic) => {
                        error!("Critical error in main loop: {}", panic_message(panic.as_ref()));
                        schedule.error_backoff
                    }
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            "Relay stopped ({} ids remembered)",
            self.state().processed_ids.len()
        );
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
