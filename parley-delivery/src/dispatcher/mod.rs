//! Scans the queue and drives `Outgoing` entries through the transport.
//!
//! Each scan ([`Dispatcher::tick`]) does the housekeeping first:
//!
//! 1. Leases that outlived a crashed or stalled worker are reclaimed
//! 2. `Incoming` entries whose submitter died before routing are routed
//! 3. `Deferred` entries whose retry time has passed go back to `Outgoing`
//!
//! and then claims a batch of `Outgoing` entries and delivers them
//! concurrently, at most `max_concurrent` at a time.

mod deliver;

use std::{sync::Arc, time::Duration};

use parley_common::{Signal, internal};
use parley_queue::{Claim, Queue, QueueKind, RecoveryReport};
use parley_tracing::traced;
use tokio::{
    sync::broadcast,
    task::JoinSet,
    time::MissedTickBehavior,
};

pub use deliver::{Folded, Settled};
use deliver::Worker;

use crate::{
    config::DispatcherConfig,
    error::{DeliveryError, SystemError},
    transport::Transport,
};

/// What one scan did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Interrupted splits whose children were written by this scan.
    pub resumed_splits: usize,
    pub reclaimed: usize,
    pub routed: usize,
    pub promoted: usize,
    pub claimed: usize,
    pub delivered: usize,
    pub deferred: usize,
    pub failed: usize,
    /// Entries replaced by children after a partial failure.
    pub split: usize,
    /// Deliveries that ended in an error; their claims expire and are
    /// retried by a later scan.
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, settled: Settled) {
        match settled {
            Settled::Delivered => self.delivered += 1,
            Settled::Deferred => self.deferred += 1,
            Settled::Failed => self.failed += 1,
            Settled::Split(_) => self.split += 1,
        }
    }

    /// `true` if the scan found nothing to do.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.resumed_splits == 0
            && self.reclaimed == 0
            && self.routed == 0
            && self.promoted == 0
            && self.claimed == 0
    }
}

pub struct Dispatcher {
    worker: Worker,
    holder: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("holder", &self.holder)
            .field("config", &self.worker.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// # Errors
    /// [`SystemError::Configuration`] if `config` does not validate.
    pub fn new(
        queue: Arc<Queue>,
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;

        Ok(Self {
            worker: Worker {
                queue,
                transport,
                config: Arc::new(config),
            },
            holder: format!("dispatcher-{}", std::process::id()),
        })
    }

    /// Name recorded on the leases this dispatcher takes.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.worker.config
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<Queue> {
        &self.worker.queue
    }

    /// Rebuild the queue from its backing store, then route any `Incoming`
    /// entries a previous process left behind.
    ///
    /// # Errors
    /// Any queue error met while reading the store.
    #[traced(instrument(level = tracing::Level::INFO, skip_all), timing(precision = "ms"))]
    pub async fn recover(&self) -> Result<RecoveryReport, DeliveryError> {
        let report = self.worker.queue.recover().await?;
        let routed = self.worker.queue.route_stale_incoming().await?;

        internal!(
            level = INFO,
            "Recovered queue: {report:?}, {} stale incoming entries routed",
            routed.len()
        );

        Ok(report)
    }

    /// Run one scan.
    ///
    /// # Errors
    /// Queue errors from the housekeeping steps or while claiming. Errors
    /// delivering a single entry are counted in [`TickReport::errors`]
    /// instead.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(holder = %self.holder)), timing(precision = "ms"))]
    pub async fn tick(&self) -> Result<TickReport, DeliveryError> {
        let queue = &self.worker.queue;
        let config = &self.worker.config;

        let mut report = TickReport {
            resumed_splits: queue.finish_pending_splits().await?,
            reclaimed: queue.reclaim_expired().await?,
            routed: queue.route_stale_incoming().await?.len(),
            promoted: queue.promote_due().await?,
            ..TickReport::default()
        };

        let claims = queue
            .dequeue_batch(QueueKind::Outgoing, config.batch_size, &self.holder)
            .await?;
        report.claimed = claims.len();

        self.deliver_all(claims, &mut report).await;

        if !report.is_idle() {
            internal!(level = DEBUG, "Scan finished: {report:?}");
        }

        Ok(report)
    }

    /// Deliver `claims` with at most `max_concurrent` in flight.
    async fn deliver_all(&self, claims: Vec<Claim>, report: &mut TickReport) {
        let mut pending = claims.into_iter();
        let mut join_set: JoinSet<Result<Settled, DeliveryError>> = JoinSet::new();

        let spawn = |join_set: &mut JoinSet<Result<Settled, DeliveryError>>, claim: Claim| {
            let worker = self.worker.clone();
            join_set.spawn(async move { worker.deliver(claim).await });
        };

        for claim in pending.by_ref().take(self.worker.config.max_concurrent) {
            spawn(&mut join_set, claim);
        }

        while let Some(joined) = join_set.join_next().await {
            let result = joined
                .map_err(|e| DeliveryError::from(SystemError::Task(e.to_string())))
                .and_then(|result| result);

            match result {
                Ok(settled) => report.record(settled),
                Err(e) => {
                    report.errors += 1;
                    internal!(level = ERROR, "Delivery failed: {e}");
                }
            }

            if let Some(claim) = pending.next() {
                spawn(&mut join_set, claim);
            }
        }
    }

    /// Scan every `scan_interval_secs` until a [`Signal`] arrives.
    ///
    /// A scan in progress at shutdown gets `shutdown_timeout_secs` to
    /// finish. Whatever it abandons stays leased and is reclaimed by the
    /// next process once the lease expires.
    ///
    /// # Errors
    /// Never fails once running; scan errors are logged and the next scan
    /// goes ahead.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "ms"))]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), DeliveryError> {
        let config = &self.worker.config;
        internal!(
            level = INFO,
            "Dispatcher {} scanning every {}s",
            self.holder,
            config.scan_interval_secs
        );

        let mut timer = tokio::time::interval(Duration::from_secs(config.scan_interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let mut scan = std::pin::pin!(self.tick());

                    tokio::select! {
                        result = &mut scan => Self::log_scan(result),
                        sig = shutdown.recv() => {
                            internal!(level = INFO, "Shutdown ({sig:?}) during a scan, waiting for it to finish");
                            let grace = Duration::from_secs(config.shutdown_timeout_secs);
                            match tokio::time::timeout(grace, scan).await {
                                Ok(result) => Self::log_scan(result),
                                Err(_) => internal!(
                                    level = WARN,
                                    "Scan did not finish within {}s, leaving its claims to expire",
                                    config.shutdown_timeout_secs
                                ),
                            }
                            break;
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(sig) => internal!(level = INFO, "Dispatcher received {sig:?}"),
                        Err(e) => internal!(level = ERROR, "Shutdown channel failed: {e}"),
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Dispatcher stopped");
        Ok(())
    }

    fn log_scan(result: Result<TickReport, DeliveryError>) {
        if let Err(e) = result {
            internal!(level = ERROR, "Scan failed: {e}");
        }
    }
}
