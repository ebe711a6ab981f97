//! One polling cycle per user: load rules, fetch nearby aircraft, screen,
//! evaluate, deduplicate, record, deliver.
//!
//! Users are processed concurrently. The only shared mutable state is the
//! dedup gate, which serializes per (user, aircraft) key.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use flyover_core::approach::{screen, ScreeningLimits};
use flyover_core::config::Config;
use flyover_core::dedup::DedupGate;
use flyover_core::feed::{sanitize, RawAircraft};
use flyover_core::rules::compile;
use flyover_core::types::{AlertRecord, FlyoverError, Result, UserId};

use crate::db::{HistoryStore, RuleStore, UserProfile};
use crate::feed::AircraftFeed;
use crate::notification::AlertSink;

// ---------------------------------------------------------------------------
// Settings and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleSettings {
    pub horizon_minutes: f64,
    pub poll_interval: Duration,
    pub max_speed_kts: f64,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        CycleSettings {
            horizon_minutes: config.prediction.horizon_minutes,
            poll_interval: Duration::from_secs_f64(config.poll.interval_secs),
            max_speed_kts: config.feed.max_speed_kts,
        }
    }

    /// A feed request may use at most half the poll interval.
    pub fn fetch_timeout(&self) -> Duration {
        self.poll_interval / 2
    }

    /// Radius that covers every aircraft able to reach the largest filter
    /// distance within the horizon.
    pub fn feed_radius_nm(&self, max_distance_nm: f64) -> f64 {
        max_distance_nm + self.max_speed_kts * self.horizon_minutes / 60.0
    }
}

/// Counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub users: usize,
    pub users_skipped: usize,
    pub aircraft_seen: usize,
    pub aircraft_dropped: usize,
    pub aircraft_screened_out: usize,
    pub matches: usize,
    pub suppressed: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
}

impl CycleReport {
    pub fn merge(&mut self, other: &CycleReport) {
        self.users += other.users;
        self.users_skipped += other.users_skipped;
        self.aircraft_seen += other.aircraft_seen;
        self.aircraft_dropped += other.aircraft_dropped;
        self.aircraft_screened_out += other.aircraft_screened_out;
        self.matches += other.matches;
        self.suppressed += other.suppressed;
        self.delivered += other.delivered;
        self.delivery_failures += other.delivery_failures;
    }

    fn skipped() -> Self {
        CycleReport {
            users_skipped: 1,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct CycleOrchestrator {
    rules: Arc<dyn RuleStore>,
    history: Arc<dyn HistoryStore>,
    feed: Arc<dyn AircraftFeed>,
    sink: Arc<dyn AlertSink>,
    gate: Arc<DedupGate>,
    settings: CycleSettings,
}

impl CycleOrchestrator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        history: Arc<dyn HistoryStore>,
        feed: Arc<dyn AircraftFeed>,
        sink: Arc<dyn AlertSink>,
        gate: Arc<DedupGate>,
        settings: CycleSettings,
    ) -> Self {
        CycleOrchestrator {
            rules,
            history,
            feed,
            sink,
            gate,
            settings,
        }
    }

    /// Load alerts from the trailing dedup window into the gate.
    pub async fn seed_history(&self, now: f64) -> Result<usize> {
        let since = now - self.gate.window_secs();
        let records = self.history.alerts_since(since).await?;
        Ok(self.gate.seed(records.iter()))
    }

    /// Run exactly one polling cycle at time `now`.
    pub async fn run_cycle(&self, now: f64) -> CycleReport {
        let pruned = self.gate.prune(now);
        if pruned > 0 {
            debug!(pruned, "expired dedup entries");
        }

        let users = match self.rules.located_users().await {
            Ok(users) => users,
            Err(e) => {
                warn!("cannot load users: {e}");
                return CycleReport::default();
            }
        };

        let reports = join_all(users.iter().map(|u| self.process_user(u, now))).await;
        let mut total = CycleReport::default();
        for r in &reports {
            total.merge(r);
        }
        total
    }

    async fn process_user(&self, user: &UserProfile, now: f64) -> CycleReport {
        let Some(topic) = user.topic.as_deref().filter(|t| !t.trim().is_empty()) else {
            debug!(user = user.id, "no delivery topic, skipping");
            return CycleReport::skipped();
        };

        let defs = match self.rules.filters_for(user.id).await {
            Ok(defs) => defs,
            Err(e) => {
                warn!(user = user.id, "cannot load filters: {e}");
                return CycleReport::skipped();
            }
        };
        let (rules, issues) = compile(defs);
        for issue in &issues {
            warn!(user = user.id, "{issue}");
        }
        if rules.is_empty() {
            warn!(user = user.id, email = %user.email, "no usable filters, skipping");
            return CycleReport::skipped();
        }

        let here = user.location;
        let radius = self.settings.feed_radius_nm(rules.max_distance_nm());
        let records = match self.fetch(here.lat, here.lon, radius).await {
            Ok(records) => records,
            Err(e) => {
                warn!(user = user.id, "feed unavailable this cycle: {e}");
                return CycleReport::skipped();
            }
        };

        let mut report = CycleReport {
            users: 1,
            ..Default::default()
        };
        let limits = ScreeningLimits::new(
            self.settings.horizon_minutes,
            rules.max_distance_nm(),
            self.settings.poll_interval.as_secs_f64(),
        );

        for raw in &records {
            report.aircraft_seen += 1;
            let aircraft = match sanitize(raw) {
                Ok(a) => a,
                Err(reason) => {
                    debug!(hex = raw.label(), "dropped: {reason}");
                    report.aircraft_dropped += 1;
                    continue;
                }
            };
            let encounter = match screen(here, &aircraft, &limits) {
                Ok(enc) => enc,
                Err(rejection) => {
                    debug!(hex = %aircraft.hex, "skipped: {rejection}");
                    report.aircraft_screened_out += 1;
                    continue;
                }
            };
            let Some(matched) = rules.evaluate(&encounter) else {
                continue;
            };
            report.matches += 1;

            if self.gate.should_emit(user.id, &aircraft.hex, now) {
                self.recall_history(user.id, &aircraft.hex, now).await;
            }
            if !self.gate.check_and_record(user.id, &aircraft.hex, now) {
                debug!(user = user.id, hex = %aircraft.hex, "suppressed repeat alert");
                report.suppressed += 1;
                continue;
            }

            let record = AlertRecord {
                user_id: user.id,
                hex: aircraft.hex.clone(),
                timestamp: now,
                filter_name: matched.filter.name.clone(),
                message: matched.notification.message.clone(),
            };
            if let Err(e) = self.history.append(&record).await {
                warn!(user = user.id, hex = %aircraft.hex, "alert not persisted: {e}");
            }

            let note = &matched.notification;
            match self.sink.deliver(topic, &note.title, &note.message).await {
                Ok(()) => {
                    info!(user = user.id, hex = %aircraft.hex, filter = %note.title, "alert sent");
                    report.delivered += 1;
                }
                Err(e) => {
                    error!(user = user.id, hex = %aircraft.hex, "{e}");
                    report.delivery_failures += 1;
                }
            }
        }

        report
    }

    /// Load stored alerts for a pair the gate has no recent entry for, so a
    /// cold gate still honours alerts recorded by an earlier process.
    async fn recall_history(&self, user_id: UserId, hex: &str, now: f64) {
        let since = now - self.gate.window_secs();
        match self.history.alerts_between(user_id, hex, since, now).await {
            Ok(records) => {
                if self.gate.seed(records.iter()) > 0 {
                    debug!(user = user_id, hex, "recalled recent alert from history");
                }
            }
            Err(e) => warn!(user = user_id, hex, "alert history lookup failed: {e}"),
        }
    }

    async fn fetch(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<RawAircraft>> {
        let limit = self.settings.fetch_timeout();
        match tokio::time::timeout(limit, self.feed.fetch(lat, lon, radius_nm)).await {
            Ok(result) => result,
            Err(_) => Err(FlyoverError::Timeout(limit.as_secs_f64())),
        }
    }

    /// Poll on a fixed interval until `stop` flips to true or its sender is
    /// dropped. A cycle in progress always runs to completion.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stopped = *stop.borrow();
            if stopped {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let started = std::time::Instant::now();
                    let r = self.run_cycle(crate::now()).await;
                    info!(
                        users = r.users,
                        skipped = r.users_skipped,
                        aircraft = r.aircraft_seen,
                        matches = r.matches,
                        suppressed = r.suppressed,
                        delivered = r.delivered,
                        failed = r.delivery_failures,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "cycle complete"
                    );
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("polling stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
