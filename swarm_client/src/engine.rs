//! Simulation & sync engine.
//!
//! The engine owns the bot population, the random source and the hub handle.
//! One control loop drives two fixed-rate actions:
//! - tick: advance every bot by one timestep;
//! - sync: snapshot all bots and ship them to the hub in size-bounded batches.
//!
//! Both actions take `&mut self` and run to completion on the loop's task, so
//! the population only ever has one writer. The hub's open flag is the only
//! state shared with another task.

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use swarm_shared::{
    bot::Population,
    chunk::chunk_by_budget,
    config::SwarmConfig,
    hub::{HubConnection, LinkState},
    kinematics::{step_population, StepParams},
    net::{record_size, SYNC_METHOD},
};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::schedule::FixedRate;

/// Running counters, reported on the stats clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub ticks: u64,
    /// Sync cycles that found the hub open.
    pub sync_cycles: u64,
    /// Sync cycles dropped because the hub was not open.
    pub skipped_cycles: u64,
    pub batches_sent: u64,
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: usize,
    pub records: usize,
    pub bytes: usize,
    /// Hub was not open; nothing was sent.
    pub skipped: bool,
    /// A send failed and the rest of the cycle was dropped.
    pub failed: bool,
}

/// Load generator: bot simulation plus position sync.
pub struct SimulationEngine<C, R = StdRng> {
    cfg: SwarmConfig,
    params: StepParams,
    population: Population,
    hub: C,
    rng: R,
    stats: EngineStats,
    started_at: Option<DateTime<Utc>>,
}

impl<C: HubConnection> SimulationEngine<C, StdRng> {
    /// Seeds from `cfg.seed` when set, from OS entropy otherwise.
    pub fn from_config(cfg: SwarmConfig, hub: C) -> anyhow::Result<Self> {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(cfg, hub, rng)
    }
}

impl<C: HubConnection, R: Rng> SimulationEngine<C, R> {
    /// Validates the config and spawns the population from `rng`.
    pub fn new(cfg: SwarmConfig, hub: C, mut rng: R) -> anyhow::Result<Self> {
        cfg.validate().context("invalid swarm config")?;
        let population = Population::create(&cfg, &mut rng);
        Self::with_population(cfg, hub, rng, population)
    }

    /// Uses an explicit population instead of spawning one.
    pub fn with_population(
        cfg: SwarmConfig,
        hub: C,
        rng: R,
        population: Population,
    ) -> anyhow::Result<Self> {
        cfg.validate().context("invalid swarm config")?;
        let params = StepParams {
            arena_radius: cfg.arena_radius(),
            dt: cfg.tick_period().as_secs_f64(),
            steering: cfg.steering,
        };
        Ok(Self {
            cfg,
            params,
            population,
            hub,
            rng,
            stats: EngineStats::default(),
            started_at: None,
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.cfg
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn hub(&self) -> &C {
        &self.hub
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Starts the hub link and waits for it to open.
    ///
    /// Fails if the link is not open within the handshake timeout. Retrying
    /// after that point is the link's own business.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let mut state = self.hub.subscribe();
        self.hub.start().await.context("start hub connection")?;

        let timeout = self.cfg.handshake_timeout();
        let opened = time::timeout(timeout, async {
            state.wait_for(LinkState::is_open).await.map(|_| ())
        })
        .await;

        match opened {
            Ok(Ok(())) => {
                info!(url = %self.cfg.hub_url, "Connected to hub");
                Ok(())
            }
            Ok(Err(_)) => bail!("hub link ended before opening"),
            Err(_) => bail!("hub handshake/open timed out after {timeout:?}"),
        }
    }

    /// Advances every bot by one timestep.
    pub fn tick(&mut self) {
        step_population(&mut self.population, &self.params, &mut self.rng);
        self.stats.ticks += 1;
    }

    /// Ships one snapshot of the population to the hub.
    ///
    /// A closed hub makes this a no-op. A failed send drops the remainder of
    /// the cycle; nothing is queued for later.
    pub fn sync(&mut self) -> anyhow::Result<SyncReport> {
        if !self.hub.is_open() {
            self.stats.skipped_cycles += 1;
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        }
        self.stats.sync_cycles += 1;

        let sized = self
            .population
            .snapshot()
            .into_iter()
            .map(|record| record_size(&record).map(|size| (record, size)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut report = SyncReport::default();
        for batch in chunk_by_budget(sized, self.cfg.max_batch_bytes) {
            let payload = serde_json::to_value(&batch.items).context("serialize batch")?;
            if let Err(e) = self.hub.send(SYNC_METHOD, vec![payload]) {
                self.stats.send_failures += 1;
                report.failed = true;
                warn!(
                    error = %format!("{e:#}"),
                    sent = report.batches,
                    "Sync batch failed, dropping rest of cycle"
                );
                break;
            }
            report.batches += 1;
            report.records += batch.len();
            report.bytes += batch.bytes;
        }

        self.stats.batches_sent += report.batches as u64;
        self.stats.records_sent += report.records as u64;
        self.stats.bytes_sent += report.bytes as u64;
        debug!(
            batches = report.batches,
            records = report.records,
            bytes = report.bytes,
            "Sync cycle"
        );
        Ok(report)
    }

    /// Runs the control loop until the process ends.
    pub async fn run(&mut self) {
        self.run_until(None).await;
    }

    /// Runs the control loop for `duration`.
    pub async fn run_for(&mut self, duration: Duration) {
        self.run_until(Some(Instant::now() + duration)).await;
    }

    async fn run_until(&mut self, deadline: Option<Instant>) {
        let start = Instant::now();
        let mut tick_clock = FixedRate::new(self.cfg.tick_period(), start);
        let mut sync_clock = FixedRate::new(self.cfg.sync_period(), start);
        let mut stats_clock = self
            .cfg
            .stats_interval()
            .map(|every| FixedRate::new(every, start + every));

        let started_at = Utc::now();
        self.started_at = Some(started_at);
        info!(
            bots = self.population.len(),
            tick_hz = self.cfg.tick_hz,
            sync_hz = self.cfg.sync_hz,
            max_batch_bytes = self.cfg.max_batch_bytes,
            started_at = %started_at.to_rfc3339(),
            "Simulation started"
        );

        loop {
            let now = Instant::now();
            if deadline.is_some_and(|end| now >= end) {
                break;
            }

            if tick_clock.poll(now) {
                self.tick();
            }
            if sync_clock.poll(now) {
                if let Err(e) = self.sync() {
                    warn!(error = %format!("{e:#}"), "Sync cycle failed");
                }
            }
            if stats_clock.as_mut().is_some_and(|clock| clock.poll(now)) {
                self.log_stats();
            }

            let mut wake = tick_clock.next_due().min(sync_clock.next_due());
            if let Some(clock) = &stats_clock {
                wake = wake.min(clock.next_due());
            }
            if let Some(end) = deadline {
                wake = wake.min(end);
            }
            time::sleep_until(wake).await;
        }

        self.log_stats();
    }

    fn log_stats(&self) {
        let uptime = self
            .started_at
            .map(|t| (Utc::now() - t).num_seconds())
            .unwrap_or_default();
        let s = self.stats;
        info!(
            uptime_secs = uptime,
            hub_open = self.hub.is_open(),
            ticks = s.ticks,
            syncs = s.sync_cycles,
            skipped = s.skipped_cycles,
            batches = s.batches_sent,
            records = s.records_sent,
            bytes = s.bytes_sent,
            send_failures = s.send_failures,
            "Swarm stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;
    use swarm_shared::{
        bot::Bot,
        hub::LinkStatus,
        math::Vec3,
        net::BotRecord,
    };
    use tokio::sync::watch;

    use super::*;

    /// In-memory hub that records every invocation.
    #[derive(Default)]
    struct RecordingHub {
        status: LinkStatus,
        opens_on_start: bool,
        fail_after: Option<usize>,
        sent: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl RecordingHub {
        fn open() -> Self {
            let hub = Self::default();
            hub.status.set(LinkState::Open);
            hub
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(target, args)| {
                    assert_eq!(target, SYNC_METHOD);
                    assert_eq!(args.len(), 1);
                    let records: Vec<BotRecord> = serde_json::from_value(args[0].clone()).unwrap();
                    records.into_iter().map(|r| r.id).collect()
                })
                .collect()
        }
    }

    #[async_trait]
    impl HubConnection for RecordingHub {
        async fn start(&self) -> anyhow::Result<()> {
            if self.opens_on_start {
                self.status.set(LinkState::Open);
            }
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.status.is_open()
        }

        fn subscribe(&self) -> watch::Receiver<LinkState> {
            self.status.subscribe()
        }

        fn send(&self, target: &str, arguments: Vec<Value>) -> anyhow::Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
                bail!("transport down");
            }
            sent.push((target.to_string(), arguments));
            Ok(())
        }
    }

    fn three_bots() -> Population {
        let bots = ["b1", "b2", "b3"]
            .into_iter()
            .map(|id| Bot::new(id, Vec3::planar(1.0, 2.0), 0.0, 0.0, 3.0, 0.1))
            .collect();
        Population::from_bots(bots).unwrap()
    }

    fn item_size() -> usize {
        record_size(&three_bots().snapshot()[0]).unwrap()
    }

    fn engine_with(
        hub: RecordingHub,
        cfg: SwarmConfig,
        population: Population,
    ) -> SimulationEngine<RecordingHub> {
        SimulationEngine::with_population(cfg, hub, StdRng::seed_from_u64(1), population).unwrap()
    }

    #[test]
    fn one_batch_when_everything_fits() {
        let mut engine = engine_with(RecordingHub::open(), SwarmConfig::default(), three_bots());

        let report = engine.sync().unwrap();

        assert_eq!(engine.hub().batches(), vec![vec!["b1", "b2", "b3"]]);
        assert_eq!(report.batches, 1);
        assert_eq!(report.records, 3);
        assert_eq!(report.bytes, 3 * item_size());
    }

    #[test]
    fn third_bot_meeting_budget_goes_to_second_batch() {
        let cfg = SwarmConfig {
            max_batch_bytes: 3 * item_size(),
            ..Default::default()
        };
        let mut engine = engine_with(RecordingHub::open(), cfg, three_bots());

        engine.sync().unwrap();

        assert_eq!(engine.hub().batches(), vec![vec!["b1", "b2"], vec!["b3"]]);
    }

    #[test]
    fn closed_hub_sync_is_a_no_op() {
        let mut engine = engine_with(RecordingHub::default(), SwarmConfig::default(), three_bots());
        let before = engine.population().snapshot();

        let report = engine.sync().unwrap();

        assert!(report.skipped);
        assert!(engine.hub().sent.lock().unwrap().is_empty());
        assert_eq!(engine.population().snapshot(), before);
        assert_eq!(engine.stats().skipped_cycles, 1);
        assert_eq!(engine.stats().sync_cycles, 0);
    }

    #[test]
    fn failed_send_drops_rest_of_cycle() {
        let hub = RecordingHub {
            fail_after: Some(1),
            ..RecordingHub::open()
        };
        let cfg = SwarmConfig {
            max_batch_bytes: 1,
            ..Default::default()
        };
        let mut engine = engine_with(hub, cfg, three_bots());

        let report = engine.sync().unwrap();

        assert!(report.failed);
        assert_eq!(report.batches, 1);
        assert_eq!(engine.hub().batches(), vec![vec!["b1"]]);
        assert_eq!(engine.stats().send_failures, 1);

        // The next cycle starts from scratch rather than resuming.
        engine.hub().sent.lock().unwrap().clear();
        engine.sync().unwrap();
        assert_eq!(engine.hub().batches(), vec![vec!["b1"]]);
    }

    #[test]
    fn every_bot_sent_once_in_order() {
        let cfg = SwarmConfig {
            bot_count: 731,
            max_batch_bytes: 2_000,
            seed: Some(9),
            ..Default::default()
        };
        let mut engine =
            SimulationEngine::from_config(cfg, RecordingHub::open()).unwrap();
        for _ in 0..5 {
            engine.tick();
        }

        let report = engine.sync().unwrap();

        let batches = engine.hub().batches();
        assert!(batches.len() > 1);
        assert_eq!(report.batches, batches.len());
        let flat: Vec<String> = batches.into_iter().flatten().collect();
        let expected: Vec<String> = engine.population().iter().map(|b| b.id().to_string()).collect();
        assert_eq!(flat, expected);

        for (_, args) in engine.hub().sent.lock().unwrap().iter() {
            let records: Vec<BotRecord> = serde_json::from_value(args[0].clone()).unwrap();
            let sizes: Vec<usize> = records.iter().map(|r| record_size(r).unwrap()).collect();
            let before_last: usize = sizes[..sizes.len() - 1].iter().sum();
            assert!(before_last < 2_000);
            for r in &records {
                assert_eq!(r.y, 0.0);
            }
        }
    }

    #[test]
    fn tick_moves_bots_but_not_identity() {
        let mut engine = engine_with(RecordingHub::open(), SwarmConfig::default(), three_bots());
        let before = engine.population().snapshot();

        engine.tick();

        let after = engine.population().snapshot();
        assert_eq!(engine.stats().ticks, 1);
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.id, b.id);
            assert_ne!((a.x, a.z), (b.x, b.z));
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = SwarmConfig {
            tick_hz: 0,
            ..Default::default()
        };
        assert!(SimulationEngine::from_config(cfg, RecordingHub::open()).is_err());
    }

    #[test]
    fn unbounded_jitter_is_rejected_before_any_tick() {
        let mut cfg = SwarmConfig::default();
        cfg.steering.jitter = 1e308;

        let Err(err) = SimulationEngine::from_config(cfg, RecordingHub::open()) else {
            panic!("config should be rejected");
        };
        assert!(format!("{err:#}").contains("steering.jitter"), "{err:#}");
    }

    #[tokio::test]
    async fn connect_waits_for_open() {
        let hub = RecordingHub {
            opens_on_start: true,
            ..Default::default()
        };
        let engine = engine_with(hub, SwarmConfig::default(), three_bots());
        engine.connect().await.unwrap();
        assert!(engine.hub().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_when_never_open() {
        let engine = engine_with(RecordingHub::default(), SwarmConfig::default(), three_bots());
        let err = engine.connect().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_tick_and_sync_at_their_own_rates() {
        let cfg = SwarmConfig {
            tick_hz: 20,
            sync_hz: 5,
            ..Default::default()
        };
        let mut engine = engine_with(RecordingHub::open(), cfg, three_bots());

        engine.run_for(Duration::from_secs(1)).await;

        let stats = engine.stats();
        assert_eq!(stats.ticks, 20);
        assert_eq!(stats.sync_cycles, 5);
        assert_eq!(engine.hub().batches().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_ticking_while_hub_is_closed() {
        let mut engine = engine_with(RecordingHub::default(), SwarmConfig::default(), three_bots());

        engine.run_for(Duration::from_secs(2)).await;

        let stats = engine.stats();
        assert_eq!(stats.ticks, 20);
        assert_eq!(stats.skipped_cycles, 20);
        assert_eq!(stats.sync_cycles, 0);
    }
}
