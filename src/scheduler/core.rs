use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::cache::{normalize_region, WeatherCache};
use crate::clock::Clock;
use crate::db::AlarmStore;
use crate::error::{ErrorKind, ErrorWindow};
use crate::push::{build_payload, PushGateway};
use crate::weather::WeatherFetcher;

/// Bound on in-flight fetch+push pipelines within one tick (spec.md 5:
/// "suggested <= 16").
const DEFAULT_MAX_CONCURRENCY: usize = 16;

const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is already running or has already been stopped")]
    AlreadyRunning,
}

/// The tick-driven periodic delivery core (spec.md 4.5). Owns references to
/// its four collaborators; none of them hold a back-reference to this
/// struct (spec.md 9, "no cyclic ownership").
pub struct SchedulerCore {
    state: Mutex<State>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
    stop_token: CancellationToken,

    clock: Arc<dyn Clock>,
    store: Arc<dyn AlarmStore>,
    cache: Arc<dyn WeatherCache>,
    fetcher: Arc<dyn WeatherFetcher>,
    push: Arc<dyn PushGateway>,

    interval: Duration,
    drain_deadline: Duration,
    concurrency: Arc<Semaphore>,

    /// Per-region singleflight locks (spec.md 4.5 step 2: two alarms for
    /// the same region in one tick must share a single fetch). Keyed by
    /// normalized region so differently-delimited spellings coalesce onto
    /// the same lock. Entries outlive a tick -- the region set is bounded
    /// by the number of distinct regions in use, not by tick count.
    region_locks: DashMap<String, Arc<Mutex<()>>>,

    consecutive_tick_failures: AtomicU64,
    errors: ErrorWindow,
}

impl SchedulerCore {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlarmStore>,
        cache: Arc<dyn WeatherCache>,
        fetcher: Arc<dyn WeatherFetcher>,
        push: Arc<dyn PushGateway>,
        interval: Duration,
    ) -> Arc<Self> {
        Self::with_drain_deadline(clock, store, cache, fetcher, push, interval, DEFAULT_DRAIN_DEADLINE)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_drain_deadline(
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlarmStore>,
        cache: Arc<dyn WeatherCache>,
        fetcher: Arc<dyn WeatherFetcher>,
        push: Arc<dyn PushGateway>,
        interval: Duration,
        drain_deadline: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Idle),
            run_handle: Mutex::new(None),
            stop_token: CancellationToken::new(),
            clock,
            store,
            cache,
            fetcher,
            push,
            interval,
            drain_deadline,
            concurrency: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
            region_locks: DashMap::new(),
            consecutive_tick_failures: AtomicU64::new(0),
            errors: ErrorWindow::default(),
        })
    }

    pub async fn state_is_running(&self) -> bool {
        *self.state.lock().await == State::Running
    }

    pub fn consecutive_tick_failures(&self) -> u64 {
        self.consecutive_tick_failures.load(Ordering::Relaxed)
    }

    /// Operational errors observed in the trailing window, for the health
    /// probe's short-window error count (spec.md 4.6).
    pub fn recent_error_count(&self) -> usize {
        self.errors.count()
    }

    /// `Idle -> Running`. Duplicate starts (from `Running` or `Stopped`)
    /// fail with `AlreadyRunning` (spec.md 4.5); this scheduler does not
    /// support restarting after a stop.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if *state != State::Idle {
            return Err(SchedulerError::AlreadyRunning);
        }
        *state = State::Running;
        drop(state);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.run_handle.lock().await = Some(handle);
        Ok(())
    }

    /// `Running -> Stopped`. Idempotent: a second `stop` call, or a `stop`
    /// before `start`, is a no-op (spec.md 4.5/8).
    pub async fn stop(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            match *state {
                State::Running => {
                    *state = State::Stopped;
                    self.stop_token.cancel();
                }
                State::Idle | State::Stopped => return,
            }
        }

        let handle = self.run_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "scheduler run loop panicked");
            }
        }
    }

    /// The tick loop (spec.md 4.5 steps 1-4): an immediate pass, then a
    /// periodic source every `interval`, spawning one processing task per
    /// tick and draining them on stop within `drain_deadline`.
    async fn run(self: Arc<Self>) {
        let mut tasks = JoinSet::new();

        let immediate_target = self.clock.minute_at(self.clock.now() + self.interval);
        self.spawn_tick(&mut tasks, immediate_target);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.stop_token.cancelled() => break,
                _ = ticker.tick() => {
                    let target = self.clock.minute_at(self.clock.now() + self.interval);
                    self.spawn_tick(&mut tasks, target);
                }
                Some(result) = tasks.join_next() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "tick task join failed");
                    }
                }
            }
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.drain_deadline, drain).await.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "drain deadline elapsed with tick tasks still in flight"
            );
        }
    }

    fn spawn_tick(self: &Arc<Self>, tasks: &mut JoinSet<()>, target: NaiveTime) {
        let this = Arc::clone(self);
        tasks.spawn(async move { this.process(target).await });
    }

    /// One tick's worth of work (spec.md 4.5 `process(target)`).
    pub async fn process(self: &Arc<Self>, target: NaiveTime) {
        metrics::counter!("scheduler_ticks_total").increment(1);
        let tick_start = std::time::Instant::now();

        let start_of_today = self.clock.start_of_today_local();
        let alarms = match self.store.due_alarms(target, start_of_today).await {
            Ok(alarms) => alarms,
            Err(e) => {
                self.errors.record();
                match e.kind() {
                    ErrorKind::Transient => {
                        tracing::warn!(target = %target, error = %e, "due_alarms transient error, aborting tick");
                        self.consecutive_tick_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {
                        tracing::error!(target = %target, error = %e, "due_alarms fatal error, scheduler keeps running");
                        self.consecutive_tick_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                metrics::gauge!("scheduler_consecutive_tick_failures")
                    .set(self.consecutive_tick_failures.load(Ordering::Relaxed) as f64);
                return;
            }
        };
        self.consecutive_tick_failures.store(0, Ordering::Relaxed);
        metrics::gauge!("scheduler_consecutive_tick_failures").set(0.0);

        if alarms.is_empty() {
            return;
        }

        let mut per_alarm = JoinSet::new();
        for alarm in alarms {
            let permit = match self.concurrency.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = Arc::clone(self);
            per_alarm.spawn(async move {
                let _permit = permit;
                this.process_alarm_guarded(alarm).await;
            });
        }

        while per_alarm.join_next().await.is_some() {}

        metrics::histogram!("scheduler_tick_duration_seconds").record(tick_start.elapsed().as_secs_f64());
    }

    /// Catches a panic at the per-alarm worker boundary so one bad alarm
    /// cannot kill the tick loop (spec.md 7).
    async fn process_alarm_guarded(self: Arc<Self>, alarm: crate::alarms::Alarm) {
        let alarm_id = alarm.alarm_id;
        let result = AssertUnwindSafe(self.process_alarm(alarm)).catch_unwind().await;
        if let Err(panic) = result {
            let message = panic_message(&panic);
            tracing::error!(alarm_id, panic = %message, "per-alarm worker panicked");
            metrics::counter!("scheduler_alarm_panics_total").increment(1);
        }
    }

    /// The six-step decision table A-G (spec.md 4.5), preserving the
    /// fetch-failure-preserves-retry vs push-failure-consumes-day asymmetry
    /// exactly.
    async fn process_alarm(self: Arc<Self>, alarm: crate::alarms::Alarm) {
        let alarm_id = alarm.alarm_id;
        let region = alarm.region.clone();
        let now = self.clock.now();

        // A/B/C: resolve weather for the region, coalescing concurrent
        // fetches within the tick (spec.md 4.5 step 2).
        let record = match self.resolve_weather(alarm_id, &region).await {
            Some(record) => record,
            None => return,
        };

        // D: active_tokens
        let tokens = match self.store.active_tokens(alarm.user_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.errors.record();
                tracing::warn!(alarm_id, error = %e, "active_tokens failed, skipping alarm this tick");
                metrics::counter!("scheduler_alarms_processed_total", "outcome" => "tokens_error").increment(1);
                return;
            }
        };

        if tokens.is_empty() {
            // E: no devices, suppress retry thrashing by consuming the day.
            self.mark_sent(alarm_id, now, "no_tokens").await;
            return;
        }

        // F: push
        let payload = build_payload(&region, &record);
        let push_tokens: Vec<String> = tokens.into_iter().map(|t| t.push_token).collect();
        let push_start = std::time::Instant::now();
        match self.push.push(&push_tokens, &payload, &region).await {
            Ok(report) => {
                metrics::counter!("push_notifications_total", "outcome" => "delivered").increment(report.success_count as u64);
                if report.failure_count > 0 {
                    metrics::counter!("push_notifications_total", "outcome" => "failed").increment(report.failure_count as u64);
                }
            }
            Err(e) => {
                self.errors.record();
                tracing::warn!(alarm_id, error = %e, "push returned AllFailed, day still consumed");
                metrics::counter!("push_errors_total").increment(1);
            }
        }
        metrics::histogram!("push_duration_seconds").record(push_start.elapsed().as_secs_f64());

        // G: advance last_sent_at regardless of push outcome.
        self.mark_sent(alarm_id, now, "delivered").await;
    }

    /// Per-region singleflight lock, keyed by normalized region so
    /// differently-delimited spellings of the same region coalesce onto
    /// the same lock (spec.md 4.2 key normalization).
    fn region_lock(&self, region: &str) -> Arc<Mutex<()>> {
        let key = normalize_region(region);
        self.region_locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// A/B/C: resolve the weather record for a region, fetching on a cache
    /// miss or cache error and populating the cache. Concurrent alarms for
    /// the same region within a tick serialize on `region_lock` and
    /// re-check the cache after acquiring it, so at most one of them
    /// actually calls the fetcher (spec.md 4.5 step 2, spec.md 8 seed
    /// scenario 7: "exactly 1 fetch"). Returns `None` when no record could
    /// be obtained, signaling the caller to skip the alarm without
    /// advancing `last_sent_at`.
    async fn resolve_weather(&self, alarm_id: i64, region: &str) -> Option<crate::weather::WeatherRecord> {
        match self.cache.get(region).await {
            Ok(Some(record)) => {
                metrics::counter!("cache_hits_total").increment(1);
                return Some(record);
            }
            Ok(None) => {
                metrics::counter!("cache_misses_total").increment(1);
            }
            Err(e) => {
                metrics::counter!("cache_errors_total").increment(1);
                tracing::warn!(alarm_id, error = %e, "cache get errored, treating as miss");
            }
        }

        let lock = self.region_lock(region);
        let _guard = lock.lock().await;

        // Re-check: whoever held the lock before us may already have
        // populated the cache with this tick's single fetch.
        if let Ok(Some(record)) = self.cache.get(region).await {
            metrics::counter!("cache_hits_total").increment(1);
            return Some(record);
        }

        self.fetch_and_cache(region).await
    }

    /// B/C: fetch on a cache miss (or cache error), then populate the
    /// cache. Returns `None` when the fetch itself failed, signaling the
    /// caller to skip the alarm without advancing `last_sent_at`.
    async fn fetch_and_cache(&self, region: &str) -> Option<crate::weather::WeatherRecord> {
        let fetch_start = std::time::Instant::now();
        let cancel = self.stop_token.child_token();
        let record = match self.fetcher.fetch(region, &cancel).await {
            Ok(record) => record,
            Err(e) => {
                self.errors.record();
                tracing::warn!(region = %region, error = %e, "fetch failed, alarm retries next day");
                metrics::counter!("fetch_requests_total", "outcome" => "failed").increment(1);
                return None;
            }
        };
        metrics::counter!("fetch_requests_total", "outcome" => "ok").increment(1);
        metrics::histogram!("fetch_duration_seconds").record(fetch_start.elapsed().as_secs_f64());

        if let Err(e) = self.cache.set(region, record.clone()).await {
            tracing::debug!(region = %region, error = %e, "cache set failed, next request will re-fetch");
        }

        Some(record)
    }

    async fn mark_sent(&self, alarm_id: i64, ts: chrono::DateTime<Utc>, outcome: &'static str) {
        if let Err(e) = self.store.mark_sent(alarm_id, ts).await {
            self.errors.record();
            tracing::warn!(alarm_id, error = %e, "mark_sent failed");
        }
        metrics::counter!("scheduler_alarms_processed_total", "outcome" => outcome).increment(1);
    }

    pub async fn ping_store(&self) -> Result<(), crate::db::DbError> {
        self.store.ping().await
    }

    pub async fn ping_cache(&self) -> Result<(), crate::cache::CacheError> {
        self.cache.ping().await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::Alarm;
    use crate::cache::InMemoryCache;
    use crate::clock::FixedClock;
    use crate::db::InMemoryAlarmStore;
    use crate::devices::DeviceToken;
    use crate::push::{DeliveryReport, PushError, PushPayload};
    use crate::weather::{FetchError, WeatherRecord};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WeatherFetcher for CountingFetcher {
        async fn fetch(
            &self,
            region: &str,
            _cancel: &CancellationToken,
        ) -> Result<WeatherRecord, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::FetchFailed("upstream down".to_string()));
            }
            let _ = region;
            Ok(WeatherRecord {
                temperature_c: 25.5,
                humidity_pct: 60.0,
                precipitation_mm: 0.0,
                wind_speed_mps: 3.2,
                observed_at: Utc::now(),
            })
        }
    }

    /// Unlike `CountingFetcher`, this one actually suspends the calling
    /// task, so on a multi-thread runtime two concurrent callers genuinely
    /// race for the cache-miss-then-fetch window instead of the single
    /// current-thread executor serializing them by accident.
    struct SlowCountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl WeatherFetcher for SlowCountingFetcher {
        async fn fetch(
            &self,
            _region: &str,
            _cancel: &CancellationToken,
        ) -> Result<WeatherRecord, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(WeatherRecord {
                temperature_c: 25.5,
                humidity_pct: 60.0,
                precipitation_mm: 0.0,
                wind_speed_mps: 3.2,
                observed_at: Utc::now(),
            })
        }
    }

    struct CountingPush {
        calls: AtomicUsize,
        all_fail: bool,
        sleep_per_call: Option<Duration>,
    }

    #[async_trait]
    impl PushGateway for CountingPush {
        async fn push(
            &self,
            tokens: &[String],
            _payload: &PushPayload,
            _region: &str,
        ) -> Result<DeliveryReport, PushError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.sleep_per_call {
                tokio::time::sleep(d).await;
            }
            if self.all_fail {
                return Err(PushError::AllFailed);
            }
            Ok(DeliveryReport {
                success_count: tokens.len(),
                failure_count: 0,
                failures: vec![],
            })
        }
    }

    fn clock_at(h: u32, m: u32) -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 7, 26, h, m, 0).unwrap(),
            chrono_tz::UTC,
        ))
    }

    fn alarm(id: i64, user_id: i64, minute: NaiveTime, region: &str) -> Alarm {
        Alarm {
            alarm_id: id,
            user_id,
            alarm_minute: minute,
            region: region.to_string(),
            enabled: true,
            last_sent_at: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn token(id: i64, user_id: i64) -> DeviceToken {
        DeviceToken {
            token_id: id,
            user_id,
            push_token: format!("ExponentPushToken[{id}]"),
            device_id: format!("device-{id}"),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn happy_path_cache_miss_fetches_once_and_advances_last_sent() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(
            vec![alarm(1, 1, target, "서울시 강남구")],
            vec![token(1, 1), token(2, 1)],
        );
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher.clone(), push.clone(), Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(push.calls.load(Ordering::SeqCst), 1);
        assert!(store.snapshot_alarms().await[0].last_sent_at.is_some());
    }

    #[tokio::test]
    async fn happy_path_cache_hit_skips_fetch() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(vec![alarm(1, 1, target, "Chicago")], vec![token(1, 1)]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        cache
            .set(
                "Chicago",
                WeatherRecord {
                    temperature_c: 20.0,
                    humidity_pct: 50.0,
                    precipitation_mm: 0.0,
                    wind_speed_mps: 1.0,
                    observed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher.clone(), push.clone(), Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(push.calls.load(Ordering::SeqCst), 1);
        assert!(store.snapshot_alarms().await[0].last_sent_at.is_some());
    }

    #[tokio::test]
    async fn dedup_already_sent_today_is_not_reprocessed() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let mut already_sent = alarm(1, 1, target, "Chicago");
        already_sent.last_sent_at = Some(Utc::now());
        let store = InMemoryAlarmStore::new(vec![already_sent], vec![token(1, 1)]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store, cache, fetcher.clone(), push.clone(), Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(push.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_failure_does_not_advance_last_sent() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(vec![alarm(1, 1, target, "Chicago")], vec![token(1, 1)]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: true });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher, push.clone(), Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(push.calls.load(Ordering::SeqCst), 0);
        assert!(store.snapshot_alarms().await[0].last_sent_at.is_none());
    }

    #[tokio::test]
    async fn push_all_fail_still_consumes_the_day() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(vec![alarm(1, 1, target, "Chicago")], vec![token(1, 1)]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: true, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher, push, Duration::from_secs(60));
        scheduler.process(target).await;

        assert!(store.snapshot_alarms().await[0].last_sent_at.is_some());
        assert_eq!(scheduler.recent_error_count(), 1);
    }

    #[tokio::test]
    async fn no_tokens_user_still_consumes_the_day() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(vec![alarm(1, 1, target, "Chicago")], vec![]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher, push.clone(), Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(push.calls.load(Ordering::SeqCst), 0);
        assert!(store.snapshot_alarms().await[0].last_sent_at.is_some());
    }

    #[tokio::test]
    async fn shared_region_two_alarms_one_fetch() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(
            vec![alarm(1, 1, target, "Chicago"), alarm(2, 2, target, "Chicago")],
            vec![token(1, 1), token(2, 2)],
        );
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher.clone(), push, Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let snapshot = store.snapshot_alarms().await;
        assert!(snapshot.iter().all(|a| a.last_sent_at.is_some()));
    }

    /// `shared_region_two_alarms_one_fetch` above passes even without
    /// coalescing, because `CountingFetcher` never suspends and the
    /// current-thread test runtime happens to run the two `process_alarm`
    /// tasks to completion one at a time. This test uses a fetcher that
    /// actually sleeps and a multi-thread runtime so both alarms' fetches
    /// are genuinely in flight at once, forcing the second one through the
    /// `region_lock` wait-then-recheck path.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_region_alarms_still_fetch_once() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(
            vec![alarm(1, 1, target, "Chicago"), alarm(2, 2, target, "Chicago")],
            vec![token(1, 1), token(2, 2)],
        );
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(SlowCountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store.clone(), cache, fetcher.clone(), push, Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let snapshot = store.snapshot_alarms().await;
        assert!(snapshot.iter().all(|a| a.last_sent_at.is_some()));
    }

    #[tokio::test]
    async fn empty_due_list_makes_no_calls() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(vec![], vec![]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store, cache, fetcher.clone(), push.clone(), Duration::from_secs(60));
        scheduler.process(target).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(push.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_stop_calls_are_idempotent() {
        let clock = clock_at(7, 0);
        let store = InMemoryAlarmStore::new(vec![], vec![]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store, cache, fetcher, push, Duration::from_secs(3600));
        scheduler.start().await.unwrap();
        scheduler.stop().await;
        scheduler.stop().await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn duplicate_start_fails_with_already_running() {
        let clock = clock_at(7, 0);
        let store = InMemoryAlarmStore::new(vec![], vec![]);
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush { calls: AtomicUsize::new(0), all_fail: false, sleep_per_call: None });

        let scheduler = SchedulerCore::new(clock, store, cache, fetcher, push, Duration::from_secs(3600));
        scheduler.start().await.unwrap();
        let result = scheduler.start().await;
        assert!(matches!(result, Err(SchedulerError::AlreadyRunning)));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_alarms_within_deadline() {
        let clock = clock_at(7, 0);
        let target = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let store = InMemoryAlarmStore::new(
            vec![
                alarm(1, 1, target, "Chicago"),
                alarm(2, 2, target, "London"),
                alarm(3, 3, target, "Paris"),
            ],
            vec![token(1, 1), token(2, 2), token(3, 3)],
        );
        let cache = Arc::new(InMemoryCache::new(Duration::from_secs(1800)));
        cache
            .set(
                "Chicago",
                WeatherRecord {
                    temperature_c: 20.0,
                    humidity_pct: 50.0,
                    precipitation_mm: 0.0,
                    wind_speed_mps: 1.0,
                    observed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        cache
            .set(
                "London",
                WeatherRecord {
                    temperature_c: 18.0,
                    humidity_pct: 70.0,
                    precipitation_mm: 1.0,
                    wind_speed_mps: 2.0,
                    observed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        cache
            .set(
                "Paris",
                WeatherRecord {
                    temperature_c: 22.0,
                    humidity_pct: 55.0,
                    precipitation_mm: 0.0,
                    wind_speed_mps: 1.5,
                    observed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail: false });
        let push = Arc::new(CountingPush {
            calls: AtomicUsize::new(0),
            all_fail: false,
            sleep_per_call: Some(Duration::from_millis(500)),
        });

        let scheduler = SchedulerCore::with_drain_deadline(
            clock,
            store,
            cache,
            fetcher,
            push,
            Duration::from_secs(3600),
            Duration::from_secs(5),
        );
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        scheduler.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
