//! Планировщик циклов опроса.
//!
//! Один поток-воркер на поток данных ("stream") выполняет и плановые, и
//! ручные циклы, поэтому циклы одного stream никогда не пересекаются.
//! Ручной запуск сначала захватывает флаг `in_flight` и только потом ставит
//! запрос в очередь: тик, пришедший пока цикл идёт или ждёт в очереди,
//! пропускается и считается в `ticks_missed`.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::constants::{DEFAULT_POLL_INTERVAL, SHUTDOWN_POLL_INTERVAL};
use crate::error::CycleError;
use crate::pipeline::CycleReport;

/// Результат одного цикла
pub type CycleOutcome = Result<CycleReport, CycleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Fetching,
    Diffing,
    Dispatching,
    /// терминальное
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Fetching => "fetching",
            SchedulerState::Diffing => "diffing",
            SchedulerState::Dispatching => "dispatching",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

type StateCell = Arc<Mutex<SchedulerState>>;

fn lock_state(state: &StateCell) -> MutexGuard<'_, SchedulerState> {
    match state.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Контекст одного цикла: создаётся на тик, выбрасывается в конце.
pub struct PollCycle {
    stream: Arc<str>,
    started_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
    state: StateCell,
}

impl PollCycle {
    fn new(stream: Arc<str>, cancelled: Arc<AtomicBool>, state: StateCell) -> Self {
        Self {
            stream,
            started_at: Utc::now(),
            cancelled,
            state,
        }
    }

    /// Цикл вне планировщика (ручной прогон, тесты).
    pub fn detached(stream: &str) -> Self {
        Self::new(
            Arc::from(stream),
            Arc::new(AtomicBool::new(false)),
            Arc::new(Mutex::new(SchedulerState::Idle)),
        )
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Переход конечного автомата планировщика.
    pub fn enter(&self, next: SchedulerState) {
        debug!("[{}] {}", self.stream, next);
        *lock_state(&self.state) = next;
    }
}

/// То, что планировщик запускает на каждом тике.
pub trait CycleRunner: Send + 'static {
    fn run(&mut self, cycle: &PollCycle) -> CycleOutcome;
}

impl<F> CycleRunner for F
where
    F: FnMut(&PollCycle) -> CycleOutcome + Send + 'static,
{
    fn run(&mut self, cycle: &PollCycle) -> CycleOutcome {
        self(cycle)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// имя потока данных, попадает в логи
    pub stream: String,
    pub interval: Duration,
    /// первый цикл сразу после старта, не дожидаясь интервала
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stream: "rates".to_string(),
            interval: DEFAULT_POLL_INTERVAL,
            run_on_start: true,
        }
    }
}

/// Ответ на "проверить сейчас".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    Stopped,
}

/// Ответ на "проверить сейчас и дождаться результата".
#[derive(Debug)]
pub enum ManualCheck {
    Finished(CycleOutcome),
    AlreadyRunning,
    Stopped,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub ticks_missed: u64,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} cycles_ok={} cycles_failed={} ticks_missed={}",
            self.state, self.cycles_ok, self.cycles_failed, self.ticks_missed
        )
    }
}

struct Shared {
    stream: Arc<str>,
    in_flight: AtomicBool,
    shutdown: Arc<AtomicBool>,
    state: StateCell,
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
    ticks_missed: AtomicU64,
}

impl Shared {
    fn try_acquire(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn miss_tick(&self, why: &str) {
        self.ticks_missed.fetch_add(1, Ordering::Relaxed);
        warn!("[{}] tick missed: {why}", self.stream);
    }
}

struct ManualRequest {
    reply: Option<Sender<CycleOutcome>>,
}

/// Клонируемая ручка для ручных запусков и статуса.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    requests: Sender<ManualRequest>,
}

impl SchedulerHandle {
    /// Ставит в очередь один внеочередной цикл и сразу возвращается.
    pub fn trigger_now(&self) -> TriggerOutcome {
        self.enqueue(None)
    }

    /// Как [`trigger_now`](Self::trigger_now), но ждёт итог цикла не дольше `timeout`.
    pub fn trigger_and_wait(&self, timeout: Duration) -> ManualCheck {
        let (tx, rx) = crossbeam_channel::bounded(1);
        match self.enqueue(Some(tx)) {
            TriggerOutcome::Started => match rx.recv_timeout(timeout) {
                Ok(outcome) => ManualCheck::Finished(outcome),
                Err(RecvTimeoutError::Timeout) => ManualCheck::TimedOut,
                Err(RecvTimeoutError::Disconnected) => ManualCheck::Stopped,
            },
            TriggerOutcome::AlreadyRunning => ManualCheck::AlreadyRunning,
            TriggerOutcome::Stopped => ManualCheck::Stopped,
        }
    }

    fn enqueue(&self, reply: Option<Sender<CycleOutcome>>) -> TriggerOutcome {
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return TriggerOutcome::Stopped;
        }
        if !self.shared.try_acquire() {
            return TriggerOutcome::AlreadyRunning;
        }
        if self.requests.send(ManualRequest { reply }).is_err() {
            self.shared.in_flight.store(false, Ordering::Release);
            return TriggerOutcome::Stopped;
        }
        TriggerOutcome::Started
    }

    pub fn state(&self) -> SchedulerState {
        *lock_state(&self.shared.state)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            state: self.state(),
            cycles_ok: self.shared.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.shared.cycles_failed.load(Ordering::Relaxed),
            ticks_missed: self.shared.ticks_missed.load(Ordering::Relaxed),
        }
    }

    /// Просит воркер остановиться после текущего цикла.
    pub fn request_stop(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Периодический драйвер конвейера.
pub struct Scheduler {
    handle: SchedulerHandle,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Запускает воркер. `shutdown` общий с процессом (Ctrl+C и т.п.).
    pub fn spawn<R: CycleRunner>(
        cfg: SchedulerConfig,
        runner: R,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        // при нулевом интервале дедлайн тика никогда не сдвинется вперёд
        if cfg.interval.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "scheduler interval must be greater than zero",
            ));
        }

        let shared = Arc::new(Shared {
            stream: Arc::from(cfg.stream.as_str()),
            in_flight: AtomicBool::new(false),
            shutdown,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            cycles_ok: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            ticks_missed: AtomicU64::new(0),
        });
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("scheduler-{}", cfg.stream))
                .spawn(move || run_worker(shared, cfg, runner, rx))?
        };

        Ok(Self {
            handle: SchedulerHandle {
                shared,
                requests: tx,
            },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Останавливает планировщик; идущий цикл доводится до конца.
    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.handle.request_stop();
        if let Some(worker) = self.worker.take() {
            if let Err(panic) = worker.join() {
                warn!("scheduler thread panicked: {:?}", panic);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_worker<R: CycleRunner>(
    shared: Arc<Shared>,
    cfg: SchedulerConfig,
    mut runner: R,
    requests: Receiver<ManualRequest>,
) {
    info!(
        "[{}] scheduler started, interval {:?}",
        shared.stream, cfg.interval
    );

    let mut next_tick = if cfg.run_on_start {
        Instant::now()
    } else {
        Instant::now() + cfg.interval
    };

    while !shared.shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();

        if now >= next_tick {
            next_tick += cfg.interval;
            if shared.try_acquire() {
                run_one(&shared, &mut runner, None);
                skip_missed_ticks(&shared, &mut next_tick, cfg.interval);
            } else {
                shared.miss_tick("manual check pending");
            }
            continue;
        }

        let wait = (next_tick - now).min(SHUTDOWN_POLL_INTERVAL);
        match requests.recv_timeout(wait) {
            Ok(req) => {
                run_one(&shared, &mut runner, req.reply);
                skip_missed_ticks(&shared, &mut next_tick, cfg.interval);
            }
            Err(RecvTimeoutError::Timeout) => {
                // просто тик
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    *lock_state(&shared.state) = SchedulerState::Stopped;
    info!("[{}] scheduler stopped", shared.stream);
}

/// Тики, выпавшие на время цикла, не копятся в очередь, а пропускаются.
fn skip_missed_ticks(shared: &Shared, next_tick: &mut Instant, interval: Duration) {
    let now = Instant::now();
    while *next_tick <= now {
        shared.miss_tick("previous cycle still running");
        *next_tick += interval;
    }
}

fn run_one<R: CycleRunner>(
    shared: &Shared,
    runner: &mut R,
    reply: Option<Sender<CycleOutcome>>,
) {
    let cycle = PollCycle::new(
        shared.stream.clone(),
        shared.shutdown.clone(),
        shared.state.clone(),
    );

    let outcome = runner.run(&cycle);
    let elapsed = (Utc::now() - cycle.started_at()).num_milliseconds();

    match &outcome {
        Ok(report) => {
            shared.cycles_ok.fetch_add(1, Ordering::Relaxed);
            if report.changes.is_empty() {
                debug!("[{}] cycle done in {elapsed}ms: no changes", shared.stream);
            } else {
                info!("[{}] cycle done in {elapsed}ms: {report}", shared.stream);
            }
        }
        Err(CycleError::Cancelled) => {
            info!("[{}] cycle cancelled", shared.stream);
        }
        Err(CycleError::Fetch(e)) => {
            shared.cycles_failed.fetch_add(1, Ordering::Relaxed);
            warn!("[{}] cycle aborted: {e}", shared.stream);
        }
        Err(CycleError::Store(e)) => {
            shared.cycles_failed.fetch_add(1, Ordering::Relaxed);
            error!("[{}] cycle aborted, nothing dispatched: {e}", shared.stream);
        }
    }

    *lock_state(&shared.state) = SchedulerState::Idle;
    shared.in_flight.store(false, Ordering::Release);

    if let Some(reply) = reply {
        let _ = reply.send(outcome);
    }
}
