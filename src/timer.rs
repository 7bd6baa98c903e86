//! Session timer.
//!
//! A small state machine measuring one activity session with a monotonic
//! clock. Elapsed time is persisted exactly once, when the session is stopped
//! or finished; ticks only report progress.

use crate::database::SqliteDatabase;
use crate::error::{Result, TrackerError};
use crate::models::{DailyEntry, EntryUpdate};
use chrono::NaiveDate;
use log::{debug, info};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Where a finished session ends up.
pub trait EntrySink {
    fn record(&self, date: NaiveDate, activity: &str, update: &EntryUpdate) -> Result<DailyEntry>;
}

impl EntrySink for SqliteDatabase {
    fn record(&self, date: NaiveDate, activity: &str, update: &EntryUpdate) -> Result<DailyEntry> {
        self.upsert_daily_entry(date, activity, update)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerState::Idle => "idle",
            TimerState::Running => "running",
            TimerState::Paused => "paused",
            TimerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the user reports when a session ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    /// Overrides the timer's own target when set
    pub target_hours: Option<f64>,
    pub completion_percent: Option<f64>,
    pub stop_reason: Option<String>,
    pub objectives: Option<String>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickUpdate {
    pub state: TimerState,
    pub elapsed: Duration,
    /// Elapsed over target, as a percentage; `None` without a target
    pub progress_percent: Option<f64>,
    pub target_reached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    Started,
    Paused { elapsed: Duration },
    Tick(TickUpdate),
    TargetReached { elapsed: Duration, target_hours: f64 },
    Stopped { entry: DailyEntry },
    Reset,
}

type Observer = Box<dyn FnMut(&TimerEvent) + Send>;

pub struct SessionTimer<C: Clock = MonotonicClock> {
    activity: String,
    target_hours: Option<f64>,
    clock: C,
    state: TimerState,
    accumulated: Duration,
    running_since: Option<Instant>,
    target_notified: bool,
    observers: Vec<Observer>,
}

impl SessionTimer<MonotonicClock> {
    pub fn new(activity: impl Into<String>, target_hours: Option<f64>) -> Self {
        Self::with_clock(activity, target_hours, MonotonicClock)
    }
}

impl<C: Clock> SessionTimer<C> {
    pub fn with_clock(activity: impl Into<String>, target_hours: Option<f64>, clock: C) -> Self {
        SessionTimer {
            activity: activity.into(),
            target_hours: target_hours.filter(|t| t.is_finite() && *t > 0.0),
            clock,
            state: TimerState::Idle,
            accumulated: Duration::ZERO,
            running_since: None,
            target_notified: false,
            observers: Vec::new(),
        }
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn target_hours(&self) -> Option<f64> {
        self.target_hours
    }

    /// Register a callback for every timer event.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&TimerEvent) + Send + 'static,
    {
        self.observers.push(Box::new(callback));
    }

    fn emit(&mut self, event: TimerEvent) {
        for observer in self.observers.iter_mut() {
            observer(&event);
        }
    }

    /// Accumulated time plus the running stretch, if any.
    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + self.clock.now().saturating_duration_since(since),
            None => self.accumulated,
        }
    }

    fn fold_running(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += self.clock.now().saturating_duration_since(since);
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            TimerState::Running => Ok(()),
            TimerState::Stopped => Err(TrackerError::constraint(
                "timer already stopped; reset it before starting a new session",
            )),
            TimerState::Idle | TimerState::Paused => {
                self.running_since = Some(self.clock.now());
                self.state = TimerState::Running;
                debug!("Timer for {} started", self.activity);
                self.emit(TimerEvent::Started);
                Ok(())
            }
        }
    }

    /// Running to Paused. Any other state is left alone.
    pub fn pause(&mut self) {
        if self.state != TimerState::Running {
            return;
        }
        self.fold_running();
        self.state = TimerState::Paused;
        let elapsed = self.accumulated;
        debug!("Timer for {} paused at {:?}", self.activity, elapsed);
        self.emit(TimerEvent::Paused { elapsed });
    }

    /// Report progress. Fires `TargetReached` the first time the target is
    /// crossed in this session.
    pub fn tick(&mut self) -> TickUpdate {
        let elapsed = self.elapsed();
        let progress_percent = self
            .target_hours
            .map(|target| elapsed.as_secs_f64() / SECONDS_PER_HOUR / target * 100.0);
        let target_reached = progress_percent.map_or(false, |p| p >= 100.0);

        let update = TickUpdate {
            state: self.state,
            elapsed,
            progress_percent,
            target_reached,
        };
        self.emit(TimerEvent::Tick(update.clone()));

        if target_reached && !self.target_notified {
            self.target_notified = true;
            if let Some(target_hours) = self.target_hours {
                info!("Target of {:.2}h reached for {}", target_hours, self.activity);
                self.emit(TimerEvent::TargetReached {
                    elapsed,
                    target_hours,
                });
            }
        }
        update
    }

    /// End the session with the given outcome and persist it.
    ///
    /// Returns `Ok(None)` when there is no session to flush, e.g. on a second
    /// stop.
    pub fn stop<S: EntrySink + ?Sized>(
        &mut self,
        sink: &S,
        date: NaiveDate,
        outcome: SessionOutcome,
    ) -> Result<Option<DailyEntry>> {
        self.flush(sink, date, outcome)
    }

    /// Like [`stop`](Self::stop) for a completed session: completion
    /// defaults to 100% and no stop reason is recorded.
    pub fn finish<S: EntrySink + ?Sized>(
        &mut self,
        sink: &S,
        date: NaiveDate,
        outcome: SessionOutcome,
    ) -> Result<Option<DailyEntry>> {
        let outcome = SessionOutcome {
            completion_percent: outcome.completion_percent.or(Some(100.0)),
            stop_reason: None,
            ..outcome
        };
        self.flush(sink, date, outcome)
    }

    fn flush<S: EntrySink + ?Sized>(
        &mut self,
        sink: &S,
        date: NaiveDate,
        outcome: SessionOutcome,
    ) -> Result<Option<DailyEntry>> {
        if !matches!(self.state, TimerState::Running | TimerState::Paused) {
            return Ok(None);
        }

        // A failed write leaves the session paused so it can be flushed again
        self.fold_running();
        self.state = TimerState::Paused;

        let update = EntryUpdate {
            hours_delta: self.accumulated.as_secs_f64() / SECONDS_PER_HOUR,
            target_hours: outcome.target_hours.or(self.target_hours),
            completion_percent: outcome.completion_percent,
            stop_reason: outcome.stop_reason,
            objectives: outcome.objectives,
            comments: outcome.comments,
        };
        let entry = sink.record(date, &self.activity, &update)?;

        self.state = TimerState::Stopped;
        info!(
            "Recorded {:.3}h of {} on {}",
            update.hours_delta, self.activity, date
        );
        self.emit(TimerEvent::Stopped {
            entry: entry.clone(),
        });
        Ok(Some(entry))
    }

    /// Back to Idle with nothing accumulated.
    pub fn reset(&mut self) {
        self.state = TimerState::Idle;
        self.accumulated = Duration::ZERO;
        self.running_since = None;
        self.target_notified = false;
        self.emit(TimerEvent::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<(NaiveDate, String, EntryUpdate)>>,
        fail: bool,
    }

    impl EntrySink for RecordingSink {
        fn record(&self, date: NaiveDate, activity: &str, update: &EntryUpdate) -> Result<DailyEntry> {
            if self.fail {
                return Err(TrackerError::storage("disk gone"));
            }
            self.calls
                .borrow_mut()
                .push((date, activity.to_string(), update.clone()));
            Ok(DailyEntry {
                date,
                activity: activity.to_string(),
                hours: update.hours_delta,
                target_hours: update.target_hours,
                objectives: update.objectives.clone().unwrap_or_default(),
                completion_percent: update.completion_percent,
                stop_reason: update.stop_reason.clone(),
                comments: update.comments.clone().unwrap_or_default(),
            })
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn test_pause_folds_elapsed() {
        let clock = ManualClock::new();
        let mut timer = SessionTimer::with_clock("Math", None, clock.clone());

        timer.start().unwrap();
        clock.advance(Duration::from_secs(600));
        timer.pause();
        clock.advance(Duration::from_secs(600));
        assert_eq!(timer.elapsed(), Duration::from_secs(600));
        assert_eq!(timer.state(), TimerState::Paused);

        timer.start().unwrap();
        clock.advance(Duration::from_secs(300));
        assert_eq!(timer.elapsed(), Duration::from_secs(900));
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let clock = ManualClock::new();
        let mut timer = SessionTimer::with_clock("Math", None, clock.clone());
        timer.start().unwrap();
        clock.advance(Duration::from_secs(60));
        timer.start().unwrap();
        clock.advance(Duration::from_secs(60));
        assert_eq!(timer.elapsed(), Duration::from_secs(120));
    }

    #[test]
    fn test_stop_twice_persists_once() {
        let clock = ManualClock::new();
        let sink = RecordingSink::default();
        let mut timer = SessionTimer::with_clock("Math", Some(2.0), clock.clone());

        timer.start().unwrap();
        clock.advance(Duration::from_secs(1800));
        let outcome = SessionOutcome {
            stop_reason: Some("interrupted".into()),
            completion_percent: Some(40.0),
            ..Default::default()
        };
        let entry = timer.stop(&sink, day(), outcome.clone()).unwrap().unwrap();
        assert!((entry.hours - 0.5).abs() < 1e-9);
        assert_eq!(entry.target_hours, Some(2.0));
        assert_eq!(entry.stop_reason.as_deref(), Some("interrupted"));

        assert!(timer.stop(&sink, day(), outcome).unwrap().is_none());
        assert!(timer.finish(&sink, day(), SessionOutcome::default()).unwrap().is_none());
        assert_eq!(sink.calls.borrow().len(), 1);
        assert_eq!(timer.state(), TimerState::Stopped);
        assert!(timer.start().is_err());
    }

    #[test]
    fn test_finish_defaults_completion_and_clears_reason() {
        let clock = ManualClock::new();
        let sink = RecordingSink::default();
        let mut timer = SessionTimer::with_clock("Rust", None, clock.clone());

        timer.start().unwrap();
        clock.advance(Duration::from_secs(3600));
        timer.pause();
        let entry = timer
            .finish(
                &sink,
                day(),
                SessionOutcome {
                    stop_reason: Some("ignored".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(entry.completion_percent, Some(100.0));
        assert_eq!(entry.stop_reason, None);
        assert!((entry.hours - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_stop_records_nothing() {
        let sink = RecordingSink::default();
        let mut timer = SessionTimer::with_clock("Rust", None, ManualClock::new());
        assert!(timer.stop(&sink, day(), SessionOutcome::default()).unwrap().is_none());
        assert!(sink.calls.borrow().is_empty());
    }

    #[test]
    fn test_failed_flush_can_be_retried() {
        let clock = ManualClock::new();
        let mut timer = SessionTimer::with_clock("Rust", None, clock.clone());
        timer.start().unwrap();
        clock.advance(Duration::from_secs(360));

        let broken = RecordingSink {
            fail: true,
            ..Default::default()
        };
        assert!(timer.stop(&broken, day(), SessionOutcome::default()).is_err());
        assert_eq!(timer.state(), TimerState::Paused);

        let sink = RecordingSink::default();
        let entry = timer.stop(&sink, day(), SessionOutcome::default()).unwrap().unwrap();
        assert!((entry.hours - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_target_reached_fires_once() {
        let clock = ManualClock::new();
        let mut timer = SessionTimer::with_clock("Math", Some(0.5), clock.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        timer.subscribe(move |event| {
            if let TimerEvent::TargetReached { .. } = event {
                sink_events.lock().unwrap().push(event.clone());
            }
        });

        timer.start().unwrap();
        clock.advance(Duration::from_secs(900));
        let update = timer.tick();
        assert_eq!(update.progress_percent, Some(50.0));
        assert!(!update.target_reached);

        clock.advance(Duration::from_secs(900));
        assert!(timer.tick().target_reached);
        clock.advance(Duration::from_secs(60));
        assert!(timer.tick().target_reached);
        assert_eq!(timer.state(), TimerState::Running);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let clock = ManualClock::new();
        let sink = RecordingSink::default();
        let mut timer = SessionTimer::with_clock("Math", None, clock.clone());
        timer.start().unwrap();
        clock.advance(Duration::from_secs(60));
        timer.stop(&sink, day(), SessionOutcome::default()).unwrap();

        timer.reset();
        assert_eq!(timer.state(), TimerState::Idle);
        assert_eq!(timer.elapsed(), Duration::ZERO);
        timer.start().unwrap();
        assert_eq!(timer.state(), TimerState::Running);
    }
}
