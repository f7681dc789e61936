use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::ScheduleConfig;

// ════════════════════════════════════════════════════════════════
//  Trigger
// ════════════════════════════════════════════════════════════════

/// Внешний запуск генератора вне расписания.
///
/// Несколько `fire()` до того, как задача их увидела, схлопываются в один тик.
#[derive(Clone, Default)]
pub struct Trigger {
    notify: Arc<Notify>,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.notify.notify_one();
    }

    async fn fired(&self) {
        self.notify.notified().await;
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Trigger")
    }
}

// ════════════════════════════════════════════════════════════════
//  Schedule
// ════════════════════════════════════════════════════════════════

/// Почему сработал тик.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    Startup,
    Interval,
    Trigger,
}

/// Когда вызывать генератор.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    every: Option<Duration>,
    align: bool,
    immediate: bool,
    trigger: Option<Trigger>,
}

impl Schedule {
    /// Fixed period, first tick right away.
    pub fn every(period: Duration) -> Self {
        Self {
            every: Some(period),
            align: false,
            immediate: true,
            trigger: None,
        }
    }

    /// Only on `Trigger::fire`.
    pub fn triggered(trigger: Trigger) -> Self {
        Self {
            every: None,
            align: false,
            immediate: false,
            trigger: Some(trigger),
        }
    }

    /// Tick at wall-clock multiples of the period (e.g. every full minute).
    pub fn aligned(mut self) -> Self {
        self.align = true;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Build from config. Returns the trigger handle when the config asks for one.
    pub fn from_config(config: &ScheduleConfig) -> (Self, Option<Trigger>) {
        let trigger = config.trigger.then(Trigger::new);
        let schedule = Self {
            every: config.interval_ms.map(Duration::from_millis),
            align: config.align,
            immediate: config.immediate,
            trigger: trigger.clone(),
        };
        (schedule, trigger)
    }

    pub fn start(&self) -> Ticks {
        let interval = self.every.map(|period| {
            let delay = if self.align {
                align_delay(sideinput_api::now_ms(), period)
            } else {
                period
            };
            let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Ticks {
            interval,
            trigger: self.trigger.clone(),
            startup: self.immediate,
        }
    }
}

/// Time from `now_ms` to the next multiple of `period` since the Unix epoch.
fn align_delay(now_ms: i64, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let rem = now_ms.rem_euclid(period_ms);
    Duration::from_millis((period_ms - rem) as u64)
}

/// Поток тиков запущенного расписания.
pub struct Ticks {
    interval: Option<Interval>,
    trigger: Option<Trigger>,
    startup: bool,
}

impl Ticks {
    pub async fn next(&mut self) -> TickSource {
        if std::mem::take(&mut self.startup) {
            return TickSource::Startup;
        }
        tokio::select! {
            _ = next_interval(&mut self.interval) => TickSource::Interval,
            _ = next_trigger(&self.trigger) => TickSource::Trigger,
        }
    }
}

async fn next_interval(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_trigger(trigger: &Option<Trigger>) {
    match trigger {
        Some(t) => t.fired().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_delay_reaches_next_boundary() {
        let minute = Duration::from_secs(60);
        assert_eq!(align_delay(60_000 * 10 + 15_000, minute), Duration::from_secs(45));
        assert_eq!(align_delay(60_000 * 10, minute), minute);
        assert_eq!(align_delay(1, Duration::from_millis(1000)), Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticks_after_startup() {
        let mut ticks = Schedule::every(Duration::from_secs(5)).start();
        let t0 = Instant::now();
        assert_eq!(ticks.next().await, TickSource::Startup);
        assert_eq!(ticks.next().await, TickSource::Interval);
        assert_eq!(t0.elapsed(), Duration::from_secs(5));
        assert_eq!(ticks.next().await, TickSource::Interval);
        assert_eq!(t0.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn no_startup_tick_when_disabled() {
        let mut ticks = Schedule::every(Duration::from_secs(3)).immediate(false).start();
        let t0 = Instant::now();
        assert_eq!(ticks.next().await, TickSource::Interval);
        assert_eq!(t0.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_fires_tick_and_coalesces() {
        let trigger = Trigger::new();
        let mut ticks = Schedule::triggered(trigger.clone()).start();

        trigger.fire();
        trigger.fire();
        assert_eq!(ticks.next().await, TickSource::Trigger);

        let pending = tokio::time::timeout(Duration::from_secs(60), ticks.next()).await;
        assert!(pending.is_err());
    }

    #[test]
    fn from_config_hands_out_trigger() {
        let cfg = ScheduleConfig {
            interval_ms: Some(1000),
            align: false,
            immediate: true,
            trigger: true,
        };
        let (schedule, trigger) = Schedule::from_config(&cfg);
        assert!(trigger.is_some());
        assert_eq!(schedule.every, Some(Duration::from_secs(1)));
        assert!(schedule.trigger.is_some());
    }
}
