use crate::clock::Clock;
use crate::config::Config;
use crate::error::InitError;
use crate::host::{ActivitySignal, Host, Tracker};
use crate::scheduler::CancelToken;
use crate::utils::format_micros;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// How activity signals are treated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityPolicy {
    /// Every signal resets the idle clock.
    Unconditional,
    /// Signals only count while the tracker reports the pointer as visible,
    /// so synthetic motion of a hidden pointer does not re-arm the timer.
    #[default]
    Guarded,
}

impl fmt::Display for ActivityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityPolicy::Unconditional => f.write_str("unconditional"),
            ActivityPolicy::Guarded => f.write_str("guarded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disabled,
    Visible,
    Hidden,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Disabled => f.write_str("disabled"),
            Phase::Visible => f.write_str("visible"),
            Phase::Hidden => f.write_str("hidden"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub hides: u32,
    pub reveals: u32,
    pub activity: u32,
    pub ignored: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStatus {
    pub phase: Phase,
    pub last_activity_micros: u64,
    pub idle_micros: u64,
    pub counters: Counters,
}

struct WatcherState {
    last_activity: Cell<u64>,
    visible: Cell<bool>,
    counters: Cell<Counters>,
}

impl WatcherState {
    fn count(&self, f: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.get();
        f(&mut counters);
        self.counters.set(counters);
    }
}

/// State shared with the loop callbacks. Callbacks only hold weak references.
struct Core {
    state: WatcherState,
    clock: Rc<dyn Clock>,
    tracker: Rc<dyn Tracker>,
    idle_threshold_micros: u64,
    policy: ActivityPolicy,
}

impl Core {
    fn tick(&self) {
        if !self.state.visible.get() {
            return;
        }

        let elapsed = self
            .clock
            .now_micros()
            .saturating_sub(self.state.last_activity.get());
        if elapsed < self.idle_threshold_micros {
            return;
        }

        // Lowered before the sink call so a re-entrant signal sees the new state.
        self.state.visible.set(false);
        match self.tracker.set_pointer_visible(false) {
            Ok(()) => {
                self.state.count(|c| c.hides += 1);
                debug!("Pointer idle for {}, hidden", format_micros(elapsed));
            }
            Err(e) => {
                self.state.visible.set(true);
                warn!("Failed to hide pointer: {}", e);
            }
        }
    }

    fn on_activity(&self, signal: ActivitySignal) {
        if self.policy == ActivityPolicy::Guarded && !self.tracker.is_pointer_visible() {
            self.state.count(|c| c.ignored += 1);
            debug!("Ignoring {} while the pointer is hidden", signal);
            return;
        }

        let now = self.clock.now_micros();
        if now > self.state.last_activity.get() {
            self.state.last_activity.set(now);
        }
        self.state.count(|c| c.activity += 1);

        if !self.state.visible.get() {
            self.state.visible.set(true);
            self.state.count(|c| c.reveals += 1);
            debug!("Activity ({}) after hide, idle timer re-armed", signal);
        }
    }

    fn status(&self) -> WatcherStatus {
        let last_activity = self.state.last_activity.get();
        WatcherStatus {
            phase: if self.state.visible.get() {
                Phase::Visible
            } else {
                Phase::Hidden
            },
            last_activity_micros: last_activity,
            idle_micros: self.clock.now_micros().saturating_sub(last_activity),
            counters: self.state.counters.get(),
        }
    }
}

/// A running idle watcher. Stopping it, explicitly or by dropping it,
/// releases the timer and subscriptions and shows the pointer again.
pub struct Watcher {
    core: Option<Rc<Core>>,
    tracker: Option<Rc<dyn Tracker>>,
    timer: Option<CancelToken>,
    subscriptions: BTreeMap<ActivitySignal, CancelToken>,
}

impl Watcher {
    pub fn start(host: &dyn Host, config: &Config) -> Result<Self, InitError> {
        config.validate()?;
        let tracker = host.tracker()?;
        let clock = host.clock();

        let core = Rc::new(Core {
            state: WatcherState {
                last_activity: Cell::new(clock.now_micros()),
                visible: Cell::new(true),
                counters: Cell::new(Counters::default()),
            },
            clock,
            tracker: tracker.clone(),
            idle_threshold_micros: config.idle_threshold_micros,
            policy: config.policy,
        });

        let weak = Rc::downgrade(&core);
        let timer = host.main_loop().schedule_periodic(config.poll_interval(), move || {
            if let Some(core) = weak.upgrade() {
                core.tick();
            }
        });

        let mut subscriptions = BTreeMap::new();
        for &signal in &config.signals {
            let weak: Weak<Core> = Rc::downgrade(&core);
            let token = tracker.connect(
                signal,
                Rc::new(move |signal: ActivitySignal| {
                    if let Some(core) = weak.upgrade() {
                        core.on_activity(signal);
                    }
                }),
            );
            subscriptions.insert(signal, token);
        }

        debug!(
            "Watching {} signal(s), hiding after {} (policy: {})",
            subscriptions.len(),
            format_micros(config.idle_threshold_micros),
            config.policy
        );

        Ok(Self {
            core: Some(core),
            tracker: Some(tracker),
            timer: Some(timer),
            subscriptions,
        })
    }

    /// Runs one idle check immediately, as the periodic timer would.
    pub fn tick(&self) {
        if let Some(core) = &self.core {
            core.tick();
        }
    }

    /// Feeds one activity signal directly, as a subscription would.
    pub fn on_activity(&self, signal: ActivitySignal) {
        if let Some(core) = &self.core {
            core.on_activity(signal);
        }
    }

    pub fn status(&self) -> WatcherStatus {
        match &self.core {
            Some(core) => core.status(),
            None => WatcherStatus {
                phase: Phase::Disabled,
                last_activity_micros: 0,
                idle_micros: 0,
                counters: Counters::default(),
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some() || !self.subscriptions.is_empty()
    }

    /// Idempotent; each resource is released on its own.
    pub fn stop(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }

        while let Some((_, mut token)) = self.subscriptions.pop_first() {
            token.cancel();
        }

        self.core = None;

        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.set_pointer_visible(true) {
                warn!("Failed to restore pointer on stop: {}", e);
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("status", &self.status())
            .field("timer", &self.timer.is_some())
            .field("subscriptions", &self.subscriptions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ActivitySource;
    use crate::sim::SimHost;

    const SECOND: u64 = 1_000_000;

    fn config(policy: ActivityPolicy) -> Config {
        Config {
            poll_interval_secs: 1,
            idle_threshold_micros: 2 * SECOND,
            policy,
            signals: ActivitySignal::ALL.to_vec(),
        }
    }

    fn hides(host: &SimHost) -> usize {
        host.sim_tracker()
            .sink_calls()
            .iter()
            .filter(|call| !call.visible)
            .count()
    }

    #[test]
    fn test_start_registers_timer_and_subscriptions() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        assert_eq!(host.main_loop().source_count(), 1);
        assert_eq!(host.sim_tracker().handler_count(), 3);
        assert_eq!(watcher.status().phase, Phase::Visible);
        assert!(host.sim_tracker().sink_calls().is_empty());
    }

    #[test]
    fn test_no_premature_hide() {
        let host = SimHost::new();
        let _watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        for step in 1..=10 {
            host.advance_to(step * SECOND + SECOND / 2);
            host.sim_tracker().user_move();
        }
        assert_eq!(hides(&host), 0);
    }

    #[test]
    fn test_eventual_hide_happens_once() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        host.advance_to(2 * SECOND);
        assert_eq!(hides(&host), 1);
        assert_eq!(watcher.status().phase, Phase::Hidden);
        assert!(!host.sim_tracker().is_pointer_visible());

        host.advance_to(10 * SECOND);
        assert_eq!(hides(&host), 1);
        assert_eq!(watcher.status().counters.hides, 1);
    }

    #[test]
    fn test_activity_resets_idle_clock() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        host.advance_to(2 * SECOND);
        assert_eq!(watcher.status().phase, Phase::Hidden);

        host.advance_to(2 * SECOND + SECOND / 2);
        host.sim_tracker().user_move();
        assert_eq!(watcher.status().phase, Phase::Visible);
        assert_eq!(watcher.status().last_activity_micros, 2 * SECOND + SECOND / 2);

        watcher.tick();
        host.advance_to(4 * SECOND);
        assert_eq!(hides(&host), 1);

        host.advance_to(5 * SECOND);
        assert_eq!(hides(&host), 2);
        assert_eq!(watcher.status().counters.reveals, 1);
    }

    #[test]
    fn test_timeline_scenario() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Unconditional)).unwrap();

        host.advance_to(SECOND);
        assert_eq!(hides(&host), 0);

        host.advance_to(2 * SECOND);
        assert_eq!(hides(&host), 1);

        host.advance_to(2 * SECOND + SECOND / 2);
        host.sim_tracker().user_move();
        assert_eq!(watcher.status().phase, Phase::Visible);

        host.advance_to(3 * SECOND);
        assert_eq!(hides(&host), 1);

        host.advance_to(5 * SECOND);
        assert_eq!(hides(&host), 2);
    }

    #[test]
    fn test_guarded_policy_ignores_synthetic_motion() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        host.advance_to(2 * SECOND);
        let before = watcher.status();
        assert_eq!(before.phase, Phase::Hidden);

        host.advance_to(2 * SECOND + 300_000);
        host.sim_tracker().warp();

        let after = watcher.status();
        assert_eq!(after.phase, Phase::Hidden);
        assert_eq!(after.last_activity_micros, before.last_activity_micros);
        assert_eq!(after.counters.ignored, 1);
    }

    #[test]
    fn test_unconditional_policy_accepts_synthetic_motion() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Unconditional)).unwrap();

        host.advance_to(2 * SECOND);
        host.advance_to(2 * SECOND + 300_000);
        host.sim_tracker().warp();

        let status = watcher.status();
        assert_eq!(status.phase, Phase::Visible);
        assert_eq!(status.last_activity_micros, 2 * SECOND + 300_000);
        // The sink is left alone; the pointer is still hidden until the host shows it.
        assert!(!host.sim_tracker().is_pointer_visible());
    }

    #[test]
    fn test_shape_and_external_visibility_count_as_activity() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        host.advance_to(SECOND + SECOND / 2);
        host.sim_tracker().change_shape();
        host.advance_to(3 * SECOND);
        assert_eq!(hides(&host), 0);

        host.advance_to(4 * SECOND);
        assert_eq!(hides(&host), 1);

        host.sim_tracker().toggle_visibility();
        assert_eq!(watcher.status().phase, Phase::Visible);
        assert_eq!(watcher.status().last_activity_micros, 4 * SECOND);
    }

    #[test]
    fn test_only_configured_signals_are_subscribed() {
        let host = SimHost::new();
        let mut config = config(ActivityPolicy::Unconditional);
        config.signals = vec![ActivitySignal::PositionInvalidated];
        let watcher = Watcher::start(&host, &config).unwrap();

        assert_eq!(host.sim_tracker().handler_count(), 1);
        host.advance_to(2 * SECOND);
        host.sim_tracker().change_shape();
        assert_eq!(watcher.status().phase, Phase::Hidden);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let host = SimHost::new();
        let mut watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();
        host.advance_to(2 * SECOND);
        assert!(!host.sim_tracker().is_pointer_visible());

        watcher.stop();
        assert!(host.sim_tracker().is_pointer_visible());
        assert_eq!(host.main_loop().source_count(), 0);
        assert_eq!(host.sim_tracker().handler_count(), 0);
        assert_eq!(watcher.status().phase, Phase::Disabled);

        watcher.stop();
        assert!(host.sim_tracker().is_pointer_visible());
        assert_eq!(host.main_loop().source_count(), 0);
        assert_eq!(host.sim_tracker().handler_count(), 0);
        assert!(!watcher.is_running());

        host.advance_to(10 * SECOND);
        assert_eq!(hides(&host), 1);
    }

    #[test]
    fn test_tick_and_activity_after_stop_are_noops() {
        let host = SimHost::new();
        let mut watcher = Watcher::start(&host, &config(ActivityPolicy::Unconditional)).unwrap();
        host.advance_to(2 * SECOND);
        watcher.stop();
        let calls = host.sim_tracker().sink_calls();

        host.advance_to(10 * SECOND);
        watcher.tick();
        watcher.on_activity(ActivitySignal::PositionInvalidated);
        host.sim_tracker().warp();
        host.advance_to(20 * SECOND);
        watcher.tick();

        assert_eq!(host.sim_tracker().sink_calls(), calls);
        assert_eq!(watcher.status().phase, Phase::Disabled);
        assert!(host.sim_tracker().is_pointer_visible());
    }

    #[test]
    fn test_guarded_activity_while_visible_resets_clock() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();

        host.advance_to(SECOND + SECOND / 2);
        watcher.on_activity(ActivitySignal::PositionInvalidated);

        let status = watcher.status();
        assert_eq!(status.phase, Phase::Visible);
        assert_eq!(status.last_activity_micros, SECOND + SECOND / 2);
        assert_eq!(status.counters.activity, 1);
        assert_eq!(status.counters.ignored, 0);

        host.advance_to(3 * SECOND);
        assert_eq!(hides(&host), 0);
        host.advance_to(4 * SECOND);
        assert_eq!(hides(&host), 1);
    }

    #[test]
    fn test_drop_restores_pointer() {
        let host = SimHost::new();
        {
            let _watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();
            host.advance_to(3 * SECOND);
            assert!(!host.sim_tracker().is_pointer_visible());
        }
        assert!(host.sim_tracker().is_pointer_visible());
        assert_eq!(host.main_loop().source_count(), 0);
    }

    #[test]
    fn test_start_fails_without_tracker() {
        let host = SimHost::new();
        host.detach();

        let err = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap_err();
        assert!(matches!(err, InitError::TrackerUnavailable { .. }));
        assert_eq!(host.main_loop().source_count(), 0);
        assert_eq!(host.sim_tracker().handler_count(), 0);
        assert!(host.sim_tracker().sink_calls().is_empty());
    }

    #[test]
    fn test_invalid_config_registers_nothing() {
        let host = SimHost::new();
        let mut config = config(ActivityPolicy::Guarded);
        config.idle_threshold_micros = 0;

        assert!(Watcher::start(&host, &config).is_err());
        assert_eq!(host.main_loop().source_count(), 0);
        assert_eq!(host.sim_tracker().handler_count(), 0);
    }

    #[test]
    fn test_failed_hide_is_retried_on_next_tick() {
        let host = SimHost::new();
        let watcher = Watcher::start(&host, &config(ActivityPolicy::Guarded)).unwrap();
        host.sim_tracker().set_sink_failing(true);

        host.advance_to(2 * SECOND);
        assert_eq!(watcher.status().phase, Phase::Visible);
        assert_eq!(watcher.status().counters.hides, 0);

        host.sim_tracker().set_sink_failing(false);
        host.advance_to(3 * SECOND);
        assert_eq!(watcher.status().phase, Phase::Hidden);
        assert_eq!(hides(&host), 1);
    }
}
