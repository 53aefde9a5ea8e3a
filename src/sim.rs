//! A host on a virtual clock, used by `hidecursor simulate` and by tests.

use crate::clock::{Clock, ManualClock};
use crate::config::Config;
use crate::error::{HostError, InitError};
use crate::extension::Extension;
use crate::host::{ActivitySignal, ActivitySource, Host, PointerSink, Tracker};
use crate::scheduler::{CancelToken, MainLoop};
use crate::signal::{Handler, SignalHub};
use crate::watcher::Phase;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkCall {
    pub at_micros: u64,
    pub visible: bool,
}

/// In-memory pointer that reveals itself on real motion, like a compositor does.
pub struct SimTracker {
    clock: Rc<ManualClock>,
    visible: Cell<bool>,
    signals: SignalHub,
    sink_calls: RefCell<Vec<SinkCall>>,
    sink_failing: Cell<bool>,
}

impl SimTracker {
    fn new(clock: Rc<ManualClock>) -> Self {
        Self {
            clock,
            visible: Cell::new(true),
            signals: SignalHub::new(),
            sink_calls: RefCell::new(Vec::new()),
            sink_failing: Cell::new(false),
        }
    }

    /// The user moved the pointer.
    pub fn user_move(&self) {
        self.visible.set(true);
        self.signals.emit(ActivitySignal::PositionInvalidated);
    }

    /// The pointer was moved programmatically; a hidden pointer stays hidden.
    pub fn warp(&self) {
        self.signals.emit(ActivitySignal::PositionInvalidated);
    }

    pub fn change_shape(&self) {
        self.signals.emit(ActivitySignal::CursorChanged);
    }

    /// Someone else flipped pointer visibility.
    pub fn toggle_visibility(&self) {
        self.visible.set(!self.visible.get());
        self.signals.emit(ActivitySignal::VisibilityChanged);
    }

    pub fn set_sink_failing(&self, failing: bool) {
        self.sink_failing.set(failing);
    }

    pub fn sink_calls(&self) -> Vec<SinkCall> {
        self.sink_calls.borrow().clone()
    }

    pub fn handler_count(&self) -> usize {
        self.signals.handler_count()
    }
}

impl ActivitySource for SimTracker {
    fn connect(&self, signal: ActivitySignal, handler: Handler) -> CancelToken {
        self.signals.connect(signal, handler)
    }

    fn is_pointer_visible(&self) -> bool {
        self.visible.get()
    }
}

impl PointerSink for SimTracker {
    fn set_pointer_visible(&self, visible: bool) -> Result<(), HostError> {
        if self.sink_failing.get() {
            return Err(HostError::Sink {
                reason: "simulated failure".to_string(),
            });
        }
        self.visible.set(visible);
        self.sink_calls.borrow_mut().push(SinkCall {
            at_micros: self.clock.now_micros(),
            visible,
        });
        Ok(())
    }
}

pub struct SimHost {
    clock: Rc<ManualClock>,
    main_loop: MainLoop,
    tracker: Rc<SimTracker>,
    attached: Cell<bool>,
}

impl SimHost {
    pub fn new() -> Self {
        let clock = Rc::new(ManualClock::new(0));
        Self {
            main_loop: MainLoop::new(clock.clone()),
            tracker: Rc::new(SimTracker::new(clock.clone())),
            clock,
            attached: Cell::new(true),
        }
    }

    pub fn sim_tracker(&self) -> &SimTracker {
        &self.tracker
    }

    pub fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    /// Makes the tracker unavailable to the next watcher start.
    pub fn detach(&self) {
        self.attached.set(false);
    }

    pub fn attach(&self) {
        self.attached.set(true);
    }

    /// Moves virtual time to `micros`, firing every timer at its own deadline.
    pub fn advance_to(&self, micros: u64) {
        while let Some(deadline) = self.main_loop.next_deadline() {
            if deadline > micros {
                break;
            }
            self.clock.set(deadline);
            self.main_loop.dispatch();
        }
        self.clock.set(micros);
    }

    pub fn advance_by(&self, micros: u64) {
        self.advance_to(self.clock.now_micros().saturating_add(micros));
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SimHost {
    fn clock(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    fn tracker(&self) -> Result<Rc<dyn Tracker>, InitError> {
        if !self.attached.get() {
            return Err(InitError::TrackerUnavailable {
                reason: "tracker detached".to_string(),
            });
        }
        Ok(self.tracker.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move,
    Warp,
    Shape,
    Toggle,
    Enable,
    Disable,
    Detach,
    Attach,
    Wait,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move" => Ok(Action::Move),
            "warp" => Ok(Action::Warp),
            "shape" => Ok(Action::Shape),
            "toggle" => Ok(Action::Toggle),
            "enable" => Ok(Action::Enable),
            "disable" => Ok(Action::Disable),
            "detach" => Ok(Action::Detach),
            "attach" => Ok(Action::Attach),
            "wait" => Ok(Action::Wait),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Move => "move",
            Action::Warp => "warp",
            Action::Shape => "shape",
            Action::Toggle => "toggle",
            Action::Enable => "enable",
            Action::Disable => "disable",
            Action::Detach => "detach",
            Action::Attach => "attach",
            Action::Wait => "wait",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub at: Duration,
    pub action: Action,
}

#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {reason}")]
pub struct ScriptError {
    pub line: usize,
    pub reason: String,
}

/// Parses `<offset> <action>` lines. Offsets use humantime syntax and must
/// not go backwards.
pub fn parse_script(input: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps: Vec<Step> = Vec::new();

    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }

        let mut fields = text.split_whitespace();
        let (Some(offset), Some(action), None) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(ScriptError {
                line,
                reason: format!("expected '<offset> <action>', got '{}'", text),
            });
        };

        let at = humantime::parse_duration(offset).map_err(|e| ScriptError {
            line,
            reason: format!("bad offset '{}': {}", offset, e),
        })?;
        if u64::try_from(at.as_micros()).is_err() {
            return Err(ScriptError {
                line,
                reason: format!("offset '{}' is too far in the future", offset),
            });
        }
        let action = action
            .parse::<Action>()
            .map_err(|reason| ScriptError { line, reason })?;

        if let Some(prev) = steps.last() {
            if at < prev.at {
                return Err(ScriptError {
                    line,
                    reason: format!("offset '{}' goes back in time", offset),
                });
            }
        }
        steps.push(Step { at, action });
    }

    Ok(steps)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub at_micros: u64,
    pub text: String,
}

/// Runs `steps` against a fresh simulated host and returns what happened:
/// each step, each sink call, and each phase change. The extension is
/// enabled at time zero and disabled after the last step.
pub fn run_script(steps: &[Step], config: Config) -> Vec<Record> {
    let mut ext = Extension::new(SimHost::new(), config);
    let mut records = Vec::new();
    let mut seen_calls = 0;
    let mut phase = Phase::Disabled;

    let mut note = |ext: &Extension<SimHost>, records: &mut Vec<Record>, phase: &mut Phase| {
        let calls = ext.host().sim_tracker().sink_calls();
        for call in &calls[seen_calls..] {
            records.push(Record {
                at_micros: call.at_micros,
                text: if call.visible { "show" } else { "hide" }.to_string(),
            });
        }
        seen_calls = calls.len();

        let current = ext.phase();
        if current != *phase {
            records.push(Record {
                at_micros: ext.host().now_micros(),
                text: format!("phase {} -> {}", phase, current),
            });
            *phase = current;
        }
    };

    let start = ext.enable();
    if let Err(e) = start {
        records.push(Record {
            at_micros: 0,
            text: format!("enable failed: {}", e),
        });
    }
    note(&ext, &mut records, &mut phase);

    for step in steps {
        let at = u64::try_from(step.at.as_micros()).unwrap_or(u64::MAX);

        // Fire ticks one by one so phase changes are stamped with their tick.
        while let Some(deadline) = ext.host().main_loop().next_deadline() {
            if deadline > at {
                break;
            }
            ext.host().advance_to(deadline);
            note(&ext, &mut records, &mut phase);
        }
        ext.host().advance_to(at);

        records.push(Record {
            at_micros: at,
            text: step.action.to_string(),
        });

        match step.action {
            Action::Move => ext.host().sim_tracker().user_move(),
            Action::Warp => ext.host().sim_tracker().warp(),
            Action::Shape => ext.host().sim_tracker().change_shape(),
            Action::Toggle => ext.host().sim_tracker().toggle_visibility(),
            Action::Enable => {
                if let Err(e) = ext.enable() {
                    records.push(Record {
                        at_micros: at,
                        text: format!("enable failed: {}", e),
                    });
                }
            }
            Action::Disable => ext.disable(),
            Action::Detach => ext.host().detach(),
            Action::Attach => ext.host().attach(),
            Action::Wait => {}
        }
        note(&ext, &mut records, &mut phase);
    }

    ext.disable();
    note(&ext, &mut records, &mut phase);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ActivityPolicy;

    fn texts(records: &[Record]) -> Vec<(u64, &str)> {
        records
            .iter()
            .map(|r| (r.at_micros, r.text.as_str()))
            .collect()
    }

    #[test]
    fn test_parse_script() {
        let steps = parse_script(
            "# warm up\n\
             0s start\n",
        );
        assert_eq!(
            steps,
            Err(ScriptError {
                line: 2,
                reason: "unknown action 'start'".to_string()
            })
        );

        let steps = parse_script("2500ms move  # user\n\n6s warp\n6s wait\n").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].at, Duration::from_millis(2500));
        assert_eq!(steps[0].action, Action::Move);
        assert_eq!(steps[2].action, Action::Wait);
    }

    #[test]
    fn test_parse_script_rejects_bad_lines() {
        assert_eq!(parse_script("3s move\n1s move").unwrap_err().line, 2);
        assert_eq!(parse_script("soon move").unwrap_err().line, 1);
        assert_eq!(parse_script("1s move now").unwrap_err().line, 1);
        assert_eq!(parse_script("1s").unwrap_err().line, 1);
        assert_eq!(
            parse_script("1s move\n600000000y move").unwrap_err(),
            ScriptError {
                line: 2,
                reason: "offset '600000000y' is too far in the future".to_string()
            }
        );
    }

    #[test]
    fn test_run_script_timeline() {
        let steps = parse_script("2500ms move\n5s wait\n").unwrap();
        let records = run_script(&steps, Config::default());

        assert_eq!(
            texts(&records),
            vec![
                (0, "phase disabled -> visible"),
                (2_000_000, "hide"),
                (2_000_000, "phase visible -> hidden"),
                (2_500_000, "move"),
                (2_500_000, "phase hidden -> visible"),
                (5_000_000, "hide"),
                (5_000_000, "phase visible -> hidden"),
                (5_000_000, "wait"),
                (5_000_000, "show"),
                (5_000_000, "phase hidden -> disabled"),
            ]
        );
    }

    #[test]
    fn test_run_script_guarded_warp_is_ignored() {
        let steps = parse_script("2500ms warp\n3s wait\n").unwrap();
        let config = Config {
            policy: ActivityPolicy::Guarded,
            ..Config::default()
        };
        let records = run_script(&steps, config);

        assert!(!records.iter().any(|r| r.text == "phase hidden -> visible"));
    }

    #[test]
    fn test_run_script_init_failure() {
        let steps = parse_script("0s detach\n1s disable\n2s enable\n3s disable\n4s attach\n5s enable\n").unwrap();
        let records = run_script(&steps, Config::default());
        let texts = texts(&records);

        assert!(texts.contains(&(2_000_000, "enable failed: pointer tracker unavailable: tracker detached")));
        assert!(texts.contains(&(5_000_000, "phase disabled -> visible")));
    }
}
