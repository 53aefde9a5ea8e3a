use crate::clock::Clock;
use crate::error::{HostError, InitError};
use crate::scheduler::{CancelToken, MainLoop};
use crate::signal::Handler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Signals a tracker emits that count as pointer activity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ActivitySignal {
    /// The pointer moved.
    PositionInvalidated,
    /// Pointer visibility was changed by someone other than the watcher.
    VisibilityChanged,
    /// The pointer shape changed.
    CursorChanged,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 3] = [
        ActivitySignal::PositionInvalidated,
        ActivitySignal::VisibilityChanged,
        ActivitySignal::CursorChanged,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActivitySignal::PositionInvalidated => "position-invalidated",
            ActivitySignal::VisibilityChanged => "visibility-changed",
            ActivitySignal::CursorChanged => "cursor-changed",
        }
    }
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where activity comes from.
pub trait ActivitySource {
    fn connect(&self, signal: ActivitySignal, handler: Handler) -> CancelToken;
    fn is_pointer_visible(&self) -> bool;
}

/// Where visibility decisions go.
pub trait PointerSink {
    fn set_pointer_visible(&self, visible: bool) -> Result<(), HostError>;
}

/// A pointer tracker is both the activity source and the visibility sink.
pub trait Tracker: ActivitySource + PointerSink {}

impl<T: ActivitySource + PointerSink> Tracker for T {}

/// Capabilities a host shell lends to the watcher.
pub trait Host {
    fn clock(&self) -> Rc<dyn Clock>;
    fn main_loop(&self) -> &MainLoop;
    fn tracker(&self) -> Result<Rc<dyn Tracker>, InitError>;
}
