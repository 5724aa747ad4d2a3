//! Mock actions for testing.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use crate::actions::{Action, ActionResult, InvokeStyle, LocalAction, StepFault};
use crate::control::ActionControl;
use crate::errors::{ActionError, PhaseflowError};
use crate::pipeline::Sleeper;

/// A shared action that counts calls and passes the context through.
#[derive(Debug, Default)]
pub struct CountingAction {
    calls: AtomicUsize,
}

impl CountingAction {
    /// Creates a new counting action.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the number of times the action was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<C: Clone> Action<C> for CountingAction {
    fn apply(&self, ctx: &C, _control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ctx.clone())
    }

    fn invoke_style(&self) -> InvokeStyle {
        InvokeStyle::Unary
    }
}

/// A shared action that always fails.
#[derive(Debug)]
pub struct FailingAction {
    error: String,
    calls: AtomicUsize,
}

impl FailingAction {
    /// Creates a failing action with the given message.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            error: error.into(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Returns the number of times the action was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<C> Action<C> for FailingAction {
    fn apply(&self, _ctx: &C, _control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StepFault::failed(self.error.as_str()))
    }
}

/// A shared action that jumps to a label a fixed number of times, then
/// passes the context through.
#[derive(Debug)]
pub struct JumpingAction {
    target: String,
    times: usize,
    delay: Duration,
    calls: AtomicUsize,
}

impl JumpingAction {
    /// Jumps to `target` on the first `times` calls.
    #[must_use]
    pub fn new(target: impl Into<String>, times: usize) -> Arc<Self> {
        Self::with_delay(target, times, Duration::ZERO)
    }

    /// Like [`new`](JumpingAction::new), with a delay before each jump.
    #[must_use]
    pub fn with_delay(target: impl Into<String>, times: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            target: target.into(),
            times,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    /// Always jumps to `target`.
    #[must_use]
    pub fn forever(target: impl Into<String>) -> Arc<Self> {
        Self::new(target, usize::MAX)
    }

    /// Returns the number of times the action was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<C: Clone> Action<C> for JumpingAction {
    fn apply(&self, ctx: &C, _control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.times {
            return Err(StepFault::jump_after(self.target.as_str(), self.delay));
        }
        Ok(ctx.clone())
    }
}

/// Shared counters for [`ResettableProbe`] instances.
#[derive(Debug, Default)]
pub struct ProbeStats {
    created: AtomicUsize,
    resets: AtomicUsize,
    applies: AtomicUsize,
    violations: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    barrier: Option<Barrier>,
    hold: Duration,
}

impl ProbeStats {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Probes wait on a barrier of `parties` inside every apply, so that
    /// `parties` concurrent runs are guaranteed to overlap. `parties` must
    /// not exceed the pool size or the runs deadlock.
    #[must_use]
    pub fn with_barrier(parties: usize) -> Arc<Self> {
        Arc::new(Self {
            barrier: Some(Barrier::new(parties)),
            ..Self::default()
        })
    }

    /// Probes sleep for `hold` inside every apply.
    #[must_use]
    pub fn with_hold(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            ..Self::default()
        })
    }

    /// Returns a factory producing probes that report here.
    pub fn factory(self: &Arc<Self>) -> impl Fn() -> Result<ResettableProbe, ActionError> + Send + Sync + 'static {
        let stats = Arc::clone(self);
        move || Ok(ResettableProbe::new(Arc::clone(&stats)))
    }

    /// Number of probe instances constructed.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of resets.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Number of applies.
    #[must_use]
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Number of applies that saw an instance not reset since its last use.
    #[must_use]
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    /// Highest number of probes observed inside apply at the same time.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

/// A resettable local action that appends `|{instance id}` to the context.
///
/// It flags a violation when an instance is applied again before being
/// reset, and tracks how many probes are inside apply at once.
#[derive(Debug)]
pub struct ResettableProbe {
    id: usize,
    dirty: bool,
    stats: Arc<ProbeStats>,
}

impl ResettableProbe {
    /// Creates a probe reporting to `stats`.
    #[must_use]
    pub fn new(stats: Arc<ProbeStats>) -> Self {
        let id = stats.created.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            id,
            dirty: false,
            stats,
        }
    }

    /// The instance id, starting at 1.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }
}

impl LocalAction<String> for ResettableProbe {
    fn apply(&mut self, ctx: &String, _control: &mut dyn ActionControl<String>) -> ActionResult<String> {
        let stats = &self.stats;
        stats.applies.fetch_add(1, Ordering::SeqCst);
        if self.dirty {
            stats.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.dirty = true;

        let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_active.fetch_max(active, Ordering::SeqCst);
        if let Some(barrier) = &stats.barrier {
            barrier.wait();
        }
        if !stats.hold.is_zero() {
            std::thread::sleep(stats.hold);
        }
        stats.active.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("{ctx}|{}", self.id))
    }

    fn supports_reset(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), ActionError> {
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        self.dirty = false;
        Ok(())
    }
}

/// A sleeper that records every delay and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a new recording sleeper.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the recorded delays, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) -> Result<(), PhaseflowError> {
        self.delays.lock().push(delay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ExecutionControl;

    #[test]
    fn test_counting_action() {
        let action = CountingAction::new();
        let mut control = ExecutionControl::new("p", None);
        assert_eq!(Action::<i32>::apply(action.as_ref(), &1, &mut control).unwrap(), 1);
        assert_eq!(action.call_count(), 1);
    }

    #[test]
    fn test_failing_action() {
        let action = FailingAction::new("nope");
        let mut control = ExecutionControl::new("p", None);
        let err = Action::<i32>::apply(action.as_ref(), &1, &mut control).unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert_eq!(action.call_count(), 1);
    }

    #[test]
    fn test_jumping_action_stops_after_times() {
        let action = JumpingAction::new("top", 2);
        let mut control = ExecutionControl::new("p", None);
        for _ in 0..2 {
            let fault = Action::<i32>::apply(action.as_ref(), &1, &mut control).unwrap_err();
            assert!(matches!(fault, StepFault::Jump(ref s) if s.target_label == "top"));
        }
        assert_eq!(Action::<i32>::apply(action.as_ref(), &1, &mut control).unwrap(), 1);
    }

    #[test]
    fn test_probe_flags_reuse_without_reset() {
        let stats = ProbeStats::new();
        let mut probe = (stats.factory())().unwrap();
        let mut control = ExecutionControl::new("p", None);

        assert_eq!(probe.apply(&"a".to_string(), &mut control).unwrap(), "a|1");
        probe.apply(&"b".to_string(), &mut control).unwrap();
        assert_eq!(stats.violations(), 1);

        probe.reset().unwrap();
        probe.apply(&"c".to_string(), &mut control).unwrap();
        assert_eq!(stats.violations(), 1);
        assert_eq!(stats.resets(), 1);
        assert_eq!(stats.applies(), 3);
    }

    #[test]
    fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(3)).unwrap();
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(3)]);
    }
}
