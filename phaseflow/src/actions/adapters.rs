//! Closure adapters for shared actions.

use super::{Action, ActionResult, InvokeStyle};
use crate::control::ActionControl;
use std::sync::Arc;

/// A pure `&C -> C` action.
pub struct PureFn<F>(F);

impl<C, F> Action<C> for PureFn<F>
where
    F: Fn(&C) -> ActionResult<C> + Send + Sync,
{
    fn apply(&self, ctx: &C, _control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        (self.0)(ctx)
    }

    fn invoke_style(&self) -> InvokeStyle {
        InvokeStyle::Unary
    }
}

/// An action that also receives the control handle.
pub struct ControlledFn<F>(F);

impl<C, F> Action<C> for ControlledFn<F>
where
    F: Fn(&C, &mut dyn ActionControl<C>) -> ActionResult<C> + Send + Sync,
{
    fn apply(&self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        (self.0)(ctx, control)
    }
}

/// A pure action returning `anyhow::Result`.
pub struct FallibleFn<F>(F);

impl<C, F> Action<C> for FallibleFn<F>
where
    F: Fn(&C) -> anyhow::Result<C> + Send + Sync,
{
    fn apply(&self, ctx: &C, _control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        (self.0)(ctx).map_err(Into::into)
    }

    fn invoke_style(&self) -> InvokeStyle {
        InvokeStyle::Unary
    }
}

/// Wraps a fallible pure function.
pub fn pure<C, F>(f: F) -> Arc<dyn Action<C>>
where
    C: 'static,
    F: Fn(&C) -> ActionResult<C> + Send + Sync + 'static,
{
    Arc::new(PureFn(f))
}

/// Wraps an infallible pure function.
pub fn map<C, F>(f: F) -> Arc<dyn Action<C>>
where
    C: 'static,
    F: Fn(&C) -> C + Send + Sync + 'static,
{
    Arc::new(PureFn(move |ctx: &C| Ok(f(ctx))))
}

/// Wraps a function that uses the control handle.
pub fn controlled<C, F>(f: F) -> Arc<dyn Action<C>>
where
    C: 'static,
    F: Fn(&C, &mut dyn ActionControl<C>) -> ActionResult<C> + Send + Sync + 'static,
{
    Arc::new(ControlledFn(f))
}

/// Wraps a function returning `anyhow::Result`.
pub fn fallible<C, F>(f: F) -> Arc<dyn Action<C>>
where
    C: 'static,
    F: Fn(&C) -> anyhow::Result<C> + Send + Sync + 'static,
{
    Arc::new(FallibleFn(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::StepFault;
    use crate::control::ExecutionControl;

    #[test]
    fn test_pure_is_unary() {
        let action = pure(|n: &i32| Ok(n + 1));
        let mut control = ExecutionControl::new("p", None);
        assert_eq!(action.invoke_style(), InvokeStyle::Unary);
        assert_eq!(action.apply(&1, &mut control).unwrap(), 2);
    }

    #[test]
    fn test_controlled_can_short_circuit() {
        let action = controlled(|n: &i32, control: &mut dyn ActionControl<i32>| {
            control.short_circuit();
            Ok(*n)
        });
        let mut control = ExecutionControl::new("p", None);
        let _ = action.apply(&1, &mut control);
        assert!(control.is_short_circuited());
        assert_eq!(action.invoke_style(), InvokeStyle::Controlled);
    }

    #[test]
    fn test_fallible_maps_anyhow_to_failure() {
        let action = fallible(|_: &i32| anyhow::bail!("no stock"));
        let mut control = ExecutionControl::new("p", None);
        let fault = action.apply(&1, &mut control).unwrap_err();
        assert!(matches!(fault, StepFault::Failed(ref e) if e.message() == "no stock"));
    }
}
