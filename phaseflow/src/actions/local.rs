//! Instance-confined actions used by the per-run and pooled lifecycles.

use super::{ActionResult, InvokeStyle};
use crate::control::ActionControl;
use crate::errors::ActionError;

/// An action instance that is never shared between concurrent borrowers.
///
/// Pooled instances must support [`reset`](LocalAction::reset), which
/// restores a construction-equivalent state before the instance goes back to
/// its pool. Any resources held by an instance are released by its `Drop`.
pub trait LocalAction<C>: Send {
    /// Applies the action to the current context.
    fn apply(&mut self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C>;

    /// How the action is invoked.
    fn invoke_style(&self) -> InvokeStyle {
        InvokeStyle::Controlled
    }

    /// Returns true if [`reset`](LocalAction::reset) restores the instance.
    fn supports_reset(&self) -> bool {
        false
    }

    /// Restores the instance to a construction-equivalent state.
    fn reset(&mut self) -> Result<(), ActionError> {
        Ok(())
    }

    /// Name of the concrete type, used to detect pool key collisions.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<C> LocalAction<C> for Box<dyn LocalAction<C>> {
    fn apply(&mut self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        (**self).apply(ctx, control)
    }

    fn invoke_style(&self) -> InvokeStyle {
        (**self).invoke_style()
    }

    fn supports_reset(&self) -> bool {
        (**self).supports_reset()
    }

    fn reset(&mut self) -> Result<(), ActionError> {
        (**self).reset()
    }

    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }
}

/// A stateful closure action.
pub struct LocalFn<F> {
    f: F,
    style: InvokeStyle,
}

impl<C, F> LocalAction<C> for LocalFn<F>
where
    F: FnMut(&C, &mut dyn ActionControl<C>) -> ActionResult<C> + Send,
{
    fn apply(&mut self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        (self.f)(ctx, control)
    }

    fn invoke_style(&self) -> InvokeStyle {
        self.style
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<F>()
    }
}

/// Wraps a stateful closure as a local action.
pub fn local<C, F>(f: F) -> LocalFn<F>
where
    F: FnMut(&C, &mut dyn ActionControl<C>) -> ActionResult<C> + Send,
{
    LocalFn {
        f,
        style: InvokeStyle::Controlled,
    }
}

/// A local action paired with an explicit reset routine.
pub struct Resettable<A, R> {
    inner: A,
    reset: R,
}

impl<A, R> Resettable<A, R> {
    /// Returns the wrapped action.
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<C, A, R> LocalAction<C> for Resettable<A, R>
where
    A: LocalAction<C>,
    R: FnMut(&mut A) -> Result<(), ActionError> + Send,
{
    fn apply(&mut self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        self.inner.apply(ctx, control)
    }

    fn invoke_style(&self) -> InvokeStyle {
        self.inner.invoke_style()
    }

    fn supports_reset(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), ActionError> {
        (self.reset)(&mut self.inner)
    }

    fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }
}

/// Makes `inner` poolable by supplying its reset routine.
pub fn resettable<A, R>(inner: A, reset: R) -> Resettable<A, R>
where
    R: FnMut(&mut A) -> Result<(), ActionError> + Send,
{
    Resettable { inner, reset }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ExecutionControl;

    struct Counter {
        calls: usize,
    }

    impl LocalAction<usize> for Counter {
        fn apply(&mut self, ctx: &usize, _control: &mut dyn ActionControl<usize>) -> ActionResult<usize> {
            self.calls += 1;
            Ok(ctx + self.calls)
        }
    }

    #[test]
    fn test_plain_local_action_is_not_resettable() {
        let counter = Counter { calls: 0 };
        assert!(!LocalAction::<usize>::supports_reset(&counter));
        assert!(LocalAction::<usize>::type_name(&counter).ends_with("Counter"));
    }

    #[test]
    fn test_resettable_restores_state() {
        let mut action = resettable(Counter { calls: 0 }, |c: &mut Counter| {
            c.calls = 0;
            Ok(())
        });
        let mut control = ExecutionControl::new("p", None);

        assert_eq!(action.apply(&0, &mut control).unwrap(), 1);
        assert_eq!(action.apply(&0, &mut control).unwrap(), 2);
        assert!(LocalAction::<usize>::supports_reset(&action));
        LocalAction::<usize>::reset(&mut action).unwrap();
        assert_eq!(action.apply(&0, &mut control).unwrap(), 1);
        assert!(LocalAction::<usize>::type_name(&action).ends_with("Counter"));
    }

    #[test]
    fn test_boxed_local_action_forwards() {
        let mut boxed: Box<dyn LocalAction<usize>> = Box::new(resettable(Counter { calls: 0 }, |c: &mut Counter| {
            c.calls = 0;
            Ok(())
        }));
        assert!(boxed.supports_reset());
        assert!(boxed.type_name().ends_with("Counter"));
        let mut control = ExecutionControl::new("p", None);
        assert_eq!(boxed.apply(&5, &mut control).unwrap(), 6);
    }
}
