/// A state that moves on inputs, recording what it learns in a context.
///
/// Inputs that make no sense in the current state leave it unchanged.
pub trait FiniteStateMachine: Sized {
    type Input;
    type Context;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self;

    /// Transition in place.
    fn advance(&mut self, input: Self::Input, context: &mut Self::Context)
    where
        Self: Copy,
    {
        *self = self.transition(input, context);
    }
}
