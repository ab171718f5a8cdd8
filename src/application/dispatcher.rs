use crate::application::executors::{ActionContext, ActionResult, Executor, WebhookContext};
use crate::error::{ReconcileError, Result};
use std::sync::Arc;

/// Picks a strategy by trying registered executors in order.
///
/// The list is fixed at construction. More specific predicates must come before
/// their general counterparts, since the first executor that supports the name
/// and is applicable to the context wins.
pub struct Dispatcher<C> {
    executors: Vec<Arc<dyn Executor<C>>>,
}

pub type ActionDispatcher = Dispatcher<ActionContext>;
pub type WebhookDispatcher = Dispatcher<WebhookContext>;

impl<C> Dispatcher<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(executors: Vec<Arc<dyn Executor<C>>>) -> Self {
        Self { executors }
    }

    pub fn resolve(&self, name: &str, ctx: &C) -> Result<Arc<dyn Executor<C>>> {
        self.executors
            .iter()
            .find(|executor| executor.is_supported(name) && executor.is_applicable(ctx))
            .cloned()
            .ok_or_else(|| ReconcileError::UnsupportedAction(name.to_string()))
    }

    pub async fn dispatch(&self, name: &str, ctx: C) -> Result<ActionResult> {
        let executor = self.resolve(name, &ctx)?;
        executor.execute(ctx).await
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
