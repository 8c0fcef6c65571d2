//! The controller contract.

use std::future::Future;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use octonode_core::ResourceKind;

use crate::context::ControllerState;
use crate::error::RuntimeError;

/// A reconciliation loop driven by changes to its input kinds.
///
/// A pass reads the inputs from the store and converges the controller's
/// output kind towards the desired state derived from them. Passes must
/// recompute everything from the store; the triggering events are not
/// handed to the controller.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Unique name, also used as the writer of every output mutation.
    fn name(&self) -> &str;

    /// Kinds whose changes trigger a pass.
    fn inputs(&self) -> Vec<ResourceKind>;

    /// The kind this controller exclusively owns, if any.
    fn output(&self) -> Option<ResourceKind>;

    /// Runs one reconcile pass.
    async fn reconcile(&self, ctx: &ControllerState) -> Result<(), RuntimeError>;
}

type ReconcileFn =
    Box<dyn Fn(ControllerState) -> BoxFuture<'static, Result<(), RuntimeError>> + Send + Sync>;

/// Adapter that turns a closure into a [`Controller`].
pub struct FnController {
    name: String,
    inputs: Vec<ResourceKind>,
    output: Option<ResourceKind>,
    reconcile: ReconcileFn,
}

impl FnController {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        inputs: Vec<ResourceKind>,
        output: Option<ResourceKind>,
        reconcile: F,
    ) -> Self
    where
        F: Fn(ControllerState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RuntimeError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            inputs,
            output,
            reconcile: Box::new(move |ctx| reconcile(ctx).boxed()),
        }
    }
}

#[async_trait]
impl Controller for FnController {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<ResourceKind> {
        self.inputs.clone()
    }

    fn output(&self) -> Option<ResourceKind> {
        self.output.clone()
    }

    async fn reconcile(&self, ctx: &ControllerState) -> Result<(), RuntimeError> {
        (self.reconcile)(ctx.clone()).await
    }
}

impl std::fmt::Debug for FnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnController")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}
