// Request dispatcher: the single path every transport routes tool calls through.
//
// Order is fixed: resolve, validate, authorize, dispatch. The dispatcher holds
// no mutable state; concurrent calls are independent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinError;

use crate::error::DispatchError;
use crate::models::{CallContext, Outcome};
use crate::registry::Registry;
use crate::schema;

/// Default upper bound on how long a caller waits for one dispatch.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    tool_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Invoke `tool_name` on behalf of the caller described by `ctx`.
    ///
    /// The handler runs on its own task: if the caller goes away (client
    /// disconnect, timeout) the result is discarded but the handler is not
    /// cancelled mid-effect. Handler errors and panics come back as
    /// [`DispatchError::HandlerFault`].
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<Outcome, DispatchError> {
        let start = Instant::now();
        let result = self.run(tool_name, arguments, ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => tracing::info!(
                tool = %tool_name,
                role = %ctx.role,
                transport = %ctx.transport,
                request_id = %ctx.request_id,
                elapsed_ms,
                is_error = outcome.is_error(),
                "dispatch: completed"
            ),
            Err(e @ DispatchError::HandlerFault(_)) => tracing::error!(
                tool = %tool_name,
                request_id = %ctx.request_id,
                elapsed_ms,
                "dispatch: {}",
                e
            ),
            Err(e) => tracing::warn!(
                tool = %tool_name,
                role = %ctx.role,
                request_id = %ctx.request_id,
                code = e.code(),
                "dispatch: rejected: {}",
                e
            ),
        }

        result
    }

    /// Like [`invoke`](Self::invoke), with every failure folded into an
    /// `{error}` outcome for the transports.
    pub async fn invoke_outcome(&self, tool_name: &str, arguments: Value, ctx: &CallContext) -> Outcome {
        self.invoke(tool_name, arguments, ctx)
            .await
            .unwrap_or_else(|e| Outcome::error(e.to_string()))
    }

    async fn run(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<Outcome, DispatchError> {
        let resolved = self.registry.resolve(tool_name)?;
        let descriptor = resolved.descriptor;

        let args = schema::validate(&descriptor.input_schema, arguments)?;

        if !descriptor.permits(&ctx.role) {
            return Err(DispatchError::Forbidden {
                tool: descriptor.name.clone(),
                role: ctx.role.to_string(),
            });
        }

        let handler = resolved.handler;
        let config = descriptor.handler.config.clone();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move { handler.dispatch(args, &task_ctx, &config).await });

        match tokio::time::timeout(self.tool_timeout, task).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(DispatchError::HandlerFault(format!("{:#}", e))),
            Ok(Err(join_err)) => Err(DispatchError::HandlerFault(panic_message(join_err))),
            Err(_) => Err(DispatchError::HandlerFault(format!(
                "timed out after {}s",
                self.tool_timeout.as_secs_f64()
            ))),
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "handler task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            format!("handler panicked: {}", detail)
        }
        Err(_) => "handler task failed".to_string(),
    }
}
