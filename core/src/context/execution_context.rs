//! ExecutionContext - ambient values shared by every runner of one execution
//!
//! Carries the cancellation signal, the cluster layout (all optional) and the
//! connection dialer. Absent cluster values mean single-node execution.

use crate::exchange::Dialer;
use ferry_common::ExchangeConfig;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Execution-wide values, cheap to clone.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    all_nodes: Option<Vec<String>>,
    this_node: Option<String>,
    master_node: Option<String>,
    dialer: Option<Arc<dyn Dialer>>,
    config: Arc<ExchangeConfig>,
}

impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("all_nodes", &self.all_nodes)
            .field("this_node", &self.this_node)
            .field("master_node", &self.master_node)
            .field("has_dialer", &self.dialer.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ExecutionContext {
    /// A single-node context with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the addresses of every node taking part in the execution
    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.all_nodes = Some(nodes.into_iter().map(Into::into).collect());
        self
    }

    /// Set the address of the local node
    pub fn with_this_node(mut self, node: impl Into<String>) -> Self {
        self.this_node = Some(node.into());
        self
    }

    /// Set the address of the node that gathers results
    pub fn with_master_node(mut self, node: impl Into<String>) -> Self {
        self.master_node = Some(node.into());
        self
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Share an existing cancellation token, e.g. one owned by a parent task
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn all_nodes(&self) -> Option<&[String]> {
        self.all_nodes.as_deref()
    }

    pub fn this_node(&self) -> Option<&str> {
        self.this_node.as_deref()
    }

    pub fn master_node(&self) -> Option<&str> {
        self.master_node.as_deref()
    }

    pub fn dialer(&self) -> Option<&Arc<dyn Dialer>> {
        self.dialer.as_ref()
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Signal cancellation to every runner sharing this context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the execution is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_single_node() {
        let ctx = ExecutionContext::new();
        assert!(ctx.all_nodes().is_none());
        assert!(ctx.this_node().is_none());
        assert!(ctx.dialer().is_none());
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.config(), &ExchangeConfig::default());
    }

    #[test]
    fn test_builders() {
        let ctx = ExecutionContext::new()
            .with_nodes(["a:1", "b:2"])
            .with_this_node("b:2")
            .with_master_node("a:1");
        assert_eq!(ctx.all_nodes().unwrap(), &["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(ctx.this_node(), Some("b:2"));
        assert_eq!(ctx.master_node(), Some("a:1"));
    }

    #[tokio::test]
    async fn test_cancel_is_shared_by_clones() {
        let ctx = ExecutionContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }
}
