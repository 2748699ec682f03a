//! The runner execution contract
//!
//! A [`Runner`] consumes a stream of datasets and produces another. Runners are
//! serializable trait objects, so a plan assembled on one node can be shipped
//! verbatim to its peers.

use crate::context::ExecutionContext;
use crate::data::{TypeRef, wildcard};
use crate::dataset::Dataset;
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::error;

/// A node of the execution graph.
///
/// `run` is invoked once. It reads `input` until the producer closes it and
/// finishes by returning, which closes `output`. It must return promptly once
/// `ctx` is cancelled; cancellation is not an error.
#[async_trait]
#[typetag::serde]
pub trait Runner: Send + Sync + Debug {
    /// The column types of every dataset written to the output.
    fn returns(&self) -> Vec<TypeRef>;

    /// Stream `input` into `output` until the input is exhausted, an error
    /// occurs, or the execution is cancelled.
    async fn run(
        &mut self,
        ctx: &ExecutionContext,
        input: Receiver<Dataset>,
        output: Sender<Dataset>,
    ) -> Result<()>;
}

/// Drive `runner` to completion and return its terminal error, if any.
///
/// A panic inside the runner is captured and reported as
/// [`FerryError::RunnerPanicked`] so sibling runners are unaffected.
/// Cancellation is folded into `Ok(())`.
pub async fn run_runner(
    runner: &mut dyn Runner,
    ctx: &ExecutionContext,
    input: Receiver<Dataset>,
    output: Sender<Dataset>,
) -> Result<()> {
    let outcome = AssertUnwindSafe(runner.run(ctx, input, output))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Err(e)) if e.is_cancellation() => Ok(()),
        Ok(res) => res,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Runner {:?} panicked: {}", runner, message);
            Err(FerryError::runner_panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Forwards every input dataset unchanged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PassThrough;

#[async_trait]
#[typetag::serde(name = "pass_through")]
impl Runner for PassThrough {
    fn returns(&self) -> Vec<TypeRef> {
        vec![wildcard()]
    }

    async fn run(
        &mut self,
        ctx: &ExecutionContext,
        mut input: Receiver<Dataset>,
        output: Sender<Dataset>,
    ) -> Result<()> {
        loop {
            let data = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                next = input.recv() => match next {
                    Some(data) => data,
                    None => return Ok(()),
                },
            };

            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                sent = output.send(data) => {
                    // nobody is listening anymore
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use tokio::sync::mpsc;

    fn batch(values: Vec<i64>) -> Dataset {
        Dataset::new(vec![Column::from_values(values).into_data()]).unwrap()
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Explode;

    #[async_trait]
    #[typetag::serde(name = "test_explode")]
    impl Runner for Explode {
        fn returns(&self) -> Vec<TypeRef> {
            vec![]
        }

        async fn run(
            &mut self,
            _ctx: &ExecutionContext,
            _input: Receiver<Dataset>,
            _output: Sender<Dataset>,
        ) -> Result<()> {
            panic!("kaboom");
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct GivesUp;

    #[async_trait]
    #[typetag::serde(name = "test_gives_up")]
    impl Runner for GivesUp {
        fn returns(&self) -> Vec<TypeRef> {
            vec![]
        }

        async fn run(
            &mut self,
            _ctx: &ExecutionContext,
            _input: Receiver<Dataset>,
            _output: Sender<Dataset>,
        ) -> Result<()> {
            Err(FerryError::Cancelled)
        }
    }

    #[tokio::test]
    async fn test_pass_through_forwards_everything() {
        let ctx = ExecutionContext::new();
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);

        in_tx.send(batch(vec![1, 2])).await.unwrap();
        in_tx.send(batch(vec![3])).await.unwrap();
        drop(in_tx);

        let mut runner = PassThrough;
        run_runner(&mut runner, &ctx, in_rx, out_tx).await.unwrap();

        let mut rows = 0;
        while let Some(ds) = out_rx.recv().await {
            rows += ds.len();
        }
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn test_pass_through_stops_on_cancel() {
        let ctx = ExecutionContext::new();
        let (_in_tx, in_rx) = mpsc::channel::<Dataset>(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        ctx.cancel();

        let mut runner = PassThrough;
        assert!(run_runner(&mut runner, &ctx, in_rx, out_tx).await.is_ok());
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let ctx = ExecutionContext::new();
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);

        let err = run_runner(&mut Explode, &ctx, in_rx, out_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::RunnerPanicked { ref message } if message == "kaboom"));
    }

    #[tokio::test]
    async fn test_cancellation_is_not_an_error() {
        let ctx = ExecutionContext::new();
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        assert!(run_runner(&mut GivesUp, &ctx, in_rx, out_tx).await.is_ok());
    }

    #[test]
    fn test_runner_is_serializable() {
        let runner: Box<dyn Runner> = Box::new(PassThrough);
        let json = serde_json::to_string(&runner).unwrap();
        let back: Box<dyn Runner> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.returns().len(), 1);
        assert!(back.returns()[0].is_wildcard());
    }
}
