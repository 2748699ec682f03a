//! Union fan-out/fan-in behavior, alone and around an exchange.

mod common;

use async_trait::async_trait;
use common::*;
use ferry_common::{FerryError, Result};
use ferry_core::data::{integer, wildcard};
use ferry_core::{Dataset, Exchange, ExecutionContext, PassThrough, Runner, TypeRef, Union};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// Adds a constant to every integer of the first column.
#[derive(Debug, Serialize, Deserialize)]
struct AddConst {
    value: i64,
}

#[async_trait]
#[typetag::serde(name = "test_add_const")]
impl Runner for AddConst {
    fn returns(&self) -> Vec<TypeRef> {
        vec![integer()]
    }

    async fn run(
        &mut self,
        _ctx: &ExecutionContext,
        mut input: Receiver<Dataset>,
        output: Sender<Dataset>,
    ) -> Result<()> {
        while let Some(data) = input.recv().await {
            let shifted = first_column(&[data])
                .into_iter()
                .map(|v| v + self.value)
                .collect();
            if output.send(ints(shifted)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Fails after reading its first dataset.
#[derive(Debug, Serialize, Deserialize)]
struct FailFast;

#[async_trait]
#[typetag::serde(name = "test_fail_fast")]
impl Runner for FailFast {
    fn returns(&self) -> Vec<TypeRef> {
        vec![wildcard()]
    }

    async fn run(
        &mut self,
        _ctx: &ExecutionContext,
        mut input: Receiver<Dataset>,
        _output: Sender<Dataset>,
    ) -> Result<()> {
        input.recv().await;
        Err(FerryError::invalid_data("bad row"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Panics;

#[async_trait]
#[typetag::serde(name = "test_panics")]
impl Runner for Panics {
    fn returns(&self) -> Vec<TypeRef> {
        vec![wildcard()]
    }

    async fn run(
        &mut self,
        _ctx: &ExecutionContext,
        _input: Receiver<Dataset>,
        _output: Sender<Dataset>,
    ) -> Result<()> {
        panic!("runner exploded");
    }
}

#[tokio::test]
async fn test_every_runner_sees_every_batch() {
    init_tracing();
    let mut union = Union::build(vec![
        Box::new(AddConst { value: 0 }),
        Box::new(AddConst { value: 100 }),
        Box::new(AddConst { value: 1000 }),
    ])
    .unwrap();

    let ctx = ExecutionContext::new();
    let (res, got) = run_with(union.as_mut(), &ctx, vec![ints(vec![1, 2]), ints(vec![3])]).await;
    res.unwrap();

    assert_eq!(got.len(), 6);
    let mut values = first_column(&got);
    values.sort();
    assert_eq!(values, vec![1, 2, 3, 101, 102, 103, 1001, 1002, 1003]);
}

#[tokio::test]
async fn test_single_runner_union_runs_the_runner() {
    let mut union = Union::build(vec![Box::new(AddConst { value: 5 })]).unwrap();
    let ctx = ExecutionContext::new();
    let (res, got) = run_with(union.as_mut(), &ctx, vec![ints(vec![1])]).await;
    res.unwrap();
    assert_eq!(first_column(&got), vec![6]);
}

#[tokio::test]
async fn test_first_error_wins_after_all_finish() {
    init_tracing();
    let mut union = Union::build(vec![
        Box::new(PassThrough),
        Box::new(FailFast),
        Box::new(AddConst { value: 10 }),
    ])
    .unwrap();

    let ctx = ExecutionContext::new();
    let (res, got) = run_with(union.as_mut(), &ctx, vec![ints(vec![1]), ints(vec![2])]).await;
    assert!(matches!(res, Err(FerryError::InvalidData { .. })));

    // the healthy runners still processed all of their input
    let mut values = first_column(&got);
    values.sort();
    assert_eq!(values, vec![1, 2, 11, 12]);
}

#[tokio::test]
async fn test_panicking_runner_is_isolated() {
    init_tracing();
    let mut union = Union::build(vec![Box::new(Panics), Box::new(PassThrough)]).unwrap();

    let ctx = ExecutionContext::new();
    let (res, got) = run_with(union.as_mut(), &ctx, vec![ints(vec![4]), ints(vec![5])]).await;
    match res {
        Err(FerryError::RunnerPanicked { message }) => assert!(message.contains("exploded")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(first_column(&got), vec![4, 5]);
}

#[tokio::test]
async fn test_cancellation_is_not_an_error() {
    let mut union = Union::build(vec![Box::new(PassThrough), Box::new(PassThrough)]).unwrap();
    let ctx = ExecutionContext::new();

    let (_in_tx, in_rx) = mpsc::channel::<Dataset>(1);
    let (out_tx, _out_rx) = mpsc::channel(1);
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let res = tokio::time::timeout(RUN_TIMEOUT, union.run(&ctx, in_rx, out_tx))
        .await
        .expect("union ignored cancellation");
    res.unwrap();
}

/// A union of two broadcasts shipped to every node: both exchanges of the
/// plan keep their own session.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_union_of_exchanges_across_nodes() {
    init_tracing();
    let plan = Union::build(vec![
        Box::new(Exchange::broadcast()),
        Box::new(Exchange::gather()),
    ])
    .unwrap();
    let inputs = vec![vec![ints(vec![1])], vec![ints(vec![2])]];

    let results = run_cluster(plan.as_ref(), inputs).await;

    // master: two broadcast batches plus two gathered batches
    let (res, got) = &results[0];
    assert!(res.is_ok());
    let mut values = first_column(got);
    values.sort();
    assert_eq!(values, vec![1, 1, 2, 2]);

    // the other node only sees the broadcast
    let (res, got) = &results[1];
    assert!(res.is_ok());
    let mut values = first_column(got);
    values.sort();
    assert_eq!(values, vec![1, 2]);
}
