//! Common test utilities and helpers for integration tests

#![allow(dead_code)] // each test binary uses a different subset

use ferry_common::{LoggingConfig, Result, init_tracing as init_tracing_with};
use ferry_core::data::Column;
use ferry_core::{Dataset, ExecutionContext, MemoryNetwork, Runner, run_runner};
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound for any multi-node run. Hitting it means a deadlock.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        test_writer: true,
        ..LoggingConfig::default()
    };
    init_tracing_with(&config).unwrap();
}

/// A one-column dataset of integers.
pub fn ints(values: Vec<i64>) -> Dataset {
    Dataset::new(vec![Column::from_values(values).into_data()]).unwrap()
}

/// Integer keys plus a string column naming where each row came from.
pub fn keyed(keys: Vec<i64>, origin: &str) -> Dataset {
    let origins = vec![origin.to_string(); keys.len()];
    Dataset::new(vec![
        Column::from_values(keys).into_data(),
        Column::from_values(origins).into_data(),
    ])
    .unwrap()
}

/// All rows of `batches`, rendered.
pub fn rows(batches: &[Dataset]) -> Vec<Vec<String>> {
    batches.iter().flat_map(Dataset::strings).collect()
}

/// Values of the first column of every row, as integers.
pub fn first_column(batches: &[Dataset]) -> Vec<i64> {
    rows(batches)
        .into_iter()
        .map(|row| row[0].parse().unwrap())
        .collect()
}

/// Feed `inputs` to `runner`, close its input and collect everything it writes.
pub async fn run_with(
    runner: &mut dyn Runner,
    ctx: &ExecutionContext,
    inputs: Vec<Dataset>,
) -> (Result<()>, Vec<Dataset>) {
    run_paced(runner, ctx, inputs, Duration::ZERO).await
}

/// Like [`run_with`], waiting `delay` before feeding each input.
pub async fn run_paced(
    runner: &mut dyn Runner,
    ctx: &ExecutionContext,
    inputs: Vec<Dataset>,
    delay: Duration,
) -> (Result<()>, Vec<Dataset>) {
    let (in_tx, in_rx) = mpsc::channel(4);
    let (out_tx, mut out_rx) = mpsc::channel(4);

    let feed = async move {
        for data in inputs {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if in_tx.send(data).await.is_err() {
                break;
            }
        }
    };
    let collect = async move {
        let mut got = Vec::new();
        while let Some(data) = out_rx.recv().await {
            got.push(data);
        }
        got
    };

    let (res, _, got) = tokio::join!(run_runner(runner, ctx, in_rx, out_tx), feed, collect);
    (res, got)
}

/// Names of the nodes of a test cluster.
pub fn node_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("node-{}", i)).collect()
}

/// The context `node` sees in a cluster of `nodes` connected through `network`.
pub fn node_context(network: &MemoryNetwork, nodes: &[String], node: &str) -> ExecutionContext {
    ExecutionContext::new()
        .with_nodes(nodes.iter().cloned())
        .with_this_node(node)
        .with_master_node(nodes[0].clone())
        .with_dialer(network.dialer(node))
}

/// Ship `plan` to every node, as a driver would, and run it there with the
/// node's own inputs. Results come back in node order.
pub async fn run_cluster(
    plan: &dyn Runner,
    inputs: Vec<Vec<Dataset>>,
) -> Vec<(Result<()>, Vec<Dataset>)> {
    let nodes = node_names(inputs.len());
    let network = MemoryNetwork::default();
    let contexts = nodes
        .iter()
        .map(|node| node_context(&network, &nodes, node))
        .collect();
    run_cluster_with(plan, contexts, inputs).await
}

/// [`run_cluster`] with one prepared context per node.
pub async fn run_cluster_with(
    plan: &dyn Runner,
    contexts: Vec<ExecutionContext>,
    inputs: Vec<Vec<Dataset>>,
) -> Vec<(Result<()>, Vec<Dataset>)> {
    let shipped = serde_json::to_string(plan).unwrap();

    let mut handles = Vec::new();
    for (ctx, input) in contexts.into_iter().zip(inputs) {
        let mut runner: Box<dyn Runner> = serde_json::from_str(&shipped).unwrap();
        handles.push(tokio::spawn(async move {
            run_with(runner.as_mut(), &ctx, input).await
        }));
    }

    let all = tokio::time::timeout(RUN_TIMEOUT, futures::future::join_all(handles))
        .await
        .expect("cluster run timed out");
    all.into_iter().map(|res| res.unwrap()).collect()
}
