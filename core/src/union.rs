//! Fan-out/fan-in composition of runners.

use crate::context::ExecutionContext;
use crate::data::{TypeRef, are_equal_types, describe};
use crate::dataset::Dataset;
use crate::runner::{Runner, run_runner};
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info};

/// Runs several runners side by side on copies of the same input and
/// interleaves their outputs into one stream.
#[derive(Debug, Serialize, Deserialize)]
pub struct Union {
    runners: Vec<Box<dyn Runner>>,
}

impl Union {
    /// Compose `runners`. A single runner is returned unchanged.
    ///
    /// Every runner must declare the same output types as the first one.
    pub fn build(mut runners: Vec<Box<dyn Runner>>) -> Result<Box<dyn Runner>> {
        if runners.len() <= 1 {
            return runners
                .pop()
                .ok_or_else(|| FerryError::invalid_union("at least 1 runner is required for union"));
        }

        let expected = runners[0].returns();
        for runner in &runners[1..] {
            let found = runner.returns();
            if !are_equal_types(&expected, &found) {
                return Err(FerryError::schema_mismatch(
                    describe(&expected),
                    describe(&found),
                ));
            }
        }
        Ok(Box::new(Union { runners }))
    }

    pub fn runners(&self) -> &[Box<dyn Runner>] {
        &self.runners
    }
}

#[async_trait]
#[typetag::serde(name = "union")]
impl Runner for Union {
    fn returns(&self) -> Vec<TypeRef> {
        self.runners
            .first()
            .map(|r| r.returns())
            .unwrap_or_default()
    }

    async fn run(
        &mut self,
        ctx: &ExecutionContext,
        input: Receiver<Dataset>,
        output: Sender<Dataset>,
    ) -> Result<()> {
        let capacity = ctx.config().channel_capacity;
        info!("Union starting {} runners", self.runners.len());

        let mut sub_inputs = Vec::with_capacity(self.runners.len());
        let mut sub_outputs = Vec::with_capacity(self.runners.len());
        let mut runs = Vec::with_capacity(self.runners.len());
        for runner in self.runners.iter_mut() {
            let (in_tx, in_rx) = mpsc::channel(capacity);
            let (out_tx, out_rx) = mpsc::channel(capacity);
            sub_inputs.push(in_tx);
            sub_outputs.push(out_rx);
            runs.push(run_runner(runner.as_mut(), ctx, in_rx, out_tx));
        }

        let (results, _, _) = tokio::join!(
            join_all(runs),
            fan_out(ctx, input, sub_inputs),
            fan_in(sub_outputs, output),
        );

        debug!("Union finished");
        results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
    }
}

/// Copy every input dataset to every sub-input, then close them all.
async fn fan_out(
    ctx: &ExecutionContext,
    mut input: Receiver<Dataset>,
    sub_inputs: Vec<Sender<Dataset>>,
) {
    let mut sub_inputs: Vec<Option<Sender<Dataset>>> =
        sub_inputs.into_iter().map(Some).collect();
    loop {
        let data = tokio::select! {
            data = input.recv() => data,
            _ = ctx.cancelled() => None,
        };
        let Some(data) = data else {
            break;
        };

        for slot in sub_inputs.iter_mut() {
            let Some(tx) = slot.as_ref() else {
                continue;
            };
            let delivered = tokio::select! {
                res = tx.send(data.clone()) => res.is_ok(),
                _ = ctx.cancelled() => return,
            };
            if !delivered {
                // the runner already finished
                *slot = None;
            }
        }
        if sub_inputs.iter().all(Option::is_none) {
            break;
        }
    }
}

/// Interleave sub-outputs in arrival order. Keeps draining after the
/// consumer is gone so no sub-runner blocks on its output.
async fn fan_in(sub_outputs: Vec<Receiver<Dataset>>, output: Sender<Dataset>) {
    let streams: Vec<BoxStream<'static, Dataset>> = sub_outputs
        .into_iter()
        .map(|rx| {
            stream::unfold(rx, |mut rx| async move {
                let data = rx.recv().await?;
                Some((data, rx))
            })
            .boxed()
        })
        .collect();

    let mut merged = stream::select_all(streams);
    let mut output = Some(output);
    while let Some(data) = merged.next().await {
        if let Some(tx) = &output {
            if tx.send(data).await.is_err() {
                debug!("Union output closed, discarding");
                output = None;
            }
        }
    }
}
