//! Fans a strategy's variants out as concurrent tasks and collects one
//! outcome per variant.
//!
//! Only the collecting loop touches the result set; tasks hand their
//! outcomes over a channel.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};
use smol::channel;
use smol::lock::Semaphore;

use crate::error::RequestError;
use crate::requester::{Executor, Response};
use crate::strategy::Variant;

/// Result of executing one variant.
#[derive(Debug)]
pub struct Outcome {
    pub label: String,
    pub response: Result<Response, RequestError>,
}

impl Outcome {
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().ok().map(|response| response.status)
    }
}

/// Outcomes of one strategy run, in completion order.
#[derive(Debug, Default)]
pub struct ResultSet {
    outcomes: Vec<Outcome>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter()
    }

    pub fn errors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.response.is_err()).count()
    }

    fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }
}

impl FromIterator<Outcome> for ResultSet {
    fn from_iter<I: IntoIterator<Item = Outcome>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Maximum requests in flight at once.
    pub concurrency: usize,
    /// Stop at the first transport error instead of recording it.
    pub strict: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 50,
            strict: false,
        }
    }
}

pub async fn dispatch(executor: Arc<dyn Executor>, variants: Vec<Variant>, options: DispatchOptions) -> Result<ResultSet> {
    let limit = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let (tx, rx) = channel::unbounded::<Outcome>();

    // dropping a task cancels it, so these stay alive until collection ends
    let mut tasks = Vec::with_capacity(variants.len());
    for variant in variants {
        let executor = Arc::clone(&executor);
        let limit = Arc::clone(&limit);
        let tx = tx.clone();

        tasks.push(smol::spawn(async move {
            let _permit = limit.acquire().await;
            debug!("{} {} [{}]", variant.method, variant.uri, variant.label);

            let Variant {
                method,
                uri,
                headers,
                label,
            } = variant;
            let response = smol::unblock(move || executor.execute(&method, &uri, &headers)).await;

            // the receiver is gone only after a strict abort
            let _ = tx.send(Outcome { label, response }).await;
        }));
    }
    drop(tx);

    let mut results = ResultSet::default();
    while let Ok(outcome) = rx.recv().await {
        match outcome.response {
            Err(err) if options.strict => {
                return Err(anyhow::Error::new(err).context(format!("Aborting on `{}`", outcome.label)));
            }
            Err(ref err) => warn!("{}: {err}", outcome.label),
            Ok(_) => {}
        }
        results.push(outcome);
    }
    drop(tasks);

    Ok(results)
}
