//! Runs every strategy against one baseline request, one strategy at a time.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::dispatcher::{DispatchOptions, dispatch};
use crate::payloads::PayloadSource;
use crate::reporter;
use crate::requester::{Executor, Header};
use crate::strategy::{Strategy, Variant};
use crate::target::Target;

pub const DEFAULT_USER_AGENT: &str = concat!("gatecrash/", env!("CARGO_PKG_VERSION"));

/// Counts kept once a strategy's results have been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySummary {
    pub strategy: Strategy,
    pub outcomes: usize,
    pub errors: usize,
}

pub struct Probe {
    target: Target,
    baseline: Vec<Header>,
    payloads: PayloadSource,
    executor: Arc<dyn Executor>,
    options: DispatchOptions,
}

impl Probe {
    pub fn new(
        target: Target,
        baseline: Vec<Header>,
        payloads: PayloadSource,
        executor: Arc<dyn Executor>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            target,
            baseline,
            payloads,
            executor,
            options,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Report each strategy as soon as its batch completes. A payload or
    /// strict-mode failure stops the run before the next strategy starts.
    pub async fn run<W: Write>(&self, out: &mut W) -> Result<Vec<StrategySummary>> {
        let mut summaries = Vec::with_capacity(Strategy::ALL.len());

        for strategy in Strategy::ALL {
            reporter::banner(out, strategy)?;

            let variants = self
                .variants_for(strategy)
                .with_context(|| format!("Cannot build variants for {strategy}"))?;
            info!("{strategy}: dispatching {} variants", variants.len());

            let results = dispatch(Arc::clone(&self.executor), variants, self.options)
                .await
                .with_context(|| format!("{strategy} aborted"))?;
            reporter::render(out, &results)?;

            summaries.push(StrategySummary {
                strategy,
                outcomes: results.len(),
                errors: results.errors(),
            });
        }

        Ok(summaries)
    }

    fn variants_for(&self, strategy: Strategy) -> Result<Vec<Variant>> {
        strategy.variants(&self.target, &self.baseline, &self.payloads)
    }
}

/// The headers every variant starts from. A User-Agent is always present:
/// the given one, one from `extra`, or the default.
pub fn baseline_headers(user_agent: Option<&str>, extra: Vec<Header>) -> Vec<Header> {
    let extra_has_agent = extra.iter().any(|h| h.name.eq_ignore_ascii_case("user-agent"));

    let mut headers = Vec::with_capacity(extra.len() + 1);
    match user_agent {
        Some(agent) => headers.push(Header::new("User-Agent", agent)),
        None if !extra_has_agent => headers.push(Header::new("User-Agent", DEFAULT_USER_AGENT)),
        None => {}
    }
    headers.extend(extra);
    headers
}
