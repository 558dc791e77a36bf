/*
*   Purpose: Probe an endpoint that answers 401/403 for access-control bypasses.
*               Sweeps HTTP methods, injects headers, and mutates the path
*               (suffixes, mid-path prefixes, capitalization), printing the
*               status and size of every variant.
*
*/

mod arg_parser;
mod dispatcher;
mod error;
mod http1;
mod payloads;
mod probe;
mod reporter;
mod requester;
mod strategy;
mod target;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

// CLI
use anyhow::{Context, Result};
use log::{info, warn};

use arg_parser::Args;
use dispatcher::DispatchOptions;
use payloads::PayloadSource;
use probe::Probe;
use requester::{HttpExecutor, normalize_proxy};
use target::Target;

fn main() -> Result<()> {
    let args = Args::parse();

    initialize(&args);

    let target = Target::parse(&args.url)?;
    let proxy = args.proxy.as_deref().map(normalize_proxy);
    if let Some(proxy) = &proxy {
        println!("{}", console::style(format!("[*] USING PROXY: {proxy}")).magenta());
    }

    let executor = HttpExecutor::new(proxy.as_deref(), Duration::from_secs(args.timeout_secs.max(1)))?;
    let baseline = probe::baseline_headers(args.user_agent.as_deref(), args.headers);
    let options = DispatchOptions {
        concurrency: args.thread_count,
        strict: args.strict,
    };

    let probe = Probe::new(
        target,
        baseline,
        PayloadSource::Directory(args.payloads_dir),
        Arc::new(executor),
        options,
    );
    info!("Probing {}", probe.target());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summaries = smol::block_on(probe.run(&mut out)).context("Probe aborted")?;
    out.flush()?;

    for summary in summaries.iter().filter(|s| s.errors > 0) {
        warn!(
            "{}: {} of {} requests failed",
            summary.strategy, summary.errors, summary.outcomes
        );
    }

    Ok(())
}

fn initialize(args: &Args) {
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.no_color {
        console::set_colors_enabled(false);
    }

    let banner = r#"
      ____       _                          _
     / ___| __ _| |_ ___  ___ _ __ __ _ ___| |__
    | |  _ / _` | __/ _ \/ __| '__/ _` / __| '_ \
    | |_| | (_| | ||  __/ (__| | | (_| \__ \ | | |
     \____|\__,_|\__\___|\___|_|  \__,_|___/_| |_|
    "#;

    println!("{banner}");
}
