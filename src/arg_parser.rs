use clap::Parser;
use std::path::PathBuf;

use crate::requester::Header;

#[derive(Parser, Debug)]
#[command(version, about = "Probe a forbidden endpoint for 401/403 bypasses", long_about = None)]
pub struct Args {
    #[arg(
        short = 'u',
        long = "url",
        help = "Target URL (ex. '-u https://mauzy.net/admin' or '-u 10.10.192.251/secret')"
    )]
    pub url: String,

    #[arg(short = 'a', long = "user-agent", help = "Custom User-Agent (default: gatecrash/<version>)")]
    pub user_agent: Option<String>,

    #[arg(
        short = 'p',
        long = "proxy",
        help = "Proxy every request (ex. '-p 127.0.0.1:8080' or '-p http://127.0.0.1:8080')"
    )]
    pub proxy: Option<String>,

    #[arg(
        short = 'H',
        long = "header",
        value_parser = parse_header_arg,
        help = "Extra header sent with every request, repeatable (ex. -H 'Cookie: session=1')"
    )]
    pub headers: Vec<Header>,

    #[arg(
        short = 'f',
        long = "payloads",
        default_value = "./payloads",
        help = "Directory holding the httpmethods, headers, endpaths and midpaths lists"
    )]
    pub payloads_dir: PathBuf,

    #[arg(
        short = 't',
        long = "threads",
        default_value = "50",
        help = "Maximum requests in flight per strategy"
    )]
    pub thread_count: usize,

    #[arg(
        long = "timeout",
        default_value = "30",
        help = "Seconds to wait on connect, send and receive for each request"
    )]
    pub timeout_secs: u64,

    #[arg(long = "strict", help = "Abort the whole run on the first failed request")]
    pub strict: bool,

    #[arg(long = "no-color", help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short = 'v', long = "verbose", help = "Verbose output")]
    pub verbose: bool,
}

fn parse_header_arg(raw: &str) -> Result<Header, String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in `{raw}`"));
    }
    Ok(Header::new(name, value.trim()))
}
