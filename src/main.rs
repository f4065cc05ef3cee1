//! Thin CLI layer over quarry-core: bulk-fetch a URL list through the
//! request scheduler, with styled output and a JSON report option.
//! All errors return exit codes; the library thread is always stopped
//! and joined before exit.

use clap::{Arg, ArgAction, Command};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use quarry_core::{
    HeaderList, HttpHandle, HttpHandler, HttpOptions, HttpRequest, HttpResponse, PolicyOption,
    DEFAULT_POLICY_ID, GLOBAL_POLICY_ID, INVALID_HANDLE,
};

// ---- UI helpers (no-op when stdout isn't a TTY) ----

fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn success(msg: &str) {
    if use_color() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg);
    }
}

fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn info(msg: &str) {
    if use_color() {
        println!("{}", msg.cyan());
    } else {
        println!("{}", msg);
    }
}

fn dim(msg: &str) {
    if use_color() {
        println!("{}", msg.dimmed());
    } else {
        println!("{}", msg);
    }
}

// ---- optional config from .quarryrc (JSON), merged with CLI flags ----

#[derive(Default)]
struct Config {
    connections: Option<i64>,
    pipeline: Option<i64>,
    throttle: Option<i64>,
    trace: Option<i64>,
}

/// Load config from .quarryrc in the working directory, then
/// ~/.quarryrc.  Missing or invalid file = defaults.
fn load_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    let home = env::var("HOME").ok().map(PathBuf::from);
    let candidates = [
        dir.join(".quarryrc"),
        home.map(|h| h.join(".quarryrc"))
            .unwrap_or_else(|| dir.join(".none")),
    ];
    for path in &candidates {
        if path.is_file() {
            if let Ok(text) = fs::read_to_string(path) {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    cfg.connections = value.get("connections").and_then(|v| v.as_i64());
                    cfg.pipeline = value.get("pipeline").and_then(|v| v.as_i64());
                    cfg.throttle = value.get("throttle").and_then(|v| v.as_i64());
                    cfg.trace = value.get("trace").and_then(|v| v.as_i64());
                }
            }
            break;
        }
    }
    cfg
}

// ---- completion collection ----

struct FetchResult {
    url: String,
    status: String,
    ok: bool,
    bytes: u64,
    retries: u32,
    content_type: String,
    body: Option<Vec<u8>>,
}

struct Collector {
    results: Mutex<HashMap<HttpHandle, FetchResult>>,
    keep_bodies: bool,
}

impl Collector {
    fn new(keep_bodies: bool) -> Collector {
        Collector {
            results: Mutex::new(HashMap::new()),
            keep_bodies,
        }
    }
}

impl HttpHandler for Collector {
    fn on_completed(&self, handle: HttpHandle, response: &mut HttpResponse) {
        let status = response.status().clone();
        let body = response.take_body();
        let bytes = body.as_ref().map_or(0, |b| b.len() as u64);
        let result = FetchResult {
            url: response.request_url().to_string(),
            status: status.to_terse_string(),
            ok: status.is_success(),
            bytes,
            retries: response.retries().0,
            content_type: response.content_type().to_string(),
            body: if self.keep_bodies {
                body.map(|b| b.to_vec())
            } else {
                None
            },
        };
        self.results.lock().unwrap().insert(handle, result);
    }
}

fn main() {
    env_logger::init();
    let exit_code = run();
    std::process::exit(exit_code);
}

fn cli() -> Command {
    Command::new("quarry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bulk HTTP fetch and load-test tool over the quarry-core request scheduler")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("fetch")
                .about("Fetch one or more URLs through the scheduler")
                .arg(
                    Arg::new("url")
                        .help("URLs to fetch (or @file with one URL per line)")
                        .num_args(1..)
                        .required(true),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .short('n')
                        .help("Fetch each URL this many times")
                        .default_value("1"),
                )
                .arg(
                    Arg::new("connections")
                        .long("connections")
                        .short('c')
                        .help("Concurrent connection limit for the class"),
                )
                .arg(
                    Arg::new("pipeline")
                        .long("pipeline")
                        .help("Pipelining depth (0/1 disables, >=2 enables)"),
                )
                .arg(
                    Arg::new("throttle")
                        .long("throttle")
                        .help("Requests-per-second ceiling (0 disables)"),
                )
                .arg(
                    Arg::new("range")
                        .long("range")
                        .help("Byte range as OFFSET:LENGTH (LENGTH 0 = to end)"),
                )
                .arg(
                    Arg::new("retries")
                        .long("retries")
                        .help("Retry attempts per request")
                        .default_value("8"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .help("Connect timeout, seconds")
                        .default_value("30"),
                )
                .arg(
                    Arg::new("trace")
                        .long("trace")
                        .help("Library trace level 0..3"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .help("Directory to write fetched bodies into"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Emit a JSON report on stdout")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("quiet")
                        .long("quiet")
                        .short('q')
                        .help("No progress bar")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn run() -> i32 {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("fetch", sub)) => run_fetch(sub),
        _ => 2,
    }
}

fn parse_range(text: &str) -> Option<(u64, u64)> {
    let (offset, length) = text.split_once(':')?;
    Some((offset.parse().ok()?, length.parse().ok()?))
}

/// Expand positional arguments: a leading `@` names a file holding one
/// URL per line, `#` comments allowed.
fn expand_urls(args: Vec<String>) -> Result<Vec<String>, String> {
    let mut urls = Vec::new();
    for arg in args {
        if let Some(path) = arg.strip_prefix('@') {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read URL list {}: {}", path, e))?;
            for line in text.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        } else {
            urls.push(arg);
        }
    }
    Ok(urls)
}

fn run_fetch(matches: &clap::ArgMatches) -> i32 {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let cfg = load_config(&cwd);

    let raw_urls: Vec<String> = matches
        .get_many::<String>("url")
        .unwrap()
        .cloned()
        .collect();
    let urls = match expand_urls(raw_urls) {
        Ok(urls) => urls,
        Err(message) => {
            error(&message);
            return 2;
        }
    };
    if urls.is_empty() {
        error("no URLs to fetch");
        return 2;
    }

    let count: usize = matches
        .get_one::<String>("count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let retries: u32 = matches
        .get_one::<String>("retries")
        .and_then(|v| v.parse().ok())
        .unwrap_or(8);
    let timeout: u64 = matches
        .get_one::<String>("timeout")
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let range = matches
        .get_one::<String>("range")
        .and_then(|v| parse_range(v));
    let out_dir = matches.get_one::<String>("out").map(PathBuf::from);
    let json_report = matches.get_flag("json");
    let quiet = matches.get_flag("quiet");

    let connections = matches
        .get_one::<String>("connections")
        .and_then(|v| v.parse::<i64>().ok())
        .or(cfg.connections);
    let pipeline = matches
        .get_one::<String>("pipeline")
        .and_then(|v| v.parse::<i64>().ok())
        .or(cfg.pipeline);
    let throttle = matches
        .get_one::<String>("throttle")
        .and_then(|v| v.parse::<i64>().ok())
        .or(cfg.throttle);
    let trace = matches
        .get_one::<String>("trace")
        .and_then(|v| v.parse::<i64>().ok())
        .or(cfg.trace);

    if let Some(dir) = &out_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            error(&format!("cannot create output directory: {}", e));
            return 2;
        }
    }

    // Library bring-up: service, class options, worker thread.
    if let Err(status) = HttpRequest::create_service() {
        error(&format!("service init failed: {}", status));
        return 1;
    }
    if let Some(limit) = connections {
        let _ = HttpRequest::set_static_policy_option(
            PolicyOption::ConnectionLimit,
            DEFAULT_POLICY_ID,
            limit,
        );
        let _ = HttpRequest::set_static_policy_option(
            PolicyOption::PerHostConnectionLimit,
            DEFAULT_POLICY_ID,
            limit,
        );
    }
    if let Some(depth) = pipeline {
        let _ = HttpRequest::set_static_policy_option(
            PolicyOption::PipeliningDepth,
            DEFAULT_POLICY_ID,
            depth,
        );
    }
    if let Some(rate) = throttle {
        let _ = HttpRequest::set_static_policy_option(
            PolicyOption::ThrottleRate,
            DEFAULT_POLICY_ID,
            rate,
        );
    }
    if let Some(level) = trace {
        let _ =
            HttpRequest::set_static_policy_option(PolicyOption::Trace, GLOBAL_POLICY_ID, level);
    }
    if let Err(status) = HttpRequest::start_thread() {
        error(&format!("worker start failed: {}", status));
        let _ = HttpRequest::destroy_service();
        return 1;
    }

    let keep_bodies = out_dir.is_some();
    let collector = Arc::new(Collector::new(keep_bodies));
    let options = Arc::new(HttpOptions {
        retries,
        timeout,
        follow_redirects: true,
        ..HttpOptions::default()
    });
    let mut headers = HeaderList::new();
    headers.append("Accept", "*/*");
    let headers = Arc::new(headers);

    let total = urls.len() * count;
    let bar = if quiet || json_report || !use_color() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    let mut request = HttpRequest::new();
    let mut submitted: Vec<(HttpHandle, String)> = Vec::with_capacity(total);
    let started = Instant::now();

    for url in &urls {
        for _ in 0..count {
            let handler: Arc<dyn HttpHandler> = collector.clone();
            let handle = match range {
                Some((offset, length)) => request.request_get_byte_range(
                    DEFAULT_POLICY_ID,
                    0,
                    url,
                    offset,
                    length,
                    Some(Arc::clone(&options)),
                    Some(Arc::clone(&headers)),
                    Some(handler),
                ),
                None => request.request_get(
                    DEFAULT_POLICY_ID,
                    0,
                    url,
                    Some(Arc::clone(&options)),
                    Some(Arc::clone(&headers)),
                    Some(handler),
                ),
            };
            if handle == INVALID_HANDLE {
                error(&format!(
                    "failed to queue {}: {}",
                    url,
                    request.get_status()
                ));
            } else {
                submitted.push((handle, url.clone()));
            }
        }
    }

    // Pump completions until everything submitted has reported.
    let mut seen = 0usize;
    while seen < submitted.len() {
        request.update(0);
        let done = collector.results.lock().unwrap().len();
        if done != seen {
            bar.set_position(done as u64);
            seen = done;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    bar.finish_and_clear();
    let elapsed = started.elapsed();

    // Orderly thread stop before reporting.
    request.request_stop_thread(None);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !quarry_core::is_stopped() && Instant::now() < deadline {
        request.update(0);
        std::thread::sleep(Duration::from_millis(10));
    }
    let _ = HttpRequest::destroy_service();

    report(
        &collector,
        &submitted,
        elapsed,
        out_dir.as_deref(),
        json_report,
    )
}

fn report(
    collector: &Collector,
    submitted: &[(HttpHandle, String)],
    elapsed: Duration,
    out_dir: Option<&Path>,
    json_report: bool,
) -> i32 {
    let results = collector.results.lock().unwrap();
    let mut ok = 0usize;
    let mut failed = 0usize;
    let mut bytes = 0u64;

    for (index, (handle, _url)) in submitted.iter().enumerate() {
        let Some(result) = results.get(handle) else {
            failed += 1;
            continue;
        };
        if result.ok {
            ok += 1;
        } else {
            failed += 1;
        }
        bytes += result.bytes;
        if let (Some(dir), Some(body)) = (out_dir, result.body.as_ref()) {
            let name = format!("fetch-{:05}", index);
            if let Err(e) = fs::write(dir.join(&name), body) {
                error(&format!("cannot write {}: {}", name, e));
            }
        }
    }

    if json_report {
        let entries: Vec<serde_json::Value> = submitted
            .iter()
            .filter_map(|(handle, _)| results.get(handle))
            .map(|r| {
                serde_json::json!({
                    "url": r.url,
                    "status": r.status,
                    "ok": r.ok,
                    "bytes": r.bytes,
                    "retries": r.retries,
                    "contentType": r.content_type,
                })
            })
            .collect();
        let report = serde_json::json!({
            "requests": submitted.len(),
            "ok": ok,
            "failed": failed,
            "bytes": bytes,
            "elapsedMs": elapsed.as_millis() as u64,
            "results": entries,
        });
        println!("{}", report);
    } else {
        let secs = elapsed.as_secs_f64().max(0.001);
        info(&format!(
            "{} requests in {:.2}s ({:.1} req/s, {:.1} KiB/s)",
            submitted.len(),
            elapsed.as_secs_f64(),
            submitted.len() as f64 / secs,
            bytes as f64 / 1024.0 / secs,
        ));
        if failed == 0 {
            success(&format!("all {} succeeded, {} bytes", ok, bytes));
        } else {
            error(&format!("{} succeeded, {} failed", ok, failed));
            for (handle, url) in submitted {
                if let Some(r) = results.get(handle) {
                    if !r.ok {
                        dim(&format!("  {} {}", r.status, url));
                    }
                }
            }
        }
    }

    if failed == 0 {
        0
    } else {
        1
    }
}
