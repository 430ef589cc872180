use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::runner::RunResult;
use crate::stats::{EndpointSummary, StatsSummary};

/// Where `--html` writes its report.
pub const HTML_REPORT_PATH: &str = "report.html";

fn ms(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}ms", v.round()),
        None => "n/a".to_string(),
    }
}

/// Plain-text summary printed at the end of a run.
pub fn render_console(result: &RunResult) -> String {
    let summary = result.summary();
    let latency = summary.latency.as_ref();

    let mut out = String::new();
    out.push_str(&format!("\n=== {} Summary ===\n", result.test));
    out.push_str(&format!("Min Response time: {}\n", ms(latency.map(|l| l.min_ms))));
    out.push_str(&format!("Average Response time: {}\n", ms(latency.map(|l| l.avg_ms))));
    out.push_str(&format!("90th Response time: {}\n", ms(latency.map(|l| l.p90_ms))));
    out.push_str(&format!("95th Response time: {}\n", ms(latency.map(|l| l.p95_ms))));
    out.push_str(&format!("99th Response time: {}\n", ms(latency.map(|l| l.p99_ms))));
    out.push_str(&format!("Max Response time: {}\n", ms(latency.map(|l| l.max_ms))));
    out.push_str(&format!("Average RPS: {}\n", summary.average_rps.round()));
    out.push_str(&format!("Dispatched: {}\n", result.dispatched));
    out.push_str(&format!("Requests: {}\n", summary.requests));
    out.push_str(&format!("Successful Requests: {}\n", summary.successful));
    out.push_str(&format!("Failed Requests: {}\n", summary.failed));
    out
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const HTML_STYLE: &str = r#"
    <style>
        * { box-sizing: border-box; }
        body { font-family: system-ui, -apple-system, sans-serif; color: #333; }
        .container {
            display: flex;
            flex-wrap: wrap;
            margin: 5% 10%;
            border: 1px solid black;
            justify-content: center;
        }
        h3 { background-color: green; color: white; text-align: center; padding: 10px; margin: 0; width: 100%; }
        table { border-collapse: collapse; align-self: center; width: 90%; margin: 1%; }
        table, td, th { border: 1px solid black; }
        td { padding: 1px 10px; }
        td:first-child { font-weight: bold; }
        .pie { align-self: center; width: 200px; height: 200px; border-radius: 50%; margin: 20px; }
        .legend span { display: inline-block; width: 20px; height: 20px; vertical-align: middle; }
    </style>"#;

fn info_row(html: &mut String, label: &str, value: &str) {
    html.push_str(&format!(
        "        <tr><td>{}</td><td>{}</td></tr>\n",
        label,
        escape_html(value)
    ));
}

fn endpoint_row(html: &mut String, endpoint: &EndpointSummary) {
    let l = &endpoint.latency;
    html.push_str(&format!(
        "        <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
        escape_html(&endpoint.method),
        escape_html(&endpoint.uri),
        endpoint.requests,
        endpoint.failed,
        l.min_ms.round(),
        l.avg_ms.round(),
        l.p90_ms.round(),
        l.p95_ms.round(),
        l.p99_ms.round(),
        l.max_ms.round(),
    ));
}

/// Self-contained HTML dashboard for one run.
pub fn render_html(result: &RunResult) -> String {
    let summary = result.summary();
    let failed_percent = if summary.requests == 0 {
        0.0
    } else {
        summary.failed as f64 * 100.0 / summary.requests as f64
    };

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n    <meta charset=\"UTF-8\">\n");
    html.push_str("    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!(
        "    <title>Load Test Report: {}</title>\n",
        escape_html(&result.test)
    ));
    html.push_str(HTML_STYLE);
    html.push_str("\n</head>\n<body>\n");

    html.push_str("<div class=\"container\">\n    <h3>Test Information</h3>\n    <table>\n");
    info_row(&mut html, "Test", &result.test);
    info_row(&mut html, "Users", &result.config.users.to_string());
    info_row(&mut html, "Spawn Rate", &result.config.spawn_rate.to_string());
    info_row(&mut html, "Runtime", &format!("{}s", result.config.duration_secs));
    info_row(&mut html, "Host", &result.config.host);
    info_row(&mut html, "Workers", &result.config.workers.to_string());
    info_row(&mut html, "Average RPS", &summary.average_rps.round().to_string());
    info_row(&mut html, "Start Time", &result.started_at.to_rfc3339());
    info_row(&mut html, "End Time", &result.finished_at.to_rfc3339());
    html.push_str("    </table>\n</div>\n");

    html.push_str("<div class=\"container\">\n    <h3>Request Summary</h3>\n");
    html.push_str(&format!(
        "    <div class=\"pie\" style=\"background: conic-gradient(#ff0000 {:.2}%, yellowgreen 0);\"></div>\n",
        failed_percent
    ));
    html.push_str(&format!(
        "    <div class=\"legend\">\n        <p><span style=\"background: red;\"></span> KO ({})</p>\n        <p><span style=\"background: yellowgreen;\"></span> OK ({})</p>\n    </div>\n",
        summary.failed, summary.successful
    ));
    html.push_str("</div>\n");

    html.push_str("<div class=\"container\">\n    <h3>Statistics</h3>\n");
    let endpoints = result.endpoints();
    if endpoints.is_empty() {
        html.push_str("    <p>No requests completed during this run.</p>\n");
    } else {
        html.push_str("    <table class=\"statistics\">\n        <thead><tr><th>Method</th><th>Name</th><th># Requests</th><th># Fails</th><th>Min (ms)</th><th>Average (ms)</th><th>90th Percentile (ms)</th><th>95th Percentile (ms)</th><th>99th Percentile (ms)</th><th>Max (ms)</th></tr></thead>\n        <tbody>\n");
        for endpoint in &endpoints {
            endpoint_row(&mut html, endpoint);
        }
        html.push_str("        </tbody>\n    </table>\n");
    }
    html.push_str("</div>\n</body>\n</html>\n");

    html
}

/// Write the HTML report, replacing any previous file.
pub fn write_html_report(result: &RunResult, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, render_html(result))
        .with_context(|| format!("Failed to write HTML report to {:?}", path))?;
    info!("HTML report written to {:?}", path);
    Ok(())
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    test: &'a str,
    config: &'a crate::config::RunConfig,
    started_at: String,
    finished_at: String,
    dispatched: u64,
    summary: StatsSummary,
    endpoints: Vec<EndpointSummary>,
    rps_series: &'a [u64],
}

/// Aggregated results as pretty-printed JSON; raw statistics are not included.
pub fn write_json_report(result: &RunResult, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let report = JsonReport {
        test: &result.test,
        config: &result.config,
        started_at: result.started_at.to_rfc3339(),
        finished_at: result.finished_at.to_rfc3339(),
        dispatched: result.dispatched,
        summary: result.summary(),
        endpoints: result.endpoints(),
        rps_series: &result.rps_series,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Results written to {:?}", path);
    Ok(())
}
