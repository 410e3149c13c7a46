use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scanscope::aggregator::NO_FINDINGS_MESSAGE;
use scanscope::client::{FindingsFilter, HttpScanApi, ScanApi};
use scanscope::config::{ClientConfig, HeatmapOrder, PollPolicy, DEFAULT_BASE_URL};
use scanscope::controller::{Phase, PollSettings, SessionController, ViewModel};
use scanscope::server;
use scanscope::types::{RegionScope, ScanRequest, SecretKey, Severity};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Submit a cloud security scan, poll it, and summarize the findings.
#[derive(Clone, Parser)]
#[command(
    name = "scanscope",
    version,
    about = "Submit a cloud security scan to a remote scan service, poll it, and summarize the findings.",
    long_about = None
)]
struct Cli {
    /// Base URL of the scan service API.
    #[arg(long, env = "SCANSCOPE_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    api_base_url: String,

    /// AWS access key id. Required unless only serving the dashboard API.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key_id: Option<String>,

    /// AWS secret access key.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: Option<String>,

    /// Region to scan (repeatable). Omit to scan all enabled regions.
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Role ARN to assume for the scan.
    #[arg(long)]
    role_arn: Option<String>,

    /// External id for the role assumption.
    #[arg(long)]
    external_id: Option<String>,

    /// Seconds between poll ticks.
    #[arg(long = "interval-secs", default_value_t = 5)]
    interval_secs: u64,

    /// Per-request timeout in seconds.
    #[arg(long = "timeout-secs", default_value_t = 30)]
    timeout_secs: u64,

    /// Keep polling after the scan completes or fails.
    #[arg(long = "poll-forever", default_value_t = false)]
    poll_forever: bool,

    /// Heatmap cell order.
    #[arg(long = "heatmap-order", value_enum, default_value_t = HeatmapOrder::Server)]
    heatmap_order: HeatmapOrder,

    /// Only fetch findings for this service.
    #[arg(long = "only-service")]
    only_service: Option<String>,

    /// Only fetch findings with this severity (CRITICAL, HIGH, MEDIUM, LOW).
    #[arg(long = "only-severity", value_parser = parse_severity)]
    only_severity: Option<Severity>,

    /// Serve the local dashboard API.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Bind address for the dashboard API.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let policy = if cli.poll_forever {
        PollPolicy::Indefinite
    } else {
        PollPolicy::UntilTerminal
    };
    let config = ClientConfig::new(&cli.api_base_url)?
        .with_poll_interval(Duration::from_secs(cli.interval_secs))?
        .with_request_timeout(Duration::from_secs(cli.timeout_secs))?
        .with_poll_policy(policy)
        .with_heatmap_order(cli.heatmap_order);

    println!("scanscope configuration:");
    println!("  api_base_url : {}", config.base_url);
    println!(
        "  regions      : {}",
        if cli.regions.is_empty() {
            "<all>".to_string()
        } else {
            cli.regions.join(", ")
        }
    );
    println!("  interval     : {}s", config.poll_interval.as_secs());
    println!("  timeout      : {}s", config.request_timeout.as_secs());
    println!("  poll_policy  : {:?}", config.poll_policy);
    println!("  serve_ui     : {}", cli.serve_ui);

    let api = Arc::new(HttpScanApi::new(&config).context("failed to build HTTP client")?);
    let settings = PollSettings::from_config(&config).with_filter(FindingsFilter {
        service: cli.only_service.clone(),
        severity: cli.only_severity,
    });
    let controller = Arc::new(SessionController::new(api, settings));

    if cli.serve_ui {
        let bind = cli.bind.clone();
        let ctl = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, ctl).await {
                warn!(error = %e, "dashboard API server error");
            }
        });
        println!("Dashboard API at http://{}/api/view (Ctrl+C to stop)", cli.bind);
    }

    let request = match (cli.access_key_id, cli.secret_access_key) {
        (Some(access_key_id), Some(secret)) => Some(ScanRequest {
            access_key_id,
            secret_access_key: SecretKey::new(secret),
            region_scope: RegionScope::from_regions(cli.regions),
            role_arn: cli.role_arn,
            external_id: cli.external_id,
        }),
        (None, None) if cli.serve_ui => None,
        _ => anyhow::bail!("both --access-key-id and --secret-access-key are required to start a scan"),
    };

    if let Some(request) = request {
        match controller.submit(request).await {
            Ok(id) => println!("Scan started: {id}"),
            Err(e) if cli.serve_ui => warn!(error = %e, "scan submit failed"),
            Err(e) => return Err(e).context("failed to start scan"),
        }
    }

    watch_until_done(&controller, cli.serve_ui).await;
    controller.reset().await;
    Ok(())
}

/// Render every published snapshot. Returns on Ctrl+C, or once polling has
/// stopped when no dashboard is being served.
async fn watch_until_done<A: ScanApi + 'static>(
    controller: &SessionController<A>,
    keep_alive: bool,
) {
    let mut rx = controller.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let view = rx.borrow_and_update().clone();
        if view.ticks > 0 {
            print_view(&view);
        }
        if !keep_alive && !(view.phase == Phase::Active && view.polling) {
            if view.phase == Phase::Active {
                if let Ok(Some(progress)) = controller.fetch_progress().await {
                    for r in &progress.regions {
                        println!("  region {:<16} {}", r.region, r.status);
                    }
                }
            }
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted; stopping");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

fn print_view(view: &ViewModel) {
    println!(
        "\nStatus: {}  (tick {}, poll failures: {})",
        view.status.as_deref().unwrap_or("<unknown>"),
        view.ticks,
        view.poll_failures
    );
    println!(
        "Critical: {}   High & Medium: {}   Total findings: {}",
        view.cards.critical, view.cards.high_and_medium, view.total_findings
    );
    if view.heatmap.is_empty() {
        println!("{}", view.empty_message.unwrap_or(NO_FINDINGS_MESSAGE));
    } else {
        let cells: Vec<String> = view
            .heatmap
            .iter()
            .map(|e| format!("{} {}", e.severity, e.count))
            .collect();
        println!("Heatmap: {}", cells.join(" | "));
    }
    if let Some(err) = &view.last_error {
        println!("Last error: {err}");
    }
    print_findings_table(view);
}

fn print_findings_table(view: &ViewModel) {
    if view.findings.is_empty() {
        println!("Findings will appear here once the scan completes.");
        return;
    }
    let mut rule_w = "rule".len();
    let mut svc_w = "service".len();
    let mut region_w = "region".len();
    for f in &view.findings {
        rule_w = rule_w.max(f.rule_id.len());
        svc_w = svc_w.max(f.service.len());
        region_w = region_w.max(f.region.as_deref().unwrap_or("-").len());
    }
    let sev_w = "CRITICAL".len();
    let ev_w = 60usize;

    println!(
        "{:<sev_w$}  {:<rule_w$}  {:<svc_w$}  {:<region_w$}  {:<ev_w$}",
        "severity", "rule", "service", "region", "evidence",
    );
    println!(
        "{:-<sev_w$}  {:-<rule_w$}  {:-<svc_w$}  {:-<region_w$}  {:-<ev_w$}",
        "", "", "", "", "",
    );
    for f in &view.findings {
        let mut evidence = serde_json::to_string(&f.evidence).unwrap_or_default();
        if evidence.len() > ev_w {
            let mut cut = ev_w;
            while !evidence.is_char_boundary(cut) {
                cut -= 1;
            }
            evidence.truncate(cut);
        }
        println!(
            "{:<sev_w$}  {:<rule_w$}  {:<svc_w$}  {:<region_w$}  {:<ev_w$}",
            f.severity.as_str(),
            f.rule_id,
            f.service,
            f.region.as_deref().unwrap_or("-"),
            evidence,
        );
    }
}

fn parse_severity(raw: &str) -> Result<Severity, String> {
    Severity::parse(&raw.to_ascii_uppercase())
        .ok_or_else(|| format!("unknown severity {raw:?}; expected CRITICAL, HIGH, MEDIUM or LOW"))
}
