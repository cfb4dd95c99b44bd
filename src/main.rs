use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use club_ops::config::AppConfig;
use club_ops::error::AppError;
use club_ops::membership::calendar::club_offset;
use club_ops::membership::domain::MemberId;
use club_ops::membership::eligibility::EligibilityEngine;
use club_ops::membership::import;
use club_ops::membership::memory::{
    ledger_channel, InMemoryAttendanceRepository, InMemoryFineRepository, InMemoryObjectStore,
    InMemoryPaymentRepository, InMemoryProfileRepository, InMemoryTrainingRepository,
};
use club_ops::membership::reconcile::{parse_csv_entries, FeedEntry, HttpLedgerFeed};
use club_ops::membership::router::{membership_router, AppState as MembershipState};
use club_ops::membership::{CheckinScanner, MemberStanding, MembershipService};
use club_ops::telemetry;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct OpsState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "Club Ops",
    about = "Member management service: fee payments, check-in, and reconciliation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Evaluate one member's standing from CSV exports, offline
    Standing(StandingArgs),
    /// Inspect a validation-ledger feed before running the server-side sync
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct StandingArgs {
    /// Member id to evaluate
    #[arg(long)]
    member: String,
    /// Payments CSV export
    #[arg(long)]
    payments_csv: PathBuf,
    /// Fines CSV export
    #[arg(long)]
    fines_csv: Option<PathBuf>,
    /// Attendance CSV export
    #[arg(long)]
    attendance_csv: Option<PathBuf>,
    /// Evaluation instant, RFC 3339 (defaults to now)
    #[arg(long, value_parser = parse_instant)]
    at: Option<DateTime<FixedOffset>>,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    /// Feed CSV export to inspect
    #[arg(long, conflicts_with = "url")]
    csv: Option<PathBuf>,
    /// Published feed URL to fetch and inspect
    #[arg(long)]
    url: Option<String>,
    /// Which ledger the feed targets
    #[arg(long, value_enum, default_value_t = FeedTarget::Payments)]
    target: FeedTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FeedTarget {
    Payments,
    Fines,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Standing(args) => run_standing_report(args),
        Command::Reconcile(args) => run_feed_inspection(args).await,
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.with_timezone(&club_offset()))
        .map_err(|err| format!("failed to parse '{raw}' as RFC 3339 ({err})"))
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let changes = ledger_channel();
    let payments = Arc::new(InMemoryPaymentRepository::new(changes.clone()));
    let fines = Arc::new(InMemoryFineRepository::new(changes.clone()));
    let attendance = Arc::new(InMemoryAttendanceRepository::default());
    let trainings = Arc::new(InMemoryTrainingRepository::default());
    let profiles = Arc::new(InMemoryProfileRepository::default());
    let store = Arc::new(InMemoryObjectStore::default());

    let service = Arc::new(MembershipService::new(
        payments,
        fines,
        Arc::clone(&attendance),
        Arc::clone(&profiles),
        store,
        EligibilityEngine::new(config.policy.clone()),
        config.buckets.clone(),
        config.feed.payments_url.clone(),
        config.feed.fines_url.clone(),
    ));
    service.spawn_refresh_listener(changes.subscribe());

    let scanner = Arc::new(CheckinScanner::new(attendance, trainings, profiles));

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = OpsState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(membership_router(MembershipState { service, scanner }))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "club membership service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn run_standing_report(args: StandingArgs) -> Result<(), AppError> {
    let member = MemberId(args.member);
    let now = args
        .at
        .unwrap_or_else(|| Utc::now().with_timezone(&club_offset()));

    let payments: Vec<_> = import::read_payments(File::open(&args.payments_csv)?)?
        .into_iter()
        .filter(|record| record.member_id == member)
        .collect();
    let fines = match &args.fines_csv {
        Some(path) => import::read_fines(File::open(path)?)?
            .into_iter()
            .filter(|record| record.member_id == member)
            .collect(),
        None => Vec::new(),
    };
    let attendance = match &args.attendance_csv {
        Some(path) => import::read_attendance(File::open(path)?)?
            .into_iter()
            .filter(|record| record.member_id == member)
            .collect(),
        None => Vec::new(),
    };

    let config = AppConfig::load()?;
    let engine = EligibilityEngine::new(config.policy);
    let standing = engine.standing(&payments, &attendance, &fines, now);
    render_standing(&member, &standing);
    Ok(())
}

async fn run_feed_inspection(args: ReconcileArgs) -> Result<(), AppError> {
    let entries = match (&args.csv, &args.url) {
        (Some(path), _) => parse_csv_entries(File::open(path)?).map_err(to_service_error)?,
        (None, Some(url)) => HttpLedgerFeed::default()
            .fetch_entries(url)
            .await
            .map_err(to_service_error)?,
        (None, None) => {
            let config = AppConfig::load()?;
            let url = match args.target {
                FeedTarget::Payments => config.feed.payments_url,
                FeedTarget::Fines => config.feed.fines_url,
            }
            .ok_or(club_ops::membership::ServiceError::FeedNotConfigured(
                "reconcile",
            ))?;
            HttpLedgerFeed::default()
                .fetch_entries(&url)
                .await
                .map_err(to_service_error)?
        }
    };

    render_feed_inspection(&args.target, &entries);
    Ok(())
}

fn to_service_error(error: club_ops::membership::reconcile::FeedError) -> AppError {
    AppError::Service(error.into())
}

fn render_standing(member: &MemberId, standing: &MemberStanding) {
    println!("Standing for {}", member.0);
    println!("Evaluated at {}", standing.evaluated_at.to_rfc3339());

    let payment = &standing.payment;
    println!("\nMonthly fees ({}-{:02})", payment.year, payment.month);
    println!(
        "- validated S/{:.2} of S/{:.2} required (registered S/{:.2}, observed S/{:.2})",
        payment.validated_total,
        payment.required_due,
        payment.registered_total,
        payment.observed_total
    );
    println!("- {}", payment.verdict.summary());

    let attendance = &standing.attendance;
    println!(
        "\nTraining week {} -> {}",
        attendance.week_start.format("%Y-%m-%d"),
        attendance.week_end.format("%Y-%m-%d")
    );
    println!(
        "- attended {}/{} required session(s)",
        attendance.attended_sessions, attendance.required_sessions
    );
    println!("- {}", attendance.verdict.summary());

    if standing.is_cleared() {
        println!("\nCleared to play");
    } else {
        println!("\nNot cleared");
    }
}

fn render_feed_inspection(target: &FeedTarget, entries: &[FeedEntry]) {
    use club_ops::membership::domain::VerificationStatus;

    let ledger = match target {
        FeedTarget::Payments => "payments",
        FeedTarget::Fines => "fines",
    };
    println!("Feed inspection ({ledger} ledger)");
    println!("Rows: {}", entries.len());

    let mut validated = 0usize;
    let mut observed = 0usize;
    let mut pending = 0usize;
    let mut blank_ids = 0usize;
    for entry in entries {
        if entry.record_id.trim().is_empty() {
            blank_ids += 1;
        }
        match entry.status() {
            VerificationStatus::Validated => validated += 1,
            VerificationStatus::Observed => observed += 1,
            VerificationStatus::Pending => pending += 1,
        }
    }

    println!("- validated: {validated}");
    println!("- observed: {observed}");
    println!("- pending: {pending}");
    if blank_ids > 0 {
        println!("- rows without a record id: {blank_ids} (will count as missing)");
    }
    println!("\nApply with POST /api/v1/admin/sync/{ledger} on the running service.");
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<OpsState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<OpsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instants_parse_into_club_time() {
        let at = parse_instant("2026-03-07T12:00:00Z").unwrap();
        assert_eq!(at.offset(), &club_offset());
        assert_eq!(at.to_rfc3339(), "2026-03-07T07:00:00-05:00");
    }

    #[test]
    fn bad_instants_are_reported() {
        assert!(parse_instant("next tuesday").is_err());
    }
}
