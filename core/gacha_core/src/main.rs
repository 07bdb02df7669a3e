use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use gacha_core::{
    enka::{EnkaDb, QueriedProfile, ShowcaseCache},
    migrate_old_gachas_into_profiles,
    widget::{build_timeline, TimelinePolicy},
    EntryFilter, GachaEntry, GachaProfileId, GachaStore, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const DEFAULT_PORT: u16 = 17610;

#[derive(Parser, Debug)]
#[command(name = "gacha_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17610
    /// - ip (implies port 17610), e.g. 127.0.0.1
    #[arg(long, default_value = "127.0.0.1:17610")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/gacha-core.db")]
    db: PathBuf,

    /// Legacy gacha database to migrate from.
    #[arg(long)]
    legacy_db: Option<PathBuf>,

    /// Run the legacy migration before serving (requires --legacy-db).
    #[arg(long, default_value_t = false)]
    migrate_on_start: bool,

    /// Enka database JSON used by the showcase expiry check.
    #[arg(long)]
    enka_db: Option<PathBuf>,

    /// Minutes until a widget timeline is reloaded (at most one week).
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..=10_080))]
    widget_refresh_minutes: i64,

    /// Minutes between two widget timeline entries (at most one day).
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(i64).range(1..=1_440))]
    widget_entry_minutes: i64,
}

#[derive(Clone)]
struct AppState {
    /// Request-driven reads and writes.
    fg: GachaStore,
    /// Imports and other bulk work.
    bg: GachaStore,
    legacy_db: Option<Arc<PathBuf>>,
    enka: Option<Arc<EnkaDb>>,
    showcases: Arc<Mutex<ShowcaseCache>>,
    timeline: TimelinePolicy,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

#[derive(Deserialize)]
struct WidgetQuery {
    #[serde(default)]
    profile: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gacha_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let fg = GachaStore::open(&args.db, "foreground")?;
    let bg = GachaStore::open(&args.db, "background")?;

    if args.migrate_on_start {
        match &args.legacy_db {
            Some(path) => {
                let report = migrate_old_gachas_into_profiles(path, &bg).await?;
                info!(
                    inserted = report.inserted,
                    skipped = report.skipped_duplicates,
                    "legacy migration finished"
                );
            }
            None => warn!("--migrate-on-start ignored: no --legacy-db given"),
        }
    }

    let enka = match &args.enka_db {
        Some(path) => Some(Arc::new(EnkaDb::load(path)?)),
        None => None,
    };

    let state = AppState {
        fg,
        bg,
        legacy_db: args.legacy_db.clone().map(Arc::new),
        enka,
        showcases: Arc::new(Mutex::new(ShowcaseCache::default())),
        timeline: TimelinePolicy {
            entry_every: time::Duration::minutes(args.widget_entry_minutes),
            refresh_after: time::Duration::minutes(args.widget_refresh_minutes),
            ..TimelinePolicy::default()
        },
    };

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/gacha/entries",
            get(get_entries).post(post_entries).options(options_ok),
        )
        .route("/gacha/profiles", get(get_profiles))
        .route(
            "/gacha/profiles/refresh",
            post(post_profiles_refresh).options(options_ok),
        )
        .route(
            "/gacha/profiles/:uid_with_game/summary",
            get(get_profile_summary),
        )
        .route(
            "/gacha/migrate_legacy",
            post(post_migrate_legacy).options(options_ok),
        )
        .route("/data/wipe", post(post_data_wipe).options(options_ok))
        .route("/widget/timeline", get(get_widget_timeline))
        .route("/enka/expiry", post(post_enka_expiry).options(options_ok))
        .with_state(state)
        .layer(cors);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some(("localhost", port_str)) = input.rsplit_once(':') {
        let port: u16 = port_str.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                input,
                DEFAULT_PORT
            )
        })?;
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

fn err(status: StatusCode, code: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error: code })).into_response()
}

fn store_err(what: &str, e: StoreError) -> Response {
    if e.is_client_error() {
        return err(StatusCode::BAD_REQUEST, e.code());
    }
    error!("{what} failed: {e}");
    err(StatusCode::INTERNAL_SERVER_ERROR, e.code())
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "gacha_core",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

async fn post_entries(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let entries: Vec<GachaEntry> = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return err(StatusCode::BAD_REQUEST, "invalid_payload"),
    };
    match state.fg.batch_insert(&entries).await {
        Ok(report) => ok(report),
        Err(e) => store_err("batch insert", e),
    }
}

async fn get_entries(State(state): State<AppState>, Query(q): Query<EntryFilter>) -> Response {
    match state.fg.list_entries(&q).await {
        Ok(entries) => ok(entries),
        Err(e) => store_err("list entries", e),
    }
}

async fn get_profiles(State(state): State<AppState>) -> Response {
    match state.fg.list_profiles().await {
        Ok(profiles) => ok(profiles),
        Err(e) => store_err("list profiles", e),
    }
}

async fn post_profiles_refresh(State(state): State<AppState>) -> Response {
    match state.fg.refresh_all_profiles().await {
        Ok(profiles) => ok(profiles),
        Err(e) => store_err("refresh profiles", e),
    }
}

async fn get_profile_summary(
    State(state): State<AppState>,
    Path(uid_with_game): Path<String>,
) -> Response {
    let profile = match GachaProfileId::parse_uid_with_game(&uid_with_game) {
        Ok(p) => p,
        Err(e) => return store_err("parse profile", e),
    };
    match state.fg.profile_summary(&profile).await {
        Ok(Some(summary)) => ok(summary),
        Ok(None) => err(StatusCode::NOT_FOUND, "profile_not_found"),
        Err(e) => store_err("profile summary", e),
    }
}

async fn post_migrate_legacy(State(state): State<AppState>) -> Response {
    let Some(path) = state.legacy_db.as_deref() else {
        return err(StatusCode::NOT_FOUND, "legacy_db_not_configured");
    };
    match migrate_old_gachas_into_profiles(path, &state.bg).await {
        Ok(report) => {
            info!(
                inserted = report.inserted,
                skipped = report.skipped_duplicates,
                "legacy migration finished"
            );
            ok(report)
        }
        Err(e) => store_err("legacy migration", e),
    }
}

async fn post_data_wipe(State(state): State<AppState>) -> Response {
    match state.fg.wipe_all().await {
        Ok(report) => ok(report),
        Err(e) => store_err("wipe", e),
    }
}

async fn get_widget_timeline(
    State(state): State<AppState>,
    Query(q): Query<WidgetQuery>,
) -> Response {
    let profiles = match state.fg.list_profiles().await {
        Ok(p) => p,
        Err(e) => return store_err("list profiles", e),
    };
    match build_timeline(
        OffsetDateTime::now_utc(),
        state.timeline,
        &profiles,
        q.profile.as_deref(),
    ) {
        Ok(timeline) => ok(timeline),
        Err(e) => {
            error!("widget timeline failed: {e}");
            err(StatusCode::INTERNAL_SERVER_ERROR, e.code())
        }
    }
}

#[derive(Serialize)]
struct ExpiryResult {
    uid: u64,
    expired: bool,
}

async fn post_enka_expiry(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Some(db) = state.enka.as_deref() else {
        return err(StatusCode::NOT_FOUND, "enka_db_not_configured");
    };
    let profile: QueriedProfile = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return err(StatusCode::BAD_REQUEST, "invalid_payload"),
    };
    let merged = state.showcases.lock().await.absorb(profile);
    ok(ExpiryResult {
        uid: merged.uid,
        expired: db.check_if_expired(&merged),
    })
}
