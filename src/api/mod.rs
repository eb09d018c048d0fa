use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Json, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::{
    AccrualRate, Block, CareError, Clock, InvalidInput, Ledger, PensionRecord, ProjectionResult,
    ReductionPolicy, RetirementParams, StatusKind, SystemClock, accrued_total, project,
};

mod cli;

pub use cli::{Cli, Command, ProjectArgs, ServeArgs, run};

const DISPLAY_HASH_PREFIX: usize = 15;

const DEFAULT_YEAR: i32 = 2025;
const DEFAULT_ACCRUAL_DENOMINATOR: u32 = 49;
const DEFAULT_CPI_PERCENT: i64 = 2;
const DEFAULT_NORMAL_PENSION_AGE: u32 = 67;
const DEFAULT_PLANNED_RETIREMENT_AGE: u32 = 67;
const DEFAULT_REDUCTION_PERCENT: i64 = 4;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub port: u16,
    pub epoch_year: i32,
}

/// Session state shared by every handler. Appends and resets take the write
/// lock so index and prev-hash assignment cannot interleave.
#[derive(Clone)]
pub struct AppState {
    ledger: Arc<RwLock<Ledger>>,
    clock: Arc<dyn Clock>,
    epoch_year: i32,
}

impl AppState {
    pub fn new(epoch_year: i32, clock: Arc<dyn Clock>) -> Self {
        let ledger = Ledger::with_clock(epoch_year, clock.as_ref());
        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            clock,
            epoch_year,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RecordPayload {
    year: Option<i32>,
    salary: Option<Decimal>,
    accrual_numerator: Option<u32>,
    accrual_denominator: Option<u32>,
    cpi_percent: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    normal_pension_age: Option<u32>,
    planned_retirement_age: Option<u32>,
    reduction_percent: Option<Decimal>,
    clamp_at_zero: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlockView<'a> {
    #[serde(flatten)]
    block: &'a Block,
    hash: String,
    unit: Decimal,
}

impl<'a> From<&'a Block> for BlockView<'a> {
    fn from(block: &'a Block) -> Self {
        Self {
            block,
            hash: block.compute_hash(),
            unit: block.record().calculate_unit(),
        }
    }
}

/// One line of the ledger table shown to members.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LedgerRow {
    index: u64,
    year: i32,
    salary: Decimal,
    accrual: String,
    cpi_percent: Decimal,
    unit: Decimal,
    hash_prefix: String,
}

impl From<&Block> for LedgerRow {
    fn from(block: &Block) -> Self {
        let record = block.record();
        Self {
            index: block.index(),
            year: record.year(),
            salary: record.salary().round_dp(2),
            accrual: record.accrual().to_string(),
            cpi_percent: (record.cpi_index() * Decimal::ONE_HUNDRED).normalize(),
            unit: record.calculate_unit().round_dp(2),
            hash_prefix: hash_prefix(&block.compute_hash()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerResponse {
    valid: bool,
    rows: Vec<LedgerRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectionResponse {
    #[serde(flatten)]
    projection: ProjectionResult,
    status_message: String,
    blocks: usize,
}

impl ProjectionResponse {
    pub(crate) fn new(projection: ProjectionResult, blocks: usize) -> Self {
        let status_message = status_message(&projection);
        Self {
            projection,
            status_message,
            blocks,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    ok: bool,
    blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    diverged_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    blocks: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config.epoch_year, Arc::new(SystemClock));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, epoch_year = config.epoch_year, "CARE ledger HTTP API listening");
    info!("Local access: http://127.0.0.1:{}/health", config.port);

    axum::serve(listener, app).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/records", post(append_record_handler))
        .route("/api/blocks", get(blocks_handler))
        .route("/api/ledger", get(ledger_handler))
        .route("/api/verify", get(verify_handler))
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .route("/api/reset", post(reset_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let ledger = state.ledger.read().await;
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            blocks: ledger.len(),
        },
    )
}

async fn append_record_handler(
    State(state): State<AppState>,
    payload: Result<Json<RecordPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };
    let record = match record_from_payload(payload) {
        Ok(record) => record,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let mut ledger = state.ledger.write().await;
    // The session total must stay representable once this year is added.
    let fits = accrued_total(&ledger)
        .ok()
        .and_then(|total| total.checked_add(record.calculate_unit()))
        .is_some();
    if !fits {
        let err = InvalidInput::OutOfRange {
            quantity: "accrued total",
        };
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }
    let block = ledger.append(record, state.clock.as_ref());
    info!(
        index = block.index(),
        year = block.record().year(),
        "year locked into ledger"
    );
    json_response(StatusCode::CREATED, BlockView::from(block))
}

async fn blocks_handler(State(state): State<AppState>) -> Response {
    let ledger = state.ledger.read().await;
    let blocks: Vec<BlockView<'_>> = ledger.blocks().iter().map(BlockView::from).collect();
    json_response(StatusCode::OK, blocks)
}

async fn ledger_handler(State(state): State<AppState>) -> Response {
    let ledger = state.ledger.read().await;
    json_response(
        StatusCode::OK,
        LedgerResponse {
            valid: ledger.is_valid(),
            rows: ledger_rows(&ledger),
        },
    )
}

async fn verify_handler(State(state): State<AppState>) -> Response {
    let ledger = state.ledger.read().await;
    let response = match ledger.verify() {
        Ok(()) => VerifyResponse {
            ok: true,
            blocks: ledger.len(),
            diverged_at: None,
            error: None,
        },
        Err(violation) => VerifyResponse {
            ok: false,
            blocks: ledger.len(),
            diverged_at: Some(violation.diverged_at()),
            error: Some(violation.to_string()),
        },
    };
    json_response(StatusCode::OK, response)
}

async fn projection_get_handler(
    State(state): State<AppState>,
    payload: Result<Query<ProjectionPayload>, QueryRejection>,
) -> Response {
    match payload {
        Ok(Query(payload)) => projection_handler_impl(state, payload).await,
        Err(rejection) => error_response(rejection.status(), &rejection.body_text()),
    }
}

async fn projection_post_handler(
    State(state): State<AppState>,
    payload: Result<Json<ProjectionPayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => projection_handler_impl(state, payload).await,
        Err(rejection) => error_response(rejection.status(), &rejection.body_text()),
    }
}

async fn projection_handler_impl(state: AppState, payload: ProjectionPayload) -> Response {
    let params = match params_from_payload(payload) {
        Ok(params) => params,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let ledger = state.ledger.read().await;
    if let Err(violation) = ledger.verify() {
        return error_response(
            StatusCode::CONFLICT,
            &CareError::from(violation).to_string(),
        );
    }

    let projection = match project(&ledger, &params) {
        Ok(projection) => projection,
        Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    };
    if projection.over_reduced {
        warn!(
            reduction = %projection.reduction_applied,
            policy = ?params.reduction_policy,
            "early-retirement reduction reaches the whole accrued pension"
        );
    }
    json_response(
        StatusCode::OK,
        ProjectionResponse::new(projection, ledger.len()),
    )
}

async fn reset_handler(State(state): State<AppState>) -> Response {
    let mut ledger = state.ledger.write().await;
    *ledger = Ledger::with_clock(state.epoch_year, state.clock.as_ref());
    info!(epoch_year = state.epoch_year, "ledger reset to genesis");
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "reset",
            blocks: ledger.len(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn record_from_payload(payload: RecordPayload) -> Result<PensionRecord, InvalidInput> {
    let accrual = AccrualRate::new(
        payload.accrual_numerator.unwrap_or(1),
        payload
            .accrual_denominator
            .unwrap_or(DEFAULT_ACCRUAL_DENOMINATOR),
    )?;
    let cpi_percent = payload
        .cpi_percent
        .unwrap_or_else(|| Decimal::from(DEFAULT_CPI_PERCENT));

    PensionRecord::new(
        payload.year.unwrap_or(DEFAULT_YEAR),
        payload.salary.unwrap_or(Decimal::ZERO),
        accrual,
        cpi_percent / Decimal::ONE_HUNDRED,
    )
}

fn params_from_payload(payload: ProjectionPayload) -> Result<RetirementParams, InvalidInput> {
    let reduction_percent = payload
        .reduction_percent
        .unwrap_or_else(|| Decimal::from(DEFAULT_REDUCTION_PERCENT));
    let policy = if payload.clamp_at_zero.unwrap_or(false) {
        ReductionPolicy::ClampAtZero
    } else {
        ReductionPolicy::Preserve
    };

    RetirementParams::new(
        payload
            .normal_pension_age
            .unwrap_or(DEFAULT_NORMAL_PENSION_AGE),
        payload
            .planned_retirement_age
            .unwrap_or(DEFAULT_PLANNED_RETIREMENT_AGE),
        reduction_percent / Decimal::ONE_HUNDRED,
        policy,
    )
}

pub(crate) fn ledger_rows(ledger: &Ledger) -> Vec<LedgerRow> {
    ledger
        .blocks_excluding_genesis()
        .iter()
        .map(LedgerRow::from)
        .collect()
}

fn hash_prefix(hash: &str) -> String {
    let prefix = hash.get(..DISPLAY_HASH_PREFIX).unwrap_or(hash);
    format!("{prefix}...")
}

pub(crate) fn status_message(projection: &ProjectionResult) -> String {
    match projection.status {
        StatusKind::EarlyRetirement => format!(
            "Early Retirement: {}% total reduction applied ({} years early).",
            projection
                .reduction_applied
                .checked_mul(Decimal::ONE_HUNDRED)
                .unwrap_or(Decimal::MAX)
                .round()
                .normalize(),
            projection.years_early
        ),
        StatusKind::FullEntitlement => {
            "Retirement at or after NPA: 100% of accrued pension awarded.".to_string()
        }
    }
}
