pub mod protocol;
pub mod worker;

use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tracing::info;

use crate::core::{
    BaseParameters, DEFAULT_BATCH_SIZE, DEFAULT_PROGRESS_INTERVAL, DistributionSpec, RunConfig,
    UncertaintyInputs,
};
use protocol::{Request, RunSimulation, WireDistribution, WireUncertaintyInputs, decode_request};
use worker::{WorkerError, run_stdio_worker, serve_lines, spawn_run};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("could not encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(
    name = "propsim",
    version,
    about = "Monte Carlo cash-flow simulator for leveraged rental property"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PROPSIM_LOG_LEVEL",
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset (trace, debug, info, warn, error)"
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the simulation protocol over HTTP (server-sent events)
    Serve {
        #[arg(long, env = "PROPSIM_PORT", default_value_t = 8080)]
        port: u16,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Read RUN_SIMULATION requests from stdin, write responses to stdout
    Worker {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run one simulation from flags and print the response stream
    Run(RunArgs),
}

#[derive(Args, Debug, Clone, Copy)]
pub struct EngineArgs {
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, help = "Trials per batch")]
    pub batch_size: u32,
    #[arg(
        long,
        default_value_t = DEFAULT_PROGRESS_INTERVAL,
        help = "Successful trials between PROGRESS messages"
    )]
    pub progress_interval: u32,
}

impl From<EngineArgs> for RunConfig {
    fn from(args: EngineArgs) -> Self {
        RunConfig {
            batch_size: args.batch_size,
            progress_interval: args.progress_interval,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value_t = 10_000)]
    pub simulations: u32,
    #[arg(long, help = "Seed for reproducible runs; derived from the clock when omitted")]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = 300_000.0)]
    pub purchase_price: f64,
    #[arg(long, default_value_t = 2_000.0)]
    pub monthly_rent: f64,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Annual loan interest rate in percent, e.g. 6"
    )]
    pub interest_rate: f64,
    #[arg(long, default_value_t = 240_000.0)]
    pub loan_amount: f64,
    #[arg(long, default_value_t = 360)]
    pub loan_term_months: u32,
    #[arg(long, default_value_t = 10)]
    pub projection_years: u32,
    #[arg(long, default_value_t = 3_000.0)]
    pub annual_taxes: f64,
    #[arg(long, default_value_t = 1_200.0)]
    pub annual_insurance: f64,
    #[arg(long, default_value_t = 1_500.0)]
    pub annual_maintenance: f64,
    #[arg(long, default_value_t = 0.0)]
    pub annual_management: f64,
    #[arg(long, default_value_t = 0.0)]
    pub annual_capex: f64,
    #[arg(long, default_value_t = 60_000.0)]
    pub initial_investment: f64,

    #[arg(long, value_parser = parse_distribution, help = "Distribution JSON, e.g. '{\"type\":\"normal\",\"mean\":0.03,\"stdDev\":0.01}'")]
    pub rent_growth: Option<WireDistribution>,
    #[arg(long, value_parser = parse_distribution)]
    pub initial_rent: Option<WireDistribution>,
    #[arg(long, value_parser = parse_distribution)]
    pub expense_growth: Option<WireDistribution>,
    #[arg(long, value_parser = parse_distribution)]
    pub appreciation: Option<WireDistribution>,
    #[arg(long, value_parser = parse_distribution)]
    pub vacancy_rate: Option<WireDistribution>,
    #[arg(long, value_parser = parse_distribution)]
    pub maintenance_multiplier: Option<WireDistribution>,
    #[arg(long, value_parser = parse_distribution)]
    pub price_distribution: Option<WireDistribution>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

fn parse_distribution(raw: &str) -> Result<WireDistribution, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid distribution JSON: {e}"))
}

pub fn default_base_parameters() -> BaseParameters {
    BaseParameters {
        purchase_price: 300_000.0,
        initial_monthly_rent: 2_000.0,
        annual_interest_rate: 0.06,
        loan_amount: 240_000.0,
        loan_term_months: 360,
        projection_years: 10,
        annual_taxes: 3_000.0,
        annual_insurance: 1_200.0,
        annual_maintenance: 1_500.0,
        annual_management: 0.0,
        annual_cap_ex: 0.0,
        initial_investment: 60_000.0,
    }
}

pub fn default_uncertainty() -> UncertaintyInputs {
    UncertaintyInputs {
        rent_growth: DistributionSpec::Normal {
            mean: 0.03,
            std_dev: 0.01,
        },
        initial_rent: DistributionSpec::Triangular {
            min: 1_800.0,
            mode: 2_000.0,
            max: 2_200.0,
        },
        expense_growth: DistributionSpec::Normal {
            mean: 0.02,
            std_dev: 0.005,
        },
        appreciation: DistributionSpec::Normal {
            mean: 0.03,
            std_dev: 0.02,
        },
        vacancy_rate: DistributionSpec::Uniform {
            min: 0.02,
            max: 0.08,
        },
        maintenance_multiplier: DistributionSpec::Triangular {
            min: 0.8,
            mode: 1.0,
            max: 1.5,
        },
        purchase_price: DistributionSpec::Uniform {
            min: 290_000.0,
            max: 310_000.0,
        },
    }
}

/// Builds the wire request for the `run` subcommand. Flags are in percent
/// where the help text says so.
fn request_from_args(args: &RunArgs) -> RunSimulation {
    let mut uncertainty = WireUncertaintyInputs::from(&default_uncertainty());
    for (slot, flag) in [
        (&mut uncertainty.rent_growth, &args.rent_growth),
        (&mut uncertainty.initial_rent, &args.initial_rent),
        (&mut uncertainty.expense_growth, &args.expense_growth),
        (&mut uncertainty.appreciation, &args.appreciation),
        (&mut uncertainty.vacancy_rate, &args.vacancy_rate),
        (
            &mut uncertainty.maintenance_multiplier,
            &args.maintenance_multiplier,
        ),
        (&mut uncertainty.purchase_price, &args.price_distribution),
    ] {
        if let Some(v) = flag {
            *slot = v.clone();
        }
    }

    RunSimulation {
        base_params: BaseParameters {
            purchase_price: args.purchase_price,
            initial_monthly_rent: args.monthly_rent,
            annual_interest_rate: args.interest_rate / 100.0,
            loan_amount: args.loan_amount,
            loan_term_months: args.loan_term_months,
            projection_years: args.projection_years,
            annual_taxes: args.annual_taxes,
            annual_insurance: args.annual_insurance,
            annual_maintenance: args.annual_maintenance,
            annual_management: args.annual_management,
            annual_cap_ex: args.annual_capex,
            initial_investment: args.initial_investment,
        },
        uncertainty_inputs: uncertainty,
        simulation_count: args.simulations,
        random_seed: args.seed,
    }
}

pub async fn run_cli(cli: Cli) -> Result<(), ApiError> {
    match cli.command {
        Command::Serve { port, engine } => run_http_server(port, engine.into()).await,
        Command::Worker { engine } => Ok(run_stdio_worker(engine.into()).await?),
        Command::Run(args) => {
            let request = Request::RunSimulation(request_from_args(&args));
            let mut line = serde_json::to_string(&request)?;
            line.push('\n');
            serve_lines(line.as_bytes(), tokio::io::stdout(), args.engine.into()).await?;
            Ok(())
        }
    }
}

#[derive(Clone, Copy)]
struct AppState {
    config: RunConfig,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn app(config: RunConfig) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .fallback(not_found_handler)
        .with_state(AppState { config })
}

pub async fn run_http_server(port: u16, config: RunConfig) -> Result<(), ApiError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, batch_size = config.batch_size, "simulation HTTP API listening");

    axum::serve(listener, app(config)).await?;
    Ok(())
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

/// Streams the protocol responses for one request as server-sent events.
/// Each event is named after the message kind and carries the JSON message.
/// A client disconnect drops the stream, and with it the run handle, which
/// cancels the run.
async fn simulate_handler(State(state): State<AppState>, body: String) -> Response {
    let request = match decode_request(&body) {
        Ok(Request::RunSimulation(request)) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let events = spawn_run(request, state.config).map(|message| {
        Event::default()
            .event(message.kind())
            .json_data(&message)
    });
    with_cache_control(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
