use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use tracing::{Level, info};

use super::{LedgerRow, ProjectionResponse, ServerConfig, ledger_rows, run_http_server};
use crate::core::{
    AccrualRate, CareResult, DEFAULT_EPOCH_YEAR, InvalidInput, Ledger, PensionRecord,
    ReductionPolicy, RetirementParams, SystemClock, project,
};

#[derive(Parser, Debug)]
#[command(
    name = "care-ledger",
    about = "Hash-linked CARE pension ledger with early-retirement projection"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "CARE_LOG",
        default_value_t = Level::INFO,
        help = "Log level: trace, debug, info, warn or error"
    )]
    pub log_level: Level,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the ledger over HTTP for one session.
    Serve(ServeArgs),
    /// Build a ledger from the given years and print the projection as JSON.
    Project(ProjectArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "CARE_PORT", default_value_t = 8080)]
    pub port: u16,
    #[arg(
        long,
        env = "CARE_GENESIS_YEAR",
        default_value_t = DEFAULT_EPOCH_YEAR,
        allow_negative_numbers = true,
        help = "Year stamped on the genesis record"
    )]
    pub genesis_year: i32,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        ServerConfig {
            port: args.port,
            epoch_year: args.genesis_year,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[arg(
        long = "record",
        value_parser = parse_record_arg,
        help = "Accrual year as YEAR:SALARY:DENOMINATOR:CPI_PERCENT, e.g. 2025:50000:49:2.0"
    )]
    pub records: Vec<PensionRecord>,
    #[arg(long, default_value_t = 67, help = "Normal pension age (NPA)")]
    pub normal_pension_age: u32,
    #[arg(long, default_value_t = 67, help = "Planned retirement age")]
    pub retirement_age: u32,
    #[arg(
        long,
        default_value = "4.0",
        help = "Reduction per year retired before NPA, in percent"
    )]
    pub reduction_rate: Decimal,
    #[arg(long, help = "Floor the final pension at zero when the reduction exceeds 100%")]
    pub clamp_at_zero: bool,
    #[arg(
        long,
        env = "CARE_GENESIS_YEAR",
        default_value_t = DEFAULT_EPOCH_YEAR,
        allow_negative_numbers = true
    )]
    pub genesis_year: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionReport {
    verified: bool,
    rows: Vec<LedgerRow>,
    projection: ProjectionResponse,
}

pub async fn run(cli: Cli) -> CareResult<()> {
    match cli.command {
        Command::Serve(args) => run_http_server(args.into()).await?,
        Command::Project(args) => {
            let report = build_report(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn build_report(args: &ProjectArgs) -> CareResult<ProjectionReport> {
    let policy = if args.clamp_at_zero {
        ReductionPolicy::ClampAtZero
    } else {
        ReductionPolicy::Preserve
    };
    let params = RetirementParams::new(
        args.normal_pension_age,
        args.retirement_age,
        args.reduction_rate / Decimal::ONE_HUNDRED,
        policy,
    )?;

    let clock = SystemClock;
    let mut ledger = Ledger::with_clock(args.genesis_year, &clock);
    for record in &args.records {
        ledger.append(record.clone(), &clock);
    }
    ledger.verify()?;
    info!(blocks = ledger.len(), "ledger built and verified");

    let projection = project(&ledger, &params)?;
    Ok(ProjectionReport {
        verified: true,
        rows: ledger_rows(&ledger),
        projection: ProjectionResponse::new(projection, ledger.len()),
    })
}

fn parse_record_arg(raw: &str) -> Result<PensionRecord, InvalidInput> {
    let malformed = |reason: &str| InvalidInput::MalformedRecord {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [year, salary, denominator, cpi_percent] = parts.as_slice() else {
        return Err(malformed("expected YEAR:SALARY:DENOMINATOR:CPI_PERCENT"));
    };

    let year = year
        .parse::<i32>()
        .map_err(|_| malformed("year is not an integer"))?;
    let salary = Decimal::from_str(salary).map_err(|_| malformed("salary is not a number"))?;
    let denominator = denominator
        .parse::<u32>()
        .map_err(|_| malformed("accrual denominator is not a positive integer"))?;
    let cpi_percent =
        Decimal::from_str(cpi_percent).map_err(|_| malformed("CPI percent is not a number"))?;

    PensionRecord::new(
        year,
        salary,
        AccrualRate::one_over(denominator)?,
        cpi_percent / Decimal::ONE_HUNDRED,
    )
}
