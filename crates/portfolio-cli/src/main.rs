mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::factors::FactorsArgs;
use commands::optimize::{OptimizeArgs, SolveQpArgs};
use commands::pipeline::PipelineArgs;
use commands::risk::{CovarianceArgs, RiskArgs, StressArgs};

/// Factor signals, shrinkage risk models and cost-aware portfolio optimization
#[derive(Parser)]
#[command(
    name = "pcx",
    version,
    about = "Factor signals, shrinkage risk models and cost-aware portfolio optimization",
    long_about = "A CLI for building long-only portfolios with decimal precision. \
                  Computes style-factor signals, shrinkage covariance and ex-ante risk, \
                  and solves the mean-variance rebalance with transaction costs, \
                  name and sector caps and a turnover budget. \
                  Set RUST_LOG (e.g. RUST_LOG=debug) for solver diagnostics on stderr."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute style factors, the composite signal and expected returns
    Factors(FactorsArgs),
    /// Shrinkage covariance from a return history
    Covariance(CovarianceArgs),
    /// Risk report: ex-ante volatility, VaR/CVaR, factor exposures, stress
    Risk(RiskArgs),
    /// Fixed-shock stress scenarios on a set of positions
    Stress(StressArgs),
    /// Cost-aware mean-variance rebalance under caps and a turnover budget
    Optimize(OptimizeArgs),
    /// Solve a raw convex QP with the ADMM solver
    SolveQp(SolveQpArgs),
    /// Factors, risk model and rebalance in one pass
    Pipeline(PipelineArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
    Table,
    Csv,
    Minimal,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Factors(args) => commands::factors::run_factors(args),
        Commands::Covariance(args) => commands::risk::run_covariance(args),
        Commands::Risk(args) => commands::risk::run_risk(args),
        Commands::Stress(args) => commands::risk::run_stress(args),
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::SolveQp(args) => commands::optimize::run_solve_qp(args),
        Commands::Pipeline(args) => commands::pipeline::run_pipeline(args),
        Commands::Version => {
            println!("pcx {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
