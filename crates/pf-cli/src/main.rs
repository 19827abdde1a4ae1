mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portfel", version, about = "Portfolio back-testing toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load attribute series from a file into the store
    Load {
        /// SQLite database path
        #[arg(long)]
        db: PathBuf,
        /// Instrument id the series belong to
        #[arg(long)]
        instrument: String,
        /// Human-readable instrument name
        #[arg(long)]
        name: Option<String>,
        /// Instrument type
        #[arg(long = "type", default_value = "stock")]
        kind: String,
        /// Data source name
        #[arg(long)]
        source: String,
        /// Driver options as key=value (e.g. -O csv-file=prices.csv)
        #[arg(short = 'O', value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
    /// Inspect and manage instruments
    Instrument {
        #[command(subcommand)]
        command: InstrumentCommand,
    },
    /// Manage the portfolio catalog
    Portfolio {
        #[command(subcommand)]
        command: PortfolioCommand,
    },
    /// List and execute strategies
    Strategy {
        #[command(subcommand)]
        command: StrategyCommand,
    },
    /// Inspect data sources
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },
}

#[derive(Subcommand)]
enum InstrumentCommand {
    /// List instrument ids
    List {
        #[arg(long)]
        db: PathBuf,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Show one instrument with its attribute coverage
    Show {
        #[arg(long)]
        db: PathBuf,
        id: String,
    },
    /// Delete an instrument and its attributes
    Delete {
        #[arg(long)]
        db: PathBuf,
        id: String,
    },
}

#[derive(Subcommand)]
enum PortfolioCommand {
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        initial_capital: f64,
    },
    List,
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
    AddInstrument {
        portfolio: String,
        instrument: String,
        #[arg(long)]
        weight: f64,
    },
    RemoveInstrument {
        portfolio: String,
        instrument: String,
    },
}

#[derive(Subcommand)]
enum StrategyCommand {
    /// List shipped strategies
    List,
    /// Run a back-test
    Execute {
        #[arg(long)]
        strategy: String,
        #[arg(long)]
        portfolio: String,
        /// Window start, YYYY-MM-DD
        #[arg(long)]
        from: String,
        /// Window end, YYYY-MM-DD
        #[arg(long)]
        to: String,
        /// Override the portfolio's initial capital
        #[arg(long)]
        initial_capital: Option<f64>,
        #[arg(long)]
        db: PathBuf,
        /// Strategy parameters as key:value, repeatable
        #[arg(short = 'P', value_name = "KEY:VALUE")]
        params: Vec<String>,
        /// Print the raw result record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SourceCommand {
    /// List known data sources
    List {
        #[arg(long)]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Load {
            db,
            instrument,
            name,
            kind,
            source,
            options,
        } => commands::load(&db, &instrument, name.as_deref(), &kind, &source, &options),
        Command::Instrument { command } => match command {
            InstrumentCommand::List { db, kind, source } => {
                commands::instrument_list(&db, kind.as_deref(), source.as_deref())
            }
            InstrumentCommand::Show { db, id } => commands::instrument_show(&db, &id),
            InstrumentCommand::Delete { db, id } => commands::instrument_delete(&db, &id),
        },
        Command::Portfolio { command } => match command {
            PortfolioCommand::Create {
                name,
                description,
                initial_capital,
            } => commands::portfolio_create(&name, description.as_deref(), initial_capital),
            PortfolioCommand::List => commands::portfolio_list(),
            PortfolioCommand::Show { name } => commands::portfolio_show(&name),
            PortfolioCommand::Delete { name } => commands::portfolio_delete(&name),
            PortfolioCommand::AddInstrument {
                portfolio,
                instrument,
                weight,
            } => commands::portfolio_add_instrument(&portfolio, &instrument, weight),
            PortfolioCommand::RemoveInstrument {
                portfolio,
                instrument,
            } => commands::portfolio_remove_instrument(&portfolio, &instrument),
        },
        Command::Strategy { command } => match command {
            StrategyCommand::List => commands::strategy_list(),
            StrategyCommand::Execute {
                strategy,
                portfolio,
                from,
                to,
                initial_capital,
                db,
                params,
                json,
            } => commands::strategy_execute(commands::ExecuteArgs {
                strategy,
                portfolio,
                from,
                to,
                initial_capital,
                db,
                params,
                json,
            }),
        },
        Command::Source { command } => match command {
            SourceCommand::List { db } => commands::source_list(&db),
        },
    }
}
