//! wind-factordb CLI: metadata import and quick inspection of Wind tables.
//!
//! Commands:
//! - `import-info`: (re)build the metadata store from the workbook or CSV directory
//! - `tables` / `factors`: list logical tables and their factors
//! - `read`: read a panel from one table and print it
//! - `trade-days`, `universe`, `industries`: reference data

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{self, EnvFilter};

use wind_factordb::catalog::import::import_info;
use wind_factordb::db::{Exchange, IndustryClassification, Universe};
use wind_factordb::{FactorDb, FactorTable, ReadArgs, TableArgs, WindDb, WindDbConfig};

#[derive(Parser)]
#[command(name = "wind-factordb", about = "Wind financial database as factor tables")]
struct Cli {
    /// Configuration file (.toml or .json). Defaults apply when absent.
    #[arg(long, default_value = "WindDBConfig.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the metadata store from its source sheets.
    ImportInfo {
        /// Workbook or CSV directory. Defaults to `metadata_source` from the config.
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// List logical tables with their class and internal name.
    Tables,
    /// List the factors of a table.
    Factors { table: String },
    /// Read a panel and print one frame per factor.
    Read {
        table: String,

        /// Comma-separated factor names. Defaults to every factor.
        #[arg(long, value_delimiter = ',')]
        factors: Option<Vec<String>>,

        /// Comma-separated ids (e.g. 000001.SZ,600000.SH).
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<String>>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Do not forward-fill missing dates.
        #[arg(long, default_value_t = false)]
        no_fill: bool,

        /// Calendar days fetched before the start date when filling.
        #[arg(long, default_value_t = 0)]
        look_back: u32,
    },
    /// Print the trading calendar.
    TradeDays {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// SSE or SZSE.
        #[arg(long, default_value = "SSE")]
        exchange: String,
    },
    /// Print the ids of all A shares or of an index's constituents.
    Universe {
        /// `all` for every A share, otherwise an index id (e.g. 000300.SH).
        #[arg(default_value = "all")]
        universe: String,

        /// As-of date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Include everything that was ever a member up to the date.
        #[arg(long, default_value_t = false)]
        history: bool,
    },
    /// Print industry names and internal codes.
    Industries {
        /// citic, shenwan or wind.
        #[arg(long, default_value = "citic")]
        classification: String,

        #[arg(long, default_value_t = 1)]
        level: u8,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if let Commands::ImportInfo { source } = &cli.command {
        let source = source.as_deref().unwrap_or(&config.metadata_source);
        let catalog = import_info(source, &config.metadata_store)
            .with_context(|| format!("Failed to import metadata from {}", source.display()))?;
        println!(
            "Imported {} tables into {}",
            catalog.tables().len(),
            config.metadata_store.display()
        );
        return Ok(());
    }

    let mut db = WindDb::from_config(config).context("Failed to load WindDB metadata")?;

    match cli.command {
        Commands::ImportInfo { .. } => {}
        Commands::Tables => {
            for table in db.catalog().tables() {
                println!("{}\t{}\t{}", table.name, table.kind, table.db_table_name);
            }
        }
        Commands::Factors { table } => {
            connect(&mut db)?;
            let table = db.table(&table, TableArgs::default())?;
            for meta in table.factor_metadata(None)? {
                println!("{}\t{}\t{}", meta.name, meta.data_type.as_str(), meta.description);
            }
        }
        Commands::Read {
            table,
            factors,
            ids,
            start,
            end,
            no_fill,
            look_back,
        } => {
            connect(&mut db)?;
            let args = TableArgs {
                fill_na: !no_fill,
                look_back_days: look_back,
            };
            let table = db.table(&table, args)?;
            let start = parse_date(start.as_deref())?.map(wind_factordb::sql::end_of_day);
            let end = parse_date(end.as_deref())?.map(wind_factordb::sql::end_of_day);
            let dts = table.datetimes(None, None, start, end)?;
            let panel = table.read_data(
                factors.as_deref(),
                ids.as_deref(),
                Some(&dts),
                &ReadArgs::default(),
            )?;
            let (n_factors, n_dts, n_ids) = panel.shape();
            println!("{n_factors} factors × {n_dts} datetimes × {n_ids} ids");
            for (name, frame) in panel.frames() {
                println!("{name}\n{frame}");
            }
        }
        Commands::TradeDays {
            start,
            end,
            exchange,
        } => {
            connect(&mut db)?;
            let exchange: Exchange = exchange.parse()?;
            for day in db.trade_days(parse_date(start.as_deref())?, parse_date(end.as_deref())?, exchange)? {
                println!("{day}");
            }
        }
        Commands::Universe {
            universe,
            date,
            history,
        } => {
            connect(&mut db)?;
            let universe: Universe = universe.parse()?;
            for id in db.universe_ids(&universe, parse_date(date.as_deref())?, !history)? {
                println!("{id}");
            }
        }
        Commands::Industries {
            classification,
            level,
        } => {
            connect(&mut db)?;
            let classification: IndustryClassification = classification.parse()?;
            for (name, code) in db.industry_codes(classification, level)? {
                println!("{code}\t{name}");
            }
        }
    }

    db.disconnect()?;
    Ok(())
}

fn load_config(path: &Path) -> Result<WindDbConfig> {
    if path.is_file() {
        return WindDbConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    tracing::info!(path = %path.display(), "Config file not found, using defaults");
    let mut config = WindDbConfig::default();
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn connect(db: &mut WindDb) -> Result<()> {
    db.connect().with_context(|| {
        format!(
            "Failed to connect to {} database '{}'",
            db.config().db_type,
            db.config().db_name
        )
    })
}

fn parse_date(s: Option<&str>) -> Result<Option<NaiveDate>> {
    s.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date: {s}")))
        .transpose()
}
