use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use pf_data::{
    AttributeStore, CsvDataSource, PortfolioCatalog, PortfolioDefinition, SqliteStore,
};
use pf_engine::{create_strategy, list_strategies, Backtester};
use pf_types::{parse_civil_day, BacktestResult, PortfolioParams, Timestamp};
use std::sync::Arc;

pub struct ExecuteArgs {
    pub strategy: String,
    pub portfolio: String,
    pub from: String,
    pub to: String,
    pub initial_capital: Option<f64>,
    pub db: PathBuf,
    pub params: Vec<String>,
    pub json: bool,
}

fn open_store(db: &Path) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(db).with_context(|| format!("opening store {}", db.display()))
}

fn parse_date(raw: &str) -> anyhow::Result<Timestamp> {
    parse_civil_day(raw).ok_or_else(|| anyhow!("invalid date '{raw}', expected YYYY-MM-DD"))
}

/// `key=value` pairs into a map; repeated keys append with commas so
/// repeatable options like `csv-map` accumulate.
fn parse_option_pairs(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid option '{pair}', expected key=value"))?;
        options
            .entry(key.to_string())
            .and_modify(|existing: &mut String| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    Ok(options)
}

pub fn load(
    db: &Path,
    instrument: &str,
    name: Option<&str>,
    kind: &str,
    source: &str,
    options: &[String],
) -> anyhow::Result<()> {
    let store = open_store(db)?;
    let options = parse_option_pairs(options)?;
    let csv = CsvDataSource::from_options(&options)?;
    let extracted = csv.extract()?;

    store.save_instrument(instrument, name.unwrap_or(instrument), kind, source)?;
    for (attribute, values) in &extracted {
        store.save_attributes(instrument, attribute, source, values)?;
        println!("{instrument}/{attribute}: {} values", values.len());
    }
    Ok(())
}

pub fn instrument_list(
    db: &Path,
    kind: Option<&str>,
    source: Option<&str>,
) -> anyhow::Result<()> {
    let store = open_store(db)?;
    for id in store.list_instruments(kind, source)? {
        println!("{id}");
    }
    Ok(())
}

pub fn instrument_show(db: &Path, id: &str) -> anyhow::Result<()> {
    let store = open_store(db)?;
    let info = store.get_instrument(id)?;
    println!("{} ({})", info.id, info.name);
    println!("  type:   {}", info.kind);
    println!("  source: {}", info.source);
    for attr in store.list_instrument_attributes(id)? {
        println!(
            "  {} [{}]: {} values, {} .. {}",
            attr.name,
            attr.source,
            attr.value_count,
            attr.first_ts.date_naive(),
            attr.last_ts.date_naive()
        );
    }
    Ok(())
}

pub fn instrument_delete(db: &Path, id: &str) -> anyhow::Result<()> {
    let store = open_store(db)?;
    store.delete_instrument(id)?;
    println!("instrument '{id}' deleted");
    Ok(())
}

pub fn portfolio_create(
    name: &str,
    description: Option<&str>,
    initial_capital: f64,
) -> anyhow::Result<()> {
    let catalog = PortfolioCatalog::open_default()?;
    let mut definition = PortfolioDefinition::new(name, initial_capital);
    definition.description = description.unwrap_or("").to_string();
    catalog.create(&definition)?;
    println!("portfolio '{name}' created");
    Ok(())
}

pub fn portfolio_list() -> anyhow::Result<()> {
    let catalog = PortfolioCatalog::open_default()?;
    for name in catalog.list()? {
        println!("{name}");
    }
    Ok(())
}

pub fn portfolio_show(name: &str) -> anyhow::Result<()> {
    let catalog = PortfolioCatalog::open_default()?;
    let definition = catalog.get(name)?;
    println!("{}", serde_json::to_string_pretty(&definition)?);
    Ok(())
}

pub fn portfolio_delete(name: &str) -> anyhow::Result<()> {
    let catalog = PortfolioCatalog::open_default()?;
    catalog.delete(name)?;
    println!("portfolio '{name}' deleted");
    Ok(())
}

pub fn portfolio_add_instrument(
    portfolio: &str,
    instrument: &str,
    weight: f64,
) -> anyhow::Result<()> {
    let catalog = PortfolioCatalog::open_default()?;
    catalog.add_instrument(portfolio, instrument, weight)?;
    println!("added '{instrument}' to '{portfolio}'");
    Ok(())
}

pub fn portfolio_remove_instrument(portfolio: &str, instrument: &str) -> anyhow::Result<()> {
    let catalog = PortfolioCatalog::open_default()?;
    catalog.remove_instrument(portfolio, instrument)?;
    println!("removed '{instrument}' from '{portfolio}'");
    Ok(())
}

pub fn strategy_list() -> anyhow::Result<()> {
    for name in list_strategies() {
        println!("{name}");
    }
    Ok(())
}

pub fn strategy_execute(args: ExecuteArgs) -> anyhow::Result<()> {
    let from = parse_date(&args.from)?;
    let to = parse_date(&args.to)?;

    let catalog = PortfolioCatalog::open_default()?;
    let definition = catalog.get(&args.portfolio)?;

    let mut params = PortfolioParams::new(
        definition.instruments.clone(),
        args.initial_capital.unwrap_or(definition.initial_capital),
    );
    params.weights = definition.weights.clone();
    params.parameters = definition.parameters.clone();
    for pair in &args.params {
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid parameter '{pair}', expected key:value"))?;
        params
            .parameters
            .insert(key.to_string(), value.to_string());
    }
    params.reinvest_dividends = params.parameter("reinvest_dividends", "false") == "true";

    let Some(strategy) = create_strategy(&args.strategy) else {
        bail!(
            "unknown strategy '{}'; available: {}",
            args.strategy,
            list_strategies().join(", ")
        );
    };

    let store = Arc::new(open_store(&args.db)?);
    let mut backtester = Backtester::new(store, strategy);
    let result = backtester.run(&params, from, to)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

pub fn source_list(db: &Path) -> anyhow::Result<()> {
    let store = open_store(db)?;
    for source in store.list_sources()? {
        println!("{source}");
    }
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    println!("Performance");
    println!("  trading days span:  {}", result.trading_days);
    println!("  final value:        {:.2}", result.final_value);
    println!("  total return:       {:.2}%", result.total_return_pct);
    println!("  annualized return:  {:.2}%", result.annualized_return_pct);
    println!("Risk");
    println!("  volatility:         {:.2}%", result.volatility_pct);
    println!("  max drawdown:       {:.2}%", result.max_drawdown_pct);
    println!("  sharpe ratio:       {:.2}", result.sharpe_ratio);

    if result.dividend_payments > 0 {
        println!("Dividends");
        println!("  total (gross):      {:.2}", result.total_dividends);
        println!("  payments:           {}", result.dividend_payments);
        println!("  yield:              {:.2}%", result.dividend_yield_pct);
    }

    if let Some(tax) = &result.tax {
        println!("Taxes");
        println!("  total paid:         {:.2}", tax.total_taxes_paid);
        println!("  after-tax return:   {:.2}%", tax.after_tax_return_pct);
        if let Some(efficiency) = tax.tax_efficiency_pct {
            println!("  tax efficiency:     {:.2}%", efficiency);
        }
    }

    if let Some(inflation) = &result.inflation {
        println!("Inflation-adjusted");
        println!(
            "  cumulative:         {:.2}%",
            inflation.cumulative_inflation_pct
        );
        println!("  real final value:   {:.2}", inflation.real_final_value);
        println!(
            "  real total return:  {:.2}%",
            inflation.real_total_return_pct
        );
        println!(
            "  real annualized:    {:.2}%",
            inflation.real_annualized_return_pct
        );
    }

    println!("Trades: {}", result.trades.len());
    for trade in &result.trades {
        let side = match trade.side {
            pf_types::TradeSide::Buy => "BUY ",
            pf_types::TradeSide::Sell => "SELL",
        };
        println!(
            "  {} {} {} {} @ {:.2} = {:.2} ({})",
            trade.date.date_naive(),
            side,
            trade.instrument_id,
            trade.shares,
            trade.price,
            trade.total,
            trade.reason
        );
    }
}
