//! The back-test driver.
//!
//! A template-method pipeline: validate, build the calendar and inflation
//! series, load prices and dividends, initialize the strategy, then walk
//! the calendar day by day. Each day collects dividends, runs the sell and
//! buy phases, records the portfolio value, and settles taxes at year
//! boundaries. The finished daily-value series feeds the metrics assembler.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use pf_data::AttributeStore;
use pf_types::{
    normalize_to_day, year_of, BacktestResult, Error, PortfolioParams, Result, TaxLot, Timestamp,
    TradeRecord, TradeResult, TradeSide, TradingContext, SHARE_EPSILON,
};
use tracing::{debug, info, warn};

use crate::calendar::TradingCalendar;
use crate::dividends::DividendCollector;
use crate::inflation::InflationAdjuster;
use crate::metrics::{assemble, MetricsInput};
use crate::riskfree::RiskFreeRate;
use crate::strategy::Strategy;
use crate::tax::{consume_lots, LotMethod, TaxCalculator};

/// Cash-to-value ratio above which idle cash is reinvested.
const REINVEST_CASH_RATIO: f64 = 0.05;

/// Engine options parsed out of the parameter map before the loop starts,
/// so malformed values fail fast.
struct EngineOptions {
    calendar_reference: String,
    inflation_instrument: String,
    rebalance_period: usize,
    tax_enabled: bool,
    ndfl_rate: f64,
    long_term_exemption: bool,
    lot_method: LotMethod,
    import_losses: f64,
    risk_free_rate_pct: f64,
    risk_free_instrument: String,
}

fn parse_numeric<T: FromStr>(params: &PortfolioParams, key: &str, default: &str) -> Result<T> {
    let raw = params.parameter(key, default);
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("malformed parameter {key}='{raw}'")))
}

fn parse_bool(params: &PortfolioParams, key: &str, default: &str) -> Result<bool> {
    match params.parameter(key, default).as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        raw => Err(Error::InvalidInput(format!(
            "malformed parameter {key}='{raw}'"
        ))),
    }
}

impl EngineOptions {
    fn parse(params: &PortfolioParams) -> Result<Self> {
        let lot_method_raw = params.parameter("lot_method", "FIFO");
        let lot_method = LotMethod::from_str(&lot_method_raw)
            .map_err(|_| Error::InvalidInput(format!("malformed parameter lot_method='{lot_method_raw}'")))?;

        Ok(Self {
            calendar_reference: params.parameter("calendar", "IMOEX"),
            inflation_instrument: params.parameter("inflation", "INF"),
            rebalance_period: parse_numeric(params, "rebalance_period", "0")?,
            tax_enabled: parse_bool(params, "tax", "false")?,
            ndfl_rate: parse_numeric(params, "ndfl_rate", "0.13")?,
            long_term_exemption: parse_bool(params, "long_term_exemption", "true")?,
            lot_method,
            import_losses: parse_numeric(params, "import_losses", "0")?,
            risk_free_rate_pct: parse_numeric(params, "risk_free_rate", "7.0")?,
            risk_free_instrument: params.parameter("risk_free_instrument", ""),
        })
    }
}

/// One back-test run: a store handle plus a strategy instance, owned for
/// the duration of the run. Two engines over the same store are fully
/// independent.
pub struct Backtester {
    store: Arc<dyn AttributeStore>,
    strategy: Box<dyn Strategy>,
}

impl Backtester {
    pub fn new(store: Arc<dyn AttributeStore>, strategy: Box<dyn Strategy>) -> Self {
        Self { store, strategy }
    }

    /// Run the full pipeline and produce the result record.
    pub fn run(
        &mut self,
        params: &PortfolioParams,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<BacktestResult> {
        let start = normalize_to_day(start);
        let end = normalize_to_day(end);
        validate(params, start, end)?;
        let options = EngineOptions::parse(params)?;

        info!(
            strategy = self.strategy.name(),
            instruments = params.instrument_ids.len(),
            capital = params.initial_capital,
            from = %start.date_naive(),
            to = %end.date_naive(),
            "starting backtest"
        );

        let calendar = TradingCalendar::build(
            self.store.as_ref(),
            &params.instrument_ids,
            start,
            end,
            &options.calendar_reference,
        )?;
        let days = calendar.sorted_days();

        let inflation = InflationAdjuster::load(
            self.store.as_ref(),
            &options.inflation_instrument,
            start,
            end,
        )?;

        let mut context = TradingContext::new(params.initial_capital);
        self.load_price_data(&params.instrument_ids, start, end, &mut context)?;
        self.load_dividend_data(&params.instrument_ids, start, end, &mut context)?;

        let mut tax = if options.tax_enabled {
            Some(
                TaxCalculator::new(options.ndfl_rate)
                    .with_long_term_exemption(options.long_term_exemption)
                    .with_lot_method(options.lot_method)
                    .with_carryforward_loss(options.import_losses),
            )
        } else {
            None
        };

        let risk_free_pct = if options.risk_free_instrument.is_empty() {
            let annual = options.risk_free_rate_pct / 100.0;
            RiskFreeRate::from_annual_rate(annual, days.len()).annualized_return() * 100.0
        } else {
            RiskFreeRate::from_instrument(
                self.store.as_ref(),
                &options.risk_free_instrument,
                &days,
            )?
            .annualized_return()
                * 100.0
        };

        self.strategy.initialize(&mut context, params)?;

        let weights = params.normalized_weights();
        let mut collector = DividendCollector::new();
        let mut daily_values = Vec::with_capacity(days.len());
        let mut trades = Vec::new();
        let mut gross_dividends = 0.0;
        let mut dividend_payments = 0u64;
        let mut total_taxes_paid = 0.0;

        for (i, &current) in days.iter().enumerate() {
            let previous = if i > 0 { days[i - 1] } else { current };
            context.current_date = Some(current);
            context.day_index = i;
            context.is_rebalance_day =
                options.rebalance_period > 0 && i % options.rebalance_period == 0;
            context.is_last_day = i == days.len() - 1;
            context.is_reinvestment = false;

            let is_last_day_of_year = match days.get(i + 1) {
                Some(&next) => year_of(next) > year_of(current),
                None => true,
            };

            self.collect_dividends(
                &mut context,
                &mut collector,
                tax.as_mut(),
                previous,
                current,
                &mut gross_dividends,
                &mut dividend_payments,
            );

            self.sell_phase(&mut context, params, tax.as_mut(), &mut trades)?;
            self.buy_phase(&mut context, params, &mut trades)?;

            daily_values.push(context.portfolio_value());

            if let Some(tax) = tax.as_mut() {
                if is_last_day_of_year || context.is_last_day {
                    settle_year_end_taxes(
                        &mut context,
                        tax,
                        &params.instrument_ids,
                        &weights,
                        is_last_day_of_year,
                        &mut total_taxes_paid,
                        &mut trades,
                    );
                }
            }
        }

        debug!(
            adjustments = calendar.adjustment_log().len(),
            trading_days = calendar.trading_day_count(),
            "per-day loop finished"
        );

        let result = assemble(MetricsInput {
            daily_values,
            trades,
            initial_capital: params.initial_capital,
            start,
            end,
            total_dividends: gross_dividends,
            dividend_payments,
            risk_free_pct,
            tax: tax.map(|t| (total_taxes_paid, t.calculate_year_end_tax())),
            inflation: Some(&inflation),
        });

        info!(
            final_value = result.final_value,
            total_return_pct = result.total_return_pct,
            trades = result.trades.len(),
            "backtest finished"
        );
        Ok(result)
    }

    fn load_price_data(
        &self,
        instrument_ids: &[String],
        start: Timestamp,
        end: Timestamp,
        context: &mut TradingContext,
    ) -> Result<()> {
        for id in instrument_ids {
            let history = self
                .store
                .get_attribute_history(id, "close", start, end, None)?;
            let mut prices = BTreeMap::new();
            for (ts, value) in history {
                if let Some(price) = value.as_f64() {
                    prices.insert(normalize_to_day(ts), price);
                }
            }
            debug!(instrument = %id, points = prices.len(), "price data loaded");
            context.price_data.insert(id.clone(), prices);
        }
        Ok(())
    }

    /// Dividend data is optional; an instrument without the attribute just
    /// never pays.
    fn load_dividend_data(
        &self,
        instrument_ids: &[String],
        start: Timestamp,
        end: Timestamp,
        context: &mut TradingContext,
    ) -> Result<()> {
        for id in instrument_ids {
            let history = match self
                .store
                .get_attribute_history(id, "dividend", start, end, None)
            {
                Ok(history) => history,
                Err(err) => {
                    warn!(instrument = %id, error = %err, "failed to load dividends, treating as none");
                    continue;
                }
            };
            let mut payments: Vec<pf_types::DividendPayment> = history
                .into_iter()
                .filter_map(|(ts, value)| {
                    value.as_f64().map(|per_share| pf_types::DividendPayment {
                        ex_date: normalize_to_day(ts),
                        per_share,
                    })
                })
                .collect();
            payments.sort_by_key(|p| p.ex_date);
            if !payments.is_empty() {
                debug!(instrument = %id, payments = payments.len(), "dividend data loaded");
                context.dividend_data.insert(id.clone(), payments);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_dividends(
        &self,
        context: &mut TradingContext,
        collector: &mut DividendCollector,
        mut tax: Option<&mut TaxCalculator>,
        previous: Timestamp,
        current: Timestamp,
        gross_dividends: &mut f64,
        dividend_payments: &mut u64,
    ) {
        let held: Vec<(String, f64)> = context
            .holdings
            .iter()
            .filter(|(_, shares)| **shares > SHARE_EPSILON)
            .map(|(id, shares)| (id.clone(), *shares))
            .collect();

        for (id, shares) in held {
            let Some(payments) = context.dividend_data.get(&id) else {
                continue;
            };
            for payment in collector.collect(&id, payments, previous, current) {
                let gross = shares * payment.per_share;
                if gross <= 0.0 {
                    continue;
                }
                *gross_dividends += gross;
                *dividend_payments += 1;

                let credited = match tax.as_deref_mut() {
                    Some(tax) => tax.record_dividend(gross),
                    None => gross,
                };
                context.cash_balance += credited;
                info!(
                    date = %payment.ex_date.date_naive(),
                    instrument = %id,
                    per_share = payment.per_share,
                    shares,
                    gross,
                    credited,
                    "dividend collected"
                );
            }
        }
    }

    /// Sells run on rebalance days, the final day, and whenever a held
    /// instrument has dropped off the exchange.
    fn sell_phase(
        &self,
        context: &mut TradingContext,
        params: &PortfolioParams,
        mut tax: Option<&mut TaxCalculator>,
        trades: &mut Vec<TradeRecord>,
    ) -> Result<()> {
        let Some(date) = context.current_date else {
            return Ok(());
        };
        let delisted_holding = context
            .holdings
            .iter()
            .any(|(id, shares)| *shares > SHARE_EPSILON && context.is_delisted(id, date));
        if !(context.is_rebalance_day || context.is_last_day || delisted_holding) {
            return Ok(());
        }

        for id in &params.instrument_ids {
            let trade = self.strategy.sell(id, context, params)?;
            if trade.is_trade() {
                apply_sell(context, id, &trade, tax.as_deref_mut(), trades);
            }
        }
        Ok(())
    }

    /// Buys happen on day zero, on rebalance days, and when idle cash has
    /// grown past the reinvestment ratio (with `reinvest_dividends` set).
    /// Never on the final day.
    fn buy_phase(
        &self,
        context: &mut TradingContext,
        params: &PortfolioParams,
        trades: &mut Vec<TradeRecord>,
    ) -> Result<()> {
        if context.is_last_day {
            return Ok(());
        }

        let should_buy = if context.day_index == 0 || context.is_rebalance_day {
            true
        } else if params.reinvest_dividends {
            let value = context.portfolio_value();
            if value > 0.0 && context.cash_balance / value > REINVEST_CASH_RATIO {
                context.is_reinvestment = true;
                true
            } else {
                false
            }
        } else {
            false
        };
        if !should_buy {
            return Ok(());
        }

        for id in &params.instrument_ids {
            let trade = self.strategy.buy(id, context, params)?;
            if trade.is_trade() {
                apply_buy(context, id, &trade, trades);
            }
        }
        Ok(())
    }
}

fn validate(params: &PortfolioParams, start: Timestamp, end: Timestamp) -> Result<()> {
    if params.initial_capital <= 0.0 {
        return Err(Error::InvalidInput(
            "initial capital must be positive".to_string(),
        ));
    }
    if end < start {
        return Err(Error::InvalidInput(
            "end date must not precede start date".to_string(),
        ));
    }
    if params.instrument_ids.is_empty() {
        return Err(Error::InvalidInput("no instruments specified".to_string()));
    }
    Ok(())
}

/// Apply a sell atomically: holdings down, cash up, lots consumed (through
/// the tax calculator when one is attached), trade logged.
fn apply_sell(
    context: &mut TradingContext,
    instrument_id: &str,
    trade: &TradeResult,
    tax: Option<&mut TaxCalculator>,
    trades: &mut Vec<TradeRecord>,
) {
    let Some(date) = context.current_date else {
        return;
    };

    if let Some(shares) = context.holdings.get_mut(instrument_id) {
        *shares -= trade.shares as f64;
        if *shares < SHARE_EPSILON {
            context.holdings.remove(instrument_id);
        }
    }
    context.cash_balance += trade.total;

    let lots = context.tax_lots.entry(instrument_id.to_string()).or_default();
    match tax {
        Some(tax) => {
            if let Err(err) =
                tax.record_sale(instrument_id, trade.shares as f64, trade.price, date, lots)
            {
                warn!(instrument = instrument_id, error = %err, "tax recording failed");
            }
        }
        None => consume_lots(lots, trade.shares as f64),
    }

    info!(
        date = %date.date_naive(),
        instrument = instrument_id,
        shares = trade.shares,
        price = trade.price,
        total = trade.total,
        reason = %trade.reason,
        "SELL"
    );
    trades.push(TradeRecord {
        date,
        instrument_id: instrument_id.to_string(),
        side: TradeSide::Sell,
        shares: trade.shares,
        price: trade.price,
        total: trade.total,
        reason: trade.reason.clone(),
    });
}

/// Apply a buy atomically: cash down, holdings up, a fresh tax lot, trade
/// logged.
fn apply_buy(
    context: &mut TradingContext,
    instrument_id: &str,
    trade: &TradeResult,
    trades: &mut Vec<TradeRecord>,
) {
    let Some(date) = context.current_date else {
        return;
    };

    context.cash_balance -= trade.total;
    *context.holdings.entry(instrument_id.to_string()).or_insert(0.0) += trade.shares as f64;
    context
        .tax_lots
        .entry(instrument_id.to_string())
        .or_default()
        .push(TaxLot {
            purchase_date: date,
            quantity: trade.shares as f64,
            cost_basis: trade.price,
        });

    info!(
        date = %date.date_naive(),
        instrument = instrument_id,
        shares = trade.shares,
        price = trade.price,
        total = trade.total,
        cash = context.cash_balance,
        reason = %trade.reason,
        "BUY"
    );
    trades.push(TradeRecord {
        date,
        instrument_id: instrument_id.to_string(),
        side: TradeSide::Buy,
        shares: trade.shares,
        price: trade.price,
        total: trade.total,
        reason: trade.reason.clone(),
    });
}

/// Settle the accumulated year: pay what cash covers, liquidate weighted
/// slices of the portfolio for any shortfall, and roll leftovers into the
/// next year's opening carryforward.
#[allow(clippy::too_many_arguments)]
fn settle_year_end_taxes(
    context: &mut TradingContext,
    tax: &mut TaxCalculator,
    instrument_ids: &[String],
    weights: &BTreeMap<String, f64>,
    is_last_day_of_year: bool,
    total_taxes_paid: &mut f64,
    trades: &mut Vec<TradeRecord>,
) {
    let summary = tax.calculate_year_end_tax();
    let mut leftover_loss = summary.carryforward_loss;

    if summary.total_tax > 0.0 {
        let (paid, mut shortfall) = tax.pay_year_end_tax(context.cash_balance, &summary);
        context.cash_balance -= paid;
        *total_taxes_paid += paid;
        info!(
            tax_owed = summary.total_tax,
            paid,
            shortfall,
            "year-end tax payment"
        );

        if shortfall > 0.01 {
            let raised = liquidate_for_taxes(context, instrument_ids, weights, shortfall, trades);
            let forwarded = raised.min(shortfall);
            context.cash_balance -= forwarded;
            *total_taxes_paid += forwarded;
            shortfall -= forwarded;
            if shortfall > 0.01 {
                warn!(
                    unpaid = shortfall,
                    "insufficient cash for year-end tax, rolling to carryforward"
                );
            }
        }
        leftover_loss = shortfall.max(0.0);
    } else if is_last_day_of_year && summary.carryforward_loss > 0.0 {
        info!(
            loss = summary.carryforward_loss,
            "no tax owed, loss carried forward"
        );
    }

    if is_last_day_of_year && !context.is_last_day {
        tax.reset_for_new_year(leftover_loss);
    }
}

/// Raise `shortfall` by selling weighted slices of current holdings, in
/// declared-order. The sold lots are consumed front to back but do not
/// create new taxable transactions: the year being funded is already
/// summarized.
fn liquidate_for_taxes(
    context: &mut TradingContext,
    instrument_ids: &[String],
    weights: &BTreeMap<String, f64>,
    shortfall: f64,
    trades: &mut Vec<TradeRecord>,
) -> f64 {
    let Some(date) = context.current_date else {
        return 0.0;
    };
    let mut raised = 0.0;

    for id in instrument_ids {
        if raised >= shortfall {
            break;
        }
        let held = context.holding(id);
        if held < 1.0 {
            continue;
        }
        let Some(price) = context.last_known_price(id, date) else {
            continue;
        };

        let weight = weights.get(id).copied().unwrap_or(0.0);
        let target_sale = shortfall * weight;
        let shares = ((target_sale / price).floor()).min(held.floor()) as u64;
        if shares == 0 {
            continue;
        }

        let trade = TradeResult::new(shares, price, "tax funding");
        apply_sell(context, id, &trade, None, trades);
        raised += trade.total;
    }

    if raised < shortfall {
        warn!(raised, needed = shortfall, "tax funding raised less than needed");
    }
    raised
}
