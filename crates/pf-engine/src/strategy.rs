//! Strategy policy contract and the shipped buy-and-hold implementation.

use std::collections::BTreeMap;

use pf_types::{Error, PortfolioParams, Result, TradeResult, TradingContext, SHARE_EPSILON};

/// A strategy is three callbacks over the trading context.
///
/// `buy` and `sell` only read the context (current date, prices, holdings,
/// cash, and their own property-bag slots) and return a [`TradeResult`];
/// the driver applies it atomically. They are called per instrument in the
/// portfolio's declared order.
pub trait Strategy {
    fn name(&self) -> &'static str;

    /// Called once, after prices and dividends are loaded and before the
    /// first trading day.
    fn initialize(&mut self, context: &mut TradingContext, params: &PortfolioParams)
        -> Result<()>;

    fn sell(
        &self,
        instrument_id: &str,
        context: &TradingContext,
        params: &PortfolioParams,
    ) -> Result<TradeResult>;

    fn buy(
        &self,
        instrument_id: &str,
        context: &TradingContext,
        params: &PortfolioParams,
    ) -> Result<TradeResult>;
}

/// Names of the shipped strategies.
pub fn list_strategies() -> Vec<&'static str> {
    vec!["buy-and-hold"]
}

/// Instantiate a shipped strategy by name.
pub fn create_strategy(name: &str) -> Option<Box<dyn Strategy>> {
    match name {
        "buy-and-hold" => Some(Box::new(BuyAndHoldStrategy::new())),
        _ => None,
    }
}

/// Buy-and-hold with weight rebalancing.
///
/// Holds the portfolio at its target weights: sells excess above target on
/// rebalance days, buys into deficits proportionally to their size, and
/// reinvests accumulated cash scoped to each instrument's weight share.
/// Everything trades in whole shares.
pub struct BuyAndHoldStrategy {
    min_rebalance_threshold_pct: f64,
    weights: BTreeMap<String, f64>,
}

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self {
            min_rebalance_threshold_pct: 1.0,
            weights: BTreeMap::new(),
        }
    }

    fn target_weight(&self, instrument_id: &str) -> f64 {
        self.weights.get(instrument_id).copied().unwrap_or(0.0)
    }

    /// Value threshold below which trades are skipped as noise.
    fn threshold(&self, portfolio_value: f64) -> f64 {
        portfolio_value * self.min_rebalance_threshold_pct / 100.0
    }

    fn deficit(&self, instrument_id: &str, context: &TradingContext, value: f64) -> f64 {
        let Some(date) = context.current_date else {
            return 0.0;
        };
        let current = context
            .last_known_price(instrument_id, date)
            .map_or(0.0, |price| context.holding(instrument_id) * price);
        let target = value * self.target_weight(instrument_id);
        (target - current).max(0.0)
    }
}

impl Default for BuyAndHoldStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &'static str {
        "buy-and-hold"
    }

    fn initialize(
        &mut self,
        _context: &mut TradingContext,
        params: &PortfolioParams,
    ) -> Result<()> {
        let raw = params.parameter("min_rebalance_threshold", "1.00");
        self.min_rebalance_threshold_pct = raw.parse().map_err(|_| {
            Error::InvalidInput(format!("malformed min_rebalance_threshold '{raw}'"))
        })?;
        self.weights = params.normalized_weights();
        Ok(())
    }

    fn sell(
        &self,
        instrument_id: &str,
        context: &TradingContext,
        _params: &PortfolioParams,
    ) -> Result<TradeResult> {
        let shares_held = context.holding(instrument_id);
        if shares_held <= SHARE_EPSILON {
            return Ok(TradeResult::none());
        }
        let Some(date) = context.current_date else {
            return Ok(TradeResult::none());
        };

        // current-date price first, last known as the delisting fallback
        let (price, used_last_known) = match context.price_on(instrument_id, date) {
            Some(price) => (price, false),
            None => match context.price_info(instrument_id) {
                Some(info) => (info.last_price, true),
                None => return Ok(TradeResult::none()),
            },
        };

        let whole_shares = shares_held.floor() as u64;
        let (shares, reason) = if context.is_last_day {
            (whole_shares, "end of backtest".to_string())
        } else if context.is_delisted(instrument_id, date) {
            (whole_shares, "delisting".to_string())
        } else if context.is_rebalance_day {
            let value = context.portfolio_value();
            let target = value * self.target_weight(instrument_id);
            let excess = shares_held * price - target;
            if excess > self.threshold(value) {
                ((excess / price).floor() as u64, "rebalance".to_string())
            } else {
                (0, String::new())
            }
        } else {
            (0, String::new())
        };

        if shares == 0 {
            return Ok(TradeResult::none());
        }

        let shares = shares.min(whole_shares);
        let mut reason = reason;
        if used_last_known {
            reason.push_str(" (last known price)");
        }
        Ok(TradeResult::new(shares, price, &reason))
    }

    fn buy(
        &self,
        instrument_id: &str,
        context: &TradingContext,
        params: &PortfolioParams,
    ) -> Result<TradeResult> {
        if context.cash_balance <= 0.01 {
            return Ok(TradeResult::none());
        }
        let Some(date) = context.current_date else {
            return Ok(TradeResult::none());
        };
        if context.is_delisted(instrument_id, date) {
            return Ok(TradeResult::none());
        }
        let Some(price) = context.price_on(instrument_id, date) else {
            return Ok(TradeResult::none());
        };

        let value = context.portfolio_value();
        let deficit = self.deficit(instrument_id, context, value);
        if deficit < self.threshold(value) {
            return Ok(TradeResult::none());
        }

        let allocation = if context.is_reinvestment {
            // scoped to this instrument's weight share of the cash pile
            deficit.min(context.cash_balance * self.target_weight(instrument_id))
        } else {
            // deploy all cash proportionally to where the deficits are
            let total_deficit: f64 = params
                .instrument_ids
                .iter()
                .map(|id| self.deficit(id, context, value))
                .filter(|d| *d >= self.threshold(value))
                .sum();
            if total_deficit > 0.0 {
                context.cash_balance * deficit / total_deficit
            } else {
                context.cash_balance * self.target_weight(instrument_id)
            }
        };

        if allocation < price {
            return Ok(TradeResult::none());
        }

        let mut shares = (allocation / price).floor() as u64;
        // never spend more than the cash at hand
        if shares as f64 * price > context.cash_balance {
            shares = (context.cash_balance / price).floor() as u64;
        }
        if shares == 0 {
            return Ok(TradeResult::none());
        }

        let reason = if context.is_reinvestment {
            "cash reinvestment"
        } else if context.day_index == 0 {
            "initial purchase"
        } else {
            "rebalance buy"
        };
        Ok(TradeResult::new(shares, price, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_types::{civil_day, Timestamp};
    use std::collections::BTreeMap;

    fn day(offset: i64) -> Timestamp {
        civil_day(2023, 1, 2).unwrap() + chrono::Duration::days(offset)
    }

    fn context_with(prices: &[(&str, &[(i64, f64)])], cash: f64) -> TradingContext {
        let mut ctx = TradingContext::new(cash);
        for (id, series) in prices {
            let map: BTreeMap<Timestamp, f64> =
                series.iter().map(|(offset, p)| (day(*offset), *p)).collect();
            ctx.price_data.insert(id.to_string(), map);
        }
        ctx.current_date = Some(day(0));
        ctx
    }

    fn initialized(params: &PortfolioParams) -> BuyAndHoldStrategy {
        let mut strategy = BuyAndHoldStrategy::new();
        let mut scratch = TradingContext::new(0.0);
        strategy.initialize(&mut scratch, params).unwrap();
        strategy
    }

    #[test]
    fn malformed_threshold_fails_initialization() {
        let params = PortfolioParams::new(vec!["A".into()], 1000.0)
            .with_parameter("min_rebalance_threshold", "lots");
        let mut strategy = BuyAndHoldStrategy::new();
        let mut ctx = TradingContext::new(0.0);
        assert!(strategy.initialize(&mut ctx, &params).is_err());
    }

    #[test]
    fn day_zero_buy_deploys_by_weight() {
        let params = PortfolioParams::new(vec!["A".into(), "B".into()], 100_000.0);
        let strategy = initialized(&params);
        let ctx = context_with(&[("A", &[(0, 100.0)]), ("B", &[(0, 200.0)])], 100_000.0);

        let trade = strategy.buy("A", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 500); // 50k target / 100
        assert_eq!(trade.reason, "initial purchase");

        let trade = strategy.buy("B", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 250); // 50k target / 200
    }

    #[test]
    fn buy_without_price_is_a_no_trade() {
        let params = PortfolioParams::new(vec!["A".into()], 1000.0);
        let strategy = initialized(&params);
        let mut ctx = context_with(&[("A", &[(5, 100.0)])], 1000.0);
        ctx.current_date = Some(day(0));
        assert!(!strategy.buy("A", &ctx, &params).unwrap().is_trade());
    }

    #[test]
    fn rebalance_sell_respects_the_threshold() {
        let params = PortfolioParams::new(vec!["A".into(), "B".into()], 100_000.0);
        let strategy = initialized(&params);

        let mut ctx = context_with(
            &[("A", &[(0, 100.0), (5, 125.0)]), ("B", &[(0, 100.0), (5, 100.0)])],
            0.0,
        );
        ctx.current_date = Some(day(5));
        ctx.is_rebalance_day = true;
        ctx.holdings.insert("A".into(), 500.0);
        ctx.holdings.insert("B".into(), 500.0);

        // V = 112_500, A at 62_500 vs target 56_250 -> excess 6_250 > 1_125
        let trade = strategy.sell("A", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 50);
        assert_eq!(trade.reason, "rebalance");

        // B sits below target; no sell
        assert!(!strategy.sell("B", &ctx, &params).unwrap().is_trade());
    }

    #[test]
    fn small_excess_is_left_alone() {
        let params = PortfolioParams::new(vec!["A".into(), "B".into()], 100_000.0);
        let strategy = initialized(&params);

        let mut ctx = context_with(
            &[("A", &[(0, 100.0), (5, 100.5)]), ("B", &[(0, 100.0), (5, 100.0)])],
            0.0,
        );
        ctx.current_date = Some(day(5));
        ctx.is_rebalance_day = true;
        ctx.holdings.insert("A".into(), 500.0);
        ctx.holdings.insert("B".into(), 500.0);

        assert!(!strategy.sell("A", &ctx, &params).unwrap().is_trade());
    }

    #[test]
    fn last_day_liquidates_everything() {
        let params = PortfolioParams::new(vec!["A".into()], 100_000.0);
        let strategy = initialized(&params);

        let mut ctx = context_with(&[("A", &[(0, 100.0), (9, 109.0)])], 0.0);
        ctx.current_date = Some(day(9));
        ctx.is_last_day = true;
        ctx.holdings.insert("A".into(), 1000.0);

        let trade = strategy.sell("A", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 1000);
        assert_eq!(trade.price, 109.0);
        assert_eq!(trade.reason, "end of backtest");
    }

    #[test]
    fn delisted_holding_sells_at_last_known_price() {
        let params = PortfolioParams::new(vec!["A".into()], 100_000.0);
        let strategy = initialized(&params);

        let mut ctx = context_with(&[("A", &[(0, 100.0), (4, 97.0)])], 0.0);
        ctx.current_date = Some(day(5));
        ctx.holdings.insert("A".into(), 1000.0);

        let trade = strategy.sell("A", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 1000);
        assert_eq!(trade.price, 97.0);
        assert_eq!(trade.reason, "delisting (last known price)");
    }

    #[test]
    fn reinvestment_allocation_is_scoped_to_weight() {
        let params = PortfolioParams::new(vec!["A".into(), "B".into()], 100_000.0);
        let strategy = initialized(&params);

        let mut ctx = context_with(
            &[("A", &[(0, 100.0), (5, 100.0)]), ("B", &[(0, 100.0), (5, 100.0)])],
            10_000.0,
        );
        ctx.current_date = Some(day(5));
        ctx.day_index = 5;
        ctx.is_reinvestment = true;
        ctx.holdings.insert("A".into(), 450.0);
        ctx.holdings.insert("B".into(), 450.0);

        // V = 100_000; each deficit 5_000 > threshold; allocation capped at
        // cash * 0.5 = 5_000
        let trade = strategy.buy("A", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 50);
        assert_eq!(trade.reason, "cash reinvestment");
    }

    #[test]
    fn buy_never_exceeds_cash() {
        let params = PortfolioParams::new(vec!["A".into()], 100.0);
        let strategy = initialized(&params);
        let ctx = context_with(&[("A", &[(0, 33.0)])], 100.0);

        let trade = strategy.buy("A", &ctx, &params).unwrap();
        assert_eq!(trade.shares, 3);
        assert!(trade.total <= 100.0);
    }

    #[test]
    fn registry_knows_buy_and_hold() {
        assert!(list_strategies().contains(&"buy-and-hold"));
        assert!(create_strategy("buy-and-hold").is_some());
        assert!(create_strategy("momentum").is_none());
    }
}
