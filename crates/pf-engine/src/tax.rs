//! Capital-gains and dividend tax accounting.
//!
//! The calculator accumulates one tax year at a time: sales are recorded as
//! per-lot transactions, dividends as net amounts, and the year-end step
//! nets gains against losses, applies the long-term exemption and any loss
//! carried in from earlier years, and prices the remainder at the
//! personal-income rate.

use std::cmp::Ordering;

use chrono::Duration;
use pf_types::{TaxError, TaxLot, TaxSummary, Timestamp, SHARE_EPSILON};
use tracing::debug;

/// Which lots a sale consumes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LotMethod {
    #[default]
    Fifo,
    Lifo,
    /// Highest cost basis first, minimizing the realized gain.
    MinimizeTax,
}

impl std::str::FromStr for LotMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIFO" => Ok(LotMethod::Fifo),
            "LIFO" => Ok(LotMethod::Lifo),
            "MinimizeTax" => Ok(LotMethod::MinimizeTax),
            other => Err(format!("unknown lot method '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
struct Transaction {
    #[allow(dead_code)]
    date: Timestamp,
    quantity: f64,
    cost_basis: f64,
    sale_price: f64,
    is_long_term: bool,
    #[allow(dead_code)]
    instrument_id: String,
}

/// Holding longer than three calendar years qualifies for the exemption.
fn is_long_term(purchase_date: Timestamp, sale_date: Timestamp) -> bool {
    sale_date - purchase_date > Duration::hours((3.0 * 365.25 * 24.0) as i64)
}

/// Consume `quantity` shares from `lots` front to back, splitting the last
/// lot touched and dropping emptied lots. Lots must already be in the
/// desired consumption order.
pub fn consume_lots(lots: &mut Vec<TaxLot>, quantity: f64) {
    let mut remaining = quantity;
    for lot in lots.iter_mut() {
        if remaining <= SHARE_EPSILON {
            break;
        }
        let sold = lot.quantity.min(remaining);
        lot.quantity -= sold;
        remaining -= sold;
    }
    lots.retain(|lot| lot.quantity > SHARE_EPSILON);
}

pub struct TaxCalculator {
    ndfl_rate: f64,
    long_term_exemption: bool,
    lot_method: LotMethod,
    carryforward_loss: f64,
    transactions: Vec<Transaction>,
    dividend_net: Vec<f64>,
}

impl Default for TaxCalculator {
    fn default() -> Self {
        Self::new(0.13)
    }
}

impl TaxCalculator {
    pub fn new(ndfl_rate: f64) -> Self {
        Self {
            ndfl_rate,
            long_term_exemption: true,
            lot_method: LotMethod::Fifo,
            carryforward_loss: 0.0,
            transactions: Vec::new(),
            dividend_net: Vec::new(),
        }
    }

    pub fn with_long_term_exemption(mut self, enabled: bool) -> Self {
        self.long_term_exemption = enabled;
        self
    }

    pub fn with_lot_method(mut self, method: LotMethod) -> Self {
        self.lot_method = method;
        self
    }

    pub fn with_carryforward_loss(mut self, loss: f64) -> Self {
        self.carryforward_loss = loss.max(0.0);
        self
    }

    pub fn ndfl_rate(&self) -> f64 {
        self.ndfl_rate
    }

    pub fn lot_method(&self) -> LotMethod {
        self.lot_method
    }

    pub fn carryforward_loss(&self) -> f64 {
        self.carryforward_loss
    }

    /// Record a sale against the open lot inventory.
    ///
    /// Orders `lots` per the configured method, emits one transaction per
    /// lot touched (splitting the last one), and consumes the sold quantity
    /// from the inventory.
    pub fn record_sale(
        &mut self,
        instrument_id: &str,
        quantity: f64,
        sale_price: f64,
        sale_date: Timestamp,
        lots: &mut Vec<TaxLot>,
    ) -> Result<(), TaxError> {
        if quantity <= 0.0 {
            return Err(TaxError::InvalidQuantity(quantity));
        }
        let available: f64 = lots.iter().map(|lot| lot.quantity).sum();
        if available + SHARE_EPSILON < quantity {
            return Err(TaxError::InsufficientLots {
                requested: quantity,
                available,
            });
        }

        self.order_lots(lots);

        let mut remaining = quantity;
        for lot in lots.iter() {
            if remaining <= SHARE_EPSILON {
                break;
            }
            let sold = lot.quantity.min(remaining);
            self.transactions.push(Transaction {
                date: sale_date,
                quantity: sold,
                cost_basis: lot.cost_basis,
                sale_price,
                is_long_term: is_long_term(lot.purchase_date, sale_date),
                instrument_id: instrument_id.to_string(),
            });
            remaining -= sold;
        }

        consume_lots(lots, quantity);
        debug!(
            instrument = instrument_id,
            quantity,
            sale_price,
            lots_left = lots.len(),
            "sale recorded"
        );
        Ok(())
    }

    /// Withhold tax from a gross dividend, returning the net amount.
    pub fn record_dividend(&mut self, gross: f64) -> f64 {
        if gross <= 0.0 {
            return 0.0;
        }
        let net = gross * (1.0 - self.ndfl_rate);
        self.dividend_net.push(net);
        net
    }

    /// Year-end totals for the currently accumulated year. Non-destructive;
    /// the driver may call it both to settle a year and to report the final
    /// partial year.
    pub fn calculate_year_end_tax(&self) -> TaxSummary {
        let mut summary = TaxSummary::default();

        for txn in &self.transactions {
            let gain = (txn.sale_price - txn.cost_basis) * txn.quantity;
            match gain.partial_cmp(&0.0) {
                Some(Ordering::Greater) => {
                    summary.total_gains += gain;
                    summary.profitable_transactions += 1;
                    if txn.is_long_term && self.long_term_exemption {
                        summary.exempt_gain += gain;
                        summary.exempt_transactions += 1;
                    }
                }
                Some(Ordering::Less) => {
                    summary.total_losses += -gain;
                    summary.losing_transactions += 1;
                }
                _ => {}
            }
        }

        let taxable_before = summary.total_gains - summary.exempt_gain;
        let mut net = taxable_before - summary.total_losses;

        if net > 0.0 && self.carryforward_loss > 0.0 {
            summary.carryforward_used = net.min(self.carryforward_loss);
            net -= summary.carryforward_used;
        }
        summary.net_gain = net;

        if net > 0.0 {
            summary.taxable_gain = net;
            summary.capital_gains_tax = net * self.ndfl_rate;
            summary.carryforward_loss = 0.0;
        } else {
            summary.taxable_gain = 0.0;
            summary.capital_gains_tax = 0.0;
            summary.carryforward_loss =
                (self.carryforward_loss - summary.carryforward_used) + (-net).max(0.0);
        }

        let net_dividends: f64 = self.dividend_net.iter().sum();
        summary.total_dividends = if self.ndfl_rate < 1.0 {
            net_dividends / (1.0 - self.ndfl_rate)
        } else {
            net_dividends
        };
        summary.dividend_tax = summary.total_dividends - net_dividends;

        summary.total_tax = summary.capital_gains_tax + summary.dividend_tax;
        summary
    }

    /// Split the year's bill into what cash can cover now and the rest.
    pub fn pay_year_end_tax(&self, available_cash: f64, summary: &TaxSummary) -> (f64, f64) {
        let paid = available_cash.max(0.0).min(summary.total_tax);
        (paid, summary.total_tax - paid)
    }

    /// Start the next tax year with `leftover_loss` as its opening
    /// carryforward.
    pub fn reset_for_new_year(&mut self, leftover_loss: f64) {
        self.transactions.clear();
        self.dividend_net.clear();
        self.carryforward_loss = leftover_loss.max(0.0);
    }

    fn order_lots(&self, lots: &mut [TaxLot]) {
        match self.lot_method {
            LotMethod::Fifo => lots.sort_by(|a, b| a.purchase_date.cmp(&b.purchase_date)),
            LotMethod::Lifo => lots.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date)),
            LotMethod::MinimizeTax => lots.sort_by(|a, b| {
                b.cost_basis
                    .partial_cmp(&a.cost_basis)
                    .unwrap_or(Ordering::Equal)
            }),
        }
    }
}
