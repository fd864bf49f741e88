//! Trade lifecycle and per-trade risk tracking
//!
//! A [`Trade`] walks `BuyPending -> Open -> SellPending -> Closed`. While open,
//! every tick refreshes its [`RiskState`] from the pair's newest price and
//! [`Trade::should_sell`] decides whether take profit, trailing take profit or
//! the stop-loss trigger fires.
//!
//! Profit percentages are always from the trade's point of view: a SHORT that
//! gained is positive. With fees included the gross move is reduced by the
//! entry fee percentage and then scaled down by the exit fee, so LONG and
//! SHORT figures for the same price move are exact negations.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::price_series::PriceSeries;
use crate::strategy::StrategyParameters;
use crate::{percentage, AssetPair, Fee, Money, TradeStatus, TradeType};

/// Why an exit was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
    TakeProfit,
    TrailingTakeProfit,
    StopLoss,
    /// Stop-loss trigger that had been raised above its starting floor
    TrailingStopLoss,
}

impl std::fmt::Display for SellReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SellReason::TakeProfit => "take profit",
            SellReason::TrailingTakeProfit => "trailing take profit",
            SellReason::StopLoss => "stop loss",
            SellReason::TrailingStopLoss => "trailing stop loss",
        };
        f.write_str(s)
    }
}

/// Risk tracking values, refreshed on every tick while the trade is open.
///
/// All percentages exclude fees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub current_profit_percentage: Option<f64>,
    pub peak_profit_percentage: Option<f64>,
    pub trough_profit_percentage: Option<f64>,
    /// Profit level below which the trade is exited. Starts at
    /// `-stop_loss_percentage` and only moves up.
    pub trigger_stop_loss_percentage: Option<f64>,
    /// When profit first dropped below the trigger (ms), cleared on recovery
    pub trigger_stop_loss_sell_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub asset_pair: AssetPair,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub status: TradeStatus,
    /// Base asset quantity
    pub amount: Money,
    pub entry_price: Option<Money>,
    pub exit_price: Option<Money>,
    #[serde(default)]
    pub entry_fees: Vec<Fee>,
    #[serde(default)]
    pub exit_fees: Vec<Fee>,
    pub opened_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub sell_reason: Option<SellReason>,
    #[serde(default)]
    pub risk: RiskState,
}

impl Trade {
    /// New trade awaiting its entry fill
    pub fn new(
        id: impl Into<String>,
        asset_pair: AssetPair,
        trade_type: TradeType,
        amount: Money,
    ) -> Self {
        Trade {
            id: id.into(),
            asset_pair,
            trade_type,
            status: TradeStatus::BuyPending,
            amount,
            entry_price: None,
            exit_price: None,
            entry_fees: Vec::new(),
            exit_fees: Vec::new(),
            opened_at: None,
            closed_at: None,
            sell_reason: None,
            risk: RiskState::default(),
        }
    }

    /// Session-scoped trade id, e.g. `20261019T101500-BTCINR-3`
    pub fn make_id(session_id: &str, pair: &AssetPair, seq: u32) -> String {
        format!("{}-{}-{}", session_id, pair.market(), seq)
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    fn transition(&mut self, expected: TradeStatus, to: TradeStatus) -> EngineResult<()> {
        if self.status != expected {
            return Err(EngineError::InvalidTransition {
                trade_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Record the entry fill: `BuyPending -> Open`
    pub fn fill_entry(&mut self, price: Money, fees: Vec<Fee>, at: i64) -> EngineResult<()> {
        self.transition(TradeStatus::BuyPending, TradeStatus::Open)?;
        self.entry_price = Some(price);
        self.entry_fees = fees;
        self.opened_at = Some(at);
        info!(
            "Opened {} {:?} {} @ {} (amount {})",
            self.id, self.trade_type, self.asset_pair, price, self.amount
        );
        Ok(())
    }

    /// Ask for an exit: `Open -> SellPending`
    pub fn request_exit(&mut self, reason: SellReason) -> EngineResult<()> {
        self.transition(TradeStatus::Open, TradeStatus::SellPending)?;
        self.sell_reason = Some(reason);
        info!("Exit requested for {}: {}", self.id, reason);
        Ok(())
    }

    /// Record the exit fill: `SellPending -> Closed`
    pub fn fill_exit(&mut self, price: Money, fees: Vec<Fee>, at: i64) -> EngineResult<()> {
        self.transition(TradeStatus::SellPending, TradeStatus::Closed)?;
        self.exit_price = Some(price);
        self.exit_fees = fees;
        self.closed_at = Some(at);
        info!(
            "Closed {} {} @ {} ({:+.2}% after fees)",
            self.id,
            self.asset_pair,
            price,
            self.profit_percentage(true).unwrap_or_default()
        );
        Ok(())
    }

    fn fees_percentage(&self, fees: &[Fee], price: Money) -> f64 {
        fees.iter()
            .map(|fee| fee.as_percentage(&self.asset_pair, price, self.amount))
            .sum()
    }

    /// Entry fees as a percentage of the entry notional
    pub fn entry_fee_percentage(&self) -> f64 {
        match self.entry_price {
            Some(entry) => self.fees_percentage(&self.entry_fees, entry),
            None => 0.0,
        }
    }

    /// Exit fees at `price`. Before the exit fill they are assumed to match
    /// the entry fees.
    fn exit_fee_percentage(&self, price: Money) -> f64 {
        if self.exit_fees.is_empty() {
            self.entry_fee_percentage()
        } else {
            self.fees_percentage(&self.exit_fees, price)
        }
    }

    fn profit_percentage_at(&self, price: Money, include_fees: bool) -> Option<f64> {
        let entry = self.entry_price?;
        let gross = percentage(price.to_f64(), entry.to_f64());
        let net = if include_fees {
            let exit_fee = self.exit_fee_percentage(price);
            (gross - self.entry_fee_percentage()) / (1.0 + exit_fee / 100.0)
        } else {
            gross
        };
        Some(match self.trade_type {
            TradeType::Long => net,
            TradeType::Short => -net,
        })
    }

    /// Unrealized profit if the trade were closed at `price`
    pub fn current_profit_percentage(&self, price: Money, include_fees: bool) -> Option<f64> {
        self.profit_percentage_at(price, include_fees)
    }

    /// Realized profit; `None` until the exit is filled
    pub fn profit_percentage(&self, include_fees: bool) -> Option<f64> {
        self.profit_percentage_at(self.exit_price?, include_fees)
    }

    fn amount_for(&self, pct: f64) -> Option<Money> {
        let entry = self.entry_price?;
        let value = entry.to_f64() * pct / 100.0 * self.amount.to_f64();
        Some(Money::from_f64(value).round_dp(8))
    }

    /// Unrealized profit in the quote asset
    pub fn current_profit_amount(&self, price: Money, include_fees: bool) -> Option<Money> {
        self.amount_for(self.current_profit_percentage(price, include_fees)?)
    }

    /// Realized profit in the quote asset
    pub fn profit_amount(&self, include_fees: bool) -> Option<Money> {
        self.amount_for(self.profit_percentage(include_fees)?)
    }

    /// Refresh the risk state from the newest price of `series`.
    ///
    /// Calling it twice with the same inputs leaves the state unchanged.
    pub fn prepare_data(&mut self, series: &PriceSeries, params: &StrategyParameters, now: i64) {
        if !self.is_open() {
            return;
        }
        let Some(newest) = series.newest() else {
            return;
        };
        let Some(current) = self.current_profit_percentage(newest.price, false) else {
            return;
        };

        let risk = &mut self.risk;
        risk.current_profit_percentage = Some(current);
        let peak = risk.peak_profit_percentage.map_or(current, |p| p.max(current));
        risk.peak_profit_percentage = Some(peak);
        risk.trough_profit_percentage = Some(
            risk.trough_profit_percentage
                .map_or(current, |t| t.min(current)),
        );

        let mut trigger = *risk
            .trigger_stop_loss_percentage
            .get_or_insert(-params.stop_loss_percentage);

        if params.trailing_stop_loss_enabled {
            let expected = peak - params.trailing_stop_loss_percentage;
            if peak - trigger > params.trailing_stop_loss_percentage && trigger < expected {
                debug!(
                    "{}: trailing stop raised {:.4}% -> {:.4}%",
                    self.id, trigger, expected
                );
                trigger = expected;
                risk.trigger_stop_loss_percentage = Some(trigger);
            }
        }

        if params.stop_loss_enabled {
            if current < trigger && risk.trigger_stop_loss_sell_at.is_none() {
                debug!("{}: below stop trigger {:.4}%, armed", self.id, trigger);
                risk.trigger_stop_loss_sell_at = Some(now);
            } else if current > trigger && risk.trigger_stop_loss_sell_at.is_some() {
                debug!("{}: recovered above stop trigger, disarmed", self.id);
                risk.trigger_stop_loss_sell_at = None;
            }
        }
    }

    /// Decide whether the trade should be exited now.
    ///
    /// With `prepare` the risk state is refreshed first; otherwise the values
    /// from the last [`Trade::prepare_data`] call are used. Only open trades
    /// are ever sold.
    pub fn should_sell(
        &mut self,
        series: &PriceSeries,
        params: &StrategyParameters,
        now: i64,
        prepare: bool,
    ) -> Option<SellReason> {
        if !self.is_open() {
            return None;
        }
        if prepare {
            self.prepare_data(series, params, now);
        }

        let current = self.risk.current_profit_percentage?;
        let peak = self.risk.peak_profit_percentage.unwrap_or(current);
        let floor = -params.stop_loss_percentage;
        let mut trigger = self.risk.trigger_stop_loss_percentage.unwrap_or(floor);

        if current > params.take_profit_percentage {
            if !params.trailing_take_profit_enabled {
                return Some(SellReason::TakeProfit);
            }

            // Lock in at least the take-profit level
            if trigger < params.take_profit_percentage {
                trigger = params.take_profit_percentage;
                self.risk.trigger_stop_loss_percentage = Some(trigger);
            }

            let slip = peak - current;
            if slip == 0.0 {
                return None;
            }
            if slip > params.trailing_take_profit_slip_percentage {
                return Some(SellReason::TrailingTakeProfit);
            }
        }

        if current < trigger {
            let reason = if trigger > floor {
                SellReason::TrailingStopLoss
            } else {
                SellReason::StopLoss
            };

            if params.stop_loss_enabled {
                if params.stop_loss_timeout_seconds == 0 {
                    return Some(reason);
                }
                let armed_at = self.risk.trigger_stop_loss_sell_at?;
                let timeout_ms = (params.stop_loss_timeout_seconds as i64).saturating_mul(1000);
                if now - armed_at > timeout_ms {
                    return Some(reason);
                }
                return None;
            }

            // Without a fixed stop loss only a raised trigger sells
            if trigger > floor {
                return Some(reason);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceEntry;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn pair() -> AssetPair {
        AssetPair::new("BTC", "INR")
    }

    fn opened(trade_type: TradeType, fees: Vec<Fee>) -> Trade {
        let mut trade = Trade::new("t-1", pair(), trade_type, Money::new(dec!(1)));
        trade.fill_entry(Money::new(dec!(1.0)), fees, 0).unwrap();
        trade
    }

    fn price(p: &str) -> Money {
        p.parse().unwrap()
    }

    /// Feed one price at a time and evaluate the trade
    struct Ticker {
        series: PriceSeries,
        trade: Trade,
        params: StrategyParameters,
    }

    impl Ticker {
        fn new(params: StrategyParameters) -> Self {
            Ticker {
                series: PriceSeries::new(),
                trade: opened(TradeType::Long, Vec::new()),
                params,
            }
        }

        fn tick(&mut self, now: i64, p: &str) -> Option<SellReason> {
            self.series.add_entry(PriceEntry::parse(now, p).unwrap());
            self.series.process();
            self.trade.should_sell(&self.series, &self.params, now, true)
        }
    }

    fn base_params() -> StrategyParameters {
        StrategyParameters::default()
            .with_take_profit(50.0, None)
            .with_stop_loss(5.0, 0)
    }

    #[test]
    fn test_profit_sign_convention() {
        let long = opened(TradeType::Long, vec![Fee::percentage(1.0)]);
        let gross = long.current_profit_percentage(price("1.05"), false).unwrap();
        assert_relative_eq!(gross, 5.0000000000000036, epsilon = 1e-9);
        let net = long.current_profit_percentage(price("1.05"), true).unwrap();
        assert_relative_eq!(net, 3.9604, epsilon = 1e-4);

        let short = opened(TradeType::Short, vec![Fee::percentage(1.0)]);
        assert_eq!(
            short.current_profit_percentage(price("1.05"), false).unwrap(),
            -gross
        );
        assert_eq!(
            short.current_profit_percentage(price("1.05"), true).unwrap(),
            -net
        );
    }

    #[test]
    fn test_profit_without_entry_price() {
        let trade = Trade::new("t-1", pair(), TradeType::Long, Money::new(dec!(1)));
        assert_eq!(trade.current_profit_percentage(price("1.05"), false), None);
        assert_eq!(trade.profit_percentage(true), None);
    }

    #[test]
    fn test_profit_amount() {
        let mut trade = Trade::new("t-1", pair(), TradeType::Long, Money::new(dec!(2)));
        trade.fill_entry(price("100"), Vec::new(), 0).unwrap();

        let amount = trade.current_profit_amount(price("110"), false).unwrap();
        assert_eq!(amount, Money::new(dec!(20)));

        trade.request_exit(SellReason::TakeProfit).unwrap();
        trade.fill_exit(price("95"), Vec::new(), 10).unwrap();
        assert_eq!(trade.profit_amount(false).unwrap(), Money::new(dec!(-10)));
    }

    #[test]
    fn test_realized_profit_uses_exit_fees() {
        let mut trade = opened(TradeType::Long, vec![Fee::percentage(1.0)]);
        trade.request_exit(SellReason::TakeProfit).unwrap();
        trade
            .fill_exit(price("1.05"), vec![Fee::percentage(0.0)], 5)
            .unwrap();

        let realized = trade.profit_percentage(true).unwrap();
        assert_relative_eq!(realized, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_fee_counts_against_notional() {
        let mut trade = Trade::new("t-1", pair(), TradeType::Long, Money::new(dec!(2)));
        trade
            .fill_entry(price("50"), vec![Fee::amount(Money::new(dec!(1)), None)], 0)
            .unwrap();
        assert_relative_eq!(trade.entry_fee_percentage(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut trade = Trade::new("t-1", pair(), TradeType::Long, Money::new(dec!(1)));
        assert_eq!(trade.status, TradeStatus::BuyPending);

        let err = trade.request_exit(SellReason::StopLoss).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: TradeStatus::BuyPending,
                to: TradeStatus::SellPending,
                ..
            }
        ));

        trade.fill_entry(price("1"), Vec::new(), 0).unwrap();
        assert!(trade.fill_entry(price("1"), Vec::new(), 0).is_err());
        trade.request_exit(SellReason::StopLoss).unwrap();
        trade.fill_exit(price("0.9"), Vec::new(), 1).unwrap();
        assert!(trade.is_closed());
        assert_eq!(trade.sell_reason, Some(SellReason::StopLoss));
        assert!(trade.request_exit(SellReason::StopLoss).is_err());
    }

    #[test]
    fn test_make_id() {
        assert_eq!(Trade::make_id("s1", &pair(), 7), "s1-BTCINR-7");
    }

    #[test]
    fn test_only_open_trades_sell() {
        let params = base_params();
        let series = PriceSeries::from_entries(vec![PriceEntry::parse(0, "0.1").unwrap()]);
        let mut trade = Trade::new("t-1", pair(), TradeType::Long, Money::new(dec!(1)));
        assert_eq!(trade.should_sell(&series, &params, 0, true), None);
        assert_eq!(trade.risk, RiskState::default());
    }

    #[test]
    fn test_take_profit_sells_immediately() {
        let mut t = Ticker::new(StrategyParameters::default().with_take_profit(5.0, None));
        assert_eq!(t.tick(0, "1.03"), None);
        assert_eq!(t.tick(1000, "1.10"), Some(SellReason::TakeProfit));
    }

    #[test]
    fn test_trailing_take_profit_holds_at_peak() {
        let params = StrategyParameters::default()
            .with_take_profit(5.0, Some(1.0))
            .without_stop_loss();
        let mut t = Ticker::new(params);

        assert_eq!(t.tick(0, "1.10"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_percentage, Some(5.0));

        // Slipped 0.5% from the peak, inside the allowance
        assert_eq!(t.tick(1000, "1.095"), None);
        // New peak
        assert_eq!(t.tick(2000, "1.12"), None);
        // Slipped 2% from the peak
        assert_eq!(t.tick(3000, "1.10"), Some(SellReason::TrailingTakeProfit));
    }

    #[test]
    fn test_pinned_take_profit_floor_sells_on_collapse() {
        let params = StrategyParameters::default()
            .with_take_profit(5.0, Some(1.0))
            .without_stop_loss();
        let mut t = Ticker::new(params);

        assert_eq!(t.tick(0, "1.10"), None);
        assert_eq!(t.tick(1000, "1.02"), Some(SellReason::TrailingStopLoss));
    }

    #[test]
    fn test_take_profit_pin_never_lowers_trigger() {
        let params = StrategyParameters::default()
            .with_take_profit(5.0, Some(10.0))
            .with_trailing_stop_loss(2.0)
            .without_stop_loss();
        let mut t = Ticker::new(params);

        // Peak 20% => trailing trigger 18%, above the take-profit level
        assert_eq!(t.tick(0, "1.20"), None);
        let trigger = t.trade.risk.trigger_stop_loss_percentage.unwrap();
        assert_relative_eq!(trigger, 18.0, epsilon = 1e-9);

        assert_eq!(t.tick(1000, "1.19"), None);
        let trigger = t.trade.risk.trigger_stop_loss_percentage.unwrap();
        assert_relative_eq!(trigger, 18.0, epsilon = 1e-9);
    }

    #[test]
    fn test_trailing_stop_loss_ratchets() {
        let params = base_params().with_trailing_stop_loss(2.0);
        let mut t = Ticker::new(params);

        // Trails the entry straight away
        assert_eq!(t.tick(0, "1.00"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_percentage, Some(-2.0));

        assert_eq!(t.tick(1000, "1.10"), None);
        let trigger = t.trade.risk.trigger_stop_loss_percentage.unwrap();
        assert_relative_eq!(trigger, 8.0, epsilon = 1e-9);

        // Trigger never moves down
        assert_eq!(t.tick(2000, "1.09"), None);
        let trigger = t.trade.risk.trigger_stop_loss_percentage.unwrap();
        assert_relative_eq!(trigger, 8.0, epsilon = 1e-9);

        assert_eq!(t.tick(3000, "1.05"), Some(SellReason::TrailingStopLoss));
    }

    #[test]
    fn test_stop_loss_immediate() {
        let mut t = Ticker::new(base_params());
        assert_eq!(t.tick(0, "0.97"), None);
        assert_eq!(t.tick(1000, "0.94"), Some(SellReason::StopLoss));
    }

    #[test]
    fn test_stop_loss_disabled_holds() {
        let mut t = Ticker::new(base_params().without_stop_loss());
        assert_eq!(t.tick(0, "0.50"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_sell_at, None);
    }

    #[test]
    fn test_stop_loss_timeout_arms_and_sells() {
        let mut t = Ticker::new(base_params().with_stop_loss(5.0, 60));

        assert_eq!(t.tick(0, "0.94"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_sell_at, Some(0));

        assert_eq!(t.tick(30_000, "0.93"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_sell_at, Some(0));

        assert_eq!(t.tick(61_000, "0.93"), Some(SellReason::StopLoss));
    }

    #[test]
    fn test_stop_loss_timeout_disarms_on_recovery() {
        let mut t = Ticker::new(base_params().with_stop_loss(5.0, 60));

        assert_eq!(t.tick(0, "0.94"), None);
        assert_eq!(t.tick(30_000, "0.97"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_sell_at, None);

        // Re-armed from scratch
        assert_eq!(t.tick(70_000, "0.94"), None);
        assert_eq!(t.trade.risk.trigger_stop_loss_sell_at, Some(70_000));
        assert_eq!(t.tick(100_000, "0.94"), None);
        assert_eq!(t.tick(131_000, "0.94"), Some(SellReason::StopLoss));
    }

    #[test]
    fn test_prepare_data_tracks_extremes_and_is_idempotent() {
        let params = base_params();
        let mut trade = opened(TradeType::Long, Vec::new());
        let mut series = PriceSeries::new();
        for (ts, p) in [(0, "1.02"), (1000, "0.99"), (2000, "1.01")] {
            series.add_entry(PriceEntry::parse(ts, p).unwrap());
            trade.prepare_data(&series, &params, ts);
        }

        let snapshot = trade.risk.clone();
        trade.prepare_data(&series, &params, 2000);
        assert_eq!(trade.risk, snapshot);

        assert_relative_eq!(snapshot.peak_profit_percentage.unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(
            snapshot.trough_profit_percentage.unwrap(),
            -1.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            snapshot.current_profit_percentage.unwrap(),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_short_profits_on_decline() {
        let mut trade = opened(TradeType::Short, Vec::new());
        let params = StrategyParameters::default().with_take_profit(5.0, None);
        let series = PriceSeries::from_entries(vec![PriceEntry::parse(0, "0.90").unwrap()]);
        assert_eq!(
            trade.should_sell(&series, &params, 0, true),
            Some(SellReason::TakeProfit)
        );
    }

    #[test]
    fn test_trade_serde_round_trip_keeps_risk_state() {
        let mut t = Ticker::new(base_params().with_stop_loss(5.0, 60));
        t.tick(0, "0.94");
        let json = serde_json::to_string(&t.trade).unwrap();
        assert!(json.contains("\"type\":\"LONG\""));
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, t.trade.id);
        assert_eq!(back.status, TradeStatus::Open);
        assert_eq!(back.entry_price, Some(price("1.0")));
        assert_eq!(back.risk.trigger_stop_loss_sell_at, Some(0));
        assert_eq!(back.risk.trigger_stop_loss_percentage, Some(-5.0));
    }
}
