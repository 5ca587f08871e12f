use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub strategy: Strategy,
    pub initial_capital: Decimal,
    pub position_size_percent: f64, // 0-100
    pub commission_rate: f64,       // as decimal, e.g. 0.001 = 0.1%
    pub slippage_rate: f64,
    pub stop_loss_percent: Option<f64>, // as decimal, e.g. 0.05 = 5%
    pub take_profit_percent: Option<f64>,
}

impl BacktestConfig {
    pub fn new(symbol: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            symbol: symbol.into(),
            strategy,
            initial_capital: Decimal::new(10_000, 0),
            position_size_percent: 100.0,
            commission_rate: 0.001,
            slippage_rate: 0.0005,
            stop_loss_percent: None,
            take_profit_percent: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

/// A trading signal computed at a bar's close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub date: NaiveDate,
    pub action: SignalAction,
    pub price: f64,
    pub reason: String,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: Option<i64>,
    pub symbol: String,
    pub strategy_name: String,
    pub strategy: Strategy,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub total_return: Decimal,
    pub total_return_percent: f64,
    pub annualized_return_percent: Option<f64>,
    pub buy_and_hold_return_percent: f64,
    /// Strategy return - buy-and-hold return.
    pub alpha: f64,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub win_rate: f64, // 0-100 percentage
    pub profit_factor: Option<f64>,
    pub average_win: Option<Decimal>,
    pub average_loss: Option<Decimal>,
    pub max_consecutive_wins: i32,
    pub max_consecutive_losses: i32,
    pub avg_holding_period_days: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown_percent: f64,
    pub exposure_percent: f64,
    pub total_commission_paid: Decimal,
    pub total_slippage_cost: Decimal,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<BacktestTrade>,
    pub created_at: Option<String>,
}

/// Listing view of a stored backtest, without curve or trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub id: i64,
    pub symbol: String,
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub total_return_percent: f64,
    pub total_trades: i32,
    pub win_rate: f64,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_percent: f64,
    pub created_at: Option<String>,
}

/// A point on the equity curve, marked at the bar's close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub drawdown_percent: f64,
}

/// A round-trip trade (entry + exit) from the backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub shares: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_percent: f64,
    pub holding_period_days: i64,
    pub commission_cost: Decimal,
    pub slippage_cost: Decimal,
    pub entry_reason: String,
    pub exit_reason: String,
}
