use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::models::{BacktestResult, BacktestSummary, BacktestTrade, EquityPoint};
use crate::strategy::Strategy;

const CREATE_BACKTESTS: &str = "CREATE TABLE IF NOT EXISTS backtests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    strategy_json TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    initial_capital TEXT NOT NULL,
    final_capital TEXT NOT NULL,
    total_return TEXT NOT NULL,
    total_return_percent REAL NOT NULL,
    annualized_return_percent REAL,
    buy_and_hold_return_percent REAL NOT NULL,
    alpha REAL NOT NULL,
    total_trades INTEGER NOT NULL,
    winning_trades INTEGER NOT NULL,
    losing_trades INTEGER NOT NULL,
    win_rate REAL NOT NULL,
    profit_factor REAL,
    average_win TEXT,
    average_loss TEXT,
    max_consecutive_wins INTEGER NOT NULL,
    max_consecutive_losses INTEGER NOT NULL,
    avg_holding_period_days REAL,
    sharpe_ratio REAL,
    sortino_ratio REAL,
    max_drawdown_percent REAL NOT NULL,
    exposure_percent REAL NOT NULL,
    total_commission_paid TEXT NOT NULL,
    total_slippage_cost TEXT NOT NULL,
    equity_curve_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

const CREATE_TRADES: &str = "CREATE TABLE IF NOT EXISTS backtest_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backtest_id INTEGER NOT NULL REFERENCES backtests(id) ON DELETE CASCADE,
    entry_date TEXT NOT NULL,
    exit_date TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    exit_price TEXT NOT NULL,
    shares TEXT NOT NULL,
    profit_loss TEXT NOT NULL,
    profit_loss_percent REAL NOT NULL,
    holding_period_days INTEGER NOT NULL,
    commission_cost TEXT NOT NULL,
    slippage_cost TEXT NOT NULL,
    entry_reason TEXT NOT NULL,
    exit_reason TEXT NOT NULL
)";

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap_or_default()
}

// Money is stored as TEXT so Decimal values round-trip exactly.
fn parse_money(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

/// Persists backtest results and trades to SQLite.
pub struct BacktestDb {
    pool: SqlitePool,
}

impl BacktestDb {
    /// Wrap a pool and create the tables if they don't exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, anyhow::Error> {
        let db = Self { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_BACKTESTS).execute(&self.pool).await?;
        sqlx::query(CREATE_TRADES).execute(&self.pool).await?;
        Ok(())
    }

    /// Save a backtest result and its trades. Returns the backtest ID.
    pub async fn save_backtest(&self, result: &BacktestResult) -> Result<i64, anyhow::Error> {
        let strategy_json = serde_json::to_string(&result.strategy)?;
        let equity_json = serde_json::to_string(&result.equity_curve)?;

        let mut tx = self.pool.begin().await?;

        let (backtest_id,): (i64,) = sqlx::query_as(
            "INSERT INTO backtests (
                symbol, strategy_name, strategy_json, start_date, end_date,
                initial_capital, final_capital, total_return, total_return_percent,
                annualized_return_percent, buy_and_hold_return_percent, alpha,
                total_trades, winning_trades, losing_trades, win_rate,
                profit_factor, average_win, average_loss,
                max_consecutive_wins, max_consecutive_losses, avg_holding_period_days,
                sharpe_ratio, sortino_ratio, max_drawdown_percent, exposure_percent,
                total_commission_paid, total_slippage_cost, equity_curve_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&result.symbol)
        .bind(&result.strategy_name)
        .bind(&strategy_json)
        .bind(result.start_date.format(DATE_FORMAT).to_string())
        .bind(result.end_date.format(DATE_FORMAT).to_string())
        .bind(result.initial_capital.to_string())
        .bind(result.final_capital.to_string())
        .bind(result.total_return.to_string())
        .bind(result.total_return_percent)
        .bind(result.annualized_return_percent)
        .bind(result.buy_and_hold_return_percent)
        .bind(result.alpha)
        .bind(result.total_trades)
        .bind(result.winning_trades)
        .bind(result.losing_trades)
        .bind(result.win_rate)
        .bind(result.profit_factor)
        .bind(result.average_win.map(|v| v.to_string()))
        .bind(result.average_loss.map(|v| v.to_string()))
        .bind(result.max_consecutive_wins)
        .bind(result.max_consecutive_losses)
        .bind(result.avg_holding_period_days)
        .bind(result.sharpe_ratio)
        .bind(result.sortino_ratio)
        .bind(result.max_drawdown_percent)
        .bind(result.exposure_percent)
        .bind(result.total_commission_paid.to_string())
        .bind(result.total_slippage_cost.to_string())
        .bind(&equity_json)
        .fetch_one(&mut *tx)
        .await?;

        for trade in &result.trades {
            sqlx::query(
                "INSERT INTO backtest_trades (
                    backtest_id, entry_date, exit_date, entry_price, exit_price, shares,
                    profit_loss, profit_loss_percent, holding_period_days,
                    commission_cost, slippage_cost, entry_reason, exit_reason
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(backtest_id)
            .bind(trade.entry_date.format(DATE_FORMAT).to_string())
            .bind(trade.exit_date.format(DATE_FORMAT).to_string())
            .bind(trade.entry_price.to_string())
            .bind(trade.exit_price.to_string())
            .bind(trade.shares.to_string())
            .bind(trade.profit_loss.to_string())
            .bind(trade.profit_loss_percent)
            .bind(trade.holding_period_days)
            .bind(trade.commission_cost.to_string())
            .bind(trade.slippage_cost.to_string())
            .bind(&trade.entry_reason)
            .bind(&trade.exit_reason)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!("Saved backtest {} ({} on {})", backtest_id, result.strategy_name, result.symbol);
        Ok(backtest_id)
    }

    /// Summaries of all saved backtests, newest first.
    pub async fn list_backtests(&self) -> Result<Vec<BacktestSummary>, anyhow::Error> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT id, symbol, strategy_name, start_date, end_date,
                    initial_capital, final_capital, total_return_percent,
                    total_trades, win_rate, sharpe_ratio, max_drawdown_percent, created_at
             FROM backtests ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    /// Get a single backtest by ID, with equity curve and trades.
    pub async fn get_backtest(&self, id: i64) -> Result<Option<BacktestResult>, anyhow::Error> {
        let row = sqlx::query_as::<_, BacktestRow>("SELECT * FROM backtests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let trades = self.get_backtest_trades(id).await?;
        Ok(Some(row.into_result(trades)?))
    }

    /// Delete a backtest and its trades. Returns false when no such ID.
    pub async fn delete_backtest(&self, id: i64) -> Result<bool, anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM backtest_trades WHERE backtest_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM backtests WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn get_backtest_trades(&self, backtest_id: i64) -> Result<Vec<BacktestTrade>, anyhow::Error> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT entry_date, exit_date, entry_price, exit_price, shares,
                    profit_loss, profit_loss_percent, holding_period_days,
                    commission_cost, slippage_cost, entry_reason, exit_reason
             FROM backtest_trades WHERE backtest_id = ? ORDER BY id",
        )
        .bind(backtest_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| BacktestTrade {
                entry_date: parse_date(&r.entry_date),
                exit_date: parse_date(&r.exit_date),
                entry_price: parse_money(&r.entry_price),
                exit_price: parse_money(&r.exit_price),
                shares: parse_money(&r.shares),
                profit_loss: parse_money(&r.profit_loss),
                profit_loss_percent: r.profit_loss_percent,
                holding_period_days: r.holding_period_days,
                commission_cost: parse_money(&r.commission_cost),
                slippage_cost: parse_money(&r.slippage_cost),
                entry_reason: r.entry_reason,
                exit_reason: r.exit_reason,
            })
            .collect())
    }
}

/// Internal row types for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: i64,
    symbol: String,
    strategy_name: String,
    start_date: String,
    end_date: String,
    initial_capital: String,
    final_capital: String,
    total_return_percent: f64,
    total_trades: i32,
    win_rate: f64,
    sharpe_ratio: Option<f64>,
    max_drawdown_percent: f64,
    created_at: Option<String>,
}

impl SummaryRow {
    fn into_summary(self) -> BacktestSummary {
        BacktestSummary {
            id: self.id,
            symbol: self.symbol,
            strategy_name: self.strategy_name,
            start_date: parse_date(&self.start_date),
            end_date: parse_date(&self.end_date),
            initial_capital: parse_money(&self.initial_capital),
            final_capital: parse_money(&self.final_capital),
            total_return_percent: self.total_return_percent,
            total_trades: self.total_trades,
            win_rate: self.win_rate,
            sharpe_ratio: self.sharpe_ratio,
            max_drawdown_percent: self.max_drawdown_percent,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BacktestRow {
    id: i64,
    symbol: String,
    strategy_name: String,
    strategy_json: String,
    start_date: String,
    end_date: String,
    initial_capital: String,
    final_capital: String,
    total_return: String,
    total_return_percent: f64,
    annualized_return_percent: Option<f64>,
    buy_and_hold_return_percent: f64,
    alpha: f64,
    total_trades: i32,
    winning_trades: i32,
    losing_trades: i32,
    win_rate: f64,
    profit_factor: Option<f64>,
    average_win: Option<String>,
    average_loss: Option<String>,
    max_consecutive_wins: i32,
    max_consecutive_losses: i32,
    avg_holding_period_days: Option<f64>,
    sharpe_ratio: Option<f64>,
    sortino_ratio: Option<f64>,
    max_drawdown_percent: f64,
    exposure_percent: f64,
    total_commission_paid: String,
    total_slippage_cost: String,
    equity_curve_json: String,
    created_at: Option<String>,
}

impl BacktestRow {
    fn into_result(self, trades: Vec<BacktestTrade>) -> Result<BacktestResult, anyhow::Error> {
        let strategy: Strategy = serde_json::from_str(&self.strategy_json)?;
        let equity_curve: Vec<EquityPoint> = serde_json::from_str(&self.equity_curve_json)?;

        Ok(BacktestResult {
            id: Some(self.id),
            symbol: self.symbol,
            strategy_name: self.strategy_name,
            strategy,
            start_date: parse_date(&self.start_date),
            end_date: parse_date(&self.end_date),
            initial_capital: parse_money(&self.initial_capital),
            final_capital: parse_money(&self.final_capital),
            total_return: parse_money(&self.total_return),
            total_return_percent: self.total_return_percent,
            annualized_return_percent: self.annualized_return_percent,
            buy_and_hold_return_percent: self.buy_and_hold_return_percent,
            alpha: self.alpha,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate: self.win_rate,
            profit_factor: self.profit_factor,
            average_win: self.average_win.as_deref().map(parse_money),
            average_loss: self.average_loss.as_deref().map(parse_money),
            max_consecutive_wins: self.max_consecutive_wins,
            max_consecutive_losses: self.max_consecutive_losses,
            avg_holding_period_days: self.avg_holding_period_days,
            sharpe_ratio: self.sharpe_ratio,
            sortino_ratio: self.sortino_ratio,
            max_drawdown_percent: self.max_drawdown_percent,
            exposure_percent: self.exposure_percent,
            total_commission_paid: parse_money(&self.total_commission_paid),
            total_slippage_cost: parse_money(&self.total_slippage_cost),
            equity_curve,
            trades,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TradeRow {
    entry_date: String,
    exit_date: String,
    entry_price: String,
    exit_price: String,
    shares: String,
    profit_loss: String,
    profit_loss_percent: f64,
    holding_period_days: i64,
    commission_cost: String,
    slippage_cost: String,
    entry_reason: String,
    exit_reason: String,
}
