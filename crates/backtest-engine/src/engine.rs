use std::collections::HashMap;

use analysis_core::{AnalysisError, Bar};
use chrono::NaiveDate;
use rust_decimal::prelude::*;

use crate::models::*;

const TRADING_DAYS: f64 = 252.0;
const RISK_FREE_RATE: f64 = 0.02;
/// Keeps position and equity arithmetic well inside `Decimal` range.
pub const MAX_INITIAL_CAPITAL: i64 = 1_000_000_000_000_000;

/// Long-only single-symbol backtester with next-bar execution, directional
/// slippage, percent-of-equity sizing, stop-loss and take-profit.
pub struct BacktestEngine {
    config: BacktestConfig,
}

/// An open position being tracked during the backtest.
struct OpenPosition {
    entry_date: NaiveDate,
    /// The actual fill price (includes buy-side slippage).
    entry_price: Decimal,
    shares: Decimal,
    stop_loss_price: Option<Decimal>,
    take_profit_price: Option<Decimal>,
    entry_reason: String,
    entry_commission: Decimal,
    entry_slippage: Decimal,
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let c = &self.config;
        let invalid = |msg: &str| -> Result<(), AnalysisError> { Err(AnalysisError::InvalidData(msg.to_string())) };
        if c.initial_capital <= Decimal::ZERO || c.initial_capital > Decimal::from(MAX_INITIAL_CAPITAL) {
            return invalid("initial_capital must be positive and at most 1e15");
        }
        if !(c.position_size_percent > 0.0 && c.position_size_percent <= 100.0) {
            return invalid("position_size_percent must be in (0, 100]");
        }
        if !(0.0..0.1).contains(&c.commission_rate) || !(0.0..0.1).contains(&c.slippage_rate) {
            return invalid("commission_rate and slippage_rate must be in [0, 0.1)");
        }
        if c.stop_loss_percent.is_some_and(|p| !(p > 0.0 && p < 1.0)) {
            return invalid("stop_loss_percent must be in (0, 1)");
        }
        if c.take_profit_percent.is_some_and(|p| p <= 0.0) {
            return invalid("take_profit_percent must be positive");
        }
        c.strategy.validate()
    }

    /// Generate the configured strategy's signals and run them.
    pub fn run_strategy(&self, bars: &[Bar]) -> Result<BacktestResult, AnalysisError> {
        self.validate()?;
        let warmup = self.config.strategy.warmup_bars();
        if bars.len() < warmup {
            return Err(AnalysisError::InsufficientData(format!(
                "{} needs at least {} bars, got {}",
                self.config.strategy.name(),
                warmup,
                bars.len()
            )));
        }

        let signals = self.config.strategy.generate_signals(bars);
        tracing::debug!(
            "{} produced {} signals over {} bars for {}",
            self.config.strategy.name(),
            signals.len(),
            bars.len(),
            self.config.symbol
        );
        self.run(bars, &signals)
    }

    /// Run the backtest over historical bars using pre-generated signals.
    ///
    /// Signals dated bar[i] execute at bar[i+1]'s **open** price. Slippage is
    /// applied directionally: buys fill above the open, sells fill below.
    /// Stops are checked against each bar's low/high after any entry.
    pub fn run(&self, bars: &[Bar], signals: &[Signal]) -> Result<BacktestResult, AnalysisError> {
        self.validate()?;
        if bars.len() < 2 {
            return Err(AnalysisError::InsufficientData(format!(
                "Backtest needs at least 2 bars, got {}",
                bars.len()
            )));
        }

        let commission_dec = dec(self.config.commission_rate);
        let slippage_dec = dec(self.config.slippage_rate);
        let size_dec = dec(self.config.position_size_percent / 100.0);

        let mut signals_by_date: HashMap<NaiveDate, &Signal> = HashMap::new();
        for signal in signals {
            // last signal of a day wins
            signals_by_date.insert(signal.date, signal);
        }

        let mut cash = self.config.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut pending: Option<&Signal> = None;
        let mut trades: Vec<BacktestTrade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
        let mut total_commission = Decimal::ZERO;
        let mut total_slippage = Decimal::ZERO;
        let mut peak_equity = self.config.initial_capital;
        let mut max_drawdown = 0.0;
        let mut exposed_bars = 0usize;

        for bar in bars {
            let date = bar.date();
            let open = dec(bar.open);
            let high = dec(bar.high);
            let low = dec(bar.low);
            let close = dec(bar.close);

            // 1. Execute yesterday's signal at today's OPEN
            if let Some(signal) = pending.take() {
                match (signal.action, position.is_some()) {
                    (SignalAction::Buy, false) => {
                        let fill_price = open + open * slippage_dec;
                        // Size against cash, which is all of equity while flat
                        let budget = cash * size_dec;
                        let shares = budget
                            .checked_div(fill_price * (Decimal::ONE + commission_dec))
                            .map(|s| s.floor())
                            .unwrap_or(Decimal::ZERO);
                        if fill_price > Decimal::ZERO && shares >= Decimal::ONE {
                            let entry_commission = fill_price * shares * commission_dec;
                            let entry_slippage = (fill_price - open) * shares;
                            cash -= fill_price * shares + entry_commission;
                            total_commission += entry_commission;
                            total_slippage += entry_slippage;

                            position = Some(OpenPosition {
                                entry_date: date,
                                entry_price: fill_price,
                                shares,
                                stop_loss_price: self
                                    .config
                                    .stop_loss_percent
                                    .map(|pct| fill_price * dec(1.0 - pct)),
                                take_profit_price: self
                                    .config
                                    .take_profit_percent
                                    .map(|pct| fill_price * dec(1.0 + pct)),
                                entry_reason: signal.reason.clone(),
                                entry_commission,
                                entry_slippage,
                            });
                        } else {
                            tracing::debug!("Skipping buy on {}: cannot afford one share", date);
                        }
                    }
                    (SignalAction::Sell, true) => {
                        if let Some(pos) = position.take() {
                            let trade = Self::close_position(pos, date, open, commission_dec, slippage_dec, "signal");
                            cash += trade.trade.exit_price * trade.trade.shares - trade.exit_commission;
                            total_commission += trade.exit_commission;
                            total_slippage += trade.exit_slippage;
                            trades.push(trade.trade);
                        }
                    }
                    _ => {}
                }
            }

            // 2. Stop-loss first, then take-profit, against the bar's range
            let exit = position.as_ref().and_then(|pos| {
                if let Some(sl) = pos.stop_loss_price.filter(|sl| low <= *sl) {
                    return Some((if open <= sl { open } else { sl }, "stop_loss"));
                }
                if let Some(tp) = pos.take_profit_price.filter(|tp| high >= *tp) {
                    return Some((if open >= tp { open } else { tp }, "take_profit"));
                }
                None
            });
            if let Some((raw_fill, reason)) = exit {
                if let Some(pos) = position.take() {
                    let trade = Self::close_position(pos, date, raw_fill, commission_dec, slippage_dec, reason);
                    cash += trade.trade.exit_price * trade.trade.shares - trade.exit_commission;
                    total_commission += trade.exit_commission;
                    total_slippage += trade.exit_slippage;
                    trades.push(trade.trade);
                }
            }

            // 3. Today's signal executes on the next bar
            pending = signals_by_date.get(&date).copied();

            if position.is_some() {
                exposed_bars += 1;
            }

            // 4. Mark-to-market at close
            let positions_value = position.as_ref().map_or(Decimal::ZERO, |p| close * p.shares);
            let equity = cash + positions_value;
            if equity > peak_equity {
                peak_equity = equity;
            }
            let peak_f64 = peak_equity.to_f64().unwrap_or(1.0);
            let equity_f64 = equity.to_f64().unwrap_or(0.0);
            let drawdown_pct = if peak_f64 > 0.0 {
                (peak_f64 - equity_f64) / peak_f64 * 100.0
            } else {
                0.0
            };
            if drawdown_pct > max_drawdown {
                max_drawdown = drawdown_pct;
            }

            equity_curve.push(EquityPoint {
                date,
                equity,
                drawdown_percent: drawdown_pct,
            });
        }

        // 5. Close any open position at the last close
        let (first_bar, last_bar) = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(AnalysisError::InsufficientData("No bars".to_string())),
        };
        if let Some(pos) = position.take() {
            let trade = Self::close_position(
                pos,
                last_bar.date(),
                dec(last_bar.close),
                commission_dec,
                slippage_dec,
                "end_of_backtest",
            );
            cash += trade.trade.exit_price * trade.trade.shares - trade.exit_commission;
            total_commission += trade.exit_commission;
            total_slippage += trade.exit_slippage;
            trades.push(trade.trade);
        }

        let initial = self.config.initial_capital;
        let final_capital = cash;
        let total_return = final_capital - initial;
        let initial_f64 = initial.to_f64().unwrap_or(1.0);
        let final_f64 = final_capital.to_f64().unwrap_or(0.0);
        let total_return_percent = (final_f64 / initial_f64 - 1.0) * 100.0;

        let calendar_days = (last_bar.date() - first_bar.date()).num_days();
        let annualized_return_percent = if calendar_days > 0 && final_f64 > 0.0 {
            let years = calendar_days as f64 / 365.25;
            Some(((final_f64 / initial_f64).powf(1.0 / years) - 1.0) * 100.0)
        } else {
            None
        };

        let buy_and_hold_return_percent = if first_bar.close > 0.0 {
            (last_bar.close / first_bar.close - 1.0) * 100.0
        } else {
            0.0
        };

        let stats = TradeStats::from_trades(&trades);
        let (sharpe, sortino) = Self::compute_risk_ratios(&equity_curve);

        tracing::info!(
            "Backtest {} on {}: {:.2}% return over {} trades (buy & hold {:.2}%)",
            self.config.strategy.name(),
            self.config.symbol,
            total_return_percent,
            trades.len(),
            buy_and_hold_return_percent
        );

        Ok(BacktestResult {
            id: None,
            symbol: self.config.symbol.clone(),
            strategy_name: self.config.strategy.name().to_string(),
            strategy: self.config.strategy.clone(),
            start_date: first_bar.date(),
            end_date: last_bar.date(),
            initial_capital: initial,
            final_capital,
            total_return,
            total_return_percent,
            annualized_return_percent,
            buy_and_hold_return_percent,
            alpha: total_return_percent - buy_and_hold_return_percent,
            total_trades: trades.len() as i32,
            winning_trades: stats.winning,
            losing_trades: stats.losing,
            win_rate: stats.win_rate,
            profit_factor: stats.profit_factor,
            average_win: stats.average_win,
            average_loss: stats.average_loss,
            max_consecutive_wins: stats.max_consecutive_wins,
            max_consecutive_losses: stats.max_consecutive_losses,
            avg_holding_period_days: stats.avg_holding_days,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            max_drawdown_percent: max_drawdown,
            exposure_percent: exposed_bars as f64 / bars.len() as f64 * 100.0,
            total_commission_paid: total_commission,
            total_slippage_cost: total_slippage,
            equity_curve,
            trades,
            created_at: None,
        })
    }

    // --- Helpers ---

    /// Sell out a long position. `raw_exit_price` is the price before
    /// slippage (bar open, stop trigger or last close).
    fn close_position(
        pos: OpenPosition,
        date: NaiveDate,
        raw_exit_price: Decimal,
        commission_dec: Decimal,
        slippage_dec: Decimal,
        reason: &str,
    ) -> ClosedTrade {
        let fill_price = raw_exit_price - raw_exit_price * slippage_dec;
        let exit_slippage = (raw_exit_price - fill_price) * pos.shares;
        let exit_commission = fill_price * pos.shares * commission_dec;

        let gross_pnl = (fill_price - pos.entry_price) * pos.shares;
        let net_pnl = gross_pnl - pos.entry_commission - exit_commission;

        let entry_f64 = pos.entry_price.to_f64().unwrap_or(1.0);
        let exit_f64 = fill_price.to_f64().unwrap_or(0.0);
        let return_pct = if entry_f64 > 0.0 {
            (exit_f64 / entry_f64 - 1.0) * 100.0
        } else {
            0.0
        };

        ClosedTrade {
            trade: BacktestTrade {
                entry_date: pos.entry_date,
                exit_date: date,
                entry_price: pos.entry_price,
                exit_price: fill_price,
                shares: pos.shares,
                profit_loss: net_pnl,
                profit_loss_percent: return_pct,
                holding_period_days: (date - pos.entry_date).num_days(),
                commission_cost: pos.entry_commission + exit_commission,
                slippage_cost: pos.entry_slippage + exit_slippage,
                entry_reason: pos.entry_reason,
                exit_reason: reason.to_string(),
            },
            exit_commission,
            exit_slippage,
        }
    }

    /// Daily Sharpe and Sortino against a 2% risk-free rate, annualised by √252.
    pub fn compute_risk_ratios(equity_curve: &[EquityPoint]) -> (Option<f64>, Option<f64>) {
        if equity_curve.len() < 3 {
            return (None, None);
        }
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|w| {
                let e0 = w[0].equity.to_f64().unwrap_or(1.0);
                let e1 = w[1].equity.to_f64().unwrap_or(1.0);
                (e1 / e0) - 1.0
            })
            .collect();
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        // Sample standard deviation (Bessel's correction: n-1)
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();
        let rf_daily = RISK_FREE_RATE / TRADING_DAYS;

        let sharpe = (std_dev > 0.0).then(|| ((mean - rf_daily) / std_dev) * TRADING_DAYS.sqrt());

        let downside: Vec<f64> = returns
            .iter()
            .filter(|r| **r < rf_daily)
            .map(|r| (r - rf_daily).powi(2))
            .collect();
        let downside_dev = if !downside.is_empty() {
            (downside.iter().sum::<f64>() / downside.len() as f64).sqrt()
        } else {
            0.0
        };
        let sortino = if downside_dev > 0.0 {
            Some(((mean - rf_daily) / downside_dev) * TRADING_DAYS.sqrt())
        } else if mean > rf_daily {
            // no downside at all
            Some(99.99)
        } else {
            None
        };

        (sharpe, sortino)
    }
}

struct ClosedTrade {
    trade: BacktestTrade,
    exit_commission: Decimal,
    exit_slippage: Decimal,
}

/// Win/loss statistics over closed trades
struct TradeStats {
    winning: i32,
    losing: i32,
    win_rate: f64,
    profit_factor: Option<f64>,
    average_win: Option<Decimal>,
    average_loss: Option<Decimal>,
    max_consecutive_wins: i32,
    max_consecutive_losses: i32,
    avg_holding_days: Option<f64>,
}

impl TradeStats {
    fn from_trades(trades: &[BacktestTrade]) -> Self {
        let winning = trades.iter().filter(|t| t.profit_loss > Decimal::ZERO).count() as i32;
        let losing = trades.iter().filter(|t| t.profit_loss < Decimal::ZERO).count() as i32;
        let gross_profits: Decimal = trades
            .iter()
            .filter(|t| t.profit_loss > Decimal::ZERO)
            .map(|t| t.profit_loss)
            .sum();
        let gross_losses: Decimal = trades
            .iter()
            .filter(|t| t.profit_loss < Decimal::ZERO)
            .map(|t| t.profit_loss.abs())
            .sum();

        let profit_factor = if gross_losses > Decimal::ZERO {
            (gross_profits / gross_losses).to_f64()
        } else {
            None
        };

        let mut max_w = 0;
        let mut max_l = 0;
        let mut w = 0;
        let mut l = 0;
        for t in trades {
            if t.profit_loss > Decimal::ZERO {
                w += 1;
                l = 0;
                max_w = max_w.max(w);
            } else if t.profit_loss < Decimal::ZERO {
                l += 1;
                w = 0;
                max_l = max_l.max(l);
            } else {
                w = 0;
                l = 0;
            }
        }

        Self {
            winning,
            losing,
            win_rate: if trades.is_empty() {
                0.0
            } else {
                winning as f64 / trades.len() as f64 * 100.0
            },
            profit_factor,
            average_win: (winning > 0).then(|| gross_profits / Decimal::from(winning)),
            average_loss: (losing > 0).then(|| gross_losses / Decimal::from(losing)),
            max_consecutive_wins: max_w,
            max_consecutive_losses: max_l,
            avg_holding_days: (!trades.is_empty()).then(|| {
                trades.iter().map(|t| t.holding_period_days).sum::<i64>() as f64 / trades.len() as f64
            }),
        }
    }
}
