use analysis_core::{AnalysisError, Bar};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::db::BacktestDb;
use crate::engine::BacktestEngine;
use crate::models::*;
use crate::strategy::Strategy;

/// Helper: create a daily bar on the given date.
fn bar(date: &str, open: f64, high: f64, low: f64, close: f64) -> Bar {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
    Bar {
        timestamp: Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap()),
        open,
        high,
        low,
        close,
        volume: 1_000_000.0,
    }
}

fn signal(date: &str, action: SignalAction) -> Signal {
    Signal {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        action,
        price: 0.0,
        reason: "test".to_string(),
    }
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Helper: frictionless config so fills and P&L are easy to check by hand.
fn free_config(capital: i64) -> BacktestConfig {
    BacktestConfig {
        initial_capital: Decimal::new(capital, 0),
        commission_rate: 0.0,
        slippage_rate: 0.0,
        ..BacktestConfig::new("TEST", Strategy::BuyAndHold)
    }
}

fn f(d: Decimal) -> f64 {
    d.to_f64().unwrap()
}

// Next-bar execution: signals execute at next bar's OPEN, not same bar

#[test]
fn test_next_bar_execution() {
    let bars = vec![
        bar("2024-01-02", 100.0, 105.0, 99.0, 103.0),
        bar("2024-01-03", 104.0, 108.0, 102.0, 106.0),
        bar("2024-01-04", 107.0, 110.0, 105.0, 109.0),
        bar("2024-01-05", 108.0, 112.0, 107.0, 111.0),
    ];
    let config = BacktestConfig {
        initial_capital: Decimal::new(100_000, 0),
        position_size_percent: 50.0,
        commission_rate: 0.001,
        slippage_rate: 0.001,
        ..BacktestConfig::new("AAPL", Strategy::BuyAndHold)
    };

    let result = BacktestEngine::new(config)
        .run(&bars, &[signal("2024-01-02", SignalAction::Buy)])
        .unwrap();

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];

    // day 2 open (104) + 0.1% slippage, not the signal bar's close
    assert!((f(trade.entry_price) - 104.104).abs() < 1e-9);
    assert_eq!(trade.entry_date, date("2024-01-03"));
    // 50_000 / (104.104 * 1.001) = 479.8
    assert_eq!(trade.shares, Decimal::from(479));
    // closed at the last close, less sell-side slippage
    assert!((f(trade.exit_price) - 110.889).abs() < 1e-9);
    assert_eq!(trade.exit_reason, "end_of_backtest");
    assert_eq!(trade.exit_date, date("2024-01-05"));
}

#[test]
fn test_commission_accounting() {
    let bars = vec![
        bar("2024-01-02", 50.0, 50.0, 50.0, 50.0),
        bar("2024-01-03", 50.0, 55.0, 50.0, 55.0),
        bar("2024-01-04", 60.0, 60.0, 60.0, 60.0),
    ];
    let config = BacktestConfig {
        commission_rate: 0.001,
        ..free_config(10_000)
    };
    let signals = vec![
        signal("2024-01-02", SignalAction::Buy),
        signal("2024-01-03", SignalAction::Sell),
    ];

    let result = BacktestEngine::new(config).run(&bars, &signals).unwrap();
    let trade = &result.trades[0];

    // floor(10_000 / 50.05) = 199 shares; 9.95 in, 11.94 out
    assert_eq!(trade.shares, Decimal::from(199));
    assert!((f(result.total_commission_paid) - 21.89).abs() < 1e-9);
    assert!((f(trade.profit_loss) - 1968.11).abs() < 1e-9);
    assert!((f(result.final_capital) - 11_968.11).abs() < 1e-9);
    assert_eq!(trade.exit_reason, "signal");
    assert_eq!(result.total_slippage_cost, Decimal::ZERO);
}

#[test]
fn test_stop_loss_gap_fills_at_open() {
    let bars = vec![
        bar("2024-01-02", 100.0, 101.0, 99.0, 100.0),
        bar("2024-01-03", 100.0, 101.0, 98.0, 99.0),
        bar("2024-01-04", 93.0, 94.0, 90.0, 91.0),
        bar("2024-01-05", 92.0, 93.0, 91.0, 92.0),
    ];
    let config = BacktestConfig {
        stop_loss_percent: Some(0.05),
        ..free_config(10_000)
    };

    let result = BacktestEngine::new(config)
        .run(&bars, &[signal("2024-01-02", SignalAction::Buy)])
        .unwrap();

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, "stop_loss");
    assert_eq!(trade.exit_date, date("2024-01-04"));
    // opened below the 95 stop
    assert!((f(trade.exit_price) - 93.0).abs() < 1e-9);
    assert_eq!(result.losing_trades, 1);
}

#[test]
fn test_stop_loss_intrabar_fills_at_stop() {
    let bars = vec![
        bar("2024-01-02", 100.0, 101.0, 99.0, 100.0),
        bar("2024-01-03", 100.0, 101.0, 98.0, 99.0),
        bar("2024-01-04", 97.0, 98.0, 90.0, 91.0),
    ];
    let config = BacktestConfig {
        stop_loss_percent: Some(0.05),
        ..free_config(10_000)
    };

    let result = BacktestEngine::new(config)
        .run(&bars, &[signal("2024-01-02", SignalAction::Buy)])
        .unwrap();

    assert!((f(result.trades[0].exit_price) - 95.0).abs() < 1e-9);
    assert!((f(result.final_capital) - 9_500.0).abs() < 1e-9);
}

#[test]
fn test_take_profit() {
    let bars = vec![
        bar("2024-01-02", 100.0, 101.0, 99.0, 100.0),
        bar("2024-01-03", 100.0, 104.0, 99.0, 103.0),
        bar("2024-01-04", 105.0, 112.0, 104.0, 111.0),
        bar("2024-01-05", 111.0, 113.0, 110.0, 112.0),
    ];
    let config = BacktestConfig {
        take_profit_percent: Some(0.10),
        ..free_config(10_000)
    };

    let result = BacktestEngine::new(config)
        .run(&bars, &[signal("2024-01-02", SignalAction::Buy)])
        .unwrap();

    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, "take_profit");
    assert!((f(trade.exit_price) - 110.0).abs() < 1e-9);
    assert_eq!(result.winning_trades, 1);
}

#[test]
fn test_redundant_signals_ignored() {
    let bars = vec![
        bar("2024-01-02", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-03", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-04", 11.0, 11.0, 11.0, 11.0),
        bar("2024-01-05", 12.0, 12.0, 12.0, 12.0),
        bar("2024-01-08", 12.0, 12.0, 12.0, 12.0),
    ];
    let signals = vec![
        signal("2024-01-02", SignalAction::Sell), // flat, ignored
        signal("2024-01-03", SignalAction::Buy),
        signal("2024-01-04", SignalAction::Buy), // already long
        signal("2024-01-05", SignalAction::Sell),
    ];

    let result = BacktestEngine::new(free_config(1_000)).run(&bars, &signals).unwrap();

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_date, date("2024-01-04"));
    assert_eq!(trade.exit_date, date("2024-01-08"));
    assert_eq!(trade.holding_period_days, 4);
}

#[test]
fn test_metrics_on_known_curve() {
    let bars = vec![
        bar("2024-01-02", 100.0, 100.0, 100.0, 100.0),
        bar("2024-01-03", 100.0, 100.0, 100.0, 100.0),
        bar("2024-01-04", 120.0, 120.0, 120.0, 120.0),
        bar("2024-01-05", 90.0, 90.0, 90.0, 90.0),
        bar("2024-01-08", 110.0, 110.0, 110.0, 110.0),
    ];

    let result = BacktestEngine::new(free_config(1_000)).run_strategy(&bars).unwrap();

    assert_eq!(result.strategy_name, "buy_and_hold");
    assert_eq!(result.trades[0].shares, Decimal::from(10));
    assert!((f(result.final_capital) - 1_100.0).abs() < 1e-9);
    assert!((result.total_return_percent - 10.0).abs() < 1e-9);
    assert!((result.buy_and_hold_return_percent - 10.0).abs() < 1e-9);
    assert!(result.alpha.abs() < 1e-9);
    // peak 1200 -> trough 900
    assert!((result.max_drawdown_percent - 25.0).abs() < 1e-9);
    // held at the close of 4 of 5 bars
    assert!((result.exposure_percent - 80.0).abs() < 1e-9);
    assert_eq!(result.win_rate, 100.0);
    assert!(result.profit_factor.is_none());
    assert_eq!(result.equity_curve.len(), 5);
    assert!(result.annualized_return_percent.unwrap() > 10.0);
}

#[test]
fn test_risk_ratios() {
    let curve: Vec<EquityPoint> = [100.0, 110.0, 99.0, 108.9]
        .iter()
        .enumerate()
        .map(|(i, &e)| EquityPoint {
            date: date("2024-01-01") + chrono::Duration::days(i as i64),
            equity: Decimal::from_f64(e).unwrap(),
            drawdown_percent: 0.0,
        })
        .collect();

    let (sharpe, sortino) = BacktestEngine::compute_risk_ratios(&curve);

    let returns = [0.1, -0.1, 0.1];
    let mean = returns.iter().sum::<f64>() / 3.0;
    let std = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 2.0).sqrt();
    let rf = 0.02 / 252.0;
    let expected_sharpe = (mean - rf) / std * 252.0_f64.sqrt();
    assert!((sharpe.unwrap() - expected_sharpe).abs() < 1e-6);
    // one downside observation
    let expected_sortino = (mean - rf) / (-0.1 - rf).abs() * 252.0_f64.sqrt();
    assert!((sortino.unwrap() - expected_sortino).abs() < 1e-6);

    assert_eq!(BacktestEngine::compute_risk_ratios(&curve[..2]), (None, None));
}

#[test]
fn test_invalid_config_and_short_history() {
    let bars = vec![
        bar("2024-01-02", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-03", 10.0, 10.0, 10.0, 10.0),
    ];
    let config = BacktestConfig {
        position_size_percent: 0.0,
        ..free_config(1_000)
    };
    assert!(matches!(
        BacktestEngine::new(config).run(&bars, &[]),
        Err(AnalysisError::InvalidData(_))
    ));

    assert!(matches!(
        BacktestEngine::new(free_config(1_000)).run(&bars[..1], &[]),
        Err(AnalysisError::InsufficientData(_))
    ));
}

#[test]
fn test_no_signals_keeps_cash() {
    let bars = vec![
        bar("2024-01-02", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-03", 20.0, 20.0, 20.0, 20.0),
    ];
    let result = BacktestEngine::new(free_config(1_000)).run(&bars, &[]).unwrap();

    assert_eq!(result.total_trades, 0);
    assert_eq!(result.final_capital, Decimal::from(1_000));
    assert!((result.alpha + 100.0).abs() < 1e-9);
    assert_eq!(result.exposure_percent, 0.0);
}

#[test]
fn test_buy_skipped_on_unusable_open() {
    let bars = vec![
        bar("2024-01-02", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-03", 0.0, 11.0, 9.0, 10.5),
        bar("2024-01-04", f64::NAN, 11.0, 9.0, 10.5),
        bar("2024-01-05", 11.0, 11.0, 11.0, 11.0),
    ];
    let signals = vec![
        signal("2024-01-02", SignalAction::Buy),
        signal("2024-01-03", SignalAction::Buy),
    ];

    let result = BacktestEngine::new(free_config(1_000)).run(&bars, &signals).unwrap();

    // neither fill can be sized, so no position is ever opened
    assert_eq!(result.total_trades, 0);
    assert_eq!(result.final_capital, Decimal::from(1_000));
    assert_eq!(result.equity_curve.len(), 4);
}

// Persistence

async fn memory_db() -> BacktestDb {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    BacktestDb::new(pool).await.unwrap()
}

fn sample_result() -> BacktestResult {
    let bars = vec![
        bar("2024-01-02", 50.0, 50.0, 50.0, 50.0),
        bar("2024-01-03", 50.0, 55.0, 50.0, 55.0),
        bar("2024-01-04", 60.0, 60.0, 60.0, 60.0),
    ];
    let config = BacktestConfig {
        commission_rate: 0.001,
        ..free_config(10_000)
    };
    BacktestEngine::new(config)
        .run(&bars, &[signal("2024-01-02", SignalAction::Buy)])
        .unwrap()
}

#[tokio::test]
async fn test_db_save_and_get() {
    let db = memory_db().await;
    let result = sample_result();

    let id = db.save_backtest(&result).await.unwrap();
    let loaded = db.get_backtest(id).await.unwrap().unwrap();

    assert_eq!(loaded.id, Some(id));
    assert_eq!(loaded.symbol, "TEST");
    assert_eq!(loaded.strategy, Strategy::BuyAndHold);
    assert_eq!(loaded.final_capital, result.final_capital);
    assert_eq!(loaded.total_commission_paid, result.total_commission_paid);
    assert_eq!(loaded.trades.len(), 1);
    assert_eq!(loaded.trades[0].profit_loss, result.trades[0].profit_loss);
    assert_eq!(loaded.trades[0].entry_date, date("2024-01-03"));
    assert_eq!(loaded.equity_curve.len(), 3);
    assert!(loaded.created_at.is_some());
}

#[tokio::test]
async fn test_db_list_and_delete() {
    let db = memory_db().await;
    let first = db.save_backtest(&sample_result()).await.unwrap();
    let second = db.save_backtest(&sample_result()).await.unwrap();

    let listed = db.list_backtests().await.unwrap();
    assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(listed[0].total_trades, 1);

    assert!(db.delete_backtest(first).await.unwrap());
    assert!(!db.delete_backtest(first).await.unwrap());
    assert!(db.get_backtest(first).await.unwrap().is_none());
    assert_eq!(db.list_backtests().await.unwrap().len(), 1);
}

#[test]
fn test_oversized_capital_rejected() {
    let bars = vec![
        bar("2024-01-02", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-03", 10.0, 10.0, 10.0, 10.0),
        bar("2024-01-04", 100.0, 100.0, 100.0, 100.0),
    ];
    let config = BacktestConfig {
        initial_capital: Decimal::from_f64(5e28).unwrap(),
        ..free_config(1)
    };

    let err = BacktestEngine::new(config).run_strategy(&bars).unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidData(_)));

    let at_limit = BacktestConfig {
        initial_capital: Decimal::from(crate::engine::MAX_INITIAL_CAPITAL),
        ..free_config(1)
    };
    let result = BacktestEngine::new(at_limit).run_strategy(&bars).unwrap();
    assert!(result.final_capital > result.initial_capital);
}

#[test]
fn test_unbounded_rsi_period_rejected() {
    let strategy: Strategy = serde_json::from_str(
        r#"{"type": "rsi_reversion", "period": 18446744073709551615, "oversold": 30, "overbought": 70}"#,
    )
    .unwrap();
    let bars: Vec<Bar> = (0..40)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.5).sin() * 5.0;
            let day = date("2024-01-01") + chrono::Duration::days(i);
            bar(&day.to_string(), close, close + 1.0, close - 1.0, close)
        })
        .collect();

    let err = BacktestEngine::new(BacktestConfig::new("TEST", strategy))
        .run_strategy(&bars)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidData(_)));
}

#[test]
fn test_history_shorter_than_warmup() {
    let bars: Vec<Bar> = (0..30)
        .map(|i| {
            let day = date("2024-01-01") + chrono::Duration::days(i);
            bar(&day.to_string(), 100.0, 101.0, 99.0, 100.0)
        })
        .collect();
    let config = BacktestConfig::new("TEST", Strategy::from_name("sma").unwrap());

    let err = BacktestEngine::new(config).run_strategy(&bars).unwrap_err();
    assert!(matches!(err, AnalysisError::InsufficientData(_)));
}
