use analysis_core::{Bar, Interval};
use chrono::{DateTime, Datelike, Utc};

/// Aggregate daily bars into weekly (ISO week) or monthly bars.
///
/// Each output bar takes the first open, the extreme high/low, the last
/// close and the summed volume of its bucket, stamped with the bucket's
/// first trading day. Input must be sorted ascending.
pub fn resample(bars: &[Bar], interval: Interval) -> Vec<Bar> {
    let bucket = |ts: &DateTime<Utc>| -> (i32, u32) {
        match interval {
            Interval::Day1 => (ts.year(), ts.ordinal()),
            Interval::Week1 => {
                let week = ts.iso_week();
                (week.year(), week.week())
            }
            Interval::Month1 => (ts.year(), ts.month()),
        }
    };

    if interval == Interval::Day1 {
        return bars.to_vec();
    }

    let mut out: Vec<Bar> = Vec::new();
    let mut current_key = None;

    for bar in bars {
        let key = bucket(&bar.timestamp);
        match out.last_mut() {
            Some(agg) if current_key == Some(key) => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                out.push(bar.clone());
                current_key = Some(key);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(y: i32, m: u32, d: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn test_weekly_buckets_by_iso_week() {
        // Mon 2024-01-01 .. Fri 2024-01-05, then Mon 2024-01-08
        let bars = vec![
            bar(2024, 1, 1, 10.0, 11.0, 9.0, 10.5),
            bar(2024, 1, 3, 10.5, 13.0, 10.0, 12.0),
            bar(2024, 1, 5, 12.0, 12.5, 8.0, 9.0),
            bar(2024, 1, 8, 9.0, 9.5, 8.5, 9.2),
        ];
        let weekly = resample(&bars, Interval::Week1);

        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].open, 10.0);
        assert_eq!(weekly[0].high, 13.0);
        assert_eq!(weekly[0].low, 8.0);
        assert_eq!(weekly[0].close, 9.0);
        assert_eq!(weekly[0].volume, 30.0);
        assert_eq!(weekly[1].close, 9.2);
    }

    #[test]
    fn test_monthly_buckets() {
        let bars = vec![
            bar(2024, 1, 30, 1.0, 2.0, 0.5, 1.5),
            bar(2024, 1, 31, 1.5, 3.0, 1.0, 2.5),
            bar(2024, 2, 1, 2.5, 2.6, 2.0, 2.1),
        ];
        let monthly = resample(&bars, Interval::Month1);
        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly[0].close, 2.5);
        assert_eq!(monthly[1].open, 2.5);
    }

    #[test]
    fn test_daily_is_identity() {
        let bars = vec![bar(2024, 1, 1, 1.0, 1.0, 1.0, 1.0)];
        assert_eq!(resample(&bars, Interval::Day1), bars);
    }
}
