//! Five-field cron expressions.
//!
//! Expressions are parsed and evaluated with `croner`. The trigger registry
//! hands them to `tokio-cron-scheduler`, which expects a leading seconds
//! field; [`CronExpr::scheduler_expression`] adds it and rewrites numeric
//! weekdays as names.
//!
//! When both day-of-month and day-of-week are restricted, a time must match
//! both, the same rule `tokio-cron-scheduler` fires by.

use chrono::{DateTime, FixedOffset, Utc};
use croner::Cron;
use croner::parser::{CronParser, Seconds};

use collecthub_core::error::AppError;
use collecthub_core::result::AppResult;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A validated `minute hour day-of-month month day-of-week` expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    expr: String,
    cron: Cron,
}

impl CronExpr {
    /// Parse and validate a five-field expression.
    pub fn parse(expr: &str) -> AppResult<Self> {
        let expr = expr.split_whitespace().collect::<Vec<_>>().join(" ");
        let fields = expr.split(' ').filter(|f| !f.is_empty()).count();
        if fields != 5 {
            return Err(AppError::validation(format!(
                "cron expression '{expr}' must have 5 fields (minute hour day month weekday), found {fields}"
            )));
        }

        let cron = CronParser::builder()
            .seconds(Seconds::Disallowed)
            .dom_and_dow(true)
            .build()
            .parse(&expr)
            .map_err(|e| AppError::validation(format!("invalid cron expression '{expr}': {e}")))?;
        Ok(Self { expr, cron })
    }

    /// The normalized expression text.
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `reference`, evaluated in `tz`.
    pub fn next_after(&self, reference: DateTime<Utc>, tz: FixedOffset) -> AppResult<DateTime<Utc>> {
        let local = reference.with_timezone(&tz);
        self.cron
            .find_next_occurrence(&local, false)
            .map(|next| next.with_timezone(&Utc))
            .map_err(|e| {
                AppError::validation(format!("no upcoming fire time for '{}': {e}", self.expr))
            })
    }

    /// The next `count` fire times after `reference`.
    pub fn upcoming(
        &self,
        reference: DateTime<Utc>,
        tz: FixedOffset,
        count: usize,
    ) -> AppResult<Vec<DateTime<Utc>>> {
        let mut times = Vec::new();
        let mut cursor = reference;
        for _ in 0..count {
            cursor = self.next_after(cursor, tz)?;
            times.push(cursor);
        }
        Ok(times)
    }

    /// Six-field form understood by `tokio-cron-scheduler`.
    pub fn scheduler_expression(&self) -> String {
        let fields: Vec<&str> = self.expr.split(' ').collect();
        format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            weekday_names(fields[4])
        )
    }
}

/// Next fire time of `expr` strictly after `reference`, evaluated in `tz`.
pub fn next_fire_time(
    expr: &str,
    reference: DateTime<Utc>,
    tz: FixedOffset,
) -> AppResult<DateTime<Utc>> {
    CronExpr::parse(expr)?.next_after(reference, tz)
}

fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = if range == "*" || range == "?" {
                range.to_string()
            } else {
                range
                    .split('-')
                    .map(|token| match token.parse::<usize>() {
                        Ok(day) => WEEKDAYS[day % 7].to_string(),
                        Err(_) => token.to_uppercase(),
                    })
                    .collect::<Vec<_>>()
                    .join("-")
            };
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(CronExpr::parse("0 9 * *").is_err());
        assert!(CronExpr::parse("0 0 9 * * *").is_err());
        assert!(CronExpr::parse("").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(CronExpr::parse("61 9 * * *").is_err());
        assert!(CronExpr::parse("a b c d e").is_err());
    }

    #[test]
    fn test_next_daily_fire() {
        let reference = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let next = next_fire_time("0 9 * * *", reference, utc()).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());

        let after = next_fire_time("0 9 * * *", next, utc()).unwrap();
        assert_eq!(after, Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_honours_offset() {
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        let reference = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let next = next_fire_time("0 9 * * *", reference, shanghai).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_upcoming_weekdays() {
        // 2024-03-01 is a Friday.
        let reference = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        let times = expr.upcoming(reference, utc(), 2).unwrap();
        assert_eq!(
            times,
            vec![
                Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_day_of_month_and_weekday_both_match() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // Friday the 13th.
        let next = next_fire_time("0 9 13 * 5", reference, utc()).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 9, 13, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_scheduler_expression() {
        let cases = [
            ("0 9 * * 1-5", "0 0 9 * * MON-FRI"),
            ("*/15 * * * *", "0 */15 * * * *"),
            ("0 3 * * 0,6", "0 0 3 * * SUN,SAT"),
            ("30 2 1 * 7", "0 30 2 1 * SUN"),
            ("0 0 * * sat", "0 0 0 * * SAT"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                CronExpr::parse(input).unwrap().scheduler_expression(),
                expected
            );
        }
    }

    #[test]
    fn test_whitespace_normalized() {
        let expr = CronExpr::parse("  0   9 * *   * ").unwrap();
        assert_eq!(expr.as_str(), "0 9 * * *");
    }
}
