//! 5-field cron evaluation (min hour dom month dow), timezone-aware.
//!
//! Specs are parsed once into [`CronSpec`]; evaluation walks minutes.
//! DST handling: local times inside a spring-forward gap are skipped, and
//! fall-back overlaps resolve to the earliest (pre-transition) instant.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};

use hg_domain::{Error, Result};

/// Parse a timezone name, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    /// `*/N`.
    Step(u32),
    /// Comma list of values and inclusive ranges.
    Ranges(Vec<(u32, u32)>),
}

impl Field {
    fn parse(raw: &str) -> Result<Self> {
        if raw == "*" {
            return Ok(Self::Any);
        }
        if let Some(step) = raw.strip_prefix("*/") {
            let n: u32 = step
                .parse()
                .map_err(|_| Error::validation(format!("bad cron step \"{raw}\"")))?;
            if n == 0 {
                return Err(Error::validation("cron step must be greater than 0"));
            }
            return Ok(Self::Step(n));
        }

        let mut ranges = Vec::new();
        for part in raw.split(',') {
            let range = match part.split_once('-') {
                Some((start, end)) => {
                    let start: u32 = start
                        .parse()
                        .map_err(|_| Error::validation(format!("bad cron range \"{part}\"")))?;
                    let end: u32 = end
                        .parse()
                        .map_err(|_| Error::validation(format!("bad cron range \"{part}\"")))?;
                    if start > end {
                        return Err(Error::validation(format!(
                            "cron range \"{part}\" is inverted"
                        )));
                    }
                    (start, end)
                }
                None => {
                    let n: u32 = part
                        .parse()
                        .map_err(|_| Error::validation(format!("bad cron value \"{part}\"")))?;
                    (n, n)
                }
            };
            ranges.push(range);
        }
        Ok(Self::Ranges(ranges))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Step(n) => value % n == 0,
            Self::Ranges(ranges) => ranges.iter().any(|(start, end)| {
                value >= *start && value <= *end
            }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CronSpec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let fields: Vec<&str> = spec.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::validation(format!(
                "\"{spec}\" is not a 5-field cron spec"
            )));
        }
        Ok(Self {
            minute: Field::parse(fields[0])?,
            hour: Field::parse(fields[1])?,
            day_of_month: Field::parse(fields[2])?,
            month: Field::parse(fields[3])?,
            day_of_week: Field::parse(fields[4])?,
        })
    }

    fn matches_local(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self.day_of_week.matches(dt.weekday().num_days_from_sunday())
    }

    /// Whether a UTC instant matches (UTC shorthand).
    pub fn matches_utc(&self, dt: &DateTime<Utc>) -> bool {
        self.matches_local(&dt.naive_utc())
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        // Advance to the next whole minute.
        let mut candidate =
            (local + chrono::Duration::seconds(60 - local.second() as i64)).with_second(0)?;

        // One year of minutes bounds the walk.
        for _ in 0..(366 * 24 * 60) {
            if self.matches_local(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    // Spring-forward gap: this local minute does not exist.
                    chrono::LocalResult::None => {}
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn step_field_matches_multiples() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        assert!(spec.matches_utc(&utc(2026, 6, 15, 10, 0)));
        assert!(spec.matches_utc(&utc(2026, 6, 15, 10, 55)));
        assert!(!spec.matches_utc(&utc(2026, 6, 15, 10, 3)));
    }

    #[test]
    fn fixed_time_matches_exactly() {
        let spec = CronSpec::parse("30 9 * * *").unwrap();
        assert!(spec.matches_utc(&utc(2026, 6, 15, 9, 30)));
        assert!(!spec.matches_utc(&utc(2026, 6, 15, 10, 30)));
    }

    #[test]
    fn range_and_list_fields() {
        let working_hours = CronSpec::parse("0 9-17 * * *").unwrap();
        assert!(working_hours.matches_utc(&utc(2026, 6, 15, 10, 0)));
        assert!(!working_hours.matches_utc(&utc(2026, 6, 15, 20, 0)));

        let quarters = CronSpec::parse("0,15,30,45 * * * *").unwrap();
        assert!(quarters.matches_utc(&utc(2026, 6, 15, 10, 15)));
        assert!(!quarters.matches_utc(&utc(2026, 6, 15, 10, 20)));
    }

    #[test]
    fn weekly_spec_matches_sunday() {
        // Sunday 2026-06-14, 04:00.
        let spec = CronSpec::parse("0 4 * * 0").unwrap();
        assert!(spec.matches_utc(&utc(2026, 6, 14, 4, 0)));
        assert!(!spec.matches_utc(&utc(2026, 6, 15, 4, 0)));
    }

    #[test]
    fn next_after_finds_the_following_occurrence() {
        let spec = CronSpec::parse("30 * * * *").unwrap();
        let next = spec
            .next_after(&utc(2026, 6, 15, 10, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 6, 15, 10, 30));

        // Strictly after: asking from an exact match yields the next one.
        let next = spec.next_after(&next, chrono_tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 11, 30));
    }

    #[test]
    fn next_after_in_timezone() {
        let tz = parse_tz("Asia/Tokyo");
        let spec = CronSpec::parse("0 9 * * *").unwrap();
        let next = spec.next_after(&utc(2026, 6, 15, 1, 0), tz).unwrap();
        // 09:00 JST is 00:00 UTC.
        assert_eq!(next, utc(2026, 6, 16, 0, 0));
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        let tz = parse_tz("US/Eastern");
        // 2026-03-08 02:30 ET does not exist; the next run lands a day later.
        let spec = CronSpec::parse("30 2 * * *").unwrap();
        let next = spec.next_after(&utc(2026, 3, 8, 6, 0), tz).unwrap();
        assert_eq!(next, utc(2026, 3, 9, 6, 30));
    }

    #[test]
    fn fall_back_overlap_takes_earliest() {
        let tz = parse_tz("US/Eastern");
        // 2026-11-01 01:30 ET happens twice; pick the EDT (earlier) one.
        let spec = CronSpec::parse("30 1 * * *").unwrap();
        let next = spec.next_after(&utc(2026, 11, 1, 4, 0), tz).unwrap();
        assert_eq!(next, utc(2026, 11, 1, 5, 30));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_tz("Not/Real"), chrono_tz::UTC);
        assert_eq!(parse_tz("Europe/London"), chrono_tz::Europe::London);
    }

    #[test]
    fn malformed_specs_are_rejected() {
        assert!(CronSpec::parse("* * * *").is_err());
        assert!(CronSpec::parse("*/0 * * * *").is_err());
        assert!(CronSpec::parse("banana * * * *").is_err());
        assert!(CronSpec::parse("30-10 * * * *").is_err());
    }
}
