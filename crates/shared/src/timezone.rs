use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

pub fn normalize_time_zone(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    trimmed.parse::<Tz>().ok().map(|tz| tz.name().to_string())
}

pub fn parse_time_zone_or_default(value: &str) -> Tz {
    normalize_time_zone(value)
        .and_then(|normalized| normalized.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// First local midnight strictly after `now_utc` in `time_zone`, expressed in UTC.
pub fn next_local_midnight_utc(now_utc: DateTime<Utc>, time_zone: &str) -> DateTime<Utc> {
    let tz = parse_time_zone_or_default(time_zone);
    let local_date = now_utc.with_timezone(&tz).date_naive();

    let mut candidate = local_date;
    for _ in 0..3 {
        let Some(next_day) = candidate.checked_add_days(Days::new(1)) else {
            break;
        };
        if let Some(midnight) = local_midnight(&tz, next_day) {
            return midnight.with_timezone(&Utc);
        }
        candidate = next_day;
    }

    now_utc + chrono::Duration::days(1)
}

fn local_midnight(tz: &Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    let start_of_day = date.and_hms_opt(0, 0, 0)?;
    resolve_local_datetime(tz, start_of_day)
}

fn resolve_local_datetime(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(value) => Some(value),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};

    use super::{next_local_midnight_utc, normalize_time_zone};

    #[test]
    fn normalize_time_zone_accepts_valid_iana_name() {
        assert_eq!(
            normalize_time_zone("America/Los_Angeles"),
            Some("America/Los_Angeles".to_string())
        );
    }

    #[test]
    fn normalize_time_zone_rejects_invalid_values() {
        assert_eq!(normalize_time_zone(""), None);
        assert_eq!(normalize_time_zone("Mars/Olympus"), None);
    }

    #[test]
    fn next_midnight_is_anchored_to_pacific_time() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 9, 30, 0)
            .single()
            .expect("valid utc datetime");
        let reset = next_local_midnight_utc(now, "America/Los_Angeles");

        // 2026-02-17 01:30 PST -> next reset at 2026-02-18 00:00 PST (08:00 UTC).
        assert_eq!(reset.date_naive().to_string(), "2026-02-18");
        assert_eq!(reset.hour(), 8);
        assert!(reset > now);
    }

    #[test]
    fn next_midnight_rolls_over_when_already_past_local_midnight() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 8, 0, 0)
            .single()
            .expect("valid utc datetime");
        let reset = next_local_midnight_utc(now, "America/Los_Angeles");

        assert_eq!(reset.date_naive().to_string(), "2026-02-18");
        assert_eq!(reset.hour(), 8);
    }

    #[test]
    fn invalid_time_zone_falls_back_to_utc() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 23, 59, 0)
            .single()
            .expect("valid utc datetime");
        let reset = next_local_midnight_utc(now, "not-a-time-zone");
        assert_eq!(reset.date_naive().to_string(), "2026-02-18");
        assert_eq!(reset.hour(), 0);
    }
}
