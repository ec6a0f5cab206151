use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::Rng;

use lesprivate_common::AppError;

/// Indonesian zone labels used by the apps, plus UTC and literal offsets like `+07:00`.
pub fn parse_timezone(label: &str) -> Result<FixedOffset, AppError> {
    let hours = match label.trim() {
        "Asia/Jakarta" | "Asia/Pontianak" | "WIB" => Some(7),
        "Asia/Makassar" | "WITA" => Some(8),
        "Asia/Jayapura" | "WIT" => Some(9),
        "UTC" | "Etc/UTC" | "Z" => Some(0),
        _ => None,
    };
    if let Some(hours) = hours {
        return FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| AppError::Internal("offset out of range".to_string()));
    }

    parse_offset(label.trim())
        .ok_or_else(|| AppError::Validation(format!("timezone: unsupported timezone '{}'", label)))
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let (h, m): (i32, i32) = (h.parse().ok()?, m.parse().ok()?);
    if h > 14 || m > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

/// 0 = Sunday, matching `course_schedules.weekday`.
pub fn weekday_index(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}

/// Instant at which a lesson booked for local `date` `time` in `offset` begins.
pub fn lesson_start(
    date: NaiveDate,
    time: NaiveTime,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, AppError> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| AppError::Validation("bookingTime: not a valid local time".to_string()))
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Short human-readable booking reference, e.g. `BK-7Q2XK9`.
pub fn booking_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("BK-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_zones_map_to_fixed_offsets() {
        assert_eq!(parse_timezone("Asia/Jakarta").unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(parse_timezone("Asia/Makassar").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_timezone("Asia/Jayapura").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(parse_timezone("UTC").unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn literal_offsets_parse() {
        assert_eq!(parse_timezone("+05:30").unwrap().local_minus_utc(), 5 * 3600 + 1800);
        assert_eq!(parse_timezone("-03:00").unwrap().local_minus_utc(), -3 * 3600);
        assert!(parse_timezone("+5:30").is_err());
        assert!(parse_timezone("Europe/Nowhere").is_err());
    }

    #[test]
    fn weekday_zero_is_sunday() {
        // 2030-04-07 is a Sunday.
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2030, 4, 7).unwrap()), 0);
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2030, 4, 5).unwrap()), 5);
    }

    #[test]
    fn jakarta_morning_is_utc_early_morning() {
        let start = lesson_start(
            NaiveDate::from_ymd_opt(2030, 4, 5).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            parse_timezone("Asia/Jakarta").unwrap(),
        )
        .unwrap();
        assert_eq!(start.to_rfc3339(), "2030-04-05T03:00:00+00:00");
    }

    #[test]
    fn codes_have_the_expected_shape() {
        let code = booking_code();
        assert_eq!(code.len(), 9);
        assert!(code.starts_with("BK-"));
        assert!(code[3..].bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }
}
