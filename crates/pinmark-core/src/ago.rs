use time::OffsetDateTime;

const SECOND: i64 = 1000;
const MINUTE: i64 = SECOND * 60;
const HOUR: i64 = MINUTE * 60;
const DAY: i64 = HOUR * 24;
const MONTH: i64 = DAY * 30;
const YEAR: i64 = DAY * 365;

const UNITS: [(i64, &str); 6] = [
    (SECOND, "second"),
    (MINUTE, "minute"),
    (HOUR, "hour"),
    (DAY, "day"),
    (MONTH, "month"),
    (YEAR, "year"),
];

/// Human readable age of `time`, e.g. "3 hours ago".
pub fn ago(time: Option<OffsetDateTime>, now: OffsetDateTime) -> String {
    let Some(time) = time else {
        return "some time ago".into();
    };
    let elapsed = (now - time).whole_milliseconds();
    if elapsed < 0 {
        return "some time ago".into();
    }
    let elapsed = elapsed as i64;
    if elapsed < SECOND {
        return "just now".into();
    }
    for (i, (ms, unit)) in UNITS.iter().enumerate() {
        let next = UNITS.get(i + 1).map(|(n, _)| *n);
        if next.map_or(true, |n| elapsed < n) {
            let n = (elapsed as f64 / *ms as f64).round() as i64;
            let plural = if n == 1 { "" } else { "s" };
            return format!("{n} {unit}{plural} ago");
        }
    }
    "some time ago".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn before(d: Duration) -> String {
        let now = OffsetDateTime::now_utc();
        ago(Some(now - d), now)
    }

    #[test]
    fn picks_largest_fitting_unit() {
        assert_eq!(before(Duration::milliseconds(200)), "just now");
        assert_eq!(before(Duration::seconds(1)), "1 second ago");
        assert_eq!(before(Duration::seconds(90)), "2 minutes ago");
        assert_eq!(before(Duration::hours(3)), "3 hours ago");
        assert_eq!(before(Duration::days(45)), "2 months ago");
        assert_eq!(before(Duration::days(800)), "2 years ago");
    }

    #[test]
    fn unknown_or_future_is_vague() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(ago(None, now), "some time ago");
        assert_eq!(ago(Some(now + Duration::minutes(5)), now), "some time ago");
    }
}
