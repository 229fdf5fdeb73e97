use itertools::Itertools;

/// Most frequent value among the reported durations, ignoring missing ones.
///
/// Client-reported durations are skewed by late joiners and early leavers, so
/// the most common value is the best estimate of the real match length. Ties
/// resolve to the larger duration.
pub fn statistical_mode<I>(values: I) -> Option<i64>
where
    I: IntoIterator<Item = Option<i64>>,
{
    values
        .into_iter()
        .flatten()
        .counts()
        .into_iter()
        .max_by(|(value_a, count_a), (value_b, count_b)| {
            count_a.cmp(count_b).then(value_a.cmp(value_b))
        })
        .map(|(value, _)| value)
}

/// Parse an ISO-8601 duration such as `PT12M3.5S` or `P1DT2H` into seconds.
///
/// Only the day/time designators used by the stats APIs are accepted; calendar
/// units (years, months, weeks) return `None`.
pub fn parse_iso8601_seconds(raw: &str) -> Option<f64> {
    let rest = raw.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let mut total = 0.0_f64;
    let mut in_time = false;
    let mut number = String::new();
    let mut saw_component = false;

    for ch in rest.chars() {
        match ch {
            'T' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' => number.push(ch),
            designator => {
                let value: f64 = number.parse().ok()?;
                number.clear();
                let factor = match (in_time, designator) {
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return None,
                };
                total += value * factor;
                saw_component = true;
            }
        }
    }

    if !number.is_empty() || !saw_component {
        return None;
    }
    Some(total)
}

/// Whole seconds for storage columns; fractional parts are truncated.
pub fn iso8601_whole_seconds(raw: &str) -> Option<i64> {
    parse_iso8601_seconds(raw).map(|secs| secs.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_prefers_most_common_duration() {
        let durations = [Some(640), Some(640), Some(640), Some(612), Some(58)];
        assert_eq!(statistical_mode(durations), Some(640));
    }

    #[test]
    fn mode_ignores_missing_values() {
        let durations = [None, Some(300), None, Some(300), Some(12)];
        assert_eq!(statistical_mode(durations), Some(300));
        assert_eq!(statistical_mode([None, None]), None);
        assert_eq!(statistical_mode(Vec::<Option<i64>>::new()), None);
    }

    #[test]
    fn mode_ties_resolve_to_larger_value() {
        assert_eq!(statistical_mode([Some(10), Some(20)]), Some(20));
    }

    #[test]
    fn parses_time_designators() {
        assert_eq!(parse_iso8601_seconds("PT12M3.5S"), Some(723.5));
        assert_eq!(parse_iso8601_seconds("PT1H"), Some(3600.0));
        assert_eq!(parse_iso8601_seconds("P1DT2H"), Some(93_600.0));
        assert_eq!(iso8601_whole_seconds("PT9M59.9S"), Some(599));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse_iso8601_seconds(""), None);
        assert_eq!(parse_iso8601_seconds("PT"), None);
        assert_eq!(parse_iso8601_seconds("P1Y"), None);
        assert_eq!(parse_iso8601_seconds("PT5"), None);
        assert_eq!(parse_iso8601_seconds("12:00"), None);
    }
}
