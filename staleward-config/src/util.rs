use std::str::FromStr;
use std::time::Duration;

pub fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| {
        raw.split(',')
            .filter_map(|part| {
                let trimmed = part.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    })
}

/// Reads and parses `name`, treating unset and unparsable values alike.
pub fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}

/// Parse a threshold duration.
///
/// Accepts humantime forms (`"29h"`, `"7days"`, `"1d 12h"`) and bare
/// integers, which are taken as seconds.
pub fn parse_duration(
    raw: &str,
) -> Result<Duration, humantime::DurationError> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_humantime_and_seconds() {
        assert_eq!(parse_duration("29h").unwrap(), Duration::from_secs(104_400));
        assert_eq!(
            parse_duration(" 7days ").unwrap(),
            Duration::from_secs(604_800)
        );
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }
}
