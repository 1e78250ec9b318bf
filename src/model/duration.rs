//! ISO-8601 durations (`PnDTnHnMnS`) as stored in the `persistence` column.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// Format a duration using day and time designators only.
pub fn format_iso8601(duration: Duration) -> String {
  let negative = duration < Duration::zero();
  let duration = if negative { -duration } else { duration };

  let total_secs = duration.num_seconds();
  let nanos = (duration - Duration::seconds(total_secs))
    .num_nanoseconds()
    .unwrap_or(0);

  let days = total_secs / SECS_PER_DAY;
  let hours = (total_secs % SECS_PER_DAY) / SECS_PER_HOUR;
  let minutes = (total_secs % SECS_PER_HOUR) / SECS_PER_MINUTE;
  let seconds = total_secs % SECS_PER_MINUTE;

  let mut out = String::new();
  if negative {
    out.push('-');
  }
  out.push('P');
  if days > 0 {
    out.push_str(&format!("{}D", days));
  }

  let mut time = String::new();
  if hours > 0 {
    time.push_str(&format!("{}H", hours));
  }
  if minutes > 0 {
    time.push_str(&format!("{}M", minutes));
  }
  if nanos > 0 {
    let fraction = format!("{:09}", nanos);
    time.push_str(&format!("{}.{}S", seconds, fraction.trim_end_matches('0')));
  } else if seconds > 0 || (days == 0 && time.is_empty()) {
    time.push_str(&format!("{}S", seconds));
  }

  if !time.is_empty() {
    out.push('T');
    out.push_str(&time);
  }
  out
}

/// Parse a duration with week, day, hour, minute and second designators.
///
/// Year and month designators have no fixed length and are rejected.
pub fn parse_iso8601(input: &str) -> Result<Duration> {
  let s = input.trim();
  let (negative, s) = match s.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, s),
  };
  let body = s
    .strip_prefix('P')
    .ok_or_else(|| eyre!("Duration '{}' does not start with 'P'", input))?;
  if body.is_empty() {
    return Err(eyre!("Duration '{}' has no components", input));
  }

  let mut total = Duration::zero();
  let mut in_time = false;
  let mut number = String::new();
  let mut seen_component = false;

  for c in body.chars() {
    match c {
      'T' if !in_time => {
        if !number.is_empty() {
          return Err(eyre!("Dangling number in duration '{}'", input));
        }
        in_time = true;
      }
      '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
      designator => {
        if number.is_empty() {
          return Err(eyre!("Missing value before '{}' in duration '{}'", designator, input));
        }
        let unit = match (in_time, designator) {
          (false, 'W') => 7 * SECS_PER_DAY,
          (false, 'D') => SECS_PER_DAY,
          (true, 'H') => SECS_PER_HOUR,
          (true, 'M') => SECS_PER_MINUTE,
          (true, 'S') => {
            total = add(total, fractional_seconds(&number, input)?, input)?;
            number.clear();
            seen_component = true;
            continue;
          }
          (false, 'Y') | (false, 'M') => {
            return Err(eyre!("Calendar designators are not supported in '{}'", input))
          }
          _ => return Err(eyre!("Unexpected '{}' in duration '{}'", designator, input)),
        };
        let secs = whole(&number, input)?
          .checked_mul(unit)
          .ok_or_else(|| out_of_range(input))?;
        total = add(total, seconds(secs, input)?, input)?;
        number.clear();
        seen_component = true;
      }
    }
  }

  if !number.is_empty() || !seen_component {
    return Err(eyre!("Incomplete duration '{}'", input));
  }

  Ok(if negative { -total } else { total })
}

fn whole(number: &str, input: &str) -> Result<i64> {
  number
    .parse::<i64>()
    .map_err(|e| eyre!("Invalid number '{}' in duration '{}': {}", number, input, e))
}

fn fractional_seconds(number: &str, input: &str) -> Result<Duration> {
  let (secs, frac) = match number.split_once('.') {
    Some((secs, frac)) => (secs, frac),
    None => (number, ""),
  };
  let secs = whole(if secs.is_empty() { "0" } else { secs }, input)?;
  if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
    return Err(eyre!("Invalid fraction '{}' in duration '{}'", frac, input));
  }
  let nanos = if frac.is_empty() {
    0
  } else {
    format!("{:0<9}", frac)
      .parse::<i64>()
      .map_err(|e| eyre!("Invalid fraction '{}' in duration '{}': {}", frac, input, e))?
  };
  add(seconds(secs, input)?, Duration::nanoseconds(nanos), input)
}

fn seconds(secs: i64, input: &str) -> Result<Duration> {
  Duration::try_seconds(secs).ok_or_else(|| out_of_range(input))
}

fn add(total: Duration, component: Duration, input: &str) -> Result<Duration> {
  total
    .checked_add(&component)
    .ok_or_else(|| out_of_range(input))
}

fn out_of_range(input: &str) -> color_eyre::Report {
  eyre!("Duration '{}' is out of range", input)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_common_windows() {
    assert_eq!(format_iso8601(Duration::days(1)), "P1D");
    assert_eq!(format_iso8601(Duration::minutes(90)), "PT1H30M");
    assert_eq!(format_iso8601(Duration::zero()), "PT0S");
    assert_eq!(format_iso8601(Duration::milliseconds(1500)), "PT1.5S");
  }

  #[test]
  fn test_parse_designators() {
    assert_eq!(parse_iso8601("P2W").unwrap(), Duration::days(14));
    assert_eq!(
      parse_iso8601("P1DT12H").unwrap(),
      Duration::days(1) + Duration::hours(12)
    );
    assert_eq!(parse_iso8601("PT0.25S").unwrap(), Duration::milliseconds(250));
    assert_eq!(parse_iso8601("-PT5M").unwrap(), -Duration::minutes(5));
  }

  #[test]
  fn test_parse_rejects_invalid() {
    assert!(parse_iso8601("").is_err());
    assert!(parse_iso8601("P").is_err());
    assert!(parse_iso8601("1D").is_err());
    assert!(parse_iso8601("P1Y").is_err());
    assert!(parse_iso8601("PT5").is_err());
    assert!(parse_iso8601("P5H").is_err());
  }

  #[test]
  fn test_parse_rejects_out_of_range() {
    assert!(parse_iso8601("P999999999999999999D").is_err());
    assert!(parse_iso8601("PT9223372036854775807S").is_err());
    assert!(parse_iso8601("P99999999999999W").is_err());
    assert!(parse_iso8601("P100000000DT100000000000000H").is_err());
  }

  #[test]
  fn test_format_then_parse_is_stable() {
    let d = Duration::days(3) + Duration::minutes(7) + Duration::milliseconds(20);
    assert_eq!(parse_iso8601(&format_iso8601(d)).unwrap(), d);
  }
}
