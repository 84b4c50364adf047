use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

use crate::config::Config;

const TIMEZONE_ENV_VAR: &str =
  "TASKBOARD_TIMEZONE";

/// Calendar arithmetic in one timezone
/// with a configurable first day of the
/// week. Every "day", "week" and "month"
/// the board talks about is evaluated
/// here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calendar {
  tz:         Tz,
  week_start: Weekday
}

impl Default for Calendar {
  fn default() -> Self {
    Self::utc()
  }
}

impl Calendar {
  #[must_use]
  pub fn new(
    tz: Tz,
    week_start: Weekday
  ) -> Self {
    Self {
      tz,
      week_start
    }
  }

  #[must_use]
  pub fn utc() -> Self {
    Self::new(
      chrono_tz::UTC,
      Weekday::Sun
    )
  }

  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let tz = resolve_timezone(cfg);

    let week_start = match cfg
      .get("week.start")
    {
      | Some(raw) => {
        parse_weekday_name(
          &raw.to_ascii_lowercase()
        )
        .ok_or_else(|| {
          anyhow!(
            "invalid week.start value: \
             {raw}"
          )
        })?
      }
      | None => Weekday::Sun
    };

    tracing::debug!(
      timezone = %tz,
      week_start = ?week_start,
      "resolved calendar"
    );
    Ok(Self::new(tz, week_start))
  }

  #[must_use]
  pub fn timezone(&self) -> Tz {
    self.tz
  }

  #[must_use]
  pub fn local_date(
    &self,
    dt: DateTime<Utc>
  ) -> NaiveDate {
    dt.with_timezone(&self.tz)
      .date_naive()
  }

  /// First instant of `date` in this
  /// calendar's timezone.
  #[must_use]
  pub fn start_of_date(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    // Midnight can be skipped by a DST
    // jump; take the first hour that
    // exists.
    for hour in 0..4 {
      let Some(naive) =
        date.and_hms_opt(hour, 0, 0)
      else {
        continue;
      };
      match self
        .tz
        .from_local_datetime(&naive)
      {
        | LocalResult::Single(dt) => {
          return dt.with_timezone(&Utc);
        }
        | LocalResult::Ambiguous(
          first,
          second
        ) => {
          let chosen = if first <= second
          {
            first
          } else {
            second
          };
          return chosen
            .with_timezone(&Utc);
        }
        | LocalResult::None => {}
      }
    }

    tracing::warn!(
      date = %date,
      timezone = %self.tz,
      "no valid local midnight; \
       falling back to UTC midnight"
    );
    DateTime::<Utc>::from_naive_utc_and_offset(
      date.and_time(
        chrono::NaiveTime::MIN
      ),
      Utc
    )
  }

  #[must_use]
  pub fn start_of_day(
    &self,
    dt: DateTime<Utc>
  ) -> DateTime<Utc> {
    self.start_of_date(
      self.local_date(dt)
    )
  }

  /// Last millisecond of the local day
  /// containing `dt`.
  #[must_use]
  pub fn end_of_day(
    &self,
    dt: DateTime<Utc>
  ) -> DateTime<Utc> {
    self.last_instant_before(
      shift_date(self.local_date(dt), 1)
    )
  }

  /// Start of the local day `days` days
  /// after the day containing `dt`.
  #[must_use]
  pub fn start_of_day_after(
    &self,
    dt: DateTime<Utc>,
    days: i64
  ) -> DateTime<Utc> {
    self.start_of_date(shift_date(
      self.local_date(dt),
      days
    ))
  }

  #[must_use]
  pub fn week_start_date(
    &self,
    dt: DateTime<Utc>
  ) -> NaiveDate {
    let date = self.local_date(dt);
    let from_idx = date
      .weekday()
      .num_days_from_monday()
      as i64;
    let start_idx = self
      .week_start
      .num_days_from_monday()
      as i64;
    let back =
      (7 + from_idx - start_idx) % 7;
    shift_date(date, -back)
  }

  #[must_use]
  pub fn start_of_week(
    &self,
    dt: DateTime<Utc>
  ) -> DateTime<Utc> {
    self.start_of_date(
      self.week_start_date(dt)
    )
  }

  #[must_use]
  pub fn end_of_week(
    &self,
    dt: DateTime<Utc>
  ) -> DateTime<Utc> {
    self.last_instant_before(shift_date(
      self.week_start_date(dt),
      7
    ))
  }

  /// End of the week after the one
  /// containing `dt`.
  #[must_use]
  pub fn end_of_next_week(
    &self,
    dt: DateTime<Utc>
  ) -> DateTime<Utc> {
    self.last_instant_before(shift_date(
      self.week_start_date(dt),
      14
    ))
  }

  #[must_use]
  pub fn end_of_month(
    &self,
    dt: DateTime<Utc>
  ) -> DateTime<Utc> {
    let date = self.local_date(dt);
    let (year, month) =
      if date.month() == 12 {
        (date.year() + 1, 1)
      } else {
        (date.year(), date.month() + 1)
      };
    let first_of_next =
      NaiveDate::from_ymd_opt(
        year, month, 1
      )
      .unwrap_or(NaiveDate::MAX);
    self.last_instant_before(
      first_of_next
    )
  }

  #[must_use]
  pub fn is_same_day(
    &self,
    a: DateTime<Utc>,
    b: DateTime<Utc>
  ) -> bool {
    self.local_date(a)
      == self.local_date(b)
  }

  #[must_use]
  pub fn is_same_week(
    &self,
    a: DateTime<Utc>,
    b: DateTime<Utc>
  ) -> bool {
    self.week_start_date(a)
      == self.week_start_date(b)
  }

  #[must_use]
  pub fn is_same_month(
    &self,
    a: DateTime<Utc>,
    b: DateTime<Utc>
  ) -> bool {
    let a = self.local_date(a);
    let b = self.local_date(b);
    a.year() == b.year()
      && a.month() == b.month()
  }

  /// Long display form, e.g.
  /// `10 June 2024`.
  #[must_use]
  pub fn format_date(
    &self,
    dt: DateTime<Utc>
  ) -> String {
    dt.with_timezone(&self.tz)
      .format("%d %B %Y")
      .to_string()
  }

  #[must_use]
  pub fn format_short(
    &self,
    dt: DateTime<Utc>
  ) -> String {
    dt.with_timezone(&self.tz)
      .format("%Y-%m-%d")
      .to_string()
  }

  fn last_instant_before(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    self.start_of_date(date)
      - Duration::milliseconds(1)
  }

  fn local_to_utc(
    &self,
    local_naive: NaiveDateTime,
    context: &str
  ) -> anyhow::Result<DateTime<Utc>> {
    match self
      .tz
      .from_local_datetime(&local_naive)
    {
      | LocalResult::Single(local_dt) => {
        Ok(local_dt.with_timezone(&Utc))
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        tracing::warn!(
          context,
          first = %first,
          second = %second,
          "ambiguous local datetime; using earliest"
        );
        let chosen = if first <= second {
          first
        } else {
          second
        };
        Ok(chosen.with_timezone(&Utc))
      }
      | LocalResult::None => {
        Err(anyhow!(
          "local datetime does not \
           exist in configured \
           timezone: {context}"
        ))
      }
    }
  }
}

fn shift_date(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

fn resolve_timezone(cfg: &Config) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = cfg.get("timezone")
    && let Some(tz) =
      parse_timezone(&raw, "config")
  {
    return tz;
  }

  chrono_tz::UTC
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses a user-supplied due date.
#[tracing::instrument(skip(now, cal), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  cal: &Calendar
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return Ok(cal.start_of_day(now));
    }
    | "tomorrow" => {
      return Ok(
        cal.start_of_day_after(now, 1)
      );
    }
    | "yesterday" => {
      return Ok(
        cal.start_of_day_after(now, -1)
      );
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      cal.local_date(now),
      target_weekday
    );
    return Ok(
      cal.start_of_date(target_date)
    );
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let local_now =
      now.with_timezone(&cal.tz);
    let mut day =
      local_now.date_naive();
    let candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if candidate
      <= local_now.naive_local()
    {
      day = shift_date(day, 1);
    }
    let next_candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct next \
           clock time candidate"
        )
      })?;
    return cal.local_to_utc(
      next_candidate,
      "clock-time"
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let num =
      if sign == "-" { -num } else { num };
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    return match unit {
      | "d" => {
        Ok(cal.start_of_day_after(now, num))
      }
      | "w" => {
        Ok(cal.start_of_day_after(
          now,
          num * 7
        ))
      }
      | "h" => {
        Ok(now + Duration::hours(num))
      }
      | "m" => {
        Ok(now + Duration::minutes(num))
      }
      | _ => {
        Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(cal.start_of_date(date));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return cal.local_to_utc(ndt, fmt);
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. friday), \
     clock times (e.g. 3:23pm or \
     15:23), +Nd/+Nw/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

pub fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  shift_date(from, delta)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => {
        if raw_hour == 12 {
          0
        } else {
          raw_hour
        }
      }
      | "pm" => {
        if raw_hour == 12 {
          12
        } else {
          raw_hour + 12
        }
      }
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}
