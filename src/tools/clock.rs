//! Deterministic date and time operations.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::handler::{Arguments, Handler, Operation, OperationRegistry, parameters_for};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeContext {
    pub now_iso: String,
    pub timezone: String,
    pub weekday: String,
    pub date: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ParseRelativeArgs {
    /// Expression such as "tomorrow", "in 3 days" or "next friday".
    expression: String,
}

pub struct ClockHandler {
    registry: OperationRegistry,
}

impl ClockHandler {
    pub const NAME: &'static str = "clock";

    pub fn new() -> Self {
        let mut registry = OperationRegistry::new();
        registry.register(Operation::sync(
            "now",
            "Current UTC date, time and weekday.",
            |_args| Ok(serde_json::to_value(time_context(Utc::now()))?),
        ));
        registry.register(
            Operation::sync(
                "parse_relative",
                "Resolve a relative time expression to an absolute UTC timestamp.",
                parse_relative_operation,
            )
            .with_parameters(parameters_for::<ParseRelativeArgs>()),
        );
        Self { registry }
    }
}

impl Default for ClockHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ClockHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn operations(&self) -> &OperationRegistry {
        &self.registry
    }
}

fn parse_relative_operation(args: Arguments) -> anyhow::Result<Value> {
    let args: ParseRelativeArgs = serde_json::from_value(Value::Object(args))?;
    let resolved = parse_relative(&args.expression, Utc::now())?;
    Ok(json!({
        "expression": args.expression,
        "resolved": resolved.to_rfc3339(),
        "weekday": resolved.weekday().to_string(),
    }))
}

pub fn time_context(now: DateTime<Utc>) -> TimeContext {
    TimeContext {
        now_iso: now.to_rfc3339(),
        timezone: "UTC".to_string(),
        weekday: now.weekday().to_string(),
        date: now.date_naive().to_string(),
    }
}

/// Resolve "now", "today", "tomorrow", "yesterday", "in N <unit>" and
/// "next <weekday>" against `now`.
pub fn parse_relative(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let input = input.trim().to_lowercase();

    match input.as_str() {
        "now" | "today" => return Ok(now),
        "tomorrow" => return shift(now, Duration::days(1)),
        "yesterday" => return shift(now, Duration::days(-1)),
        _ => {}
    }

    if let Some(rest) = input.strip_prefix("in ") {
        return shift(now, parse_duration(rest)?);
    }

    if let Some(weekday) = input.strip_prefix("next ").and_then(parse_weekday) {
        return next_weekday(now, weekday);
    }

    Err(anyhow::anyhow!("could not parse relative time: {input}"))
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Strictly after `from`: asking for today's weekday lands a week out.
fn next_weekday(from: DateTime<Utc>, target: Weekday) -> anyhow::Result<DateTime<Utc>> {
    let ahead = (i64::from(target.num_days_from_monday())
        - i64::from(from.weekday().num_days_from_monday()))
    .rem_euclid(7);
    shift(from, Duration::days(if ahead == 0 { 7 } else { ahead }))
}

fn shift(now: DateTime<Utc>, by: Duration) -> anyhow::Result<DateTime<Utc>> {
    now.checked_add_signed(by)
        .ok_or_else(|| anyhow::anyhow!("relative time is out of range"))
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let (count, unit) = s
        .trim()
        .split_once(' ')
        .ok_or_else(|| anyhow::anyhow!("could not parse duration: {s}"))?;
    let count = count
        .parse::<i64>()
        .map_err(|_| anyhow::anyhow!("could not parse duration: {s}"))?;
    let duration = match unit.trim() {
        "minute" | "minutes" => Duration::try_minutes(count),
        "hour" | "hours" => Duration::try_hours(count),
        "day" | "days" => Duration::try_days(count),
        "week" | "weeks" => Duration::try_weeks(count),
        other => return Err(anyhow::anyhow!("unknown time unit: {other}")),
    };
    duration.ok_or_else(|| anyhow::anyhow!("duration is out of range: {s}"))
}
