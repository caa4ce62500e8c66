//! Transform functions and their typed parameters

use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::transform::{EvalContext, TransformValue};

/// One configured transform step.
///
/// Unknown function names are kept (with their arguments) instead of being
/// rejected, so the chain can stop at them during evaluation. A step with no
/// function name is unknown too, with an empty `function`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub enum TransformStep {
    Apply(TransformKind),
    Unknown { function: String, args: Map<String, Value> },
}

/// Every supported transform function
#[derive(Debug, Clone, PartialEq)]
pub enum TransformKind {
    Clip(ClipParams),
    Invert,
    Offset(OffsetParams),
    Absolute,
    ScaleNumber(ScaleParams),
    UnixTimeDelta(UnixTimeDeltaParams),
    StringDatetimeDelta(StringDatetimeDeltaParams),
    RandomValue(RandomParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipParams {
    pub min: f64,
    pub max: f64,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self { min: 0.0, max: 100.0 }
    }
}

impl ClipParams {
    /// Truncate toward zero, then clamp into `[min, max]`
    pub fn clip(&self, value: f64) -> f64 {
        let truncated = value.trunc();
        if truncated.is_nan() || truncated <= self.min {
            self.min
        } else if truncated >= self.max {
            self.max
        } else {
            truncated
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetParams {
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleParams {
    pub min: f64,
    pub max: f64,
}

impl Default for ScaleParams {
    fn default() -> Self {
        Self { min: 0.0, max: 100.0 }
    }
}

impl ScaleParams {
    /// Rescale `value` from `[min, max]` to `[0, 100]`, clamping first
    pub fn scale(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            return if value >= self.max { 100.0 } else { 0.0 };
        }
        let (lo, hi) = if self.min < self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        let clamped = if value.is_nan() { lo } else { value.clamp(lo, hi) };
        (clamped - self.min) / span * 100.0
    }
}

/// Which side of the delta is subtracted from which
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Calculate {
    /// `compare_to - value`
    #[default]
    Until,
    /// `value - compare_to`
    Since,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
}

impl TimeUnit {
    pub fn divisor(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86400.0,
        }
    }

    /// Convert seconds to this unit, rounded to one decimal
    pub fn from_seconds(&self, seconds: f64) -> f64 {
        (seconds / self.divisor() * 10.0).round() / 10.0
    }
}

/// Reference point of `unix_time_delta`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum CompareTo {
    #[default]
    Now,
    Timestamp(f64),
}

impl Serialize for CompareTo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            CompareTo::Now => serializer.serialize_str("now"),
            CompareTo::Timestamp(ts) => serializer.serialize_f64(*ts),
        }
    }
}

impl<'de> Deserialize<'de> for CompareTo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_f64()
                .map(CompareTo::Timestamp)
                .ok_or_else(|| serde::de::Error::custom("compare_to is not a finite number")),
            Value::String(s) if s.eq_ignore_ascii_case("now") => Ok(CompareTo::Now),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(CompareTo::Timestamp)
                .map_err(|_| serde::de::Error::custom(format!("invalid compare_to `{}`", s))),
            other => Err(serde::de::Error::custom(format!(
                "compare_to must be a timestamp or \"now\", got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnixTimeDeltaParams {
    pub compare_to: CompareTo,
    pub calculate: Calculate,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringDatetimeDeltaParams {
    pub date_format: String,
    pub compare_to: String,
    pub calculate: Calculate,
    pub unit: TimeUnit,
}

impl Default for StringDatetimeDeltaParams {
    fn default() -> Self {
        Self {
            date_format: "%d.%m.%y".to_string(),
            compare_to: "now".to_string(),
            calculate: Calculate::Until,
            unit: TimeUnit::Hours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomParams {
    pub min: i64,
    pub max: i64,
}

impl Default for RandomParams {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

impl TransformKind {
    /// Name used in link files
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Clip(_) => "clip",
            TransformKind::Invert => "invert",
            TransformKind::Offset(_) => "offset",
            TransformKind::Absolute => "absolute",
            TransformKind::ScaleNumber(_) => "scale_number",
            TransformKind::UnixTimeDelta(_) => "unix_time_delta",
            TransformKind::StringDatetimeDelta(_) => "string_datetime_delta",
            TransformKind::RandomValue(_) => "random_value",
        }
    }

    /// Apply this function to `value`
    pub fn apply(&self, value: &TransformValue, ctx: &EvalContext) -> TransformValue {
        let result = match self {
            TransformKind::Clip(params) => params.clip(value.as_number()),
            TransformKind::Invert => 100.0 - value.as_number(),
            TransformKind::Offset(params) => value.as_number() + params.amount,
            TransformKind::Absolute => value.as_number().abs(),
            TransformKind::ScaleNumber(params) => params.scale(value.as_number()),
            TransformKind::UnixTimeDelta(params) => unix_time_delta(params, value.as_number(), ctx),
            TransformKind::StringDatetimeDelta(params) => string_datetime_delta(params, value, ctx),
            TransformKind::RandomValue(params) => {
                let (lo, hi) = if params.min <= params.max {
                    (params.min, params.max)
                } else {
                    (params.max, params.min)
                };
                rand::thread_rng().gen_range(lo..=hi) as f64
            }
        };
        debug!("Transform `{}`: {} -> {}", self.name(), value, result);
        TransformValue::Number(result)
    }

    fn from_function(function: &str, args: &Map<String, Value>) -> Result<Option<Self>, String> {
        let kind = match function {
            "clip" | "value_clip" => TransformKind::Clip(parse_args(function, args)?),
            "invert" => TransformKind::Invert,
            "offset" => TransformKind::Offset(parse_args(function, args)?),
            "absolute" => TransformKind::Absolute,
            "scale_number" => TransformKind::ScaleNumber(parse_args(function, args)?),
            "unix_time_delta" => TransformKind::UnixTimeDelta(parse_args(function, args)?),
            "string_datetime_delta" | "str_datetime_delta" => {
                let params: StringDatetimeDeltaParams = parse_args(function, args)?;
                if !is_valid_format(&params.date_format) {
                    return Err(format!(
                        "{}: invalid date_format `{}`",
                        function, params.date_format
                    ));
                }
                TransformKind::StringDatetimeDelta(params)
            }
            "random_value" => TransformKind::RandomValue(parse_args(function, args)?),
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }

    fn args(&self) -> Map<String, Value> {
        let value = match self {
            TransformKind::Clip(params) => serde_json::to_value(params),
            TransformKind::Offset(params) => serde_json::to_value(params),
            TransformKind::ScaleNumber(params) => serde_json::to_value(params),
            TransformKind::UnixTimeDelta(params) => serde_json::to_value(params),
            TransformKind::StringDatetimeDelta(params) => serde_json::to_value(params),
            TransformKind::RandomValue(params) => serde_json::to_value(params),
            TransformKind::Invert | TransformKind::Absolute => return Map::new(),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn parse_args<T: DeserializeOwned>(function: &str, args: &Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| format!("{}: invalid parameters: {}", function, e))
}

fn is_valid_format(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

fn unix_time_delta(params: &UnixTimeDeltaParams, value: f64, ctx: &EvalContext) -> f64 {
    let compare_to = match params.compare_to {
        CompareTo::Now => ctx.unix_now(),
        CompareTo::Timestamp(ts) => ts,
    };
    let delta = match params.calculate {
        Calculate::Until => compare_to - value,
        Calculate::Since => value - compare_to,
    };
    params.unit.from_seconds(delta)
}

fn string_datetime_delta(
    params: &StringDatetimeDeltaParams,
    value: &TransformValue,
    ctx: &EvalContext,
) -> f64 {
    let format = params.date_format.as_str();
    let text = value.to_string();

    let Some(date) = parse_datetime(&text, format) else {
        error!("string_datetime_delta: cannot parse `{}` with format `{}`", text, format);
        return 0.0;
    };

    let compare_to = if params.compare_to.eq_ignore_ascii_case("now") {
        // Round-trip through the format so both sides share its precision
        let mut rendered = String::new();
        if write!(rendered, "{}", ctx.local_now().format(format)).is_err() {
            error!("string_datetime_delta: cannot render now with format `{}`", format);
            return 0.0;
        }
        parse_datetime(&rendered, format)
    } else {
        parse_datetime(&params.compare_to, format)
    };

    let Some(compare_to) = compare_to else {
        error!(
            "string_datetime_delta: cannot parse compare_to `{}` with format `{}`",
            params.compare_to, format
        );
        return 0.0;
    };

    let delta = match params.calculate {
        Calculate::Until => compare_to - date,
        Calculate::Since => date - compare_to,
    };
    let seconds = (delta.num_milliseconds() as f64 / 100.0).round() / 10.0;
    debug!(
        "string_datetime_delta: `{:?}` between {} and {} is {} seconds",
        params.calculate, compare_to, date, seconds
    );
    params.unit.from_seconds(seconds)
}

/// Parse with a strftime format, accepting date-only formats as midnight
fn parse_datetime(text: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Link file representation of a step: `{ function = "...", <params> }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(flatten)]
    args: Map<String, Value>,
}

impl TryFrom<RawStep> for TransformStep {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let Some(function) = raw.function else {
            return Ok(TransformStep::Unknown {
                function: String::new(),
                args: raw.args,
            });
        };
        match TransformKind::from_function(&function, &raw.args)? {
            Some(kind) => Ok(TransformStep::Apply(kind)),
            None => Ok(TransformStep::Unknown {
                function,
                args: raw.args,
            }),
        }
    }
}

impl From<TransformStep> for RawStep {
    fn from(step: TransformStep) -> Self {
        match step {
            TransformStep::Apply(kind) => RawStep {
                function: Some(kind.name().to_string()),
                args: kind.args(),
            },
            TransformStep::Unknown { function, args } => RawStep {
                function: (!function.is_empty()).then_some(function),
                args,
            },
        }
    }
}
