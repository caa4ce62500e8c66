//! Value transform chain
//!
//! A link's configured steps run in declared order over the extracted raw
//! value, followed by an implicit `clip(0, 100)` that turns the result into
//! an integer dial percent.

pub mod kind;

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::{error, warn};

use crate::errors::LinkError;
pub use kind::{TransformKind, TransformStep};

use kind::ClipParams;

/// A value flowing through the chain
#[derive(Debug, Clone, PartialEq)]
pub enum TransformValue {
    Number(f64),
    Text(String),
}

impl TransformValue {
    /// Numeric view of the value. Text that is not a number counts as 0.
    pub fn as_number(&self) -> f64 {
        match self {
            TransformValue::Number(n) => *n,
            TransformValue::Text(s) => s.trim().parse::<f64>().unwrap_or_else(|_| {
                warn!("Value `{}` is not numeric, using 0", s);
                0.0
            }),
        }
    }
}

impl fmt::Display for TransformValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformValue::Number(n) => write!(f, "{}", n),
            TransformValue::Text(s) => f.write_str(s),
        }
    }
}

/// Clock reading shared by every step of one evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    now: DateTime<Local>,
}

impl EvalContext {
    pub fn now() -> Self {
        Self { now: Local::now() }
    }

    pub fn at(now: DateTime<Local>) -> Self {
        Self { now }
    }

    /// Current unix time in (fractional) seconds
    pub fn unix_now(&self) -> f64 {
        self.now.timestamp_millis() as f64 / 1000.0
    }

    /// Current wall-clock time without zone, as date strings are read
    pub fn local_now(&self) -> NaiveDateTime {
        self.now.naive_local()
    }
}

/// Result of running a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    /// Final dial percent, always in `[0, 100]`
    pub value: i64,

    /// Set when evaluation stopped early at an unknown function
    pub stopped_at: Option<String>,
}

/// Ordered list of transform steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformChain {
    steps: Vec<TransformStep>,
}

impl TransformChain {
    pub fn new(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// Run every step over `raw`, then the implicit final clip.
    ///
    /// An unknown function stops the remaining steps; the value accumulated
    /// so far is still clipped and returned.
    pub fn evaluate(&self, raw: TransformValue, ctx: &EvalContext) -> ChainOutput {
        let mut value = raw;
        let mut stopped_at = None;

        for step in &self.steps {
            match step {
                TransformStep::Apply(kind) => {
                    value = kind.apply(&value, ctx);
                }
                TransformStep::Unknown { function, .. } => {
                    let name = if function.is_empty() { "<unnamed>" } else { function.as_str() };
                    let err = LinkError::UnknownTransform(name.to_string());
                    error!("{}, skipping remaining steps", err);
                    stopped_at = Some(function.clone());
                    break;
                }
            }
        }

        let clipped = ClipParams::default().clip(value.as_number());
        ChainOutput {
            value: clipped as i64,
            stopped_at,
        }
    }
}
