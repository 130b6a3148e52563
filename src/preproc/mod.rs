//! Item value preprocessing.
//!
//! A raw collected value runs through an ordered list of steps. The first
//! failing step stops the pipeline; a delta step without a usable baseline
//! stops it without an error and without a value.

mod history;
mod jsonpath;
mod manager;
mod steps;
mod variant;
mod xpath;

pub use history::*;
pub use jsonpath::{query as jsonpath_query, JsonPathError};
pub use manager::*;
pub use steps::{execute_step, unescape_trim_params};
pub use variant::*;
pub use xpath::{evaluate as xpath_evaluate, XPathError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared value type of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Float,
    Str,
    Log,
    Uint64,
    Text,
}

impl ValueType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ValueType::Float),
            1 => Some(ValueType::Str),
            2 => Some(ValueType::Log),
            3 => Some(ValueType::Uint64),
            4 => Some(ValueType::Text),
            _ => None,
        }
    }

    /// Preferred numeric representation for numeric steps.
    pub fn numeric_hint(self) -> Option<VariantType> {
        match self {
            ValueType::Float => Some(VariantType::Dbl),
            ValueType::Uint64 => Some(VariantType::Ui64),
            _ => None,
        }
    }

    /// Representation of the final, stored value.
    pub fn variant_type(self) -> VariantType {
        match self {
            ValueType::Float => VariantType::Dbl,
            ValueType::Uint64 => VariantType::Ui64,
            ValueType::Str | ValueType::Log | ValueType::Text => VariantType::Str,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float => "Numeric (float)",
            ValueType::Str => "Character",
            ValueType::Log => "Log",
            ValueType::Uint64 => "Numeric (unsigned)",
            ValueType::Text => "Text",
        }
    }
}

/// Preprocessing step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    Multiplier,
    RTrim,
    LTrim,
    Trim,
    RegSub,
    BoolToDec,
    OctToDec,
    HexToDec,
    DeltaValue,
    DeltaSpeed,
    XPath,
    JsonPath,
}

impl StepType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(StepType::Multiplier),
            2 => Some(StepType::RTrim),
            3 => Some(StepType::LTrim),
            4 => Some(StepType::Trim),
            5 => Some(StepType::RegSub),
            6 => Some(StepType::BoolToDec),
            7 => Some(StepType::OctToDec),
            8 => Some(StepType::HexToDec),
            9 => Some(StepType::DeltaValue),
            10 => Some(StepType::DeltaSpeed),
            11 => Some(StepType::XPath),
            12 => Some(StepType::JsonPath),
            _ => None,
        }
    }

    pub fn is_delta(self) -> bool {
        matches!(self, StepType::DeltaValue | StepType::DeltaSpeed)
    }
}

/// One configured preprocessing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_type: StepType,
    pub params: String,
}

impl Step {
    pub fn new(step_type: StepType, params: &str) -> Self {
        Self {
            step_type,
            params: params.to_string(),
        }
    }
}

/// Preprocessing failure for one value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocError {
    #[error("Item preprocessing step #{} failed: {message}", .index + 1)]
    Step { index: usize, message: String },
    #[error("Value of type \"{from}\" is not suitable for value type \"{}\". Value \"{value}\"", .value_type.name())]
    Unsuitable {
        value_type: ValueType,
        from: &'static str,
        value: String,
    },
}

/// Run `steps` over `raw` and convert the result to the item's value type.
///
/// Returns `Ok(None)` when a step produced no value (for example the first
/// observation of a delta step). History written by delta steps is kept even
/// when a later step fails.
pub fn run_pipeline(
    value_type: ValueType,
    raw: Variant,
    ts: Timespec,
    steps: &[Step],
    history: &mut HistoryValue,
) -> Result<Option<Variant>, PreprocError> {
    let mut value = raw;

    for (index, step) in steps.iter().enumerate() {
        if value.is_none() {
            return Ok(None);
        }
        execute_step(value_type, &mut value, ts, step, history)
            .map_err(|message| PreprocError::Step { index, message })?;
    }

    if value.is_none() {
        return Ok(None);
    }

    let from = value.type_name();
    let described = value.describe();
    value
        .convert(value_type.variant_type())
        .map_err(|_| PreprocError::Unsuitable {
            value_type,
            from,
            value: described,
        })?;

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_then_delta_round_trip() {
        let steps = vec![
            Step::new(StepType::Multiplier, "2"),
            Step::new(StepType::DeltaValue, ""),
        ];
        let mut history = HistoryValue::default();

        let first = run_pipeline(
            ValueType::Uint64,
            Variant::Str("15".into()),
            Timespec::new(1000, 0),
            &steps,
            &mut history,
        )
        .unwrap();
        assert_eq!(first, None);
        assert_eq!(history.timestamp, Timespec::new(1000, 0));
        assert_eq!(history.value, Variant::Ui64(30));

        let second = run_pipeline(
            ValueType::Uint64,
            Variant::Str("20".into()),
            Timespec::new(1001, 0),
            &steps,
            &mut history,
        )
        .unwrap();
        assert_eq!(second, Some(Variant::Ui64(10)));
    }

    #[test]
    fn test_failure_reports_step_index() {
        let steps = vec![
            Step::new(StepType::Trim, " "),
            Step::new(StepType::Multiplier, "x"),
        ];
        let mut history = HistoryValue::default();
        let err = run_pipeline(
            ValueType::Float,
            Variant::Str(" 1 ".into()),
            Timespec::new(1, 0),
            &steps,
            &mut history,
        )
        .unwrap_err();

        match &err {
            PreprocError::Step { index, message } => {
                assert_eq!(*index, 1);
                assert!(message.contains("a numerical value is expected"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().starts_with("Item preprocessing step #2 failed"));
    }

    #[test]
    fn test_history_survives_later_failure() {
        let steps = vec![
            Step::new(StepType::DeltaValue, ""),
            Step::new(StepType::JsonPath, "$.a"),
        ];
        let mut history = HistoryValue {
            timestamp: Timespec::new(10, 0),
            value: Variant::Ui64(5),
        };

        let err = run_pipeline(
            ValueType::Str,
            Variant::Str("8".into()),
            Timespec::new(11, 0),
            &steps,
            &mut history,
        )
        .unwrap_err();
        assert!(matches!(err, PreprocError::Step { index: 1, .. }));
        assert_eq!(history.value, Variant::Ui64(8));
        assert_eq!(history.timestamp, Timespec::new(11, 0));
    }

    #[test]
    fn test_final_conversion() {
        let mut history = HistoryValue::default();
        let ok = run_pipeline(
            ValueType::Float,
            Variant::Str("12".into()),
            Timespec::new(1, 0),
            &[],
            &mut history,
        )
        .unwrap();
        assert_eq!(ok, Some(Variant::Dbl(12.0)));

        let err = run_pipeline(
            ValueType::Uint64,
            Variant::Str("abc".into()),
            Timespec::new(1, 0),
            &[],
            &mut history,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Value of type \"string\" is not suitable for value type \"Numeric (unsigned)\". Value \"abc\""
        );
    }

    #[test]
    fn test_no_value_input() {
        let mut history = HistoryValue::default();
        let out = run_pipeline(
            ValueType::Str,
            Variant::None,
            Timespec::new(1, 0),
            &[Step::new(StepType::Trim, " ")],
            &mut history,
        )
        .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn test_codes() {
        assert_eq!(StepType::from_code(9), Some(StepType::DeltaValue));
        assert_eq!(StepType::from_code(13), None);
        assert_eq!(ValueType::from_code(3), Some(ValueType::Uint64));
        assert!(StepType::DeltaSpeed.is_delta());
    }
}
