//! Execution of individual preprocessing steps.
//!
//! Every step either rewrites the value in place or returns a descriptive
//! error message. Delta steps may leave `Variant::None` behind to signal that
//! no value was produced for this collection cycle.

use super::history::{HistoryValue, Timespec};
use super::variant::{parse_double, parse_numeric, parse_uint64, Variant, VariantType};
use super::{jsonpath, xpath, Step, StepType, ValueType};

use regex::Regex;

/// Apply one step to `value`.
pub fn execute_step(
    value_type: ValueType,
    value: &mut Variant,
    ts: Timespec,
    step: &Step,
    history: &mut HistoryValue,
) -> Result<(), String> {
    match step.step_type {
        StepType::Multiplier => multiplier(value_type, value, &step.params),
        StepType::RTrim | StepType::LTrim | StepType::Trim => {
            trim(value, step.step_type, &step.params)
        }
        StepType::RegSub => regsub(value, &step.params),
        StepType::BoolToDec | StepType::OctToDec | StepType::HexToDec => {
            to_decimal(value, step.step_type)
        }
        StepType::DeltaValue | StepType::DeltaSpeed => {
            delta(value_type, value, ts, step.step_type, history)
        }
        StepType::XPath => xpath_step(value, &step.params),
        StepType::JsonPath => jsonpath_step(value, &step.params),
    }
}

// --- Shared conversions ---

fn convert_to_string(value: &mut Variant) -> Result<(), String> {
    value.convert(VariantType::Str).map_err(|e| e.to_string())
}

/// Numeric copy of the value, honouring the item's preferred representation.
fn to_numeric(value: &Variant, value_type: ValueType) -> Result<Variant, String> {
    let mut numeric = match value {
        Variant::Dbl(_) | Variant::Ui64(_) => value.clone(),
        Variant::Str(s) => parse_numeric(s).ok_or("cannot convert value to numeric type")?,
        Variant::None => return Err("cannot convert value to numeric type".to_string()),
    };

    if value_type.numeric_hint() == Some(VariantType::Dbl) {
        numeric
            .convert(VariantType::Dbl)
            .map_err(|e| e.to_string())?;
    }

    Ok(numeric)
}

fn str_value(value: &Variant) -> &str {
    match value {
        Variant::Str(s) => s,
        _ => "",
    }
}

// --- Multiplier ---

fn multiplier(value_type: ValueType, value: &mut Variant, params: &str) -> Result<(), String> {
    let factor = params.trim();

    let result = match parse_double(factor) {
        None => Err("a numerical value is expected".to_string()),
        Some(factor_dbl) => to_numeric(value, value_type)
            .and_then(|numeric| multiply(numeric, factor, factor_dbl)),
    };

    match result {
        Ok(product) => {
            *value = product;
            Ok(())
        }
        Err(e) => Err(format!(
            "cannot apply multiplier \"{}\" to value \"{}\" of type \"{}\": {}",
            params,
            value.describe(),
            value.type_name(),
            e
        )),
    }
}

fn multiply(numeric: Variant, factor: &str, factor_dbl: f64) -> Result<Variant, String> {
    match numeric {
        Variant::Dbl(d) => Ok(Variant::Dbl(d * factor_dbl)),
        Variant::Ui64(u) => match parse_uint64(factor) {
            Some(factor_ui64) => u
                .checked_mul(factor_ui64)
                .map(Variant::Ui64)
                .ok_or_else(|| "value is too large".to_string()),
            None => {
                let product = u as f64 * factor_dbl;
                if !product.is_finite() || product < 0.0 || product > u64::MAX as f64 {
                    return Err("value is out of range".to_string());
                }
                Ok(Variant::Ui64(product as u64))
            }
        },
        _ => Err("cannot convert value to numeric type".to_string()),
    }
}

// --- Trim ---

fn trim(value: &mut Variant, op: StepType, params: &str) -> Result<(), String> {
    convert_to_string(value)?;
    let chars: Vec<char> = unescape_trim_params(params).chars().collect();

    if let Variant::Str(s) = value {
        let mut trimmed: &str = s;
        if matches!(op, StepType::LTrim | StepType::Trim) {
            trimmed = trimmed.trim_start_matches(chars.as_slice());
        }
        if matches!(op, StepType::RTrim | StepType::Trim) {
            trimmed = trimmed.trim_end_matches(chars.as_slice());
        }
        *s = trimmed.to_string();
    }

    Ok(())
}

/// Decode `\s`, `\r`, `\n` and `\t` in a trim character list.
pub fn unescape_trim_params(params: &str) -> String {
    let mut out = String::with_capacity(params.len());
    let mut chars = params.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match chars.peek() {
            Some('s') => ' ',
            Some('r') => '\r',
            Some('n') => '\n',
            Some('t') => '\t',
            _ => {
                out.push(c);
                continue;
            }
        };
        chars.next();
        out.push(decoded);
    }

    out
}

// --- Base conversion ---

const BOOL_TRUE: &[&str] = &[
    "true", "t", "yes", "y", "on", "up", "running", "enabled", "available", "ok", "master",
];
const BOOL_FALSE: &[&str] = &[
    "false", "f", "no", "n", "off", "down", "unused", "disabled", "unavailable", "err", "slave",
];

fn to_decimal(value: &mut Variant, op: StepType) -> Result<(), String> {
    convert_to_string(value)?;

    let text = str_value(value)
        .trim_start_matches([' ', '"'])
        .trim_end_matches([' ', '"', '\n', '\r']);

    let (base, parsed) = match op {
        StepType::BoolToDec => ("boolean", parse_boolean(text)),
        StepType::OctToDec => ("octal", parse_octal(text)),
        _ => ("hexadecimal", parse_hex(text)),
    };

    match parsed {
        Ok(result) => {
            *value = Variant::Ui64(result);
            Ok(())
        }
        Err(e) => Err(format!(
            "cannot convert value \"{}\" from {} to decimal format: {}",
            value.describe(),
            base,
            e
        )),
    }
}

fn parse_boolean(text: &str) -> Result<u64, &'static str> {
    if let Some(d) = parse_double(text) {
        return Ok(u64::from(d != 0.0));
    }

    let lower = text.to_lowercase();
    if BOOL_TRUE.contains(&lower.as_str()) {
        Ok(1)
    } else if BOOL_FALSE.contains(&lower.as_str()) {
        Ok(0)
    } else {
        Err("invalid value format")
    }
}

fn parse_octal(text: &str) -> Result<u64, &'static str> {
    if text.is_empty() || !text.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err("invalid value format");
    }
    u64::from_str_radix(text, 8).map_err(|_| "value is too large")
}

fn parse_hex(text: &str) -> Result<u64, &'static str> {
    let digits = if !text.is_empty() && text.bytes().all(|b| b.is_ascii_hexdigit()) {
        text.to_string()
    } else {
        hex_dump_digits(text).ok_or("invalid value format")?
    };
    u64::from_str_radix(&digits, 16).map_err(|_| "value is too large")
}

/// Join a byte dump such as `"1a 2b\n3c"` into contiguous hex digits.
fn hex_dump_digits(text: &str) -> Option<String> {
    let mut digits = String::new();
    for chunk in text.split([' ', '\n']) {
        if chunk.len() != 2 || !chunk.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        digits.push_str(chunk);
    }
    Some(digits)
}

// --- Delta ---

fn delta(
    value_type: ValueType,
    value: &mut Variant,
    ts: Timespec,
    op: StepType,
    history: &mut HistoryValue,
) -> Result<(), String> {
    let current = to_numeric(value, value_type).map_err(|e| {
        let what = match op {
            StepType::DeltaSpeed => "speed per second",
            _ => "simple change",
        };
        format!(
            "cannot calculate delta ({}) for value \"{}\" of type \"{}\": {}",
            what,
            value.describe(),
            value.type_name(),
            e
        )
    })?;

    *value = if history.is_empty() || history.value.is_none() {
        Variant::None
    } else {
        delta_between(&current, ts, op, history).unwrap_or_default()
    };

    history.timestamp = ts;
    history.value = current;

    Ok(())
}

/// Delta against the stored history, `None` when no value can be produced.
fn delta_between(
    current: &Variant,
    ts: Timespec,
    op: StepType,
    history: &HistoryValue,
) -> Option<Variant> {
    let elapsed = || {
        if history.timestamp >= ts {
            None
        } else {
            Some(ts.seconds_since(&history.timestamp))
        }
    };

    match (current, &history.value) {
        (Variant::Ui64(cur), Variant::Ui64(prev)) => {
            if prev > cur {
                return None;
            }
            let diff = cur - prev;
            match op {
                StepType::DeltaSpeed => Some(Variant::Ui64((diff as f64 / elapsed()?) as u64)),
                _ => Some(Variant::Ui64(diff)),
            }
        }
        _ => {
            let cur = as_f64(current)?;
            let prev = as_f64(&history.value)?;
            if prev > cur {
                return None;
            }
            match op {
                StepType::DeltaSpeed => Some(Variant::Dbl((cur - prev) / elapsed()?)),
                _ => Some(Variant::Dbl(cur - prev)),
            }
        }
    }
}

fn as_f64(value: &Variant) -> Option<f64> {
    match value {
        Variant::Dbl(d) => Some(*d),
        Variant::Ui64(u) => Some(*u as f64),
        _ => None,
    }
}

// --- Regular expression substitution ---

fn regsub(value: &mut Variant, params: &str) -> Result<(), String> {
    convert_to_string(value)?;

    let result = regsub_apply(str_value(value), params);
    match result {
        Ok(output) => {
            *value = Variant::Str(output);
            Ok(())
        }
        Err(e) => Err(format!(
            "cannot perform regular expression match on value \"{}\" of type \"{}\": {}",
            value.describe(),
            value.type_name(),
            e
        )),
    }
}

fn regsub_apply(text: &str, params: &str) -> Result<String, String> {
    let (pattern, template) = params
        .split_once('\n')
        .ok_or_else(|| "cannot find second parameter".to_string())?;

    let re = Regex::new(pattern).map_err(|e| format!("invalid regular expression: {}", e))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| "pattern does not match".to_string())?;

    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(group) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                if let Some(m) = caps.get(group as usize) {
                    output.push_str(m.as_str());
                }
                continue;
            }
        }
        output.push(c);
    }

    Ok(output)
}

// --- Structured text queries ---

fn jsonpath_step(value: &mut Variant, params: &str) -> Result<(), String> {
    convert_to_string(value)?;

    match jsonpath::query(str_value(value), params) {
        Ok(output) => {
            *value = Variant::Str(output);
            Ok(())
        }
        Err(e) => Err(format!("cannot extract value from json by path \"{}\": {}", params, e)),
    }
}

fn xpath_step(value: &mut Variant, params: &str) -> Result<(), String> {
    convert_to_string(value)?;

    match xpath::evaluate(str_value(value), params) {
        Ok(output) => {
            *value = Variant::Str(output);
            Ok(())
        }
        Err(e) => Err(format!("cannot extract XML value with xpath \"{}\": {}", params, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step_type: StepType, params: &str) -> Step {
        Step {
            step_type,
            params: params.to_string(),
        }
    }

    fn run(value_type: ValueType, value: Variant, s: Step) -> Result<Variant, String> {
        let mut value = value;
        let mut history = HistoryValue::default();
        execute_step(value_type, &mut value, Timespec::new(1, 0), &s, &mut history)?;
        Ok(value)
    }

    #[test]
    fn test_multiplier() {
        let v = run(ValueType::Uint64, Variant::Str("15".into()), step(StepType::Multiplier, "2")).unwrap();
        assert_eq!(v, Variant::Ui64(30));

        let v = run(ValueType::Uint64, Variant::Ui64(10), step(StepType::Multiplier, "0.5")).unwrap();
        assert_eq!(v, Variant::Ui64(5));

        let v = run(ValueType::Float, Variant::Str("3".into()), step(StepType::Multiplier, "2")).unwrap();
        assert_eq!(v, Variant::Dbl(6.0));

        let v = run(ValueType::Float, Variant::Dbl(1.5), step(StepType::Multiplier, " 1e1 ")).unwrap();
        assert_eq!(v, Variant::Dbl(15.0));
    }

    #[test]
    fn test_multiplier_errors() {
        let err = run(ValueType::Uint64, Variant::Ui64(1), step(StepType::Multiplier, "abc")).unwrap_err();
        assert!(err.contains("a numerical value is expected"));

        let err = run(ValueType::Uint64, Variant::Str("x".into()), step(StepType::Multiplier, "2")).unwrap_err();
        assert!(err.contains("cannot convert value to numeric type"));

        let err = run(ValueType::Uint64, Variant::Ui64(u64::MAX), step(StepType::Multiplier, "2")).unwrap_err();
        assert!(err.contains("too large"));
    }

    #[test]
    fn test_unescape_trim_params() {
        assert_eq!(unescape_trim_params(r"\s\t"), " \t");
        assert_eq!(unescape_trim_params(r"\r\n"), "\r\n");
        assert_eq!(unescape_trim_params(r"a\xb"), r"a\xb");
        assert_eq!(unescape_trim_params(r"x\"), r"x\");
    }

    #[test]
    fn test_trim_variants() {
        let input = || Variant::Str(" \t value \t ".into());
        assert_eq!(run(ValueType::Str, input(), step(StepType::Trim, r"\s\t")).unwrap(), Variant::Str("value".into()));
        assert_eq!(run(ValueType::Str, input(), step(StepType::LTrim, r"\s\t")).unwrap(), Variant::Str("value \t ".into()));
        assert_eq!(run(ValueType::Str, input(), step(StepType::RTrim, r"\s\t")).unwrap(), Variant::Str(" \t value".into()));

        // Numbers are stringified before trimming
        assert_eq!(run(ValueType::Str, Variant::Ui64(1200), step(StepType::RTrim, "0")).unwrap(), Variant::Str("12".into()));
    }

    #[test]
    fn test_bool_to_dec() {
        let b = |s: &str| run(ValueType::Uint64, Variant::Str(s.into()), step(StepType::BoolToDec, ""));
        assert_eq!(b("\"Yes\"").unwrap(), Variant::Ui64(1));
        assert_eq!(b("down").unwrap(), Variant::Ui64(0));
        assert_eq!(b("0.0").unwrap(), Variant::Ui64(0));
        assert_eq!(b("-2").unwrap(), Variant::Ui64(1));
        assert!(b("maybe").unwrap_err().contains("invalid value format"));
    }

    #[test]
    fn test_oct_and_hex_to_dec() {
        let oct = |s: &str| run(ValueType::Uint64, Variant::Str(s.into()), step(StepType::OctToDec, ""));
        assert_eq!(oct("755").unwrap(), Variant::Ui64(493));
        assert!(oct("8").is_err());

        let hex = |s: &str| run(ValueType::Uint64, Variant::Str(s.into()), step(StepType::HexToDec, ""));
        assert_eq!(hex("ff").unwrap(), Variant::Ui64(255));
        assert_eq!(hex("01 00\n").unwrap(), Variant::Ui64(256));
        assert!(hex("0xff").is_err());
        assert!(hex("1 2").is_err());
        assert!(hex("1ffffffffffffffff").unwrap_err().contains("too large"));
    }

    #[test]
    fn test_delta_value_first_observation() {
        let mut history = HistoryValue::default();
        let mut value = Variant::Str("100".into());
        let s = step(StepType::DeltaValue, "");

        execute_step(ValueType::Uint64, &mut value, Timespec::new(10, 0), &s, &mut history).unwrap();
        assert!(value.is_none());
        assert_eq!(history.value, Variant::Ui64(100));
        assert_eq!(history.timestamp, Timespec::new(10, 0));

        let mut value = Variant::Str("150".into());
        execute_step(ValueType::Uint64, &mut value, Timespec::new(11, 0), &s, &mut history).unwrap();
        assert_eq!(value, Variant::Ui64(50));
    }

    #[test]
    fn test_delta_counter_reset_updates_history() {
        let mut history = HistoryValue {
            timestamp: Timespec::new(10, 0),
            value: Variant::Ui64(500),
        };
        let mut value = Variant::Ui64(20);
        let s = step(StepType::DeltaValue, "");

        execute_step(ValueType::Uint64, &mut value, Timespec::new(11, 0), &s, &mut history).unwrap();
        assert!(value.is_none());
        assert_eq!(history.value, Variant::Ui64(20));
        assert_eq!(history.timestamp, Timespec::new(11, 0));
    }

    #[test]
    fn test_delta_speed() {
        let s = step(StepType::DeltaSpeed, "");
        let mut history = HistoryValue {
            timestamp: Timespec::new(10, 0),
            value: Variant::Ui64(100),
        };
        let mut value = Variant::Ui64(300);
        execute_step(ValueType::Uint64, &mut value, Timespec::new(14, 0), &s, &mut history).unwrap();
        assert_eq!(value, Variant::Ui64(50));

        // Float items compute in floating point, including a half-second interval
        let mut history = HistoryValue {
            timestamp: Timespec::new(10, 0),
            value: Variant::Dbl(1.0),
        };
        let mut value = Variant::Str("2".into());
        execute_step(ValueType::Float, &mut value, Timespec::new(10, 500_000_000), &s, &mut history).unwrap();
        assert_eq!(value, Variant::Dbl(2.0));
    }

    #[test]
    fn test_delta_speed_requires_time_to_advance() {
        let s = step(StepType::DeltaSpeed, "");
        let mut history = HistoryValue {
            timestamp: Timespec::new(10, 0),
            value: Variant::Ui64(100),
        };
        let mut value = Variant::Ui64(300);
        execute_step(ValueType::Uint64, &mut value, Timespec::new(10, 0), &s, &mut history).unwrap();
        assert!(value.is_none());
        assert_eq!(history.value, Variant::Ui64(300));
    }

    #[test]
    fn test_delta_mixed_types_use_double() {
        let s = step(StepType::DeltaValue, "");
        let mut history = HistoryValue {
            timestamp: Timespec::new(10, 0),
            value: Variant::Ui64(1),
        };
        let mut value = Variant::Str("2.5".into());
        execute_step(ValueType::Uint64, &mut value, Timespec::new(11, 0), &s, &mut history).unwrap();
        assert_eq!(value, Variant::Dbl(1.5));
    }

    #[test]
    fn test_delta_non_numeric_fails() {
        let s = step(StepType::DeltaValue, "");
        let mut history = HistoryValue::default();
        let mut value = Variant::Str("abc".into());
        let err = execute_step(ValueType::Uint64, &mut value, Timespec::new(11, 0), &s, &mut history).unwrap_err();
        assert!(err.starts_with("cannot calculate delta (simple change)"));
        assert!(history.is_empty());
    }

    #[test]
    fn test_regsub() {
        let r = |v: &str, p: &str| run(ValueType::Str, Variant::Str(v.into()), step(StepType::RegSub, p));
        assert_eq!(r("Temperature: 42C", "([0-9]+)C\nvalue=\\1").unwrap(), Variant::Str("value=42".into()));
        assert_eq!(r("abc", "b\n[\\0][\\2]").unwrap(), Variant::Str("[b][]".into()));
        assert!(r("abc", "x\n\\0").unwrap_err().contains("pattern does not match"));
        assert!(r("abc", "(\n\\0").unwrap_err().contains("invalid regular expression"));
        assert!(r("abc", "abc").unwrap_err().contains("cannot find second parameter"));
    }

    #[test]
    fn test_regsub_is_single_line() {
        let r = run(ValueType::Str, Variant::Str("first\nsecond".into()), step(StepType::RegSub, "^second$\n\\0"));
        assert!(r.is_err());
    }

    #[test]
    fn test_jsonpath_and_xpath_steps() {
        let v = run(ValueType::Str, Variant::Str(r#"{"a":{"b":"c"}}"#.into()), step(StepType::JsonPath, "$.a.b")).unwrap();
        assert_eq!(v, Variant::Str("c".into()));

        let err = run(ValueType::Str, Variant::Str("{}".into()), step(StepType::JsonPath, "$.a")).unwrap_err();
        assert!(err.contains("no data matches"));

        let v = run(ValueType::Str, Variant::Str("<a><b>1</b></a>".into()), step(StepType::XPath, "/a/b/text()")).unwrap();
        assert_eq!(v, Variant::Str("1".into()));

        let err = run(ValueType::Str, Variant::Str("<a>".into()), step(StepType::XPath, "/a")).unwrap_err();
        assert!(err.contains("cannot parse xml value"));
    }
}
