//! Tagged metric value with explicit conversions.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A metric value as it flows through preprocessing.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub enum Variant {
    #[default]
    None,
    Str(String),
    Dbl(f64),
    Ui64(u64),
}

/// Representation tag of a [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariantType {
    None,
    Str,
    Dbl,
    Ui64,
}

impl VariantType {
    pub fn name(self) -> &'static str {
        match self {
            VariantType::None => "none",
            VariantType::Str => "string",
            VariantType::Dbl => "double",
            VariantType::Ui64 => "uint64",
        }
    }
}

/// Failed conversion between variant representations.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert value \"{value}\" of type \"{from}\" to {to}: {reason}")]
pub struct ConversionError {
    pub value: String,
    pub from: &'static str,
    pub to: &'static str,
    pub reason: &'static str,
}

impl Variant {
    pub fn kind(&self) -> VariantType {
        match self {
            Variant::None => VariantType::None,
            Variant::Str(_) => VariantType::Str,
            Variant::Dbl(_) => VariantType::Dbl,
            Variant::Ui64(_) => VariantType::Ui64,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Human readable rendering of the value, used for messages and string conversion.
    pub fn describe(&self) -> String {
        match self {
            Variant::None => String::new(),
            Variant::Str(s) => s.clone(),
            Variant::Dbl(d) => format_double(*d),
            Variant::Ui64(u) => u.to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Variant::None)
    }

    /// Convert the value in place to the requested representation.
    pub fn convert(&mut self, target: VariantType) -> Result<(), ConversionError> {
        let converted = match (&*self, target) {
            (Variant::None, _) => return Err(self.error(target, "value is not set")),
            (_, VariantType::None) => return Err(self.error(target, "unsupported conversion")),
            (Variant::Str(_), VariantType::Str)
            | (Variant::Dbl(_), VariantType::Dbl)
            | (Variant::Ui64(_), VariantType::Ui64) => return Ok(()),
            (_, VariantType::Str) => Variant::Str(self.describe()),
            (Variant::Ui64(u), VariantType::Dbl) => Variant::Dbl(*u as f64),
            (Variant::Str(s), VariantType::Dbl) => match parse_double(s.trim()) {
                Some(d) => Variant::Dbl(d),
                None => return Err(self.error(target, "not a valid floating point number")),
            },
            (Variant::Dbl(d), VariantType::Ui64) => {
                if !d.is_finite() || *d < 0.0 || *d > u64::MAX as f64 {
                    return Err(self.error(target, "value is out of range"));
                }
                Variant::Ui64(*d as u64)
            }
            (Variant::Str(s), VariantType::Ui64) => {
                let mut text = s.trim().to_string();
                del_zeros(&mut text);
                match parse_uint64(text.strip_prefix('+').unwrap_or(&text)) {
                    Some(u) => Variant::Ui64(u),
                    None => return Err(self.error(target, "not a valid unsigned integer")),
                }
            }
        };

        *self = converted;
        Ok(())
    }

    /// Replace the value with the best numeric representation of `text`.
    ///
    /// Integer-looking text that fits becomes `Ui64`, other decimal numbers `Dbl`.
    pub fn set_numeric(&mut self, text: &str) -> Result<(), ConversionError> {
        match parse_numeric(text) {
            Some(value) => {
                *self = value;
                Ok(())
            }
            None => Err(ConversionError {
                value: text.to_string(),
                from: VariantType::Str.name(),
                to: "numeric",
                reason: "not a numeric value",
            }),
        }
    }

    fn error(&self, target: VariantType, reason: &'static str) -> ConversionError {
        ConversionError {
            value: self.describe(),
            from: self.type_name(),
            to: target.name(),
            reason,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Parse text as the best fitting numeric variant.
pub fn parse_numeric(text: &str) -> Option<Variant> {
    let mut buffer = text
        .trim_start_matches([' ', '"'])
        .trim_end_matches([' ', '"', '\n', '\r'])
        .to_string();
    del_zeros(&mut buffer);
    let buffer = buffer.strip_prefix('+').unwrap_or(&buffer);

    if let Some(u) = parse_uint64(buffer) {
        return Some(Variant::Ui64(u));
    }

    parse_double(buffer).map(Variant::Dbl)
}

/// Strict unsigned parse: ASCII digits only, no sign, no overflow.
pub fn parse_uint64(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Strict decimal parse: optional sign, digits, fraction and exponent; finite only.
pub fn parse_double(text: &str) -> Option<f64> {
    if text.is_empty()
        || !text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return None;
    }
    text.parse::<f64>().ok().filter(|d| d.is_finite())
}

/// Drop trailing zeros of a fractional part ("10.500" -> "10.5", "10.0" -> "10").
pub fn del_zeros(text: &mut String) {
    if !text.contains('.') || text.contains(['e', 'E']) {
        return;
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
    text.truncate(trimmed);
}

/// Six decimals with trailing zeros removed.
pub fn format_double(value: f64) -> String {
    let mut text = format!("{:.6}", value);
    del_zeros(&mut text);
    text
}
