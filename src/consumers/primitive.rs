// In: src/consumers/primitive.rs

//! Primitive consumers and their text representations.
//!
//! Every primitive wire representation has a parse function (token -> `Value`) and
//! a format function (array slot -> `Scalar`). The two are exact inverses for all
//! values except NaN payloads, which text formats canonicalize.

use std::borrow::Cow;

use arrow::array::{
    Array, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, StringArray, TimestampMicrosecondArray, UInt16Array,
    UInt32Array, UInt8Array,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use crate::context::ColumnVector;
use crate::error::BatchlineError;
use crate::text::generator::Scalar;
use crate::text::token::{Token, TokenCursor};
use crate::types::{ColumnType, IntWidth, Value};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const TIMESTAMP_PARSE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Consumes one scalar token into a primitive vector.
#[derive(Debug, Clone)]
pub struct PrimitiveConsumer {
    kind: ColumnType,
    column: String,
    nullable: bool,
}

impl PrimitiveConsumer {
    pub fn new(kind: ColumnType, column: impl Into<String>, nullable: bool) -> Self {
        Self {
            kind,
            column: column.into(),
            nullable,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Parses `token`, returning `None` for an accepted null.
    pub fn parse_token(&self, token: &Token) -> Result<Option<Value>, BatchlineError> {
        if *token == Token::Null {
            if !self.nullable {
                return Err(BatchlineError::DataCorruption(format!(
                    "null in non-nullable column '{}'",
                    self.column
                )));
            }
            return Ok(None);
        }
        parse_scalar(&self.kind, token)
            .map(Some)
            .map_err(|msg| BatchlineError::DataCorruption(format!("column '{}': {}", self.column, msg)))
    }

    pub fn consume_element(
        &mut self,
        cursor: &mut TokenCursor,
        vector: &mut ColumnVector,
    ) -> Result<bool, BatchlineError> {
        let value = match cursor.peek()? {
            None => return Ok(false),
            Some(token) => self.parse_token(token)?,
        };
        cursor.advance();
        match value {
            Some(v) => vector.append_value(&v)?,
            None => vector.append_null(),
        }
        Ok(true)
    }
}

//==================================================================================
// 1. Parsing (decode side)
//==================================================================================

/// Parses a non-null scalar token as `kind`. Errors are bare messages; the caller
/// adds the column name.
pub fn parse_scalar(kind: &ColumnType, token: &Token) -> Result<Value, String> {
    match (kind, token) {
        (ColumnType::Boolean, Token::Bool(b)) => Ok(Value::Boolean(*b)),
        (ColumnType::Boolean, Token::Str(s)) => parse_bool(s).map(Value::Boolean),
        (ColumnType::Int(width), Token::Number(t) | Token::Str(t)) => {
            parse_int(t, *width).map(Value::Int)
        }
        (ColumnType::Float32, Token::Number(t) | Token::Str(t)) => {
            parse_f32(t).map(Value::from_f32)
        }
        (ColumnType::Float64, Token::Number(t) | Token::Str(t)) => {
            parse_f64(t).map(Value::from_f64)
        }
        (ColumnType::Decimal { precision, scale }, Token::Number(t) | Token::Str(t)) => {
            parse_decimal(t, *precision, *scale).map(Value::Decimal)
        }
        (ColumnType::Utf8, Token::Str(s)) => Ok(Value::Utf8(s.clone())),
        (ColumnType::Date, Token::Str(s)) => parse_date(s).map(Value::Date),
        (ColumnType::Timestamp, Token::Str(s)) => parse_timestamp(s).map(Value::Timestamp),
        (kind, token) => Err(format!("expected a {} value, found {}", kind, token.describe())),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    if s.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if s.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("'{}' is not a boolean", s))
    }
}

fn parse_int(text: &str, width: IntWidth) -> Result<i64, String> {
    let wide: i128 = text
        .parse()
        .map_err(|_| format!("'{}' is not a valid integer", text))?;
    let (lo, hi) = width.bounds();
    if wide < i128::from(lo) || wide > i128::from(hi) {
        return Err(format!(
            "value {} is out of range for {}",
            text,
            ColumnType::Int(width)
        ));
    }
    Ok(wide as i64)
}

fn special_float(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn names_infinity(text: &str) -> bool {
    text.to_ascii_lowercase().contains("inf")
}

fn parse_f64(text: &str) -> Result<f64, String> {
    if let Some(v) = special_float(text) {
        return Ok(v);
    }
    let v: f64 = text
        .parse()
        .map_err(|_| format!("'{}' is not a valid float", text))?;
    if v.is_infinite() && !names_infinity(text) {
        return Err(format!("value {} is out of range for Float64", text));
    }
    Ok(v)
}

fn parse_f32(text: &str) -> Result<f32, String> {
    if let Some(v) = special_float(text) {
        return Ok(v as f32);
    }
    let v: f32 = text
        .parse()
        .map_err(|_| format!("'{}' is not a valid float", text))?;
    if v.is_infinite() && !names_infinity(text) {
        return Err(format!("value {} is out of range for Float32", text));
    }
    Ok(v)
}

/// Parses a plain decimal string into its unscaled mantissa.
///
/// Input may carry fewer fraction digits than `scale`, never more. The number of
/// integer digits is limited to `precision - scale`.
pub fn parse_decimal(text: &str, precision: u8, scale: i8) -> Result<i128, String> {
    let scale = scale.max(0) as usize;
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(format!("'{}' is not a valid decimal", text));
    }
    if frac_part.len() > scale {
        return Err(format!("'{}' has more than {} fraction digits", text, scale));
    }
    let int_digits = int_part.trim_start_matches('0');
    if int_digits.len() + scale > precision as usize {
        return Err(format!(
            "value {} is out of range for Decimal({}, {})",
            text, precision, scale
        ));
    }
    let mut digits = String::with_capacity(int_digits.len() + scale);
    digits.push_str(int_digits);
    digits.push_str(frac_part);
    digits.extend(std::iter::repeat('0').take(scale - frac_part.len()));
    let mantissa: i128 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| format!("'{}' is not a valid decimal", text))?
    };
    Ok(if negative { -mantissa } else { mantissa })
}

fn parse_date(text: &str) -> Result<i32, String> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .map_err(|e| format!("'{}' is not a YYYY-MM-DD date: {}", text, e))
}

fn parse_timestamp(text: &str) -> Result<i64, String> {
    TIMESTAMP_PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|ts| ts.and_utc().timestamp_micros())
        .ok_or_else(|| format!("'{}' is not a YYYY-MM-DDTHH:MM:SS[.ffffff] timestamp", text))
}

//==================================================================================
// 2. Formatting (encode side)
//==================================================================================

/// Downcasts `array` to its concrete Arrow type.
pub(crate) fn downcast<'a, T: 'static>(array: &'a dyn Array) -> Result<&'a T, BatchlineError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        BatchlineError::internal(format!(
            "array of type {:?} does not match its writer",
            array.data_type()
        ))
    })
}

/// Formats slot `row` of a primitive array for the text wire.
pub fn format_scalar<'a>(
    kind: &ColumnType,
    array: &'a dyn Array,
    row: usize,
) -> Result<Scalar<'a>, BatchlineError> {
    if array.is_null(row) {
        return Ok(Scalar::Null);
    }
    let number = |s: String| -> Result<Scalar<'a>, BatchlineError> { Ok(Scalar::Number(s)) };
    match kind {
        ColumnType::Boolean => Ok(Scalar::Bool(downcast::<BooleanArray>(array)?.value(row))),
        ColumnType::Int(IntWidth::I8) => number(downcast::<Int8Array>(array)?.value(row).to_string()),
        ColumnType::Int(IntWidth::I16) => number(downcast::<Int16Array>(array)?.value(row).to_string()),
        ColumnType::Int(IntWidth::I32) => number(downcast::<Int32Array>(array)?.value(row).to_string()),
        ColumnType::Int(IntWidth::I64) => number(downcast::<Int64Array>(array)?.value(row).to_string()),
        ColumnType::Int(IntWidth::U8) => number(downcast::<UInt8Array>(array)?.value(row).to_string()),
        ColumnType::Int(IntWidth::U16) => number(downcast::<UInt16Array>(array)?.value(row).to_string()),
        ColumnType::Int(IntWidth::U32) => number(downcast::<UInt32Array>(array)?.value(row).to_string()),
        ColumnType::Float32 => {
            let v = downcast::<Float32Array>(array)?.value(row);
            Ok(format_float(v.is_nan(), v.is_infinite(), v.is_sign_negative(), || v.to_string()))
        }
        ColumnType::Float64 => {
            let v = downcast::<Float64Array>(array)?.value(row);
            Ok(format_float(v.is_nan(), v.is_infinite(), v.is_sign_negative(), || v.to_string()))
        }
        ColumnType::Decimal { scale, .. } => {
            let mantissa = downcast::<Decimal128Array>(array)?.value(row);
            Ok(Scalar::Text(Cow::Owned(format_decimal(mantissa, *scale))))
        }
        ColumnType::Utf8 => Ok(Scalar::Text(Cow::Borrowed(
            downcast::<StringArray>(array)?.value(row),
        ))),
        ColumnType::Date => {
            let days = downcast::<Date32Array>(array)?.value(row);
            let date = days
                .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .ok_or_else(|| {
                    BatchlineError::DataCorruption(format!("date {} days is out of range", days))
                })?;
            Ok(Scalar::Text(Cow::Owned(date.format(DATE_FORMAT).to_string())))
        }
        ColumnType::Timestamp => {
            let micros = downcast::<TimestampMicrosecondArray>(array)?.value(row);
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            let ts = DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos).ok_or_else(|| {
                BatchlineError::DataCorruption(format!(
                    "timestamp {} microseconds is out of range",
                    micros
                ))
            })?;
            Ok(Scalar::Text(Cow::Owned(
                ts.naive_utc().format(TIMESTAMP_FORMAT).to_string(),
            )))
        }
        other => Err(BatchlineError::internal(format!(
            "format_scalar called for non-primitive {}",
            other
        ))),
    }
}

fn format_float(
    nan: bool,
    infinite: bool,
    negative: bool,
    finite: impl FnOnce() -> String,
) -> Scalar<'static> {
    if nan {
        Scalar::Text(Cow::Borrowed("NaN"))
    } else if infinite && negative {
        Scalar::Text(Cow::Borrowed("-Infinity"))
    } else if infinite {
        Scalar::Text(Cow::Borrowed("Infinity"))
    } else {
        Scalar::Number(finite())
    }
}

/// Formats an unscaled mantissa with exactly `scale` fraction digits.
pub fn format_decimal(mantissa: i128, scale: i8) -> String {
    let digits = mantissa.unsigned_abs().to_string();
    let sign = if mantissa < 0 { "-" } else { "" };
    let scale = scale.max(0) as usize;
    if scale == 0 {
        return format!("{}{}", sign, digits);
    }
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, int_part, frac_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range_checks_name_the_value() {
        assert_eq!(parse_int("255", IntWidth::U8), Ok(255));
        let err = parse_int("256", IntWidth::U8).unwrap_err();
        assert!(err.contains("256"));
        assert_eq!(parse_int("4294967295", IntWidth::U32), Ok(u32::MAX as i64));
        assert!(parse_int("-1", IntWidth::U32).is_err());
        assert!(parse_int("4294967296", IntWidth::U32).is_err());
        assert!(parse_int("1.5", IntWidth::I64).is_err());
    }

    #[test]
    fn test_out_of_range_error_names_the_column() {
        let consumer = PrimitiveConsumer::new(ColumnType::Int(IntWidth::I8), "age", true);
        let err = consumer
            .parse_token(&Token::Number("300".into()))
            .unwrap_err();
        assert!(matches!(err, BatchlineError::DataCorruption(_)));
        let msg = err.to_string();
        assert!(msg.contains("age") && msg.contains("300"), "{}", msg);
    }

    #[test]
    fn test_null_in_non_nullable_column() {
        let consumer = PrimitiveConsumer::new(ColumnType::Utf8, "id", false);
        assert!(consumer.parse_token(&Token::Null).is_err());
        let nullable = PrimitiveConsumer::new(ColumnType::Utf8, "id", true);
        assert_eq!(nullable.parse_token(&Token::Null).unwrap(), None);
    }

    #[test]
    fn test_decimal_text_round_trips_at_full_precision() {
        let text = "10000000000000000000000000.000000000000";
        let mantissa = parse_decimal(text, 38, 12).unwrap();
        assert_eq!(mantissa, 10i128.pow(37));
        assert_eq!(format_decimal(mantissa, 12), text);

        assert_eq!(parse_decimal("-0.5", 5, 2), Ok(-50));
        assert_eq!(format_decimal(-50, 2), "-0.50");
        assert_eq!(format_decimal(7, 3), "0.007");
        assert_eq!(parse_decimal("12", 4, 2), Ok(1200));
        assert!(parse_decimal("123", 4, 2).is_err());
        assert!(parse_decimal("1.234", 10, 2).is_err());
        assert!(parse_decimal("1e5", 10, 2).is_err());
        assert!(parse_decimal(".", 10, 2).is_err());
    }

    #[test]
    fn test_special_floats_and_overflow() {
        assert!(parse_f64("NaN").unwrap().is_nan());
        assert_eq!(parse_f64("-Infinity"), Ok(f64::NEG_INFINITY));
        assert_eq!(parse_f32("Infinity"), Ok(f32::INFINITY));
        assert!(parse_f32("1e39").is_err());
        assert!(parse_f64("1e309").is_err());
        assert_eq!(parse_f32("0.1"), Ok(0.1f32));
    }

    #[test]
    fn test_dates_and_timestamps() {
        assert_eq!(parse_date("1970-01-02"), Ok(1));
        assert_eq!(parse_date("1969-12-31"), Ok(-1));
        assert!(parse_date("2024-02-30").is_err());

        assert_eq!(parse_timestamp("1970-01-01T00:00:01.000001"), Ok(1_000_001));
        assert_eq!(parse_timestamp("1970-01-01T00:00:01"), Ok(1_000_000));
        assert_eq!(parse_timestamp("1970-01-01 00:00:00.5"), Ok(500_000));

        let array = TimestampMicrosecondArray::from(vec![1_000_001]);
        assert_eq!(
            format_scalar(&ColumnType::Timestamp, &array, 0).unwrap(),
            Scalar::Text("1970-01-01T00:00:01.000001".into())
        );
        let dates = Date32Array::from(vec![Some(-1), None]);
        assert_eq!(
            format_scalar(&ColumnType::Date, &dates, 0).unwrap(),
            Scalar::Text("1969-12-31".into())
        );
        assert_eq!(format_scalar(&ColumnType::Date, &dates, 1).unwrap(), Scalar::Null);
    }

    #[test]
    fn test_float_formatting_uses_text_for_non_finite() {
        let array = Float64Array::from(vec![f64::NAN, f64::NEG_INFINITY, 0.1]);
        let kinds: Vec<_> = (0..3)
            .map(|i| format_scalar(&ColumnType::Float64, &array, i).unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec![
                Scalar::Text("NaN".into()),
                Scalar::Text("-Infinity".into()),
                Scalar::Number("0.1".into()),
            ]
        );
    }
}
