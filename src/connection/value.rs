//! JSON <-> Postgres value mapping
//!
//! Parameters arrive as `serde_json::Value`s and are encoded according to the
//! type the server inferred for each placeholder. Result columns are decoded
//! through [`JsonColumn`]: scalars map to JSON numbers, booleans and strings,
//! date/time values to ISO 8601 strings, `numeric` to its exact decimal text.
//! A column of any other type fails the query instead of vanishing.

use super::driver::Row;
use crate::{Error, Result};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Number, Value};
use std::error::Error as StdError;
use std::net::IpAddr;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn StdError + Sync + Send>;

/// Query parameter backed by a JSON value
#[derive(Debug, Clone, Copy)]
pub struct SqlParam<'a>(pub &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            value if is_json(ty) => value.to_sql(ty, out),
            Value::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            Value::Number(n) => encode_number(n, ty, out),
            Value::String(s) if is_text(ty) => s.as_str().to_sql(ty, out),
            other => Err(format!("cannot send JSON {} as a {} parameter", json_kind(other), ty).into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn encode_number(n: &Number, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(integer(n)?)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(integer(n)?)?.to_sql(ty, out)
    } else if *ty == Type::INT8 {
        integer(n)?.to_sql(ty, out)
    } else if *ty == Type::OID {
        u32::try_from(integer(n)?)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (float(n)? as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        float(n)?.to_sql(ty, out)
    } else if is_text(ty) {
        n.to_string().as_str().to_sql(ty, out)
    } else {
        Err(format!("cannot send JSON number as a {} parameter", ty).into())
    }
}

fn integer(n: &Number) -> std::result::Result<i64, BoxError> {
    n.as_i64()
        .ok_or_else(|| format!("{} is not a 64-bit integer", n).into())
}

fn float(n: &Number) -> std::result::Result<f64, BoxError> {
    n.as_f64()
        .ok_or_else(|| format!("{} is not representable as a float", n).into())
}

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
        || *ty == Type::UNKNOWN
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a driver row into a JSON object keyed by column name
pub fn row_to_map(row: &tokio_postgres::Row) -> Result<Row> {
    let mut map = Row::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let JsonColumn(value) = row.try_get(idx).map_err(|e| {
            Error::Connection(format!(
                "cannot decode column '{}' of type {}: {}",
                column.name(),
                column.type_(),
                e
            ))
        })?;
        map.insert(column.name().to_string(), value);
    }

    Ok(map)
}

/// A result column decoded into JSON
#[derive(Debug, Clone, PartialEq)]
pub struct JsonColumn(pub Value);

impl<'a> FromSql<'a> for JsonColumn {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        let value = if *ty == Type::BOOL {
            Value::from(bool::from_sql(ty, raw)?)
        } else if *ty == Type::INT2 {
            Value::from(i16::from_sql(ty, raw)?)
        } else if *ty == Type::INT4 {
            Value::from(i32::from_sql(ty, raw)?)
        } else if *ty == Type::INT8 {
            Value::from(i64::from_sql(ty, raw)?)
        } else if *ty == Type::OID {
            Value::from(u32::from_sql(ty, raw)?)
        } else if *ty == Type::FLOAT4 {
            float_json(f64::from(f32::from_sql(ty, raw)?))
        } else if *ty == Type::FLOAT8 {
            float_json(f64::from_sql(ty, raw)?)
        } else if *ty == Type::NUMERIC {
            Value::String(numeric_text(raw)?)
        } else if is_json(ty) {
            Value::from_sql(ty, raw)?
        } else if is_text(ty) {
            Value::String(<&str>::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIMESTAMPTZ {
            let ts = DateTime::<Utc>::from_sql(ty, raw)?;
            Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        } else if *ty == Type::TIMESTAMP {
            let ts = NaiveDateTime::from_sql(ty, raw)?;
            Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        } else if *ty == Type::DATE {
            Value::String(NaiveDate::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIME {
            Value::String(NaiveTime::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::UUID {
            Value::String(Uuid::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::INET {
            Value::String(IpAddr::from_sql(ty, raw)?.to_string())
        } else {
            return Err(format!("unsupported column type {}", ty).into());
        };

        Ok(JsonColumn(value))
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, BoxError> {
        Ok(JsonColumn(Value::Null))
    }

    fn accepts(ty: &Type) -> bool {
        [
            Type::BOOL,
            Type::INT2,
            Type::INT4,
            Type::INT8,
            Type::OID,
            Type::FLOAT4,
            Type::FLOAT8,
            Type::NUMERIC,
            Type::TIMESTAMPTZ,
            Type::TIMESTAMP,
            Type::DATE,
            Type::TIME,
            Type::UUID,
            Type::INET,
        ]
        .contains(ty)
            || is_json(ty)
            || is_text(ty)
    }
}

/// Non-finite floats have no JSON number form; use the server's spelling
fn float_json(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => Value::String("NaN".into()),
        None if v > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary `numeric` as exact decimal text.
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit), then ndigits
/// base-10000 digits. The first digit is worth 10000^weight.
fn numeric_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let word = |i: usize| -> std::result::Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "numeric value is truncated".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i64::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<std::result::Result<Vec<u16>, BoxError>>()?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        _ => {}
    }

    let digit_at = |pos: i64| -> u16 {
        usize::try_from(pos)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit_at(0).to_string());
        for pos in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(pos)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value, ty: &Type) -> std::result::Result<(IsNull, BytesMut), BoxError> {
        let mut out = BytesMut::new();
        let is_null = SqlParam(value).to_sql(ty, &mut out)?;
        Ok((is_null, out))
    }

    #[test]
    fn test_null_encodes_as_sql_null() {
        let (is_null, out) = encode(&Value::Null, &Type::INT4).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(out.is_empty());
    }

    #[test]
    fn test_integer_widths() {
        let (_, out) = encode(&json!(7), &Type::INT4).unwrap();
        assert_eq!(&out[..], &7i32.to_be_bytes());

        let (_, out) = encode(&json!(7), &Type::INT8).unwrap();
        assert_eq!(&out[..], &7i64.to_be_bytes());

        assert!(encode(&json!(70_000), &Type::INT2).is_err());
        assert!(encode(&json!(1.5), &Type::INT4).is_err());
    }

    #[test]
    fn test_float_and_text() {
        let (_, out) = encode(&json!(1.5), &Type::FLOAT8).unwrap();
        assert_eq!(&out[..], &1.5f64.to_be_bytes());

        let (_, out) = encode(&json!("alice"), &Type::TEXT).unwrap();
        assert_eq!(&out[..], b"alice");

        let (_, out) = encode(&json!(42), &Type::TEXT).unwrap();
        assert_eq!(&out[..], b"42");
    }

    #[test]
    fn test_bool() {
        let (_, out) = encode(&json!(true), &Type::BOOL).unwrap();
        assert_eq!(&out[..], &[1]);
        assert!(encode(&json!("true"), &Type::BOOL).is_err());
    }

    #[test]
    fn test_json_passthrough() {
        let (_, out) = encode(&json!({"a": [1, 2]}), &Type::JSONB).unwrap();
        // jsonb carries a version byte before the text
        assert_eq!(out[0], 1);
        assert_eq!(&out[1..], br#"{"a":[1,2]}"#);
    }

    fn decode<T: ToSql>(value: T, ty: &Type) -> Value {
        let mut buf = BytesMut::new();
        value.to_sql(ty, &mut buf).unwrap();
        JsonColumn::from_sql(ty, &buf).unwrap().0
    }

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(true, &Type::BOOL), json!(true));
        assert_eq!(decode(7i32, &Type::INT4), json!(7));
        assert_eq!(decode(1.5f64, &Type::FLOAT8), json!(1.5));
        assert_eq!(decode(f64::NAN, &Type::FLOAT8), json!("NaN"));
        assert_eq!(decode(f64::NEG_INFINITY, &Type::FLOAT8), json!("-Infinity"));
        assert_eq!(decode("alice", &Type::TEXT), json!("alice"));
    }

    #[test]
    fn test_decode_date_time() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(12, 30, 5, 250_000)
            .unwrap();

        assert_eq!(
            decode(at.and_utc(), &Type::TIMESTAMPTZ),
            json!("2024-03-01T12:30:05.250Z")
        );
        assert_eq!(decode(at, &Type::TIMESTAMP), json!("2024-03-01T12:30:05.250"));
        assert_eq!(decode(at.date(), &Type::DATE), json!("2024-03-01"));
        assert_eq!(decode(at.time(), &Type::TIME), json!("12:30:05.250"));
    }

    #[test]
    fn test_decode_uuid_and_inet() {
        let id = Uuid::from_u128(0x67e5_5044_10b1_426f_9247_bb68_0e5f_e0c8);
        assert_eq!(
            decode(id, &Type::UUID),
            json!("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );

        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(decode(addr, &Type::INET), json!("10.0.0.1"));
    }

    #[test]
    fn test_numeric_text() {
        assert_eq!(numeric_text(&numeric(0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(numeric_text(&numeric(-1, 0, 3, &[10])).unwrap(), "0.001");
        assert_eq!(numeric_text(&numeric(1, 0, 0, &[1234, 5678])).unwrap(), "12345678");
        assert_eq!(numeric_text(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(numeric_text(&numeric(-1, NUMERIC_NEG, 1, &[5000])).unwrap(), "-0.5");
        assert_eq!(numeric_text(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(numeric_text(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert!(numeric_text(&[0, 2, 0, 0]).is_err());

        let value = JsonColumn::from_sql(&Type::NUMERIC, &numeric(0, 0, 2, &[3, 1400]))
            .unwrap()
            .0;
        assert_eq!(value, json!("3.14"));
    }

    #[test]
    fn test_unsupported_column_type_is_an_error() {
        assert!(!<JsonColumn as FromSql>::accepts(&Type::POINT));
        assert!(JsonColumn::from_sql(&Type::POINT, &[0; 16]).is_err());
        assert!(<JsonColumn as FromSql>::accepts(&Type::TIMESTAMPTZ));
    }

    #[test]
    fn test_null_column_decodes_to_null() {
        let value = JsonColumn::from_sql_nullable(&Type::TIMESTAMPTZ, None).unwrap();
        assert_eq!(value.0, Value::Null);
    }

    #[test]
    fn test_json_kind() {
        assert_eq!(json_kind(&json!([])), "array");
        assert_eq!(json_kind(&json!({})), "object");
    }
}
