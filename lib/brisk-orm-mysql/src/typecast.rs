//! Row decoding.
//!
//! Rows become JSON objects keyed by column name. TINYINT(1) columns become
//! booleans, datetimes become ISO strings, JSON and TEXT/BLOB columns holding
//! JSON documents are parsed, and GEOMETRY points become
//! `{longitude, latitude, srid}` objects.

use brisk_orm::{OrmError, Row};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Value, json};
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row as _, TypeInfo};

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn decode_error(column: &str, e: sqlx::Error) -> OrmError {
    OrmError::Deserialization(format!("column {}: {}", column, e))
}

/// Convert a row to a JSON object. SQL NULLs become JSON nulls.
pub fn row_to_json(row: &MySqlRow) -> Result<Row, OrmError> {
    let mut obj = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        obj.insert(column.name().to_string(), extract_column_value(row, idx)?);
    }
    Ok(obj)
}

/// Extract a column value from a row as JSON
fn extract_column_value(row: &MySqlRow, idx: usize) -> Result<Value, OrmError> {
    let column = &row.columns()[idx];
    let name = column.name();
    let type_name = column.type_info().name();

    let value = match type_name {
        "BOOLEAN" => {
            let v: Option<bool> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(Value::Bool).unwrap_or(Value::Null)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            let v: Option<i64> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(Value::from).unwrap_or(Value::Null)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            let v: Option<u64> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(Value::from).unwrap_or(Value::Null)
        }
        "FLOAT" | "DOUBLE" => {
            let v: Option<f64> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or(Value::Null)
        }
        "DECIMAL" => {
            let v: Option<String> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(|s| decimal_value(&s)).unwrap_or(Value::Null)
        }
        "DATETIME" | "TIMESTAMP" => {
            let v: Option<NaiveDateTime> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(|dt| Value::String(format_datetime(&dt)))
                .unwrap_or(Value::Null)
        }
        "DATE" => {
            let v: Option<NaiveDate> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null)
        }
        "JSON" => {
            let v: Option<String> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
                .unwrap_or(Value::Null)
        }
        "GEOMETRY" => {
            let v: Option<Vec<u8>> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            match v {
                Some(bytes) => parse_geometry_point(&bytes).ok_or_else(|| {
                    OrmError::Deserialization(format!("column {}: not a geometry point", name))
                })?,
                None => Value::Null,
            }
        }
        "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT"
        | "LONGTEXT" => {
            let v: Option<Vec<u8>> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(|bytes| text_value(String::from_utf8_lossy(&bytes).into_owned()))
                .unwrap_or(Value::Null)
        }
        _ => {
            // VARCHAR, CHAR, TIME, ENUM and everything else as text
            let v: Option<String> = row
                .try_get_unchecked(idx)
                .map_err(|e| decode_error(name, e))?;
            v.map(Value::String).unwrap_or(Value::Null)
        }
    };

    Ok(value)
}

/// ISO rendering understood by chrono's serde support.
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn decimal_value(s: &str) -> Value {
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(s.to_string()))
}

/// Parse JSON documents stored as text; anything else stays a string.
pub fn text_value(s: String) -> Value {
    let trimmed = s.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str(&s) {
            return v;
        }
    }
    Value::String(s)
}

/// Decode MySQL's internal geometry format: a little-endian SRID followed by
/// a WKB point.
pub fn parse_geometry_point(bytes: &[u8]) -> Option<Value> {
    let srid = u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?);
    let wkb = bytes.get(4..)?;
    let little_endian = match wkb.first()? {
        0 => false,
        1 => true,
        _ => return None,
    };
    let read_u32 = |at: usize| -> Option<u32> {
        let raw: [u8; 4] = wkb.get(at..at + 4)?.try_into().ok()?;
        Some(if little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    };
    let read_f64 = |at: usize| -> Option<f64> {
        let raw: [u8; 8] = wkb.get(at..at + 8)?.try_into().ok()?;
        Some(if little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    };
    // WKB type 1 is Point
    if read_u32(1)? != 1 {
        return None;
    }
    Some(json!({
        "longitude": read_f64(5)?,
        "latitude": read_f64(13)?,
        "srid": srid,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brisk_orm::escape::escape;
    use brisk_orm::{GeometryPoint, Value as OrmValue};

    fn point_bytes(srid: u32, x: f64, y: f64) -> Vec<u8> {
        let mut bytes = srid.to_le_bytes().to_vec();
        bytes.push(1);
        bytes.extend(1u32.to_le_bytes());
        bytes.extend(x.to_le_bytes());
        bytes.extend(y.to_le_bytes());
        bytes
    }

    #[test]
    fn geometry_points_decode() {
        let v = parse_geometry_point(&point_bytes(4326, 120.5, 30.25)).unwrap();
        assert_eq!(v, json!({"longitude": 120.5, "latitude": 30.25, "srid": 4326}));
    }

    #[test]
    fn non_points_are_rejected() {
        let mut bytes = point_bytes(0, 1.0, 2.0);
        bytes[5] = 2; // LineString
        assert!(parse_geometry_point(&bytes).is_none());
        assert!(parse_geometry_point(&[0, 0]).is_none());
    }

    #[test]
    fn text_holding_json_is_parsed() {
        assert_eq!(text_value("[1,2]".to_string()), json!([1, 2]));
        assert_eq!(text_value("{\"a\":1}".to_string()), json!({"a": 1}));
        assert_eq!(text_value("123".to_string()), json!("123"));
        assert_eq!(text_value("{broken".to_string()), json!("{broken"));
    }

    #[test]
    fn datetimes_render_iso() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .and_then(|d| d.and_hms_milli_opt(7, 8, 9, 120))
            .unwrap();
        let s = format_datetime(&dt);
        assert_eq!(s, "2024-05-06T07:08:09.120");
        assert_eq!(s.parse::<NaiveDateTime>().unwrap(), dt);
    }

    #[test]
    fn big_endian_points_decode() {
        let mut bytes = 3857u32.to_le_bytes().to_vec();
        bytes.push(0);
        bytes.extend(1u32.to_be_bytes());
        bytes.extend((-1.25f64).to_be_bytes());
        bytes.extend(2.5f64.to_be_bytes());
        let v = parse_geometry_point(&bytes).unwrap();
        assert_eq!(v, json!({"longitude": -1.25, "latitude": 2.5, "srid": 3857}));
    }

    #[test]
    fn decoded_points_render_back_to_their_literal() {
        let decoded = parse_geometry_point(&point_bytes(4326, 120.5, 30.25)).unwrap();
        let point: GeometryPoint = serde_json::from_value(decoded).unwrap();
        assert_eq!(point, GeometryPoint::new(120.5, 30.25));
        assert_eq!(
            escape(&OrmValue::Point(point)),
            "st_geomfromtext('point(120.5 30.25)', 4326)"
        );
    }

    #[test]
    fn decoded_datetimes_render_back_to_their_literal() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .and_then(|d| d.and_hms_milli_opt(7, 8, 9, 120))
            .unwrap();
        let decoded: NaiveDateTime =
            serde_json::from_value(Value::String(format_datetime(&dt))).unwrap();
        assert_eq!(decoded, dt);
        assert_eq!(
            escape(&OrmValue::Datetime(decoded)),
            "'2024-05-06 07:08:09.120'"
        );
    }

    #[test]
    fn decimals_become_numbers() {
        assert_eq!(decimal_value("12.50"), json!(12.5));
    }
}
