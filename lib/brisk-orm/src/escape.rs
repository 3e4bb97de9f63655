//! Client-side statement formatting.
//!
//! Statements are written with `?` placeholders and formatted here before they
//! reach the driver. Literal values are escaped; raw fragments are spliced
//! verbatim. The same [`escape`] routine is used for condition literals so a
//! compiled `where` clause and a bound parameter render identically.

use crate::{EntityMapping, Param, Value};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Escape a single value as a SQL literal.
pub fn escape(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        Value::Float(n) if n.is_finite() => n.to_string(),
        Value::Float(_) => "NULL".to_string(),
        Value::String(s) => escape_string(s),
        Value::Datetime(dt) => format!("'{}'", dt.format(DATETIME_FORMAT)),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.3f")),
        Value::Json(v) => escape_string(&v.to_string()),
        Value::Point(p) => p.to_sql_string(),
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::List(_) => format!("({})", escape(item)),
                other => escape(other),
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Quote a string literal, escaping control characters and quotes.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\x08' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Quote an identifier with backticks.
pub fn escape_id(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Replace each `?` outside quoted text with the next parameter.
///
/// Surplus placeholders are left untouched. `Param::Query` values are compiled
/// without a mapping; callers that know the entity resolve them first.
pub fn format(sql: &str, params: &[Param]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut params = params.iter();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => match params.next() {
                    Some(param) => out.push_str(&render(param)),
                    None => out.push(c),
                },
                other => out.push(other),
            },
        }
    }

    out
}

fn render(param: &Param) -> String {
    match param {
        Param::Literal(value) => escape(value),
        Param::Raw(sql) => sql.clone(),
        Param::Query(query) => query.to_sql_string(&EntityMapping::new(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn strings_are_quoted_and_escaped() {
        assert_eq!(escape(&Value::from("it's")), "'it\\'s'");
        assert_eq!(escape(&Value::from("a\nb\\c")), "'a\\nb\\\\c'");
    }

    #[test]
    fn lists_expand_and_group() {
        let flat = Value::from(vec![1i64, 2, 3]);
        assert_eq!(escape(&flat), "1, 2, 3");

        let grouped = Value::List(vec![
            Value::List(vec![Value::from(1i64), Value::from("a")]),
            Value::List(vec![Value::from(2i64), Value::Null]),
        ]);
        assert_eq!(escape(&grouped), "(1, 'a'), (2, NULL)");
    }

    #[test]
    fn datetimes_render_with_millis() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 60))
            .unwrap();
        assert_eq!(escape(&Value::Datetime(dt)), "'2024-01-02 03:04:05.060'");
    }

    #[test]
    fn format_fills_placeholders_in_order() {
        let sql = format(
            "select * from user where name = ? and age > ?",
            &[Param::from("bob"), Param::from(3i64)],
        );
        assert_eq!(sql, "select * from user where name = 'bob' and age > 3");
    }

    #[test]
    fn format_skips_quoted_question_marks() {
        let sql = format("select '?' from t where a = ?", &[Param::from(1i64)]);
        assert_eq!(sql, "select '?' from t where a = 1");
    }

    #[test]
    fn escaped_quotes_stay_inside_literals() {
        let sql = format("update t set a = 'x\\'?' ?", &[Param::Raw("where b = 1".to_string())]);
        assert_eq!(sql, "update t set a = 'x\\'?' where b = 1");
    }

    #[test]
    fn raw_fragments_bypass_escaping() {
        let sql = format(
            "select * from t ?",
            &[Param::Raw("where a = 1".to_string())],
        );
        assert_eq!(sql, "select * from t where a = 1");
    }

    #[test]
    fn surplus_placeholders_are_kept() {
        assert_eq!(format("a = ? and b = ?", &[Param::from(1i64)]), "a = 1 and b = ?");
    }
}
