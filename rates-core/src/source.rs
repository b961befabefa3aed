use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::types::Quote;

/// Источник снимков котировок.
///
/// Адрес и настройки фиксируются при создании, повторов внутри нет:
/// политика повторов принадлежит планировщику.
pub trait QuoteSource: Send {
    fn fetch(&self) -> Result<Vec<Quote>, FetchError>;
}

impl<S: QuoteSource + Sync + ?Sized> QuoteSource for std::sync::Arc<S> {
    fn fetch(&self) -> Result<Vec<Quote>, FetchError> {
        (**self).fetch()
    }
}

/// Разбирает JSON-ответ источника вида
/// `[{"moneda":"USD","casa":"oficial","nombre":"Oficial","compra":900,"venta":940,
///   "fechaActualizacion":"2024-10-18T15:00:00.000Z"}, ...]`.
///
/// Правила:
/// - верхний уровень: непустой массив объектов
/// - id: поле `id`, иначе `casa` (с префиксом `moneda:` если есть `moneda`)
/// - имя: `nombre`, иначе `casa`, иначе id
/// - `compra`/`venta`: число или числовая строка, точный decimal
/// - `fechaActualizacion`: RFC 3339
///
/// Любое нарушение отклоняет весь снимок.
pub fn parse_snapshot(body: &str) -> Result<Vec<Quote>, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(format!("invalid json: {e}")))?;

    let items = value
        .as_array()
        .ok_or_else(|| FetchError::MalformedResponse("top-level value is not an array".into()))?;

    if items.is_empty() {
        return Err(FetchError::MalformedResponse("empty snapshot".into()));
    }

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_quote(idx, item))
        .collect()
}

fn parse_quote(idx: usize, item: &Value) -> Result<Quote, FetchError> {
    let obj = item
        .as_object()
        .ok_or_else(|| malformed(idx, "element", "not an object"))?;

    let id = quote_id(idx, obj)?;
    let display_name = opt_str(obj, "nombre")
        .or_else(|| opt_str(obj, "casa"))
        .unwrap_or(id.as_str())
        .to_string();

    Ok(Quote {
        buy: decimal_field(idx, obj, "compra")?,
        sell: decimal_field(idx, obj, "venta")?,
        observed_at: timestamp_field(idx, obj, "fechaActualizacion")?,
        id,
        display_name,
    })
}

fn quote_id(idx: usize, obj: &Map<String, Value>) -> Result<String, FetchError> {
    let id = match (obj.get("id"), obj.get("casa")) {
        (Some(v), _) => v
            .as_str()
            .ok_or_else(|| malformed(idx, "id", "not a string"))?
            .trim()
            .to_string(),
        (None, Some(v)) => {
            let casa = v
                .as_str()
                .ok_or_else(|| malformed(idx, "casa", "not a string"))?
                .trim();
            match opt_str(obj, "moneda").map(str::trim) {
                Some(moneda) if !moneda.is_empty() && !casa.is_empty() => {
                    format!("{moneda}:{casa}")
                }
                _ => casa.to_string(),
            }
        }
        (None, None) => return Err(malformed(idx, "casa|id", "missing")),
    };

    if id.is_empty() {
        return Err(malformed(idx, "casa|id", "empty"));
    }
    Ok(id)
}

fn opt_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn decimal_field(idx: usize, obj: &Map<String, Value>, key: &str) -> Result<Decimal, FetchError> {
    let raw = match obj.get(key) {
        // Number::to_string даёт кратчайшее представление: 905.5 -> "905.5"
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err(malformed(idx, key, "not a number")),
        None => return Err(malformed(idx, key, "missing")),
    };

    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| malformed(idx, key, &format!("invalid decimal {raw:?}")))
}

fn timestamp_field(
    idx: usize,
    obj: &Map<String, Value>,
    key: &str,
) -> Result<DateTime<Utc>, FetchError> {
    let raw = obj
        .get(key)
        .ok_or_else(|| malformed(idx, key, "missing"))?
        .as_str()
        .ok_or_else(|| malformed(idx, key, "not a string"))?;

    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| malformed(idx, key, &format!("invalid timestamp {raw:?}: {e}")))
}

fn malformed(idx: usize, field: &str, what: &str) -> FetchError {
    FetchError::MalformedResponse(format!("element #{idx}: {field} {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"[
        {"moneda":"USD","casa":"oficial","nombre":"Oficial","compra":905,"venta":945.5,
         "fechaActualizacion":"2024-10-18T15:00:00.000Z"},
        {"moneda":"USD","casa":"blue","nombre":"Blue","compra":"1180.10","venta":"1200",
         "fechaActualizacion":"2024-10-18T12:30:00-03:00"}
    ]"#;

    fn err_text(body: &str) -> String {
        match parse_snapshot(body) {
            Err(FetchError::MalformedResponse(msg)) => msg,
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn parses_dolarapi_shape_in_order() {
        let quotes = parse_snapshot(SAMPLE).unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].id, "USD:oficial");
        assert_eq!(quotes[0].display_name, "Oficial");
        assert_eq!(quotes[0].buy, dec!(905));
        assert_eq!(quotes[0].sell, dec!(945.5));
        assert_eq!(quotes[1].id, "USD:blue");
        assert_eq!(quotes[1].buy, dec!(1180.10));
        assert_eq!(
            quotes[1].observed_at.to_rfc3339(),
            "2024-10-18T15:30:00+00:00"
        );
    }

    #[test]
    fn decimal_from_json_number_is_exact() {
        let body = r#"[{"casa":"tarjeta","compra":1447.1,"venta":1447.3,
            "fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        let quotes = parse_snapshot(body).unwrap();
        assert_eq!(quotes[0].buy.to_string(), "1447.1");
        assert_eq!(quotes[0].sell.to_string(), "1447.3");
    }

    #[test]
    fn explicit_id_wins_and_name_falls_back() {
        let body = r#"[{"id":"eur-oficial","casa":"oficial","compra":1,"venta":2,
            "fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        let q = &parse_snapshot(body).unwrap()[0];
        assert_eq!(q.id, "eur-oficial");
        assert_eq!(q.display_name, "oficial");

        let body = r#"[{"casa":"mep","compra":1,"venta":2,
            "fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        let q = &parse_snapshot(body).unwrap()[0];
        assert_eq!(q.id, "mep");
        assert_eq!(q.display_name, "mep");
    }

    #[test]
    fn rejects_non_array_and_empty() {
        assert!(err_text(r#"{"casa":"oficial"}"#).contains("not an array"));
        assert!(err_text("[]").contains("empty snapshot"));
        assert!(err_text("<html>").contains("invalid json"));
    }

    #[test]
    fn rejects_missing_or_empty_keys() {
        let no_id = r#"[{"compra":1,"venta":2,"fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        assert!(err_text(no_id).contains("casa|id missing"));

        let empty_id = r#"[{"casa":"  ","compra":1,"venta":2,
            "fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        assert!(err_text(empty_id).contains("casa|id empty"));

        let no_sell = r#"[{"casa":"blue","compra":1,"fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        assert!(err_text(no_sell).contains("venta missing"));

        let no_ts = r#"[{"casa":"blue","compra":1,"venta":2}]"#;
        assert!(err_text(no_ts).contains("fechaActualizacion missing"));
    }

    #[test]
    fn rejects_bad_values_and_names_the_element() {
        let body = r#"[
            {"casa":"oficial","compra":1,"venta":2,"fechaActualizacion":"2024-10-18T15:00:00Z"},
            {"casa":"blue","compra":null,"venta":2,"fechaActualizacion":"2024-10-18T15:00:00Z"}
        ]"#;
        let msg = err_text(body);
        assert!(msg.contains("element #1"), "{msg}");
        assert!(msg.contains("compra not a number"), "{msg}");

        let bad_ts = r#"[{"casa":"blue","compra":1,"venta":2,"fechaActualizacion":"yesterday"}]"#;
        assert!(err_text(bad_ts).contains("invalid timestamp"));

        let bad_num = r#"[{"casa":"blue","compra":"abc","venta":2,
            "fechaActualizacion":"2024-10-18T15:00:00Z"}]"#;
        assert!(err_text(bad_num).contains("invalid decimal"));
    }
}
