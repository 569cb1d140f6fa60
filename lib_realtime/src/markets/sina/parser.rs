//! # Realtime Payload Parser
//!
//! A payload is a sequence of `;`-separated records of the form
//! `var hq_str_sh600000="name,open,prev_close,price,high,low,bid,ask,volume,...,date,time,00";`.
//!
//! Parsing is lenient. Records without a key, without a quoted value or with
//! fewer than six fields are skipped; a numeric field that does not parse
//! becomes zero. One bad record never fails the rest of the payload.

use crate::models::Quote;

/// Marker that precedes the symbol in every record key.
pub const SYMBOL_PREFIX: &str = "hq_str_";

/// Records shorter than this carry no usable price.
const MIN_FIELDS: usize = 6;
/// Full equity records end with a date/time pair and a status field.
const MIN_FIELDS_WITH_TIMESTAMP: usize = 32;
const VOLUME_FIELD: usize = 8;

/// Parses every well-formed record in `raw`, in payload order.
pub fn parse_payload(raw: &str) -> Vec<Quote> {
    raw.split(';').filter_map(parse_record).collect()
}

/// Parses one `key="value"` record, `None` when it is malformed or too short.
pub fn parse_record(record: &str) -> Option<Quote> {
    let record = record.trim();
    if record.is_empty() {
        return None;
    }

    let eq = record.find('=')?;
    let key = &record[..eq];
    let start = key.rfind(SYMBOL_PREFIX)?;
    let symbol = key[start + SYMBOL_PREFIX.len()..].trim();
    if symbol.is_empty() {
        return None;
    }

    let open_quote = record.find('"')?;
    let close_quote = record.rfind('"')?;
    if close_quote <= open_quote {
        return None;
    }
    let body = &record[open_quote + 1..close_quote];

    let mut fields: Vec<&str> = body.split(',').collect();
    // Most payloads terminate the field list with a comma.
    if fields.len() > 1 && fields.last().is_some_and(|f| f.trim().is_empty()) {
        fields.pop();
    }
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let n = fields.len();
    let volume = if n > VOLUME_FIELD {
        parse_i64(fields[VOLUME_FIELD])
    } else {
        0
    };
    let timestamp = if n >= MIN_FIELDS_WITH_TIMESTAMP {
        format!("{} {}", fields[n - 3].trim(), fields[n - 2].trim())
    } else {
        String::new()
    };

    Some(Quote {
        symbol: symbol.to_string(),
        name: fields[0].trim().to_string(),
        open: parse_f64(fields[1]),
        previous_close: parse_f64(fields[2]),
        price: parse_f64(fields[3]),
        high: parse_f64(fields[4]),
        low: parse_f64(fields[5]),
        volume,
        timestamp,
    })
}

fn parse_f64(field: &str) -> f64 {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_i64(field: &str) -> i64 {
    let field = field.trim();
    field
        .parse::<i64>()
        .or_else(|_| field.parse::<f64>().map(|v| v as i64))
        .unwrap_or(0)
}
