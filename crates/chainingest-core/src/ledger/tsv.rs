//! Tab-separated export of events and currencies for bulk loading.
//!
//! Column order is fixed. Unset optional fields are written as [`NULL_MARKER`];
//! string fields escape backslash, tab, CR and LF so a literal `\N` never
//! collides with the marker. Byte blobs are lowercase hex.

use chrono::{NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use super::currency::{Currency, CurrencyFormat};
use super::event::Event;

/// Written in place of unset optional fields.
pub const NULL_MARKER: &str = "\\N";

pub const EVENT_COLUMNS: [&str; 12] = [
    "block",
    "transaction",
    "sort_key",
    "time",
    "address",
    "currency",
    "effect",
    "sign",
    "valid",
    "failed",
    "extra",
    "extra_indexed",
];

pub const CURRENCY_COLUMNS: [&str; 5] = ["id", "name", "symbol", "decimals", "description"];

/// Whole seconds print without a fraction; sub-second times keep 3, 6 or 9
/// digits, whichever is exact.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Error)]
pub enum TsvError {
    #[error("expected {expected} columns, got {got}")]
    ColumnCount { expected: usize, got: usize },

    #[error("invalid value in column '{column}': {value}")]
    InvalidField { column: &'static str, value: String },
}

/// How the `currency` column is resolved for one module.
#[derive(Debug, Clone)]
pub struct ExportPolicy {
    pub module: String,
    pub format: CurrencyFormat,
    /// Written for every row of a static single-currency module.
    pub static_currency: Option<String>,
}

impl ExportPolicy {
    fn resolve(&self, currency: Option<&str>) -> Option<String> {
        match (self.format, currency) {
            (CurrencyFormat::Static, _) => self.static_currency.clone(),
            (_, Some(id)) => Some(format!("{}/{}", self.module, id)),
            (_, None) => None,
        }
    }

    /// Value of the `id` column of a currency row. Matches what the event
    /// `currency` column holds for the same currency, so the two tables join.
    fn currency_key(&self, id: &str) -> String {
        self.resolve(Some(id)).unwrap_or_else(|| id.to_string())
    }

    fn currency_id(&self, column: String) -> Result<String, TsvError> {
        match self.format {
            CurrencyFormat::Static => Ok(column),
            _ => self
                .unresolve(Some(column))
                .map(|id| id.unwrap_or_default()),
        }
    }

    fn unresolve(&self, column: Option<String>) -> Result<Option<String>, TsvError> {
        match (self.format, column) {
            (CurrencyFormat::Static, _) | (_, None) => Ok(None),
            (_, Some(full)) => {
                let prefix = format!("{}/", self.module);
                full.strip_prefix(&prefix)
                    .map(|id| Some(id.to_string()))
                    .ok_or(TsvError::InvalidField {
                        column: "currency",
                        value: full.clone(),
                    })
            }
        }
    }
}

/// Encode one event as a TSV line (no trailing newline).
pub fn encode_event(event: &Event, policy: &ExportPolicy) -> String {
    let sign = if event.is_outflow() { "-1" } else { "1" };
    let valid = if event.is_settled() { "1" } else { "0" };
    let cols = [
        event.block.to_string(),
        opt_text(event.transaction.as_deref()),
        event.sort_key.to_string(),
        event.time.format(TIME_FORMAT).to_string(),
        escape(&event.address),
        opt_text(policy.resolve(event.currency.as_deref()).as_deref()),
        escape(&event.effect),
        sign.to_string(),
        valid.to_string(),
        event
            .failed
            .map(|f| if f { "1" } else { "0" }.to_string())
            .unwrap_or_else(|| NULL_MARKER.to_string()),
        opt_bytes(event.extra.as_deref()),
        opt_bytes(event.extra_indexed.as_deref()),
    ];
    cols.join("\t")
}

/// Parse a line produced by [`encode_event`]. Derived columns are ignored.
pub fn parse_event(line: &str, policy: &ExportPolicy) -> Result<Event, TsvError> {
    let cols = split(line, EVENT_COLUMNS.len())?;

    let block = cols[0].parse().map_err(|_| invalid("block", cols[0]))?;
    let sort_key = cols[2].parse().map_err(|_| invalid("sort_key", cols[2]))?;
    let time = NaiveDateTime::parse_from_str(cols[3], TIME_FORMAT)
        .map(|t| Utc.from_utc_datetime(&t))
        .map_err(|_| invalid("time", cols[3]))?;
    let failed = match cols[9] {
        NULL_MARKER => None,
        "1" => Some(true),
        "0" => Some(false),
        other => return Err(invalid("failed", other)),
    };

    Ok(Event {
        block,
        transaction: parse_opt_text(cols[1]),
        sort_key,
        time,
        address: unescape(cols[4]),
        currency: policy.unresolve(parse_opt_text(cols[5]))?,
        effect: unescape(cols[6]),
        failed,
        extra: parse_opt_bytes("extra", cols[10])?,
        extra_indexed: parse_opt_bytes("extra_indexed", cols[11])?,
    })
}

pub fn encode_currency(currency: &Currency, policy: &ExportPolicy) -> String {
    [
        escape(&policy.currency_key(&currency.id)),
        opt_text(currency.name.as_deref()),
        opt_text(currency.symbol.as_deref()),
        currency
            .decimals
            .map(|d| d.to_string())
            .unwrap_or_else(|| NULL_MARKER.to_string()),
        opt_text(currency.description.as_deref()),
    ]
    .join("\t")
}

pub fn parse_currency(line: &str, policy: &ExportPolicy) -> Result<Currency, TsvError> {
    let cols = split(line, CURRENCY_COLUMNS.len())?;
    let decimals = match cols[3] {
        NULL_MARKER => None,
        d => Some(d.parse().map_err(|_| invalid("decimals", d))?),
    };
    Ok(Currency {
        id: policy.currency_id(unescape(cols[0]))?,
        name: parse_opt_text(cols[1]),
        symbol: parse_opt_text(cols[2]),
        decimals,
        description: parse_opt_text(cols[4]),
    })
}

fn split(line: &str, expected: usize) -> Result<Vec<&str>, TsvError> {
    let cols: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if cols.len() != expected {
        return Err(TsvError::ColumnCount {
            expected,
            got: cols.len(),
        });
    }
    Ok(cols)
}

fn invalid(column: &'static str, value: &str) -> TsvError {
    TsvError::InvalidField {
        column,
        value: value.to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn opt_text(v: Option<&str>) -> String {
    v.map(escape).unwrap_or_else(|| NULL_MARKER.to_string())
}

fn parse_opt_text(col: &str) -> Option<String> {
    (col != NULL_MARKER).then(|| unescape(col))
}

fn opt_bytes(v: Option<&[u8]>) -> String {
    v.map(hex::encode).unwrap_or_else(|| NULL_MARKER.to_string())
}

fn parse_opt_bytes(column: &'static str, col: &str) -> Result<Option<Vec<u8>>, TsvError> {
    if col == NULL_MARKER {
        return Ok(None);
    }
    hex::decode(col).map(Some).map_err(|_| invalid(column, col))
}
