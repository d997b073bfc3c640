//! Parquet encoding for partition objects and reference tables.
//!
//! Bar partitions: `timestamp` (i64 epoch milliseconds, UTC), `open`, `high`,
//! `low`, `close`, `volume`, nullable `vwap` and `transactions`.

use crate::domain::{Bar, TickerDetails, TickerRecord, DETAILS_SCHEMA_VERSION};
use chrono::DateTime;
use polars::prelude::*;
use std::io::Cursor;
use thiserror::Error;

const BAR_COLUMNS: [&str; 8] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "vwap",
    "transactions",
];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("parquet encode failed: {0}")]
    Encode(String),

    #[error("parquet decode failed: {0}")]
    Decode(String),

    #[error("missing column '{0}'")]
    MissingColumn(String),
}

fn encode_err(e: PolarsError) -> CodecError {
    CodecError::Encode(e.to_string())
}

fn decode_err(e: PolarsError) -> CodecError {
    CodecError::Decode(e.to_string())
}

fn to_parquet(mut df: DataFrame) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(encode_err)?;
    Ok(buf)
}

fn from_parquet(bytes: &[u8]) -> Result<DataFrame, CodecError> {
    ParquetReader::new(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(decode_err)
}

/// Encode one partition's bars.
pub fn encode_bars(bars: &[Bar]) -> Result<Vec<u8>, CodecError> {
    let timestamps: Vec<i64> = bars.iter().map(|b| b.timestamp.timestamp_millis()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let vwaps: Vec<Option<f64>> = bars.iter().map(|b| b.vwap).collect();
    let transactions: Vec<Option<u64>> = bars.iter().map(|b| b.transactions).collect();

    let df = DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("vwap".into(), vwaps),
        Column::new("transactions".into(), transactions),
    ])
    .map_err(encode_err)?;
    to_parquet(df)
}

/// Decode a partition object back into bars.
pub fn decode_bars(bytes: &[u8]) -> Result<Vec<Bar>, CodecError> {
    let df = from_parquet(bytes)?;
    for name in BAR_COLUMNS {
        if df.column(name).is_err() {
            return Err(CodecError::MissingColumn(name.to_string()));
        }
    }

    let ts = df.column("timestamp").and_then(|c| c.i64().cloned()).map_err(decode_err)?;
    let open = df.column("open").and_then(|c| c.f64().cloned()).map_err(decode_err)?;
    let high = df.column("high").and_then(|c| c.f64().cloned()).map_err(decode_err)?;
    let low = df.column("low").and_then(|c| c.f64().cloned()).map_err(decode_err)?;
    let close = df.column("close").and_then(|c| c.f64().cloned()).map_err(decode_err)?;
    let volume = df.column("volume").and_then(|c| c.f64().cloned()).map_err(decode_err)?;
    let vwap = df.column("vwap").and_then(|c| c.f64().cloned()).map_err(decode_err)?;
    let txns = df
        .column("transactions")
        .and_then(|c| c.u64().cloned())
        .map_err(decode_err)?;

    (0..df.height())
        .map(|i| {
            let millis = ts
                .get(i)
                .ok_or_else(|| CodecError::Decode(format!("null timestamp at row {i}")))?;
            let timestamp = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| CodecError::Decode(format!("timestamp out of range at row {i}")))?;
            Ok(Bar {
                timestamp,
                open: open.get(i).unwrap_or(f64::NAN),
                high: high.get(i).unwrap_or(f64::NAN),
                low: low.get(i).unwrap_or(f64::NAN),
                close: close.get(i).unwrap_or(f64::NAN),
                volume: volume.get(i).unwrap_or(0.0),
                vwap: vwap.get(i),
                transactions: txns.get(i),
            })
        })
        .collect()
}

/// Encode the active ticker listing.
pub fn encode_tickers(records: &[TickerRecord]) -> Result<Vec<u8>, CodecError> {
    let text = |f: fn(&TickerRecord) -> &Option<String>| -> Vec<Option<String>> {
        records.iter().map(|r| f(r).clone()).collect()
    };
    let tickers: Vec<String> = records.iter().map(|r| r.ticker.clone()).collect();
    let active: Vec<Option<bool>> = records.iter().map(|r| r.active).collect();

    let df = DataFrame::new(vec![
        Column::new("ticker".into(), tickers),
        Column::new("name".into(), text(|r| &r.name)),
        Column::new("market".into(), text(|r| &r.market)),
        Column::new("locale".into(), text(|r| &r.locale)),
        Column::new("primary_exchange".into(), text(|r| &r.primary_exchange)),
        Column::new("type".into(), text(|r| &r.ticker_type)),
        Column::new("active".into(), active),
        Column::new("currency_name".into(), text(|r| &r.currency_name)),
        Column::new("cik".into(), text(|r| &r.cik)),
        Column::new("composite_figi".into(), text(|r| &r.composite_figi)),
        Column::new("last_updated_utc".into(), text(|r| &r.last_updated_utc)),
    ])
    .map_err(encode_err)?;
    to_parquet(df)
}

/// Ticker symbols from a stored listing, in stored order.
pub fn decode_ticker_symbols(bytes: &[u8]) -> Result<Vec<String>, CodecError> {
    let df = from_parquet(bytes)?;
    let col = df
        .column("ticker")
        .map_err(|_| CodecError::MissingColumn("ticker".into()))?;
    let ca = col.str().map_err(decode_err)?;
    Ok(ca.into_iter().flatten().map(str::to_string).collect())
}

/// Encode the ticker details table, tagged with the schema version.
pub fn encode_details(details: &[TickerDetails]) -> Result<Vec<u8>, CodecError> {
    let text = |f: fn(&TickerDetails) -> &Option<String>| -> Vec<Option<String>> {
        details.iter().map(|r| f(r).clone()).collect()
    };
    let count = |f: fn(&TickerDetails) -> Option<u64>| -> Vec<Option<u64>> {
        details.iter().map(f).collect()
    };
    let tickers: Vec<String> = details.iter().map(|r| r.ticker.clone()).collect();
    let active: Vec<Option<bool>> = details.iter().map(|r| r.active).collect();
    let market_cap: Vec<Option<f64>> = details.iter().map(|r| r.market_cap).collect();
    let version: Vec<u32> = vec![DETAILS_SCHEMA_VERSION; details.len()];

    let df = DataFrame::new(vec![
        Column::new("schema_version".into(), version),
        Column::new("ticker".into(), tickers),
        Column::new("name".into(), text(|r| &r.name)),
        Column::new("market".into(), text(|r| &r.market)),
        Column::new("locale".into(), text(|r| &r.locale)),
        Column::new("primary_exchange".into(), text(|r| &r.primary_exchange)),
        Column::new("type".into(), text(|r| &r.ticker_type)),
        Column::new("active".into(), active),
        Column::new("currency_name".into(), text(|r| &r.currency_name)),
        Column::new("cik".into(), text(|r| &r.cik)),
        Column::new("composite_figi".into(), text(|r| &r.composite_figi)),
        Column::new("share_class_figi".into(), text(|r| &r.share_class_figi)),
        Column::new("market_cap".into(), market_cap),
        Column::new("description".into(), text(|r| &r.description)),
        Column::new("homepage_url".into(), text(|r| &r.homepage_url)),
        Column::new("list_date".into(), text(|r| &r.list_date)),
        Column::new("sic_code".into(), text(|r| &r.sic_code)),
        Column::new("sic_description".into(), text(|r| &r.sic_description)),
        Column::new("total_employees".into(), count(|r| r.total_employees)),
        Column::new(
            "share_class_shares_outstanding".into(),
            count(|r| r.share_class_shares_outstanding),
        ),
        Column::new(
            "weighted_shares_outstanding".into(),
            count(|r| r.weighted_shares_outstanding),
        ),
        Column::new("round_lot".into(), count(|r| r.round_lot)),
    ])
    .map_err(encode_err)?;
    to_parquet(df)
}
