//! Reference data for tracked tickers.
//!
//! Detail records use an explicit field list. Anything the provider sends
//! beyond these fields is quarantined when the record is read, so a
//! provider-side schema change never silently adds columns to the stored
//! details table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the persisted details schema. Bump on any field change.
pub const DETAILS_SCHEMA_VERSION: u32 = 1;

/// Provider field names persisted in the details table.
pub const DETAIL_FIELDS: &[&str] = &[
    "ticker",
    "name",
    "market",
    "locale",
    "primary_exchange",
    "type",
    "active",
    "currency_name",
    "cik",
    "composite_figi",
    "share_class_figi",
    "market_cap",
    "description",
    "homepage_url",
    "list_date",
    "sic_code",
    "sic_description",
    "total_employees",
    "share_class_shares_outstanding",
    "weighted_shares_outstanding",
    "round_lot",
];

/// Fields known to the provider that are intentionally not persisted.
const DROPPED_DETAIL_FIELDS: &[&str] = &["address", "branding"];

/// One row of the active ticker listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default, rename = "type")]
    pub ticker_type: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub currency_name: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub composite_figi: Option<String>,
    #[serde(default)]
    pub last_updated_utc: Option<String>,
}

/// Detailed overview of a single ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default, rename = "type")]
    pub ticker_type: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub currency_name: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub composite_figi: Option<String>,
    #[serde(default)]
    pub share_class_figi: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage_url: Option<String>,
    #[serde(default)]
    pub list_date: Option<String>,
    #[serde(default)]
    pub sic_code: Option<String>,
    #[serde(default)]
    pub sic_description: Option<String>,
    #[serde(default)]
    pub total_employees: Option<u64>,
    #[serde(default)]
    pub share_class_shares_outstanding: Option<u64>,
    #[serde(default)]
    pub weighted_shares_outstanding: Option<u64>,
    #[serde(default)]
    pub round_lot: Option<u64>,
}

impl TickerDetails {
    /// Read a provider payload into the fixed schema.
    ///
    /// Returns the record plus the names of quarantined fields. Known-but-dropped
    /// fields (mailing address, branding assets) are discarded without being
    /// reported.
    pub fn from_provider_json(value: Value) -> Result<(Self, Vec<String>), serde_json::Error> {
        let mut quarantined: Vec<String> = match &value {
            Value::Object(map) => map
                .keys()
                .filter(|k| {
                    !DETAIL_FIELDS.contains(&k.as_str())
                        && !DROPPED_DETAIL_FIELDS.contains(&k.as_str())
                })
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        quarantined.sort();
        let details = serde_json::from_value(value)?;
        Ok((details, quarantined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_keep_known_fields_and_quarantine_the_rest() {
        let json = serde_json::json!({
            "ticker": "AAPL",
            "name": "Apple Inc.",
            "market": "stocks",
            "type": "CS",
            "active": true,
            "market_cap": 2.9e12,
            "total_employees": 161000,
            "list_date": "1980-12-12",
            "address": {"address1": "One Apple Park Way", "city": "Cupertino"},
            "branding": {"logo_url": "https://example.invalid/logo.svg"},
            "ticker_suffix": "X",
            "new_provider_field": [1, 2, 3]
        });

        let (details, quarantined) = TickerDetails::from_provider_json(json).unwrap();
        assert_eq!(details.ticker, "AAPL");
        assert_eq!(details.ticker_type.as_deref(), Some("CS"));
        assert_eq!(details.total_employees, Some(161_000));
        assert_eq!(quarantined, vec!["new_provider_field", "ticker_suffix"]);
    }

    #[test]
    fn quarantined_fields_never_serialize() {
        let json = serde_json::json!({"ticker": "SPY", "odd": 1});
        let (details, quarantined) = TickerDetails::from_provider_json(json).unwrap();
        assert_eq!(quarantined, vec!["odd"]);
        let out = serde_json::to_string(&details).unwrap();
        assert!(!out.contains("odd"));
    }

    #[test]
    fn details_without_ticker_are_rejected() {
        let json = serde_json::json!({"name": "nameless"});
        assert!(TickerDetails::from_provider_json(json).is_err());
    }

    #[test]
    fn ticker_record_tolerates_sparse_rows() {
        let rec: TickerRecord = serde_json::from_str(r#"{"ticker": "XYZ"}"#).unwrap();
        assert_eq!(rec.ticker, "XYZ");
        assert!(rec.name.is_none());
    }
}
