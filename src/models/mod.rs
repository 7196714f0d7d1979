use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format used for every `timestamp` field written to disk
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`]
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A single product listing found on one store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreListing {
    pub title: String,
    /// Free-form currency text, e.g. "R$ 3.499,00"
    pub price: String,
    pub url: String,
}

/// Store name -> listing, `None` when the product was not found there
pub type StorePrices = BTreeMap<String, Option<StoreListing>>;

/// Result of one fetch attempt for an item, as persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PriceRecord {
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
        #[serde(default)]
        timestamp: String,
    },
    Found {
        #[serde(flatten)]
        stores: StorePrices,
        #[serde(default)]
        timestamp: String,
    },
    /// Any other shape (hand edits, older tools); kept verbatim so the item
    /// still counts as processed
    Other(serde_json::Value),
}

impl PriceRecord {
    pub fn found(stores: StorePrices, timestamp: String) -> Self {
        Self::Found { stores, timestamp }
    }

    pub fn failed(error: impl Into<String>, raw_response: Option<String>, timestamp: String) -> Self {
        Self::Failed {
            error: error.into(),
            raw_response,
            timestamp,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Self::Found { timestamp, .. } | Self::Failed { timestamp, .. } => timestamp,
            Self::Other(value) => value
                .get("timestamp")
                .and_then(|t| t.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Found { .. } | Self::Other(_) => None,
        }
    }
}

/// Resumable mapping of item -> record, persisted as one JSON object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CheckpointStore {
    records: BTreeMap<String, PriceRecord>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, item: &str) -> bool {
        self.records.contains_key(item)
    }

    pub fn get(&self, item: &str) -> Option<&PriceRecord> {
        self.records.get(item)
    }

    pub fn insert(&mut self, item: impl Into<String>, record: PriceRecord) {
        self.records.insert(item.into(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde_json::json;

    #[test]
    fn timestamp_uses_fixed_format() {
        let stamp = timestamp_now();
        assert!(NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).is_ok());
        assert_eq!(stamp.len(), 19);
    }

    #[test]
    fn found_record_flattens_stores_next_to_timestamp() {
        let mut stores = StorePrices::new();
        stores.insert(
            "Amazon".to_string(),
            Some(StoreListing {
                title: "Galaxy S23 128GB".to_string(),
                price: "R$ 3.499,00".to_string(),
                url: "https://www.amazon.com.br/dp/B0BT".to_string(),
            }),
        );
        stores.insert("Magazine Luiza".to_string(), None);
        let record = PriceRecord::found(stores, "2024-03-01 10:00:00".to_string());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "Amazon": {
                    "title": "Galaxy S23 128GB",
                    "price": "R$ 3.499,00",
                    "url": "https://www.amazon.com.br/dp/B0BT"
                },
                "Magazine Luiza": null,
                "timestamp": "2024-03-01 10:00:00"
            })
        );

        let back: PriceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn error_records_are_read_back_as_failures() {
        let value = json!({"error": "rate limit exceeded", "timestamp": "2024-03-01 10:00:00"});
        let record: PriceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.error(), Some("rate limit exceeded"));
        assert_eq!(record.timestamp(), "2024-03-01 10:00:00");

        let serialized = serde_json::to_value(&record).unwrap();
        assert!(serialized.get("raw_response").is_none());
    }

    #[test]
    fn unexpected_record_shapes_are_kept_verbatim() {
        let doc = json!({
            "notebook dell inspiron": {"error": "timeout", "timestamp": "2024-03-01 10:00:00"},
            "smart tv 50 polegadas": {
                "Amazon": {"title": "TV", "price": 2999.0, "url": "u"},
                "timestamp": "2024-03-01 10:01:00"
            },
            "geladeira": "see spreadsheet"
        });

        let store: CheckpointStore = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("notebook dell inspiron").unwrap().error(), Some("timeout"));
        assert!(matches!(store.get("smart tv 50 polegadas"), Some(PriceRecord::Other(_))));
        assert_eq!(store.get("smart tv 50 polegadas").unwrap().timestamp(), "2024-03-01 10:01:00");
        assert_eq!(store.get("geladeira").unwrap().timestamp(), "");

        assert_eq!(serde_json::to_value(&store).unwrap(), doc);
    }

    #[test]
    fn store_serializes_as_plain_object() {
        let mut store = CheckpointStore::new();
        store.insert(
            "notebook dell inspiron",
            PriceRecord::failed("boom", None, "2024-03-01 10:00:00".to_string()),
        );
        let value = serde_json::to_value(&store).unwrap();
        assert_eq!(
            value,
            json!({"notebook dell inspiron": {"error": "boom", "timestamp": "2024-03-01 10:00:00"}})
        );
        assert!(store.contains("notebook dell inspiron"));
        assert_eq!(store.items().collect::<Vec<_>>(), vec!["notebook dell inspiron"]);
    }
}
