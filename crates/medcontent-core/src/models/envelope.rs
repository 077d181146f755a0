//! Broadcast envelope: the change notification exchanged between clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{CollectionName, Item, ItemId};
use crate::util::unix_millis_now;

/// Kind of change carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
    /// Complete-collection payload used for recovery.
    Full,
}

/// `{contentType, action, data, timestamp}` as sent over the broadcast channel.
///
/// `data` is kept as raw JSON and decoded per action by the receiver, so a
/// malformed payload only invalidates that one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub content_type: String,
    pub action: ChangeAction,
    pub data: Value,
    pub timestamp: i64,
}

/// `data` of a delete envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub id: ItemId,
    /// Deleter's stamp; absent on envelopes from clients that do not send one.
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// `data` of a full-collection envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullPayload {
    pub collection: Vec<Item>,
}

impl Envelope {
    fn new(collection: &CollectionName, action: ChangeAction, data: Value) -> Self {
        Self {
            content_type: collection.to_string(),
            action,
            data,
            timestamp: unix_millis_now(),
        }
    }

    pub fn add(collection: &CollectionName, item: &Item) -> Result<Self> {
        Ok(Self::new(
            collection,
            ChangeAction::Add,
            serde_json::to_value(item)?,
        ))
    }

    pub fn update(collection: &CollectionName, item: &Item) -> Result<Self> {
        Ok(Self::new(
            collection,
            ChangeAction::Update,
            serde_json::to_value(item)?,
        ))
    }

    pub fn delete(
        collection: &CollectionName,
        id: &ItemId,
        updated_at: Option<i64>,
    ) -> Result<Self> {
        let payload = DeletePayload {
            id: id.clone(),
            updated_at,
        };
        Ok(Self::new(
            collection,
            ChangeAction::Delete,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn full(collection: &CollectionName, items: Vec<Item>) -> Result<Self> {
        let payload = FullPayload { collection: items };
        Ok(Self::new(
            collection,
            ChangeAction::Full,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let collection = CollectionName::from("offices");
        let item = Item::new("office-5")
            .with_field("name", "Kano Office")
            .with_updated_at(100);
        let envelope = Envelope::add(&collection, &item).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["contentType"], "offices");
        assert_eq!(value["action"], "add");
        assert_eq!(
            value["data"],
            json!({"id": "office-5", "updatedAt": 100, "name": "Kano Office"})
        );
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn delete_payload_omits_missing_stamp() {
        let collection = CollectionName::from("training");
        let envelope = Envelope::delete(&collection, &ItemId::from("training-1"), None).unwrap();
        assert_eq!(envelope.data, json!({"id": "training-1"}));
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let raw = r#"{"contentType":"offices","action":"explode","data":{},"timestamp":1}"#;
        assert!(Envelope::from_json(raw).is_err());
    }

    #[test]
    fn parses_envelope_from_other_clients() {
        let raw = r#"{"contentType":"downloads","action":"full",
            "data":{"collection":[{"id":"d1","updatedAt":3}]},"timestamp":9}"#;
        let envelope = Envelope::from_json(raw).unwrap();
        assert_eq!(envelope.action, ChangeAction::Full);
        let payload: FullPayload = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(payload.collection.len(), 1);
        assert_eq!(payload.collection[0].updated_at, 3);
    }
}
