//! Enrichment record data model.
//!
//! Enrichment records hold the mutable, richer metadata about an asset that
//! does not belong on the ledger: who donated it, who receives it, photos,
//! appraisal notes. Each record references exactly one ledger asset through
//! its `itemID`.
//!
//! The JSON shape mirrors the field names used across the rest of the
//! system (`itemID`, `donorInfo`, `appraisalValue`, ...), so records written
//! by one service can be read by another without a translation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default quantity for a freshly created record.
pub const DEFAULT_QUANTITY: u32 = 1;

fn default_quantity() -> u32 {
    DEFAULT_QUANTITY
}

/// Contact details of the donor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorInfo {
    /// Donor's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Donor's email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Donor's phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_no: Option<String>,
}

/// Details of the receiving institution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientInfo {
    /// Receiving school.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    /// Contact person or number at the school.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Off-chain enrichment for a single ledger asset.
///
/// # Examples
///
/// ```
/// use assetlink_offchain_store::EnrichmentRecord;
///
/// let record = EnrichmentRecord::new("donation-42");
/// assert_eq!(record.quantity, 1);
/// assert!(record.images.is_empty());
/// assert!(record.category.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRecord {
    /// Ledger asset this record enriches.
    #[serde(rename = "itemID")]
    pub item_id: String,

    /// Free-form category (e.g. "furniture").
    #[serde(default)]
    pub category: Option<String>,

    /// Number of physical units.
    #[serde(default = "default_quantity")]
    pub quantity: u32,

    /// Donor contact details.
    #[serde(default)]
    pub donor_info: Option<DonorInfo>,

    /// Recipient details.
    #[serde(default)]
    pub recipient_info: Option<RecipientInfo>,

    /// Ordered image references.
    #[serde(default)]
    pub images: Vec<String>,

    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,

    /// Appraised value in the deployment's currency.
    #[serde(default)]
    pub appraisal_value: Option<f64>,

    /// When the record was first built.
    pub created_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    /// Creates a record with default enrichment for `item_id`: quantity 1,
    /// no images, every optional field absent.
    #[must_use]
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            category: None,
            quantity: DEFAULT_QUANTITY,
            donor_info: None,
            recipient_info: None,
            images: Vec::new(),
            notes: None,
            appraisal_value: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_names() {
        let mut record = EnrichmentRecord::new("donation-1");
        record.donor_info = Some(DonorInfo {
            name: Some("Ana".into()),
            email: None,
            contact_no: Some("555-0100".into()),
        });
        record.appraisal_value = Some(12.5);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["itemID"], "donation-1");
        assert_eq!(json["quantity"], 1);
        assert_eq!(json["donorInfo"]["contactNo"], "555-0100");
        assert!(json["donorInfo"].get("email").is_none());
        assert_eq!(json["appraisalValue"], 12.5);
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let json = r#"{"itemID":"donation-7","createdAt":"2024-05-01T10:00:00Z"}"#;
        let record: EnrichmentRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.item_id, "donation-7");
        assert_eq!(record.quantity, DEFAULT_QUANTITY);
        assert!(record.images.is_empty());
        assert!(record.donor_info.is_none());
        assert!(record.recipient_info.is_none());
        assert!(record.notes.is_none());
    }
}
