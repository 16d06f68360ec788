//! Inputs and results of coordinated operations.

use assetlink_ledger_gateway::{Asset, NewAsset};
use assetlink_offchain_store::{DonorInfo, EnrichmentRecord, RecipientInfo, DEFAULT_QUANTITY};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Input of
/// [`ConsistencyCoordinator::create_record`](crate::ConsistencyCoordinator::create_record).
///
/// The five ledger fields are required; everything else is enrichment and
/// lands in the off-chain store. The identifier and timestamp are never
/// supplied by the caller.
///
/// # Examples
///
/// ```
/// use assetlink_coordinator::NewRecord;
///
/// let input = NewRecord::builder()
///     .item_type("chair")
///     .condition("good")
///     .donor_id("d1")
///     .current_owner("d1")
///     .status("available")
///     .category("furniture")
///     .build();
/// assert!(input.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    /// Kind of item.
    pub item_type: String,
    /// Physical condition.
    pub condition: String,
    /// Donor identifier.
    #[serde(rename = "donorID")]
    pub donor_id: String,
    /// Initial custodian.
    pub current_owner: String,
    /// Initial lifecycle status.
    pub status: String,

    /// Free-form category.
    #[serde(default)]
    pub category: Option<String>,
    /// Number of physical units; defaults to one.
    #[serde(default)]
    pub quantity: Option<u32>,
    /// Donor contact details.
    #[serde(default)]
    pub donor_info: Option<DonorInfo>,
    /// Recipient details.
    #[serde(default)]
    pub recipient_info: Option<RecipientInfo>,
    /// Ordered image references.
    #[serde(default)]
    #[builder(default)]
    pub images: Vec<String>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Appraised value.
    #[serde(default)]
    pub appraisal_value: Option<f64>,
}

impl NewRecord {
    /// Checks the input before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidInput`] if a ledger field is blank,
    /// `quantity` is zero, or `appraisal_value` is negative or not finite.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        for (field, value) in [
            ("itemType", &self.item_type),
            ("condition", &self.condition),
            ("donorID", &self.donor_id),
            ("currentOwner", &self.current_owner),
            ("status", &self.status),
        ] {
            if value.trim().is_empty() {
                return Err(CoordinatorError::invalid_input(format!("{field} must not be empty")));
            }
        }
        if self.quantity == Some(0) {
            return Err(CoordinatorError::invalid_input("quantity must be at least 1"));
        }
        if let Some(value) = self.appraisal_value {
            if !value.is_finite() || value < 0.0 {
                return Err(CoordinatorError::invalid_input(format!(
                    "appraisalValue must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn to_new_asset(&self, item_id: &str, timestamp: &str) -> NewAsset {
        NewAsset {
            item_id: item_id.to_owned(),
            item_type: self.item_type.clone(),
            condition: self.condition.clone(),
            donor_id: self.donor_id.clone(),
            current_owner: self.current_owner.clone(),
            status: self.status.clone(),
            timestamp: timestamp.to_owned(),
        }
    }

    pub(crate) fn to_enrichment(&self, item_id: &str) -> EnrichmentRecord {
        EnrichmentRecord {
            category: self.category.clone(),
            quantity: self.quantity.unwrap_or(DEFAULT_QUANTITY),
            donor_info: self.donor_info.clone(),
            recipient_info: self.recipient_info.clone(),
            images: self.images.clone(),
            notes: self.notes.clone(),
            appraisal_value: self.appraisal_value,
            ..EnrichmentRecord::new(item_id)
        }
    }
}

/// A record written to both stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedRecord {
    /// The asset as read back from the ledger.
    #[serde(rename = "ledger")]
    pub asset: Asset,
    /// The enrichment as written off-chain.
    #[serde(rename = "offchain")]
    pub enrichment: EnrichmentRecord,
}

impl CreatedRecord {
    /// Identifier shared by both halves.
    #[must_use]
    pub fn item_id(&self) -> &str {
        &self.asset.item_id
    }
}

/// Result of
/// [`ConsistencyCoordinator::replay_enrichment`](crate::ConsistencyCoordinator::replay_enrichment).
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// The enrichment was missing and has now been written.
    Written(EnrichmentRecord),
    /// An enrichment already existed; it is returned unchanged.
    AlreadyPresent(EnrichmentRecord),
}

impl ReplayOutcome {
    /// The enrichment now held by the off-chain store.
    #[must_use]
    pub fn record(&self) -> &EnrichmentRecord {
        match self {
            Self::Written(record) | Self::AlreadyPresent(record) => record,
        }
    }

    /// Returns `true` if this replay performed the write.
    #[must_use]
    pub fn was_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}
