//! The ledger-side asset record and the chaincode functions that manage it.

use serde::{Deserialize, Deserializer, Serialize};

/// Chaincode function names.
pub mod functions {
    /// Creates an asset; fails if the id already exists.
    pub const CREATE_ASSET: &str = "CreateAsset";
    /// Sets `status` and `timestamp` of an existing asset.
    pub const UPDATE_STATUS: &str = "UpdateStatus";
    /// Returns one asset as JSON.
    pub const READ_ASSET: &str = "ReadAsset";
    /// Returns every asset as a JSON array.
    pub const GET_ALL_ASSETS: &str = "GetAllAssets";
}

/// Phrase the chaincode puts in errors about an absent asset.
pub const MISSING_ASSET_MARKER: &str = "does not exist";

/// An asset as stored on the ledger.
///
/// Only `item_id` is guaranteed; rows written by older chaincode versions
/// may lack any other field, so each is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Ledger primary key.
    #[serde(rename = "itemID", default, deserialize_with = "null_as_empty")]
    pub item_id: String,
    /// Kind of item.
    #[serde(rename = "itemType", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Physical condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Donor identifier.
    #[serde(rename = "donorID", default, skip_serializing_if = "Option::is_none")]
    pub donor_id: Option<String>,
    /// Current custodian.
    #[serde(rename = "currentOwner", default, skip_serializing_if = "Option::is_none")]
    pub current_owner: Option<String>,
    /// Lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// RFC 3339 time of the last change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Arguments of a `CreateAsset` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    /// Ledger primary key.
    pub item_id: String,
    /// Kind of item.
    pub item_type: String,
    /// Physical condition.
    pub condition: String,
    /// Donor identifier.
    pub donor_id: String,
    /// Initial custodian.
    pub current_owner: String,
    /// Initial status.
    pub status: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl NewAsset {
    /// Positional chaincode arguments, in the order `CreateAsset` expects.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.item_id.clone(),
            self.item_type.clone(),
            self.condition.clone(),
            self.donor_id.clone(),
            self.current_owner.clone(),
            self.status.clone(),
            self.timestamp.clone(),
        ]
    }

    /// The asset the ledger holds once the creation commits.
    #[must_use]
    pub fn to_asset(&self) -> Asset {
        Asset {
            item_id: self.item_id.clone(),
            item_type: Some(self.item_type.clone()),
            condition: Some(self.condition.clone()),
            donor_id: Some(self.donor_id.clone()),
            current_owner: Some(self.current_owner.clone()),
            status: Some(self.status.clone()),
            timestamp: Some(self.timestamp.clone()),
        }
    }
}
