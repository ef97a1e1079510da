//! User domain model.
//!
//! # Responsibility
//! - Define the canonical user record shared by repository, service and
//!   request boundary.
//! - Map the status enumeration to its single-character storage code.
//!
//! # Invariants
//! - `id` is assigned by the store on create and never reused.
//! - `status` keeps the raw code so out-of-enum values reach the validator
//!   instead of failing at decode time.
//! - Updates replace every mutable field; there is no partial patch.

use serde::{Deserialize, Deserializer, Serialize};

/// Store-assigned user identifier.
pub type UserId = i64;

/// Lifecycle state of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserStatus {
    /// Account is in use.
    Active,
    /// Account is suspended but kept.
    Inactive,
    /// Account is closed.
    Terminated,
}

impl UserStatus {
    /// Single-character code used in payloads and storage.
    pub fn code(self) -> &'static str {
        match self {
            Self::Active => "A",
            Self::Inactive => "I",
            Self::Terminated => "T",
        }
    }

    /// Parses a status code. Only the exact upper-case codes are accepted.
    pub fn from_code(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Self::Active),
            "I" => Some(Self::Inactive),
            "T" => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// Canonical user record.
///
/// Missing or `null` JSON fields decode to empty values so the validator can
/// report them as `missing` instead of failing the whole decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// `None` until the store assigns an identity.
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub first_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,
    /// Serialized as `user_status` to match the external schema.
    #[serde(default, rename = "user_status", deserialize_with = "null_as_empty")]
    pub status: String,
    #[serde(default)]
    pub department: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl User {
    /// Creates a record without identity.
    pub fn new(
        user_name: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        status: UserStatus,
    ) -> Self {
        Self {
            id: None,
            user_name: user_name.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            status: status.code().to_string(),
            department: None,
        }
    }

    /// Builder-style setter for the optional department.
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Typed status, or `None` when the raw code is outside the enumeration.
    pub fn parsed_status(&self) -> Option<UserStatus> {
        UserStatus::from_code(self.status.as_str())
    }

    /// Returns a copy of the mutable fields with identity cleared.
    ///
    /// Useful for comparing a stored record against its creation input.
    pub fn without_id(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }
}
