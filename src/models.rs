use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub title: Option<String>,
    pub phone_number: Option<String>,
    pub bar_number: Option<String>,
    pub organization: Option<String>,
    pub preferences: serde_json::Value,
    pub role: String,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub preferences: serde_json::Value,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = cases)]
#[diesel(belongs_to(User))]
pub struct Case {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cases)]
pub struct NewCase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = case_participants)]
#[diesel(belongs_to(Case))]
pub struct Participant {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub added_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = case_participants)]
pub struct NewParticipant {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Case))]
pub struct Document {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub document_type: String,
    pub status: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub document_type: String,
    pub status: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_versions)]
#[diesel(belongs_to(Document))]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub file_path: String,
    pub created_by: Uuid,
    pub comment: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub file_path: String,
    pub created_by: Uuid,
    pub comment: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = case_notes)]
#[diesel(belongs_to(Case))]
pub struct CaseNote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub is_private: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = case_notes)]
pub struct NewCaseNote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub is_private: bool,
}

/// Error returned when a stored or submitted enumeration value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} '{value}'. Allowed values: {}", .allowed.join(", "))]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
    pub allowed: &'static [&'static str],
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [&'static str] = &[$($text),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        field: $field,
                        value: value.to_string(),
                        allowed: Self::ALL,
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(UserRole, "user role", {
    Admin => "admin",
    Attorney => "attorney",
    Paralegal => "paralegal",
    Client => "client",
});

string_enum!(
    /// Case workflow status. Any value may follow any other.
    CaseStatus, "case status", {
    Active => "active",
    Pending => "pending",
    Closed => "closed",
    Archived => "archived",
});

string_enum!(
    /// Document workflow status. Transitions are unrestricted.
    DocumentStatus, "document status", {
    Draft => "draft",
    Review => "review",
    Final => "final",
    Archived => "archived",
});

string_enum!(ParticipantRole, "participant role", {
    LeadAttorney => "lead_attorney",
    AssociateAttorney => "associate_attorney",
    Paralegal => "paralegal",
    Expert => "expert",
    Client => "client",
});
