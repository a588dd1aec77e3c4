//! Case-scoped authorization.
//!
//! Every case-scoped handler resolves the caller's standing on the case
//! through [`authorize_case`] and then asks the resulting [`CaseAccess`]
//! what it may do. Documents, versions and notes never re-derive ownership
//! on their own.

use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Case, Participant, ParticipantRole};
use crate::schema::{case_participants, cases};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "access", content = "role", rename_all = "snake_case")]
pub enum CaseAccess {
    Owner,
    Participant(ParticipantRole),
    None,
}

impl CaseAccess {
    /// Resolves the requester against the case owner and its participant list.
    pub fn resolve(
        requester: Uuid,
        owner_id: Uuid,
        participants: &[(Uuid, ParticipantRole)],
    ) -> Self {
        if requester == owner_id {
            return CaseAccess::Owner;
        }
        participants
            .iter()
            .find(|(user_id, _)| *user_id == requester)
            .map(|(_, role)| CaseAccess::Participant(*role))
            .unwrap_or(CaseAccess::None)
    }

    pub fn is_owner(self) -> bool {
        matches!(self, CaseAccess::Owner)
    }

    pub fn can_read(self) -> bool {
        !matches!(self, CaseAccess::None)
    }

    /// Updating or deleting the case, and all participant management.
    pub fn can_manage_case(self) -> bool {
        self.is_owner()
    }

    /// Writing or deleting a document, version or note created by `creator_id`.
    pub fn can_modify(self, requester: Uuid, creator_id: Uuid) -> bool {
        self.can_read() && (requester == creator_id || self.is_owner())
    }

    /// Note edits belong to the note's author alone, the owner included.
    pub fn can_edit_own(self, requester: Uuid, creator_id: Uuid) -> bool {
        self.can_read() && requester == creator_id
    }

    /// Private notes are visible to their author and the case owner only.
    pub fn can_view_note(self, requester: Uuid, author_id: Uuid, is_private: bool) -> bool {
        self.can_read() && (!is_private || requester == author_id || self.is_owner())
    }
}

/// A case together with the caller's resolved access to it.
#[derive(Debug, Clone)]
pub struct AuthorizedCase {
    pub case: Case,
    pub access: CaseAccess,
    pub requester: Uuid,
}

impl AuthorizedCase {
    pub fn require_owner(&self, message: &str) -> AppResult<()> {
        if self.access.can_manage_case() {
            Ok(())
        } else {
            Err(AppError::forbidden(message))
        }
    }

    pub fn require_creator(&self, creator_id: Uuid, message: &str) -> AppResult<()> {
        if self.access.can_edit_own(self.requester, creator_id) {
            Ok(())
        } else {
            Err(AppError::forbidden(message))
        }
    }

    pub fn require_modify(&self, creator_id: Uuid, message: &str) -> AppResult<()> {
        if self.access.can_modify(self.requester, creator_id) {
            Ok(())
        } else {
            Err(AppError::forbidden(message))
        }
    }
}

/// Loads the case and the caller's standing. Missing cases are 404; callers
/// with no standing get 403 and never see case data.
pub fn authorize_case(
    conn: &mut PgConnection,
    case_id: Uuid,
    requester: Uuid,
) -> AppResult<AuthorizedCase> {
    let case: Case = cases::table
        .find(case_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Case not found"))?;

    let access = if case.user_id == requester {
        CaseAccess::Owner
    } else {
        let membership: Option<Participant> = case_participants::table
            .filter(case_participants::case_id.eq(case_id))
            .filter(case_participants::user_id.eq(requester))
            .first(conn)
            .optional()?;
        let participants: Vec<(Uuid, ParticipantRole)> = membership
            .into_iter()
            .filter_map(|p| p.role.parse().ok().map(|role| (p.user_id, role)))
            .collect();
        CaseAccess::resolve(requester, case.user_id, &participants)
    };

    if !access.can_read() {
        return Err(AppError::forbidden("Access denied"));
    }

    Ok(AuthorizedCase {
        case,
        access,
        requester,
    })
}
