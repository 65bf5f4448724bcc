//! Borrow request model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::enums::RequestStatus;

/// Request row from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Request {
    pub id: i32,
    pub city_id: i32,
    pub borrower_name: String,
    pub borrower_phone: String,
    pub status: RequestStatus,
    /// SHA-256 of the pickup token; never leaves the server
    #[serde(skip)]
    pub token_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Sum of all extensions granted on the current token
    pub extended_minutes: i32,
    pub notes: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
    pub cancelled_reason: Option<String>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Past its expiry at `now`. A request without expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }
}

/// One line of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct RequestItem {
    pub request_id: i32,
    pub equipment_id: i32,
    pub quantity: i32,
}

/// Request with its items, as shown to managers and at pickup
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestWithItems {
    #[serde(flatten)]
    pub request: Request,
    pub items: Vec<RequestItem>,
}

/// Item line in a create request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RequestItemInput {
    pub equipment_id: i32,
    #[validate(range(min = 1, max = 100, message = "Quantity must be between 1 and 100"))]
    pub quantity: i32,
}

/// Create request payload (borrower side)
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub borrower_name: String,
    #[validate(length(min = 6, max = 32, message = "Phone number must be 6 to 32 characters"))]
    pub borrower_phone: String,
    pub city_id: i32,
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<RequestItemInput>,
    pub notes: Option<String>,
}

/// Validated, normalized request ready for insertion
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub city_id: i32,
    pub borrower_name: String,
    pub borrower_phone: String,
    /// Merged by equipment id, in first-seen order
    pub items: Vec<(i32, i32)>,
    pub notes: Option<String>,
}

impl NewRequest {
    pub fn from_input(input: CreateRequest) -> Self {
        let mut items: Vec<(i32, i32)> = Vec::with_capacity(input.items.len());
        for item in &input.items {
            match items.iter_mut().find(|(id, _)| *id == item.equipment_id) {
                Some((_, qty)) => *qty += item.quantity,
                None => items.push((item.equipment_id, item.quantity)),
            }
        }

        Self {
            city_id: input.city_id,
            borrower_name: input.borrower_name.trim().to_string(),
            borrower_phone: normalize_phone(&input.borrower_phone),
            items,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
        }
    }
}

/// Mutation applied to a request by the store under a status precondition.
///
/// Each change names the status the row must currently hold; the store applies
/// it only if that still holds and reports `None` otherwise.
#[derive(Debug, Clone)]
pub enum RequestChange {
    Approve {
        token_hash: String,
        expires_at: DateTime<Utc>,
        approved_by: String,
    },
    Reject {
        reason: String,
    },
    /// Manager cancels an approved request; the token hash is cleared
    Cancel {
        reason: String,
    },
    /// Borrower withdraws a request still awaiting review
    Withdraw,
    /// Add minutes to the stored expiry; only while `expires_at >= now` and
    /// while the cumulative extension stays within `max_total`
    Extend {
        minutes: i32,
        max_total: i32,
        now: DateTime<Utc>,
    },
    Expire {
        from: RequestStatus,
    },
}

impl RequestChange {
    pub fn expected(&self) -> RequestStatus {
        match self {
            RequestChange::Approve { .. }
            | RequestChange::Reject { .. }
            | RequestChange::Withdraw => RequestStatus::Pending,
            RequestChange::Cancel { .. } | RequestChange::Extend { .. } => RequestStatus::Approved,
            RequestChange::Expire { from } => *from,
        }
    }

    /// Whether the change may apply to a request currently in `current`.
    ///
    /// The change's own precondition narrows the transition table, so a change
    /// whose source and target the table does not link is never applied.
    pub fn permits(&self, current: RequestStatus) -> bool {
        let target = self.target();
        current == self.expected() && (current == target || current.can_transition_to(target))
    }

    pub fn target(&self) -> RequestStatus {
        match self {
            RequestChange::Approve { .. } => RequestStatus::Approved,
            RequestChange::Reject { .. } => RequestStatus::Rejected,
            RequestChange::Cancel { .. } | RequestChange::Withdraw => RequestStatus::Cancelled,
            RequestChange::Extend { .. } => RequestStatus::Approved,
            RequestChange::Expire { .. } => RequestStatus::Expired,
        }
    }
}

/// Request list filters
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct RequestQuery {
    pub city_id: Option<i32>,
    pub status: Option<RequestStatus>,
}

/// Strip formatting so the same number always compares equal
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_items_are_merged() {
        let input = CreateRequest {
            borrower_name: "  Dana ".to_string(),
            borrower_phone: "+972 50-123-4567".to_string(),
            city_id: 4,
            items: vec![
                RequestItemInput { equipment_id: 7, quantity: 1 },
                RequestItemInput { equipment_id: 9, quantity: 2 },
                RequestItemInput { equipment_id: 7, quantity: 2 },
            ],
            notes: Some("   ".to_string()),
        };

        let new = NewRequest::from_input(input);
        assert_eq!(new.items, vec![(7, 3), (9, 2)]);
        assert_eq!(new.borrower_name, "Dana");
        assert_eq!(new.borrower_phone, "+972501234567");
        assert!(new.notes.is_none());
    }

    #[test]
    fn test_create_request_validation() {
        let input = CreateRequest {
            borrower_name: "Dana".to_string(),
            borrower_phone: "0501234567".to_string(),
            city_id: 1,
            items: vec![],
            notes: None,
        };
        assert!(input.validate().is_err());

        let input = CreateRequest {
            items: vec![RequestItemInput { equipment_id: 1, quantity: 0 }],
            ..input
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_change_preconditions() {
        let extend = RequestChange::Extend { minutes: 10, max_total: 60, now: Utc::now() };
        assert_eq!(extend.expected(), RequestStatus::Approved);
        assert_eq!(extend.target(), RequestStatus::Approved);
        assert_eq!(RequestChange::Withdraw.target(), RequestStatus::Cancelled);
        let expire = RequestChange::Expire { from: RequestStatus::Pending };
        assert_eq!(expire.expected(), RequestStatus::Pending);
    }

    #[test]
    fn test_changes_follow_transition_table() {
        let withdraw = RequestChange::Withdraw;
        let permitted: Vec<_> = RequestStatus::ALL
            .into_iter()
            .filter(|s| withdraw.permits(*s))
            .collect();
        assert_eq!(permitted, vec![RequestStatus::Pending]);

        let extend = RequestChange::Extend { minutes: 5, max_total: 60, now: Utc::now() };
        assert!(extend.permits(RequestStatus::Approved));
        assert!(!extend.permits(RequestStatus::Expired));

        // Terminal states have no way out, whatever the change claims
        for from in [RequestStatus::Fulfilled, RequestStatus::Expired, RequestStatus::Rejected] {
            let expire = RequestChange::Expire { from };
            assert!(!expire.permits(from), "{} -> expired", from);
        }
        let expire = RequestChange::Expire { from: RequestStatus::Approved };
        assert!(expire.permits(RequestStatus::Approved));
    }
}
