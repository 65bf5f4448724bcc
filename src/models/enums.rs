//! Shared domain enums: lifecycle states and condition reports

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stores a string-slug enum in a TEXT column through its `as_str` / `FromStr` pair.
macro_rules! text_column {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// RequestStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a borrower's request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Expired,
    Fulfilled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Cancelled,
        RequestStatus::Expired,
        RequestStatus::Fulfilled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Expired => "expired",
            RequestStatus::Fulfilled => "fulfilled",
        }
    }

    /// Transition table. Every status change goes through here.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Approved, Fulfilled)
                | (Approved, Cancelled)
                | (Approved, Expired)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending | RequestStatus::Approved)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "expired" => Ok(RequestStatus::Expired),
            "fulfilled" => Ok(RequestStatus::Fulfilled),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

text_column!(RequestStatus);

// ---------------------------------------------------------------------------
// BorrowStatus
// ---------------------------------------------------------------------------

/// Custody state of one borrow record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    Borrowed,
    /// Borrower reported the return; a manager has not confirmed it yet
    PendingApproval,
    Returned,
}

impl BorrowStatus {
    pub const ALL: [BorrowStatus; 3] = [
        BorrowStatus::Borrowed,
        BorrowStatus::PendingApproval,
        BorrowStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowStatus::Borrowed => "borrowed",
            BorrowStatus::PendingApproval => "pending_approval",
            BorrowStatus::Returned => "returned",
        }
    }

    pub fn can_transition_to(&self, next: BorrowStatus) -> bool {
        use BorrowStatus::*;
        matches!(
            (self, next),
            (Borrowed, PendingApproval) | (Borrowed, Returned) | (PendingApproval, Returned)
        )
    }

    /// The unit is out of the cabinet
    pub fn is_out(&self) -> bool {
        matches!(self, BorrowStatus::Borrowed | BorrowStatus::PendingApproval)
    }
}

impl std::str::FromStr for BorrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrowed" => Ok(BorrowStatus::Borrowed),
            "pending_approval" => Ok(BorrowStatus::PendingApproval),
            "returned" => Ok(BorrowStatus::Returned),
            _ => Err(format!("Invalid borrow status: {}", s)),
        }
    }
}

text_column!(BorrowStatus);

// ---------------------------------------------------------------------------
// EquipmentCondition
// ---------------------------------------------------------------------------

/// Condition reported when equipment comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentCondition {
    Working,
    Faulty,
}

impl EquipmentCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentCondition::Working => "working",
            EquipmentCondition::Faulty => "faulty",
        }
    }
}

impl std::str::FromStr for EquipmentCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "working" => Ok(EquipmentCondition::Working),
            "faulty" => Ok(EquipmentCondition::Faulty),
            _ => Err(format!("Invalid equipment condition: {}", s)),
        }
    }
}

text_column!(EquipmentCondition);
