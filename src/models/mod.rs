//! Data models for Cabinet

pub mod borrow;
pub mod enums;
pub mod inventory;
pub mod request;
pub mod staff;

// Re-export commonly used types
pub use borrow::{BorrowRecord, Borrower, OverdueItem};
pub use enums::{BorrowStatus, EquipmentCondition, RequestStatus};
pub use inventory::{InventoryLine, Reservation};
pub use request::{Request, RequestItem, RequestWithItems};
pub use staff::{StaffClaims, StaffRole};
