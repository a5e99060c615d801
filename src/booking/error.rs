use ulid::Ulid;

use crate::model::{BookingId, EmployeeId};
use crate::store::StoreError;
use crate::validate::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    Validation(ValidationError),
    NotFound(Ulid),
    NotOwner { booking: BookingId, employee: EmployeeId },
    Storage(StoreError),
}

impl BookingError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "invalid",
            BookingError::NotFound(_) => "not_found",
            BookingError::NotOwner { .. } => "not_owner",
            BookingError::Storage(_) => "storage_error",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(e) => write!(f, "{e}"),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::NotOwner { booking, employee } => {
                write!(f, "booking {booking} is not organized by {employee}")
            }
            BookingError::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Validation(e) => Some(e),
            BookingError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for BookingError {
    fn from(e: ValidationError) -> Self {
        BookingError::Validation(e)
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            // The store's exclusion check lost a race the validator could not see.
            StoreError::Conflict(id) => BookingError::Validation(ValidationError::TimeConflict(id)),
            StoreError::NotFound(id) => BookingError::NotFound(id),
            other => BookingError::Storage(other),
        }
    }
}
