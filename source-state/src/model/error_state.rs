use chrono::{DateTime, Utc};

use source_api::OperationClass;

/// Last user-visible error and the operation that produced it
///
/// Replaced by the next failure and cleared by the next success of the same
/// operation class.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorState {
    pub message: String,
    pub operation: OperationClass,
    pub at: DateTime<Utc>,
}

impl ErrorState {
    pub fn new(operation: OperationClass, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            operation,
            at: Utc::now(),
        }
    }
}
