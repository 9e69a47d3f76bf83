/// Error signals that travel through `Subscriber::on_error` or are returned
/// synchronously from `Publisher::subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// A demand amount or other argument outside its permitted range.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A required argument was absent.
    #[error("absent argument: {0}")]
    NullArgument(String),

    /// Any other failure of the stream.
    #[error("{0}")]
    Failed(String),
}

impl FlowError {
    /// The error a subscription must signal for `request(n)` with `n <= 0`.
    pub fn non_positive_request(n: i64) -> Self {
        FlowError::IllegalArgument(format!(
            "rule 3.9: request amount must be positive, got {n}"
        ))
    }

    pub fn absent_subscriber() -> Self {
        FlowError::NullArgument("rule 1.9: subscriber must not be absent".to_string())
    }

    pub fn is_illegal_argument(&self) -> bool {
        matches!(self, FlowError::IllegalArgument(_))
    }
}
