use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request timed out after {seconds}s: {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("image acquisition failed for {url}: {reason}")]
    Acquisition { url: String, reason: String },

    #[error("image embedding failed: {reason}")]
    Embed { reason: String },

    #[error("layout does not fit the page: {message}")]
    Layout { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("invalid value for {field}: {value} ({reason})")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("missing required field: {field}")]
    MissingConfig { field: String },

    #[error("PDF build failed: {reason}")]
    Pdf { reason: String },

    #[error("out of memory: {reason}")]
    Memory { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected failure: {message}")]
    Unknown { message: String },
}

/// Coarse classification surfaced to the user on a fatal failure.
/// Produced from the error discriminant, never inferred from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Cancelled,
    Network,
    Memory,
    Generic,
}

impl SheetError {
    pub fn classify(&self) -> FailureClass {
        match self {
            SheetError::Cancelled => FailureClass::Cancelled,
            SheetError::Network(_)
            | SheetError::Timeout { .. }
            | SheetError::Acquisition { .. } => FailureClass::Network,
            SheetError::Memory { .. } => FailureClass::Memory,
            _ => FailureClass::Generic,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SheetError::Cancelled)
    }

    pub fn user_friendly_message(&self) -> String {
        match self.classify() {
            FailureClass::Cancelled => "Generation was cancelled.".to_string(),
            FailureClass::Network => {
                "Card images could not be downloaded. Check your connection and try again."
                    .to_string()
            }
            FailureClass::Memory => {
                "The deck is too large to process in memory. Try fewer cards.".to_string()
            }
            FailureClass::Generic => format!("PDF generation failed: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SheetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_reclassified() {
        let err = SheetError::Cancelled;
        assert_eq!(err.classify(), FailureClass::Cancelled);
        assert!(err.is_cancelled());
    }

    #[test]
    fn timeout_classifies_as_network() {
        let err = SheetError::Timeout {
            url: "https://example.com/a.png".into(),
            seconds: 12,
        };
        assert_eq!(err.classify(), FailureClass::Network);
    }

    #[test]
    fn layout_classifies_as_generic() {
        let err = SheetError::Layout {
            message: "card block exceeds printable area".into(),
        };
        assert_eq!(err.classify(), FailureClass::Generic);
    }
}
