//! Error types for the authentication bridge.

/// Errors that can occur while driving a bridge flow.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Neither recognized callback parameter was present on the request.
    #[error("Missing callback URL. Please return to the partner application and try again.")]
    MissingCallback,

    /// The callback candidate failed to parse or is not allow-listed.
    #[error("Invalid callback URL. Please return to the partner application and try again.")]
    InvalidCallback,

    /// The wall-clock budget for the flow elapsed before authentication completed.
    #[error("Authentication is taking too long. Please try again.")]
    ProviderTimeout,

    /// The identity provider kept erroring and the retry bound was reached.
    #[error("Unable to authenticate after multiple attempts.")]
    AuthExhausted,

    /// No API key appeared in the credential cache, even after bounded retries.
    #[error("No API key available.")]
    NoCredential,

    /// The cached profile is missing or has no usable email.
    #[error("User data not available.")]
    NoEmail,

    /// The token endpoint answered with a non-success status.
    #[error("{message}")]
    TokenExchangeFailed { status: u16, message: String },

    /// The token endpoint answered success but the token field was blank.
    #[error("received an empty auth token")]
    EmptyToken,

    /// The operation was cancelled; never surfaced to the user.
    #[error("operation aborted")]
    Aborted,

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Identity provider error.
    #[error("Identity provider error: {0}")]
    Provider(String),
}

impl BridgeError {
    /// Whether the token-exchange sub-flow may be re-entered after this error.
    ///
    /// Missing user data and callback failures are terminal; transport and
    /// endpoint failures are retryable up to the flow's token retry bound.
    pub fn is_retryable_exchange(&self) -> bool {
        matches!(
            self,
            Self::TokenExchangeFailed { .. } | Self::EmptyToken | Self::Http(_)
        )
    }
}
