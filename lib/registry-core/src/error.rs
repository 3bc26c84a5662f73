use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Service unknown: {0}")]
    ServiceUnknown(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("No providers available for service: {0}")]
    NoProvidersAvailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid registry configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::StoreUnavailable(_) => "store_unavailable",
            RegistryError::ServiceUnknown(_) => "service_unknown",
            RegistryError::ServiceUnavailable(_) => "service_unavailable",
            RegistryError::NoProvidersAvailable(_) => "no_providers",
            RegistryError::InvalidArgument(_) => "invalid_argument",
            RegistryError::Config(_) => "config",
            RegistryError::Internal(_) => "internal",
        }
    }
}
