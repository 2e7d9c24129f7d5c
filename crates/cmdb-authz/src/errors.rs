use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("unsupported resource type: {0}")]
    UnsupportedResourceType(String),
    #[error("unsupported type {resource_type} action: {action}")]
    UnsupportedAction {
        resource_type: String,
        action: String,
    },
    #[error("not enough layer")]
    NotEnoughLayer,
    #[error("biz id can not be 0 for {0}")]
    MissingBusiness(String),
    #[error("invalid system instance id {0}")]
    InvalidSysInstance(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("relation lookup failed")]
    Lookup(#[source] BoxError),
}

impl AuthzError {
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        AuthzError::InvalidFilter(message.into())
    }

    pub fn lookup<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        AuthzError::Lookup(err.into())
    }

    /// Mapping and compile failures are caused by the request; lookup failures are not.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, AuthzError::Lookup(_))
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;
