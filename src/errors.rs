use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum SnowflakeError {
    #[error("invalid connection URL format, expect <account_name>.snowflakecomputing.com/<db_name>")]
    InvalidConnectionUrl,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection producer is not initialized")]
    NotInitialized,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("failed to read private key: {0}")]
    PrivateKey(String),
    #[error("credential creation failed: {0}")]
    CredentialCreation(String),
    #[error("credential revocation failed: {0}")]
    CredentialRevocation(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("Snowflake server error: {code}: {message}")]
    ServerError { code: String, message: String },
    #[error(transparent)]
    Token(#[from] jwt_simple::Error),
    #[error(transparent)]
    Request(reqwest::Error),
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}

pub type SnowflakeResult<T> = Result<T, SnowflakeError>;

// Timeouts are their own failure class for the host's retry policy, so the
// reqwest conversion cannot be a plain derive.
impl From<reqwest::Error> for SnowflakeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SnowflakeError::Timeout(err.to_string())
        } else {
            SnowflakeError::Request(err)
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum SnowflakeWireResult<T> {
    Ok(T),
    Error { code: String, message: String },
}

impl<T> SnowflakeWireResult<T> {
    /// Convert from the custom wire format to a standard result
    pub fn into_result(self) -> SnowflakeResult<T> {
        match self {
            SnowflakeWireResult::Error { code, message } => {
                Err(SnowflakeError::ServerError { code, message })
            }
            SnowflakeWireResult::Ok(t) => Ok(t),
        }
    }
}
