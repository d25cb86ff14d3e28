use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::{SnowflakeError, SnowflakeResult};
use crate::key;
use crate::producer::ConnectionProducer;
use crate::statements::StatementContext;
use crate::username::{self, UsernameMetadata};

const DEFAULT_RENEW_SQL: &str = "ALTER USER {{name}} SET DAYS_TO_EXPIRY = {{expiration}}";
const DEFAULT_DELETE_SQL: &str = "DROP USER {{name}}";

/// Which secret accompanies a creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    Password,
    RsaPrivateKey,
}

/// Request to provision a new warehouse user.
#[derive(Debug, Clone)]
pub struct NewUserRequest {
    pub username_config: UsernameMetadata,
    /// Statement entries executed in order; must be non-empty
    pub statements: Vec<String>,
    pub credential_type: CredentialType,
    /// Plaintext password, for `CredentialType::Password`
    pub password: Option<String>,
    /// PEM `PUBLIC KEY` bytes, for `CredentialType::RsaPrivateKey`
    pub public_key: Option<Vec<u8>>,
    pub expiration: DateTime<Utc>,
}

/// The provisioned username and, for key-pair requests, the public key as
/// it was applied to the user (base64 DER).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserResponse {
    pub username: String,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChangeExpiration {
    pub new_expiration: DateTime<Utc>,
    /// Optional override; empty means the default expiration-update statement
    pub statements: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateUserRequest {
    pub username: String,
    pub expiration: ChangeExpiration,
}

#[derive(Debug, Clone)]
pub struct DeleteUserRequest {
    pub username: String,
    /// Optional override; empty means a plain `DROP USER`
    pub statements: Vec<String>,
}

/// The credential lifecycle engine the secrets-management host drives.
///
/// One instance guards one connection producer behind one lock; every
/// operation holds the lock for its full duration, so credential operations
/// against the same backend are serialized even though the underlying HTTP
/// pool multiplexes sockets.
pub struct SnowflakeBackend {
    producer: Mutex<ConnectionProducer>,
}

impl SnowflakeBackend {
    pub fn new() -> Self {
        SnowflakeBackend {
            producer: Mutex::new(ConnectionProducer::new()),
        }
    }

    /// Decode and validate the configuration map, optionally verifying
    /// connectivity. Returns the effective configuration for the host to
    /// persist.
    pub async fn initialize(
        &self,
        config: serde_json::Value,
        verify_connection: bool,
    ) -> SnowflakeResult<serde_json::Value> {
        let mut producer = self.producer.lock().await;
        producer.init(&config, verify_connection).await?;
        Ok(config)
    }

    /// Generate a username and run the creation statements in order.
    ///
    /// Execution is not transactional: Snowflake's identity DDL has no
    /// multi-statement atomicity, so a failure partway through leaves the
    /// earlier statements applied.
    pub async fn new_user(&self, req: NewUserRequest) -> SnowflakeResult<NewUserResponse> {
        if req.statements.iter().all(|entry| entry.trim().is_empty()) {
            return Err(SnowflakeError::CredentialCreation(
                "creation statements cannot be empty".to_owned(),
            ));
        }

        let mut producer = self.producer.lock().await;
        let username = username::generate(producer.username_template(), &req.username_config)?;

        let public_key = match req.credential_type {
            CredentialType::RsaPrivateKey => {
                let pem = req.public_key.as_deref().ok_or_else(|| {
                    SnowflakeError::CredentialCreation(
                        "key-pair credential request carries no public key".to_owned(),
                    )
                })?;
                Some(key::normalize_public_key(pem)?)
            }
            CredentialType::Password => None,
        };
        let password = match req.credential_type {
            CredentialType::Password => Some(req.password.as_deref().ok_or_else(|| {
                SnowflakeError::CredentialCreation(
                    "password credential request carries no password".to_owned(),
                )
            })?),
            CredentialType::RsaPrivateKey => None,
        };
        let ctx = StatementContext {
            name: &username,
            password,
            public_key: public_key.as_deref(),
            expiration_days: Some(days_until(req.expiration)),
        };

        let session = producer.connection().await?;
        for (index, entry) in req.statements.iter().enumerate() {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            session
                .execute(&ctx.render(entry))
                .await
                .map_err(|err| creation_error(index, err))?;
        }

        log::debug!("created user {username}");
        Ok(NewUserResponse {
            username,
            public_key,
        })
    }

    /// Push a credential's expiration out to the requested instant. Neither
    /// password nor key material is touched.
    pub async fn update_user(&self, req: UpdateUserRequest) -> SnowflakeResult<()> {
        let mut producer = self.producer.lock().await;
        let session = producer.connection().await?;

        let ctx = StatementContext {
            name: &req.username,
            expiration_days: Some(days_until(req.expiration.new_expiration)),
            ..Default::default()
        };
        let entries = non_empty_or(&req.expiration.statements, DEFAULT_RENEW_SQL);
        for entry in entries {
            session.execute(&ctx.render(entry)).await?;
        }

        log::debug!("renewed user {}", req.username);
        Ok(())
    }

    /// Revoke a credential, via the supplied statements or a plain drop.
    /// Failures surface to the caller; nothing is retried or swallowed.
    pub async fn delete_user(&self, req: DeleteUserRequest) -> SnowflakeResult<()> {
        let mut producer = self.producer.lock().await;
        let session = producer.connection().await?;

        let ctx = StatementContext {
            name: &req.username,
            ..Default::default()
        };
        let entries = non_empty_or(&req.statements, DEFAULT_DELETE_SQL);
        for (index, entry) in entries.enumerate() {
            session.execute(&ctx.render(entry)).await.map_err(|err| match err {
                SnowflakeError::Timeout(_) => err,
                other => SnowflakeError::CredentialRevocation(format!(
                    "failed to execute statement {}: {other}",
                    index + 1
                )),
            })?;
        }

        log::debug!("dropped user {}", req.username);
        Ok(())
    }

    /// Tear down the cached connection handle. Always safe to call again.
    pub async fn close(&self) -> SnowflakeResult<()> {
        let mut producer = self.producer.lock().await;
        producer.close().await;
        Ok(())
    }
}

impl Default for SnowflakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterate the supplied statement entries, or the default when none carry
/// any SQL.
fn non_empty_or<'a>(
    entries: &'a [String],
    default: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    let supplied: Vec<&str> = entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .collect();
    if supplied.is_empty() {
        vec![default].into_iter()
    } else {
        supplied.into_iter()
    }
}

/// Whole days until the requested expiration, rounded up so the credential
/// never lapses before the instant the host asked for.
fn days_until(expiration: DateTime<Utc>) -> i64 {
    let seconds = (expiration - Utc::now()).num_seconds();
    (seconds as f64 / 86_400.0).ceil() as i64
}

fn creation_error(index: usize, err: SnowflakeError) -> SnowflakeError {
    match err {
        SnowflakeError::Timeout(_) => err,
        other => SnowflakeError::CredentialCreation(format!(
            "failed to execute statement {}: {other}",
            index + 1
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn password_request(statements: Vec<String>) -> NewUserRequest {
        NewUserRequest {
            username_config: UsernameMetadata {
                display_name: "test".to_owned(),
                role_name: "test".to_owned(),
            },
            statements,
            credential_type: CredentialType::Password,
            password: Some("y8fva_sdVA3rasf".to_owned()),
            public_key: None,
            expiration: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn new_user_rejects_empty_statements() {
        let backend = SnowflakeBackend::new();
        for statements in [vec![], vec!["".to_owned(), "   ".to_owned()]] {
            let err = backend
                .new_user(password_request(statements))
                .await
                .unwrap_err();
            assert!(matches!(err, SnowflakeError::CredentialCreation(_)));
        }
    }

    #[tokio::test]
    async fn new_user_rejects_empty_statements_for_key_pairs() {
        let backend = SnowflakeBackend::new();
        let mut req = password_request(vec![]);
        req.credential_type = CredentialType::RsaPrivateKey;
        req.password = None;
        req.public_key = Some(crate::key::tests::TEST_PUBLIC_PEM.as_bytes().to_vec());
        let err = backend.new_user(req).await.unwrap_err();
        assert!(matches!(err, SnowflakeError::CredentialCreation(_)));
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let backend = SnowflakeBackend::new();

        let err = backend
            .new_user(password_request(vec!["CREATE USER {{name}}".to_owned()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SnowflakeError::NotInitialized));

        let err = backend
            .update_user(UpdateUserRequest {
                username: "v_test".to_owned(),
                expiration: ChangeExpiration {
                    new_expiration: Utc::now() + Duration::hours(1),
                    statements: vec![],
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SnowflakeError::NotInitialized));

        let err = backend
            .delete_user(DeleteUserRequest {
                username: "v_test".to_owned(),
                statements: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SnowflakeError::NotInitialized));
    }

    #[tokio::test]
    async fn new_user_requires_matching_secret_material() {
        let backend = SnowflakeBackend::new();

        let mut req = password_request(vec!["CREATE USER {{name}}".to_owned()]);
        req.password = None;
        let err = backend.new_user(req).await.unwrap_err();
        assert!(matches!(err, SnowflakeError::CredentialCreation(_)));

        let mut req = password_request(vec!["CREATE USER {{name}}".to_owned()]);
        req.credential_type = CredentialType::RsaPrivateKey;
        req.password = None;
        let err = backend.new_user(req).await.unwrap_err();
        assert!(matches!(err, SnowflakeError::CredentialCreation(_)));
    }

    #[tokio::test]
    async fn initialize_returns_the_effective_config() {
        let backend = SnowflakeBackend::new();
        let config = json!({
            "connection_url": "admin:pw@acct.snowflakecomputing.com/db",
            "max_open_connections": 2,
        });
        let effective = backend.initialize(config.clone(), false).await.unwrap();
        assert_eq!(effective, config);
        backend.close().await.unwrap();
    }

    #[test]
    fn days_until_rounds_up() {
        assert_eq!(days_until(Utc::now() + Duration::hours(1)), 1);
        assert_eq!(days_until(Utc::now() + Duration::hours(25)), 2);
        assert_eq!(days_until(Utc::now() + Duration::days(30)), 30);
        assert!(days_until(Utc::now() - Duration::hours(1)) <= 0);
    }

    #[test]
    fn default_statements_fill_in() {
        let none: Vec<String> = vec![];
        let filled: Vec<&str> = non_empty_or(&none, DEFAULT_DELETE_SQL).collect();
        assert_eq!(filled, vec![DEFAULT_DELETE_SQL]);

        let supplied = vec!["DROP USER {{username}}".to_owned()];
        let kept: Vec<&str> = non_empty_or(&supplied, DEFAULT_DELETE_SQL).collect();
        assert_eq!(kept, vec!["DROP USER {{username}}"]);
    }
}
