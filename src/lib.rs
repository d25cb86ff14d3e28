//! Ephemeral Snowflake credential provisioning for secrets-management hosts.
//!
//! A host hands this crate warehouse connection parameters, SQL statement
//! templates, and per-request metadata; the crate provisions, renews, and
//! revokes short-lived Snowflake users over the SQL REST API. Authentication
//! is either key-pair (JWT) or password, selected once at initialization;
//! the connection handle is created lazily and cached until closed.
//!
//! Example usage:
//!
//! ```rust,no_run
//! use serde_json::json;
//! use snowflake_credential_broker::{
//!     CredentialType, NewUserRequest, SnowflakeBackend, SnowflakeError, UsernameMetadata,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SnowflakeError> {
//!     let backend = SnowflakeBackend::new();
//!     backend
//!         .initialize(
//!             json!({
//!                 "connection_url": "{{username}}:{{password}}@ACCOUNT.snowflakecomputing.com/DB",
//!                 "username": "VAULT_ADMIN",
//!                 "password": "admin_password",
//!             }),
//!             true,
//!         )
//!         .await?;
//!
//!     let response = backend
//!         .new_user(NewUserRequest {
//!             username_config: UsernameMetadata {
//!                 display_name: "token".into(),
//!                 role_name: "app".into(),
//!             },
//!             statements: vec![
//!                 "CREATE USER {{name}} PASSWORD = '{{password}}' DEFAULT_ROLE = public".into(),
//!                 "GRANT ROLE public TO USER {{name}}".into(),
//!             ],
//!             credential_type: CredentialType::Password,
//!             password: Some("y8fva_sdVA3rasf".into()),
//!             public_key: None,
//!             expiration: chrono::Utc::now() + chrono::Duration::hours(1),
//!         })
//!         .await?;
//!     println!("provisioned {}", response.username);
//!
//!     backend.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! Substituted values are spliced into the statements verbatim: generated
//! usernames are engine-controlled and safe, while passwords, keys, and the
//! statement templates themselves are the host's trust boundary.

mod backend;
mod config;
mod conn_url;
mod errors;
mod jwt;
mod key;
mod producer;
mod session;
mod statements;
mod username;

pub use backend::{
    ChangeExpiration, CredentialType, DeleteUserRequest, NewUserRequest, NewUserResponse,
    SnowflakeBackend, UpdateUserRequest,
};
pub use config::ConnectionConfig;
pub use conn_url::{parse_fields, UrlFields};
pub use errors::{SnowflakeError, SnowflakeResult};
pub use jwt_simple;
pub use username::UsernameMetadata;
