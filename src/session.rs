use std::collections::HashMap;
use std::time::Duration;

use jwt_simple::algorithms::RS256KeyPair;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::conn_url::{Dsn, UrlFields};
use crate::errors::{SnowflakeError, SnowflakeResult, SnowflakeWireResult};
use crate::{jwt, statements};

/// Server-side statement timeout. The HTTP client timeout rides 15 seconds
/// behind it so the server gets the first chance to report.
const STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Pool tuning applied when a session is opened.
#[derive(Debug, Clone)]
pub(crate) struct PoolSettings {
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Option<Duration>,
}

enum SessionAuth {
    /// Key-pair mode mints a fresh JWT per request
    KeyPair {
        key_pair: RS256KeyPair,
        account: String,
        user: String,
    },
    /// Session token from the legacy login endpoint
    Token(String),
}

/// A live, authenticated handle to one Snowflake account.
///
/// Wraps a pooled HTTP client plus the coordinates statements execute
/// against. At most one session exists per producer; the producer's lock
/// serializes everything that creates or drops it.
pub(crate) struct Session {
    http: reqwest::Client,
    host: String,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
    auth: SessionAuth,
    permits: Semaphore,
}

impl Session {
    pub(crate) fn open_key_pair(
        fields: &UrlFields,
        key_pair: RS256KeyPair,
        user: &str,
        pool: &PoolSettings,
    ) -> SnowflakeResult<Session> {
        log::debug!("opening key-pair session for account {}", fields.account);
        Ok(Session {
            http: build_client(pool)?,
            host: host_for(&fields.account),
            database: Some(fields.database.to_ascii_uppercase()),
            schema: fields.schema.as_deref().map(str::to_ascii_uppercase),
            warehouse: fields.warehouse.as_deref().map(str::to_ascii_uppercase),
            role: fields.role.as_deref().map(str::to_ascii_uppercase),
            auth: SessionAuth::KeyPair {
                key_pair,
                account: fields.account.to_ascii_uppercase(),
                user: user.to_ascii_uppercase(),
            },
            permits: Semaphore::new(pool.max_open),
        })
    }

    /// Open a password-authenticated session: one login round trip against
    /// the legacy endpoint, holding the returned session token.
    pub(crate) async fn open_password(dsn: &Dsn, pool: &PoolSettings) -> SnowflakeResult<Session> {
        let host = host_for(&dsn.account);
        let http = build_client(pool)?;

        log::debug!("opening password session for account {}", dsn.account);
        let request_id = uuid::Uuid::new_v4();
        let login = WireLoginRequest {
            data: WireLoginData {
                login_name: dsn.user.clone(),
                password: dsn.password.clone(),
                account_name: dsn.account.to_ascii_uppercase(),
            },
        };
        let response = http
            .post(format!("{host}/session/v1/login-request?requestId={request_id}"))
            .json(&login)
            .send()
            .await?
            .json::<WireLoginResponse>()
            .await?;
        if !response.success {
            return Err(SnowflakeError::Connection(format!(
                "login failed: {}",
                response.message.as_deref().unwrap_or("unknown error")
            )));
        }
        let token = response
            .data
            .and_then(|data| data.token)
            .ok_or_else(|| {
                SnowflakeError::Connection("login response carried no session token".to_owned())
            })?;

        Ok(Session {
            http,
            host,
            database: dsn.database.as_deref().map(str::to_ascii_uppercase),
            schema: dsn.schema.as_deref().map(str::to_ascii_uppercase),
            warehouse: dsn.warehouse.as_deref().map(str::to_ascii_uppercase),
            role: dsn.role.as_deref().map(str::to_ascii_uppercase),
            auth: SessionAuth::Token(token),
            permits: Semaphore::new(pool.max_open),
        })
    }

    /// Execute one statement entry. Semicolon-joined entries are flagged so
    /// the warehouse splits them; the result set, if any, is discarded.
    pub(crate) async fn execute(&self, sql: &str) -> SnowflakeResult<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SnowflakeError::Connection("session is closed".to_owned()))?;

        let mut parameters = HashMap::new();
        let count = statements::statement_count(sql);
        if count > 1 {
            parameters.insert("MULTI_STATEMENT_COUNT", serde_json::json!(0));
        }
        let wire = WireStatement {
            statement: sql,
            timeout: STATEMENT_TIMEOUT_SECS,
            database: self.database.as_deref(),
            schema: self.schema.as_deref(),
            warehouse: self.warehouse.as_deref(),
            role: self.role.as_deref(),
            parameters,
        };

        let request_id = uuid::Uuid::new_v4();
        log::debug!("executing request {request_id} ({count} statement(s))");
        let ack = self
            .authorize(self.http.post(format!(
                "{}/api/v2/statements?requestId={}",
                self.host, request_id
            )))?
            .json(&wire)
            .send()
            .await?
            .json::<SnowflakeWireResult<WireStatementAck>>()
            .await?
            .into_result()?;
        log::debug!(
            "request {request_id} accepted, handle {}",
            ack.statement_handle.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    /// Liveness check for connection verification
    pub(crate) async fn verify(&self) -> SnowflakeResult<()> {
        self.execute("SELECT 1").await
    }

    /// Best-effort logout; key-pair sessions hold no server-side state.
    pub(crate) async fn close(&self) {
        if let SessionAuth::Token(_) = self.auth {
            let request_id = uuid::Uuid::new_v4();
            let request = self
                .authorize(self.http.post(format!(
                    "{}/session/logout-request?requestId={}",
                    self.host, request_id
                )))
                .map(reqwest::RequestBuilder::send);
            match request {
                Ok(pending) => {
                    if let Err(err) = pending.await {
                        log::debug!("logout failed: {err}");
                    }
                }
                Err(err) => log::debug!("logout failed: {err}"),
            }
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> SnowflakeResult<reqwest::RequestBuilder> {
        match &self.auth {
            SessionAuth::KeyPair {
                key_pair,
                account,
                user,
            } => {
                let token = jwt::create_token(key_pair, account, user)?;
                Ok(request
                    .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
                    .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT"))
            }
            SessionAuth::Token(token) => Ok(request.header(
                reqwest::header::AUTHORIZATION,
                format!("Snowflake Token=\"{token}\""),
            )),
        }
    }
}

fn host_for(account: &str) -> String {
    format!(
        "https://{}.snowflakecomputing.com",
        account.to_ascii_lowercase()
    )
}

fn build_client(pool: &PoolSettings) -> SnowflakeResult<reqwest::Client> {
    use reqwest::header::*;
    let mut headers = HeaderMap::with_capacity(3);
    headers.append(CONTENT_TYPE, "application/json".parse()?);
    headers.append(ACCEPT, "application/json".parse()?);
    headers.append(
        USER_AGENT,
        concat!(env!("CARGO_PKG_NAME"), '/', env!("CARGO_PKG_VERSION")).parse()?,
    );

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS + 15))
        .pool_max_idle_per_host(pool.max_idle)
        .pool_idle_timeout(pool.max_lifetime)
        .build()?)
}

//
// Wire types
//

#[derive(Serialize, Debug)]
struct WireStatement<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    parameters: HashMap<&'static str, serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireStatementAck {
    // Present on every successful submission; its absence makes the wire
    // result fall through to the error variant.
    #[allow(dead_code)]
    statement_status_url: String,
    #[serde(default)]
    statement_handle: Option<String>,
}

#[derive(Serialize, Debug)]
struct WireLoginRequest {
    data: WireLoginData,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct WireLoginData {
    login_name: String,
    password: String,
    account_name: String,
}

#[derive(Deserialize, Debug)]
struct WireLoginResponse {
    #[serde(default)]
    data: Option<WireLoginToken>,
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireLoginToken {
    #[serde(default)]
    token: Option<String>,
}
