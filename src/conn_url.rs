use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::errors::{SnowflakeError, SnowflakeResult};

/// Account and database coordinates extracted from a connection URL.
///
/// The query string may carry `warehouse`, `role`, and `schema`, which are
/// forwarded to statement execution; anything else (e.g. `authenticator`)
/// is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFields {
    pub account: String,
    pub database: String,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    pub schema: Option<String>,
}

/// Credentials and coordinates from the legacy `user:password@account[/db]`
/// DSN form used by password authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dsn {
    pub user: String,
    pub password: String,
    pub account: String,
    pub database: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    pub schema: Option<String>,
}

// Expected format: <account_name>.snowflakecomputing.com/<db_name>
fn fields_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+)\.snowflakecomputing\.com/(.+)$").expect("pattern is valid")
    })
}

/// Extract the account and database fields from a connection URL of the
/// form `<account_name>.snowflakecomputing.com/<db_name>[?params]`.
pub fn parse_fields(connection_url: &str) -> SnowflakeResult<UrlFields> {
    let (base, query) = match connection_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (connection_url, None),
    };

    let captures = fields_pattern()
        .captures(base)
        .ok_or(SnowflakeError::InvalidConnectionUrl)?;

    let mut fields = UrlFields {
        account: captures[1].to_owned(),
        database: captures[2].to_owned(),
        warehouse: None,
        role: None,
        schema: None,
    };
    if let Some(query) = query {
        apply_query_params(query, &mut fields.warehouse, &mut fields.role, &mut fields.schema);
    }
    Ok(fields)
}

/// Parse a `user:password@account[.snowflakecomputing.com][/db][?params]`
/// DSN. Credentials embedded in the DSN are percent-decoded; when the DSN
/// carries none, the statically configured username/password are used.
pub(crate) fn parse_dsn(
    connection_url: &str,
    fallback_user: &str,
    fallback_password: &str,
) -> SnowflakeResult<Dsn> {
    let raw = connection_url
        .strip_prefix("snowflake://")
        .unwrap_or(connection_url);

    // rsplit so that an '@' inside the password does not cut the host off
    let (creds, rest) = match raw.rsplit_once('@') {
        Some((creds, rest)) => (Some(creds), rest),
        None => (None, raw),
    };

    let (user, password) = match creds {
        Some(creds) => {
            let (user, password) = creds.split_once(':').unwrap_or((creds, ""));
            (decode_component(user)?, decode_component(password)?)
        }
        None => (fallback_user.to_owned(), fallback_password.to_owned()),
    };
    if user.is_empty() {
        return Err(SnowflakeError::InvalidConnectionUrl);
    }

    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };
    let (host_part, database) = match rest.split_once('/') {
        Some((host, db)) if !db.is_empty() => (host, Some(db.to_owned())),
        Some((host, _)) => (host, None),
        None => (rest, None),
    };

    // A port is legal in gosnowflake DSNs but irrelevant over HTTPS
    let host_part = host_part.split(':').next().unwrap_or(host_part);
    let account = host_part
        .strip_suffix(".snowflakecomputing.com")
        .unwrap_or(host_part);
    if account.is_empty() {
        return Err(SnowflakeError::InvalidConnectionUrl);
    }

    let mut dsn = Dsn {
        user,
        password,
        account: account.to_owned(),
        database,
        warehouse: None,
        role: None,
        schema: None,
    };
    if let Some(query) = query {
        apply_query_params(query, &mut dsn.warehouse, &mut dsn.role, &mut dsn.schema);
    }
    Ok(dsn)
}

fn apply_query_params(
    query: &str,
    warehouse: &mut Option<String>,
    role: &mut Option<String>,
    schema: &mut Option<String>,
) {
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if value.is_empty() {
            continue;
        }
        match key {
            "warehouse" => *warehouse = Some(value.to_owned()),
            "role" => *role = Some(value.to_owned()),
            "schema" => *schema = Some(value.to_owned()),
            _ => {}
        }
    }
}

fn decode_component(component: &str) -> SnowflakeResult<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| SnowflakeError::InvalidConnectionUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_account_and_database() {
        let fields = parse_fields("my_account.snowflakecomputing.com/my_db").unwrap();
        assert_eq!(fields.account, "my_account");
        assert_eq!(fields.database, "my_db");
        assert_eq!(fields.warehouse, None);
    }

    #[test]
    fn account_may_carry_a_region() {
        let fields = parse_fields("acct.us-east-1.snowflakecomputing.com/db").unwrap();
        assert_eq!(fields.account, "acct.us-east-1");
        assert_eq!(fields.database, "db");
    }

    #[test]
    fn recognizes_query_params() {
        let fields =
            parse_fields("acct.snowflakecomputing.com/db?warehouse=WH&role=r&authenticator=SNOWFLAKE_JWT")
                .unwrap();
        assert_eq!(fields.warehouse.as_deref(), Some("WH"));
        assert_eq!(fields.role.as_deref(), Some("r"));
        assert_eq!(fields.schema, None);
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "",
            ".snowflakecomputing.com/db",
            "account.snowflakecomputing.com/",
            "account..com/db",
            "account.snowflakecomputing.com",
            "not a url at all",
        ] {
            assert!(
                matches!(parse_fields(url), Err(SnowflakeError::InvalidConnectionUrl)),
                "expected rejection for {url:?}"
            );
        }
    }

    #[test]
    fn dsn_with_embedded_credentials() {
        let dsn = parse_dsn("admin:s3cret@acct", "", "").unwrap();
        assert_eq!(dsn.user, "admin");
        assert_eq!(dsn.password, "s3cret");
        assert_eq!(dsn.account, "acct");
        assert_eq!(dsn.database, None);
    }

    #[test]
    fn dsn_with_full_host_and_database() {
        let dsn = parse_dsn("admin:pw@acct.snowflakecomputing.com/db?warehouse=WH", "", "").unwrap();
        assert_eq!(dsn.account, "acct");
        assert_eq!(dsn.database.as_deref(), Some("db"));
        assert_eq!(dsn.warehouse.as_deref(), Some("WH"));
    }

    #[test]
    fn dsn_credentials_are_percent_decoded() {
        let dsn = parse_dsn("admin:p%40ss%2Fword@acct", "", "").unwrap();
        assert_eq!(dsn.password, "p@ss/word");
    }

    #[test]
    fn dsn_falls_back_to_configured_credentials() {
        let dsn = parse_dsn("acct.snowflakecomputing.com/db", "admin", "pw").unwrap();
        assert_eq!(dsn.user, "admin");
        assert_eq!(dsn.password, "pw");
        assert_eq!(dsn.account, "acct");
    }

    #[test]
    fn dsn_requires_a_user() {
        assert!(parse_dsn("acct/db", "", "").is_err());
    }
}
