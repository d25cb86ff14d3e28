use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};

use crate::errors::{SnowflakeError, SnowflakeResult};

/// Metadata the host supplies for username generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsernameMetadata {
    pub display_name: String,
    pub role_name: String,
}

/// Produces names like `v_token_mtrole_3RtpLbJvHAbpNJ75y5Aq_1699910369`.
pub(crate) const DEFAULT_USERNAME_TEMPLATE: &str =
    "v_{{.DisplayName | truncate 8}}_{{.RoleName | truncate 8}}_{{random 20}}_{{unix_time}}";

/// Render a username template.
///
/// Supported expressions: `{{.DisplayName}}`, `{{.RoleName}}`,
/// `{{random N}}`, `{{unix_time}}`, each optionally piped through
/// `truncate N`, `uppercase`, or `lowercase`.
pub(crate) fn generate(template: &str, meta: &UsernameMetadata) -> SnowflakeResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| template_error("unterminated '{{'"))?;
        out.push_str(&render_expr(after[..end].trim(), meta)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn render_expr(expr: &str, meta: &UsernameMetadata) -> SnowflakeResult<String> {
    let mut stages = expr.split('|').map(str::trim);
    let head = stages.next().unwrap_or_default();
    let mut value = eval_head(head, meta)?;
    for stage in stages {
        value = apply_pipe(stage, value)?;
    }
    Ok(value)
}

fn eval_head(head: &str, meta: &UsernameMetadata) -> SnowflakeResult<String> {
    let mut words = head.split_whitespace();
    match (words.next(), words.next()) {
        (Some(".DisplayName"), None) => Ok(meta.display_name.clone()),
        (Some(".RoleName"), None) => Ok(meta.role_name.clone()),
        (Some("unix_time"), None) => Ok(Utc::now().timestamp().to_string()),
        (Some("random"), Some(len)) => {
            let len: usize = len
                .parse()
                .map_err(|_| template_error("'random' takes a numeric length"))?;
            Ok(random_string(len))
        }
        _ => Err(template_error(&format!("unrecognized expression '{head}'"))),
    }
}

fn apply_pipe(stage: &str, value: String) -> SnowflakeResult<String> {
    let mut words = stage.split_whitespace();
    match (words.next(), words.next()) {
        (Some("truncate"), Some(len)) => {
            let len: usize = len
                .parse()
                .map_err(|_| template_error("'truncate' takes a numeric length"))?;
            Ok(value.chars().take(len).collect())
        }
        (Some("uppercase"), None) => Ok(value.to_uppercase()),
        (Some("lowercase"), None) => Ok(value.to_lowercase()),
        _ => Err(template_error(&format!("unrecognized pipeline stage '{stage}'"))),
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn template_error(msg: &str) -> SnowflakeError {
    SnowflakeError::Configuration(format!("invalid username_template: {msg}"))
}
