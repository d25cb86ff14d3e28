/// Values substituted into one SQL statement before execution.
///
/// Substitution is literal text replacement; no SQL escaping is applied.
/// Generated usernames are engine-controlled and safe to splice. Secrets and
/// templates come from the host, which owns any quoting or escaping they
/// need.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatementContext<'a> {
    pub name: &'a str,
    pub password: Option<&'a str>,
    pub public_key: Option<&'a str>,
    /// Days until expiry, for `DAYS_TO_EXPIRY`-style clauses
    pub expiration_days: Option<i64>,
}

impl StatementContext<'_> {
    /// Replace every recognized placeholder. `{{name}}` and `{{username}}`
    /// are equivalent spellings.
    pub fn render(&self, statement: &str) -> String {
        let mut rendered = statement
            .replace("{{name}}", self.name)
            .replace("{{username}}", self.name);
        if let Some(password) = self.password {
            rendered = rendered.replace("{{password}}", password);
        }
        if let Some(public_key) = self.public_key {
            rendered = rendered.replace("{{public_key}}", public_key);
        }
        if let Some(days) = self.expiration_days {
            rendered = rendered.replace("{{expiration}}", &days.to_string());
        }
        rendered
    }
}

/// How many discrete SQL statements one entry holds. Entries joined with
/// semicolons execute warehouse-side as a multi-statement request; single
/// statements go through unmodified.
pub(crate) fn statement_count(statement: &str) -> usize {
    statement
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .count()
}
