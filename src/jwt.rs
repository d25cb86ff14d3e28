use jwt_simple::prelude::*;

use crate::errors::SnowflakeResult;

/// Mint the short-lived bearer token Snowflake expects for key-pair
/// authentication. The issuer is the qualified username plus the SHA-256
/// fingerprint of the public key.
pub(crate) fn create_token(
    key_pair: &RS256KeyPair,
    mut account: &str,
    user: &str,
) -> SnowflakeResult<String> {
    let mut public_key_fingerprint = key_pair.public_key().sha256_thumbprint();
    // Undo the URL-safe base64 encoding
    public_key_fingerprint = public_key_fingerprint.replace('-', "+").replace('_', "/");
    let padding = public_key_fingerprint.len() % 3;
    for _ in 0..padding {
        public_key_fingerprint.push('=');
    }
    // If there is an account region included, remove it:
    // AAA00000.us-east-1 should become AAA00000
    if let Some(dot) = account.find('.') {
        account = &account[..dot];
    }
    let qualified_username = format!("{account}.{user}");
    let issuer = format!("{qualified_username}.SHA256:{public_key_fingerprint}");
    let claims = Claims::create(Duration::from_mins(59))
        .with_issuer(issuer)
        .with_subject(qualified_username);
    log::debug!("Claims: {:?}", claims);
    Ok(key_pair.sign(claims)?)
}
