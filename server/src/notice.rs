//! Transient flash-style notices.
//!
//! Mutating routes (backup, restore, note updates) redirect back to the page they came from; the outcome
//! message rides along in a cookie signed with the server's secret key, and the next page load consumes and
//! clears it. A missing, malformed, or tampered cookie simply yields no notices.

use {
    anyhow::{anyhow, Result},
    curator_shared::Notice,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::warn,
};

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "curator_notice";

fn mac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|e| anyhow!("invalid notice signing key: {e}"))
}

/// Sign a batch of notices into a cookie value of the form `payload.signature`.
pub fn encode(key: &[u8], notices: &[Notice]) -> Result<String> {
    let payload = base64::encode_config(serde_json::to_vec(notices)?, base64::URL_SAFE_NO_PAD);

    let mut mac = mac(key)?;
    mac.update(payload.as_bytes());

    let signature = base64::encode_config(mac.finalize().into_bytes(), base64::URL_SAFE_NO_PAD);

    Ok(format!("{payload}.{signature}"))
}

fn try_decode(key: &[u8], value: &str) -> Result<Vec<Notice>> {
    let (payload, signature) = value
        .split_once('.')
        .ok_or_else(|| anyhow!("malformed notice cookie"))?;

    let mut mac = mac(key)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&base64::decode_config(signature, base64::URL_SAFE_NO_PAD)?)
        .map_err(|_| anyhow!("notice cookie signature mismatch"))?;

    Ok(serde_json::from_slice(&base64::decode_config(
        payload,
        base64::URL_SAFE_NO_PAD,
    )?)?)
}

/// Decode a previously set notice cookie, discarding it if unreadable or not signed by `key`.
pub fn consume(key: &[u8], cookie: Option<&str>) -> Vec<Notice> {
    if let Some(value) = cookie {
        match try_decode(key, value) {
            Ok(notices) => notices,
            Err(e) => {
                warn!("ignoring notice cookie: {e:?}");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    }
}

/// `Set-Cookie` value which carries `notices` through a redirect.
pub fn set_cookie(key: &[u8], notices: &[Notice]) -> Result<String> {
    Ok(format!(
        "{COOKIE_NAME}={}; Path=/; HttpOnly",
        encode(key, notices)?
    ))
}

/// `Set-Cookie` value which clears a consumed cookie.
pub fn clear_cookie() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; Max-Age=0")
}
