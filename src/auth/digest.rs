//! HTTP Digest authentication (RFC 2617 subset)
//!
//! Only what IP cameras need in practice: `qop=auth`, MD5, and a single
//! request per nonce (nonce-count is always `00000001`). Stale-nonce
//! re-authentication is not supported; the relay reconnects from scratch on
//! the next viewer join instead.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AuthError;

/// Nonce count sent with every response (one request per challenge)
pub const NONCE_COUNT: &str = "00000001";

const QOP_AUTH: &str = "auth";

/// Parameters of a `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Always `auth` after parsing
    pub qop: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(AuthError::UnsupportedScheme(scheme.to_string()));
        }

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;

        for (key, value) in parse_params(params) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        let realm = realm.ok_or(AuthError::MissingField("realm"))?;
        let nonce = nonce.ok_or(AuthError::MissingField("nonce"))?;
        let qop = qop.ok_or(AuthError::MissingField("qop"))?;

        if !qop.split(',').any(|q| q.trim().eq_ignore_ascii_case(QOP_AUTH)) {
            return Err(AuthError::UnsupportedQop(qop));
        }

        if let Some(ref alg) = algorithm {
            if !alg.eq_ignore_ascii_case("md5") {
                return Err(AuthError::UnsupportedAlgorithm(alg.clone()));
            }
        }

        Ok(Self {
            realm,
            nonce,
            qop: QOP_AUTH.to_string(),
            opaque,
            algorithm,
        })
    }
}

/// Build the `Authorization` header value answering a challenge
pub fn authorize(
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    username: &str,
    password: &str,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let response = md5_hex(&format!(
        "{}:{}:{}:{}:{}:{}",
        ha1, challenge.nonce, NONCE_COUNT, cnonce, challenge.qop, ha2
    ));

    let mut header = format!(
        "Digest username=\"{}\",realm=\"{}\",nonce=\"{}\",uri=\"{}\",cnonce=\"{}\",nc={},algorithm=MD5,response=\"{}\",qop=\"{}\"",
        username, challenge.realm, challenge.nonce, uri, cnonce, NONCE_COUNT, response, challenge.qop
    );
    if let Some(ref opaque) = challenge.opaque {
        header.push_str(&format!(",opaque=\"{}\"", opaque));
    }
    header
}

/// Fresh client nonce derived from the current time
pub fn cnonce_from_time() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    md5_hex(&millis.to_string())
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Split `key=value, key="quoted, value"` auth parameters
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            break;
        }
        if chars.next_if_eq(&'=').is_none() {
            // Bare token without a value
            continue;
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
            value = value.trim().to_string();
        }

        params.push((key, value));
    }

    params
}
