//! One-time voting-link tokens.
//!
//! A token is `base64url(payload) "." base64url(tag)`, where the payload is a
//! small JSON document binding a member to an election and the tag is an
//! HMAC-SHA256 over the encoded payload. Verification is a pure function of
//! the token bytes and the secret; whether the link has been used, revoked or
//! has expired is tracked separately by the [`VotingLink`](super::VotingLink)
//! records, which are looked up by [`TokenCodec::hash_token`].

use chrono::{serde::ts_seconds, DateTime, Utc};
use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use hmac::{Hmac, Mac};
use rand::Rng;
use rocket::serde::json::serde_json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

pub type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 16;

/// What a voting token asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub member_id: Id,
    pub election_id: Id,
    pub issued_at: DateTime<Utc>,
}

/// Wire form of the payload. IDs travel as hex strings to keep the JSON flat.
#[derive(Serialize, Deserialize)]
struct WirePayload {
    #[serde(rename = "mid")]
    member_id: String,
    #[serde(rename = "eid")]
    election_id: String,
    #[serde(rename = "iat", with = "ts_seconds")]
    issued_at: DateTime<Utc>,
    nonce: String,
}

/// A freshly minted token and the hash it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedToken {
    pub token: String,
    pub token_hash: String,
}

/// Generates and verifies voting tokens with a server-side secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Mint a token for the given payload.
    pub fn generate(&self, payload: &TokenPayload) -> GeneratedToken {
        let nonce: [u8; NONCE_BYTES] = rand::thread_rng().gen();
        let wire = WirePayload {
            member_id: payload.member_id.to_string(),
            election_id: payload.election_id.to_string(),
            issued_at: payload.issued_at,
            nonce: BASE64URL_NOPAD.encode(&nonce),
        };
        // Serialising a struct of strings cannot fail.
        let json = serde_json::to_vec(&wire).expect("Serialisation is infallible");
        let body = BASE64URL_NOPAD.encode(&json);

        let mut mac = self.mac();
        mac.update(body.as_bytes());
        let tag = BASE64URL_NOPAD.encode(&mac.finalize().into_bytes());

        let token = format!("{body}.{tag}");
        let token_hash = Self::hash_token(&token);
        GeneratedToken { token, token_hash }
    }

    /// Check the token's integrity tag and decode its payload.
    pub fn verify(&self, token: &str) -> Result<TokenPayload> {
        let (body, tag) = token.split_once('.').ok_or(Error::TokenMalformed)?;
        let tag = BASE64URL_NOPAD
            .decode(tag.as_bytes())
            .map_err(|_| Error::TokenMalformed)?;
        let json = BASE64URL_NOPAD
            .decode(body.as_bytes())
            .map_err(|_| Error::TokenMalformed)?;

        let mut mac = self.mac();
        mac.update(body.as_bytes());
        mac.verify_slice(&tag).map_err(|_| Error::TokenInvalid)?;

        let wire: WirePayload = serde_json::from_slice(&json).map_err(|_| Error::TokenMalformed)?;
        Ok(TokenPayload {
            member_id: wire.member_id.parse().map_err(|_| Error::TokenMalformed)?,
            election_id: wire.election_id.parse().map_err(|_| Error::TokenMalformed)?,
            issued_at: wire.issued_at,
        })
    }

    /// One-way hash used to look tokens up in the store.
    pub fn hash_token(token: &str) -> String {
        HEXLOWER.encode(&Sha256::digest(token.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> TokenPayload {
        TokenPayload {
            member_id: Id::new(),
            election_id: Id::new(),
            // Whole seconds, as that is the precision on the wire.
            issued_at: DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn generated_tokens_verify() {
        let codec = TokenCodec::new("link secret");
        let payload = payload();
        let generated = codec.generate(&payload);

        assert_eq!(codec.verify(&generated.token).unwrap(), payload);
        assert_eq!(generated.token_hash, TokenCodec::hash_token(&generated.token));
        assert_eq!(generated.token_hash.len(), 64);
    }

    #[test]
    fn tokens_for_the_same_pair_differ() {
        let codec = TokenCodec::new("link secret");
        let payload = payload();
        let first = codec.generate(&payload);
        let second = codec.generate(&payload);
        assert_ne!(first.token, second.token);
        assert_ne!(first.token_hash, second.token_hash);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = TokenCodec::new("link secret").generate(&payload()).token;
        let result = TokenCodec::new("other secret").verify(&token);
        assert!(matches!(result, Err(Error::TokenInvalid)));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let codec = TokenCodec::new("link secret");
        let token = codec.generate(&payload()).token;
        let (_, tag) = token.split_once('.').unwrap();

        let forged_body = BASE64URL_NOPAD.encode(
            serde_json::json!({
                "mid": Id::new().to_string(),
                "eid": Id::new().to_string(),
                "iat": 1_760_000_000,
                "nonce": "AAAA",
            })
            .to_string()
            .as_bytes(),
        );
        let forged = format!("{forged_body}.{tag}");
        assert!(matches!(codec.verify(&forged), Err(Error::TokenInvalid)));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = TokenCodec::new("link secret");
        for token in ["", "no-dot-here", "a.b.c", "!!!.???", "abc."] {
            let result = codec.verify(token);
            assert!(
                matches!(result, Err(Error::TokenMalformed | Error::TokenInvalid)),
                "{token:?} gave {result:?}"
            );
        }
        assert!(matches!(codec.verify("no-dot-here"), Err(Error::TokenMalformed)));
        assert!(matches!(codec.verify("!!!.???"), Err(Error::TokenMalformed)));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(TokenCodec::hash_token("abc"), TokenCodec::hash_token("abc"));
        assert_ne!(TokenCodec::hash_token("abc"), TokenCodec::hash_token("abd"));
    }
}
