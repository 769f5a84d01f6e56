//! HMAC-signed blob links for the local backend.
//!
//! A link carries `method`, `expires` (unix seconds), an optional
//! `contentType` and a hex `signature` over
//! `METHOD \n key \n expires \n contentType`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use sha2::Sha256;

use crate::StoreError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMethod {
    Get,
    Put,
}

impl BlobMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobMethod::Get => "GET",
            BlobMethod::Put => "PUT",
        }
    }
}

/// The query half of a signed link, as received back from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobGrant {
    pub method: String,
    pub expires: i64,
    #[serde(default)]
    pub content_type: Option<String>,
    pub signature: String,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("link expired")]
    Expired,

    #[error("link not valid for {0}")]
    WrongMethod(String),

    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(key: &[u8]) -> Result<Self, StoreError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| StoreError::Internal(format!("signing key: {e}")))?;
        Ok(Self { mac })
    }

    /// A signer with a fresh 32-byte key.
    pub fn random() -> Result<Self, StoreError> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(&key)
    }

    pub fn sign(
        &self,
        method: BlobMethod,
        key: &str,
        expires: i64,
        content_type: Option<&str>,
    ) -> String {
        let mut mac = self.mac.clone();
        mac.update(method.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(content_type.unwrap_or_default().as_bytes());
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn verify(
        &self,
        method: BlobMethod,
        key: &str,
        grant: &BlobGrant,
        now: i64,
    ) -> Result<(), SignatureError> {
        if !grant.method.eq_ignore_ascii_case(method.as_str()) {
            return Err(SignatureError::WrongMethod(method.as_str().to_string()));
        }
        if now > grant.expires {
            return Err(SignatureError::Expired);
        }
        let expected = self.sign(method, key, grant.expires, grant.content_type.as_deref());
        if constant_time_eq(&expected, &grant.signature.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// `{base_url}/blobs/{key}?method=..&expires=..[&contentType=..]&signature=..`
    pub fn signed_url(
        &self,
        base_url: &str,
        method: BlobMethod,
        key: &str,
        ttl: Duration,
        content_type: Option<&str>,
    ) -> Result<String, StoreError> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.sign(method, key, expires, content_type);

        let mut url = url::Url::parse(base_url)
            .map_err(|e| StoreError::Internal(format!("public url {base_url}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Internal(format!("public url {base_url} cannot be a base")))?
            .pop_if_empty()
            .push("blobs")
            .extend(key.split('/'));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("method", method.as_str());
            query.append_pair("expires", &expires.to_string());
            if let Some(ct) = content_type {
                query.append_pair("contentType", ct);
            }
            query.append_pair("signature", &signature);
        }
        Ok(url.into())
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant_from(url: &str) -> (String, BlobGrant) {
        let parsed = url::Url::parse(url).unwrap();
        let key = parsed.path().trim_start_matches("/blobs/").to_string();
        let pairs: std::collections::HashMap<String, String> =
            parsed.query_pairs().into_owned().collect();
        let grant = BlobGrant {
            method: pairs["method"].clone(),
            expires: pairs["expires"].parse().unwrap(),
            content_type: pairs.get("contentType").cloned(),
            signature: pairs["signature"].clone(),
        };
        (key, grant)
    }

    #[test]
    fn signed_url_verifies() {
        let signer = UrlSigner::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let url = signer
            .signed_url(
                "http://localhost:3710",
                BlobMethod::Get,
                "tasks/t1/attachments/u1/a.png",
                Duration::from_secs(300),
                None,
            )
            .unwrap();
        assert!(url.starts_with("http://localhost:3710/blobs/tasks/t1/attachments/u1/a.png?method=GET"));

        let (key, grant) = grant_from(&url);
        let now = chrono::Utc::now().timestamp();
        assert_eq!(signer.verify(BlobMethod::Get, &key, &grant, now), Ok(()));
    }

    #[test]
    fn tampering_is_rejected() {
        let signer = UrlSigner::random().unwrap();
        let url = signer
            .signed_url(
                "http://localhost:3710/",
                BlobMethod::Put,
                "tasks/t1/attachments/u1/a.png",
                Duration::from_secs(60),
                Some("image/png"),
            )
            .unwrap();
        let (key, grant) = grant_from(&url);
        let now = chrono::Utc::now().timestamp();

        assert_eq!(signer.verify(BlobMethod::Put, &key, &grant, now), Ok(()));
        assert_eq!(
            signer.verify(BlobMethod::Get, &key, &grant, now),
            Err(SignatureError::WrongMethod("GET".into()))
        );
        assert_eq!(
            signer.verify(BlobMethod::Put, "tasks/t1/attachments/u1/b.png", &grant, now),
            Err(SignatureError::Mismatch)
        );

        let mut wrong_type = grant.clone();
        wrong_type.content_type = Some("application/pdf".into());
        assert_eq!(
            signer.verify(BlobMethod::Put, &key, &wrong_type, now),
            Err(SignatureError::Mismatch)
        );

        assert_eq!(
            signer.verify(BlobMethod::Put, &key, &grant, grant.expires + 1),
            Err(SignatureError::Expired)
        );

        let other = UrlSigner::random().unwrap();
        assert_eq!(
            other.verify(BlobMethod::Put, &key, &grant, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
