//! The two request-signing schemes.
//!
//! **Header scheme.** The client sends `X-Access-Key`, `X-Signature` and
//! `X-Expires`. The signature is lowercase hex of
//! `HMAC-SHA256(secret_key, UPPER(method) "\n" path "\n" expires)`, where
//! `path` is the original path-and-query with trailing slashes trimmed.
//!
//! **Presigned scheme.** A URL carries `bucket`, `key`, `expires`, `sig` and an
//! optional `versionID`. The signature is unpadded base64url of
//! `HMAC-SHA256(owner_secret, bucket ":" key ":" operation ":" expires ":" version)`.
//! The operation is never in the URL; it is implied by the redeeming verb.
//!
//! Both schemes accept a signature only while `now < expires`. The functions
//! here take `now` as an argument and never read the clock themselves.

use crate::{
    auth::{AuthContext, AuthMethod},
    errors::{AppError, AppResult},
    services::metadata_store::MetadataStore,
};
use axum::http::{HeaderMap, Method};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use tracing::warn;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_KEY_HEADER: &str = "x-access-key";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const EXPIRES_HEADER: &str = "x-expires";

/// Longest lifetime a presigned URL may be issued for (7 days).
pub const MAX_PRESIGN_SECONDS: i64 = 7 * 24 * 60 * 60;

/// The single object operation a presigned URL grants.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresignOperation {
    Download,
    Upload,
}

impl PresignOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignOperation::Download => "download",
            PresignOperation::Upload => "upload",
        }
    }

    /// GET redeems downloads, POST redeems uploads. Anything else has no
    /// meaning for a presigned URL.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(PresignOperation::Download),
            Method::POST => Some(PresignOperation::Upload),
            _ => None,
        }
    }
}

impl fmt::Display for PresignOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn mac_for(secret_key: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    HmacSha256::new_from_slice(secret_key.as_bytes()).expect("HMAC accepts any key length")
}

// --- header scheme ---------------------------------------------------------

/// Exact byte string MACed by the header scheme.
pub fn request_canonical_string(method: &str, path: &str, expires: i64) -> String {
    format!(
        "{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path.trim_end_matches('/'),
        expires
    )
}

/// Hex HMAC-SHA256 of the header-scheme canonical string.
pub fn sign_request(secret_key: &str, method: &str, path: &str, expires: i64) -> String {
    let mut mac = mac_for(secret_key);
    mac.update(request_canonical_string(method, path, expires).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a header-scheme signature plus the expiry rule.
pub fn verify_request(
    secret_key: &str,
    method: &str,
    path: &str,
    expires: i64,
    signature: &str,
    now: i64,
) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let mut mac = mac_for(secret_key);
    mac.update(request_canonical_string(method, path, expires).as_bytes());
    mac.verify_slice(&provided).is_ok() && now < expires
}

/// Credentials a client claims through the signing headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCredentials {
    pub access_key: String,
    pub signature: String,
    pub expires: i64,
}

/// Pull the signing headers out of a request.
///
/// `Ok(None)` means the request is anonymous. A partial set of headers, or a
/// non-numeric expiry, is an authentication failure rather than anonymity.
pub fn header_credentials(headers: &HeaderMap) -> AppResult<Option<HeaderCredentials>> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let (access_key, signature, expires) =
        (get(ACCESS_KEY_HEADER), get(SIGNATURE_HEADER), get(EXPIRES_HEADER));

    match (access_key, signature, expires) {
        (None, None, None) => Ok(None),
        (Some(access_key), Some(signature), Some(expires)) => {
            let expires = expires
                .parse::<i64>()
                .map_err(|_| AppError::authentication("invalid expiration timestamp"))?;
            Ok(Some(HeaderCredentials {
                access_key: access_key.to_string(),
                signature: signature.to_string(),
                expires,
            }))
        }
        _ => Err(AppError::authentication("missing authentication headers")),
    }
}

// --- presigned scheme ------------------------------------------------------

/// Exact byte string MACed by the presigned scheme.
pub fn presign_canonical_string(
    bucket: &str,
    key: &str,
    operation: PresignOperation,
    expires: i64,
    version_id: Option<&str>,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        bucket,
        key,
        operation.as_str(),
        expires,
        version_id.unwrap_or("")
    )
}

/// Unpadded base64url HMAC-SHA256 of the presigned canonical string.
pub fn sign_presigned(
    secret_key: &str,
    bucket: &str,
    key: &str,
    operation: PresignOperation,
    expires: i64,
    version_id: Option<&str>,
) -> String {
    let mut mac = mac_for(secret_key);
    mac.update(presign_canonical_string(bucket, key, operation, expires, version_id).as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Constant-time check of a presigned signature plus the expiry rule.
#[allow(clippy::too_many_arguments)]
pub fn verify_presigned(
    secret_key: &str,
    bucket: &str,
    key: &str,
    operation: PresignOperation,
    expires: i64,
    version_id: Option<&str>,
    signature: &str,
    now: i64,
) -> bool {
    let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let mut mac = mac_for(secret_key);
    mac.update(presign_canonical_string(bucket, key, operation, expires, version_id).as_bytes());
    mac.verify_slice(&provided).is_ok() && now < expires
}

/// Relative URL redeeming a presigned grant:
/// `/api/presigned/{operation}?bucket=..&key=..&expires=..&sig=..[&versionID=..]`.
pub fn presigned_url(
    bucket: &str,
    key: &str,
    operation: PresignOperation,
    expires: i64,
    version_id: Option<&str>,
    signature: &str,
) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("bucket", bucket)
        .append_pair("key", key)
        .append_pair("expires", &expires.to_string())
        .append_pair("sig", signature);
    if let Some(version) = version_id.filter(|v| !v.is_empty()) {
        query.append_pair("versionID", version);
    }
    format!("/api/presigned/{}?{}", operation.as_str(), query.finish())
}

/// Query parameters of a presigned URL as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresignedQuery {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub sig: Option<String>,
    pub expires: Option<String>,
    #[serde(rename = "versionID")]
    pub version_id: Option<String>,
}

/// What a verified presigned URL entitles its bearer to.
#[derive(Debug, Clone)]
pub struct PresignedGrant {
    /// The bucket owner, on whose behalf the request runs.
    pub caller: AuthContext,
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub operation: PresignOperation,
}

// --- credentials -----------------------------------------------------------

/// Fresh random `(access_key, secret_key)`: 16 and 32 bytes, hex encoded.
pub fn generate_credentials() -> (String, String) {
    let mut access = [0u8; 16];
    let mut secret = [0u8; 32];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut access);
    rng.fill_bytes(&mut secret);
    (hex::encode(access), hex::encode(secret))
}

// --- engine ----------------------------------------------------------------

/// Resolves claimed identities against the user table and applies the pure
/// verification functions above.
#[derive(Clone)]
pub struct SignatureEngine {
    store: MetadataStore,
}

impl SignatureEngine {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// Authenticate a header-signed request.
    pub async fn authenticate_request(
        &self,
        creds: &HeaderCredentials,
        method: &str,
        path: &str,
        now: i64,
    ) -> AppResult<AuthContext> {
        let user = self
            .store
            .user_by_access_key(&creds.access_key)
            .await?
            .ok_or_else(|| {
                warn!(access_key = %creds.access_key, "unknown access key");
                AppError::authentication("invalid or expired signature")
            })?;

        if !verify_request(
            &user.secret_key,
            method,
            path,
            creds.expires,
            &creds.signature,
            now,
        ) {
            warn!(
                access_key = %creds.access_key,
                method = %method,
                path = %path,
                expires = creds.expires,
                "header signature rejected"
            );
            return Err(AppError::authentication("invalid or expired signature"));
        }

        Ok(AuthContext::for_user(&user, AuthMethod::Header))
    }

    /// Verify a presigned URL redeemed with `method` at the endpoint serving
    /// `endpoint_op`.
    pub async fn redeem_presigned(
        &self,
        query: &PresignedQuery,
        method: &Method,
        endpoint_op: PresignOperation,
        now: i64,
    ) -> AppResult<PresignedGrant> {
        let (Some(bucket), Some(key), Some(sig), Some(expires)) = (
            query.bucket.as_deref().filter(|v| !v.is_empty()),
            query.key.as_deref().filter(|v| !v.is_empty()),
            query.sig.as_deref().filter(|v| !v.is_empty()),
            query.expires.as_deref().filter(|v| !v.is_empty()),
        ) else {
            return Err(AppError::validation("missing required query params"));
        };

        let operation = PresignOperation::from_method(method)
            .ok_or_else(|| AppError::validation("unsupported HTTP method"))?;
        if operation != endpoint_op {
            return Err(AppError::authentication(
                "operation does not match the request method",
            ));
        }

        let expires = expires
            .parse::<i64>()
            .map_err(|_| AppError::validation("invalid expiration"))?;
        if now >= expires {
            return Err(AppError::authentication("URL expired"));
        }

        let version_id = query.version_id.as_deref().filter(|v| !v.is_empty());
        let invalid = || AppError::authentication("invalid signature");

        let bucket_rec = self.store.bucket_by_name(bucket).await?.ok_or_else(invalid)?;
        let owner = self
            .store
            .user_by_id(bucket_rec.owner_id)
            .await?
            .ok_or_else(invalid)?;

        if !verify_presigned(
            &owner.secret_key,
            bucket,
            key,
            operation,
            expires,
            version_id,
            sig,
            now,
        ) {
            warn!(bucket = %bucket, key = %key, operation = %operation, "presigned signature rejected");
            return Err(invalid());
        }

        Ok(PresignedGrant {
            caller: AuthContext::for_user(&owner, AuthMethod::Presigned),
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version_id.map(str::to_string),
            operation,
        })
    }
}
