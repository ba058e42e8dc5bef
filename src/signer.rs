//! AWS Signature Version 4 for DynamoDB JSON requests.
//!
//! Every request is a `POST /` with exactly four signed headers: `content-type`,
//! `host`, `x-amz-date` and `x-amz-target`. All functions here are pure; the
//! timestamp is supplied by the caller so that each attempt signs with its own
//! send time.

use crate::{
    config::snapshot::{Credentials, Endpoint},
    error::{Error, Result},
};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm name.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Content type of every DynamoDB JSON request.
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// HTTP method of every request.
pub const METHOD: &str = "POST";

/// Condensed ISO-8601 timestamp, `YYYYMMDDTHHMMSSZ`.
pub const ISO8601_CONDENSED: &str = "%Y%m%dT%H%M%SZ";

/// Date part of the credential scope, `YYYYMMDD`.
pub const ISO_DATE: &str = "%Y%m%d";

const SCOPE_TERMINATOR: &str = "aws4_request";

/// Lower-case hex SHA-256 of a request payload.
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Value of the signed `host` header: the host, plus `:port` when a port is given.
pub fn host_header(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Names of the signed headers, `;`-joined. The target header is left out when empty.
pub fn signed_headers(target: &str) -> &'static str {
    if target.is_empty() {
        "content-type;host;x-amz-date"
    } else {
        "content-type;host;x-amz-date;x-amz-target"
    }
}

/// The canonical request string.
pub fn canonical_request(
    host: &str,
    port: Option<u16>,
    amz_date: &str,
    target: &str,
    payload_hash: &str,
) -> String {
    let host = host_header(host, port);
    let mut headers = vec![
        ("content-type", CONTENT_TYPE),
        ("host", host.as_str()),
        ("x-amz-date", amz_date),
    ];
    if !target.is_empty() {
        headers.push(("x-amz-target", target));
    }
    let mut canonical = format!("{METHOD}\n/\n\n");
    for (name, value) in headers {
        canonical.push_str(name);
        canonical.push(':');
        canonical.push_str(value);
        canonical.push('\n');
    }
    canonical.push('\n');
    canonical.push_str(signed_headers(target));
    canonical.push('\n');
    canonical.push_str(payload_hash);
    canonical
}

/// `date/region/service/aws4_request`.
pub fn credential_scope(timestamp: DateTime<Utc>, region: &str, service: &str) -> String {
    format!(
        "{}/{region}/{service}/{SCOPE_TERMINATOR}",
        timestamp.format(ISO_DATE)
    )
}

/// The string to sign for a canonical request.
pub fn string_to_sign(
    timestamp: DateTime<Utc>,
    canonical_request: &str,
    region: &str,
    service: &str,
) -> String {
    let hashed_canonical_request = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!(
        "{ALGORITHM}\n{}\n{}\n{hashed_canonical_request}",
        timestamp.format(ISO8601_CONDENSED),
        credential_scope(timestamp, region, service),
    )
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Derive the signing key: `HMAC("AWS4" + secret, date)` chained through region,
/// service and `aws4_request`.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let seed = format!("AWS4{secret}");
    let date_key = hmac(seed.as_bytes(), date);
    let region_key = hmac(&date_key, region);
    let service_key = hmac(&region_key, service);
    hmac(&service_key, SCOPE_TERMINATOR)
}

/// Everything a single attempt signs over, except the credentials.
#[derive(Clone, Debug, PartialEq)]
pub struct SigningContext<'a> {
    /// Send time of this attempt.
    pub timestamp: DateTime<Utc>,
    /// Host name.
    pub host: &'a str,
    /// Port to include in the host header, if any.
    pub port: Option<u16>,
    /// Region of the credential scope.
    pub region: &'a str,
    /// Service of the credential scope.
    pub service: &'a str,
    /// Value of `x-amz-target`.
    pub target: &'a str,
    /// Hex SHA-256 of the payload.
    pub payload_hash: String,
}

impl<'a> SigningContext<'a> {
    /// Build the context of one attempt against `endpoint`.
    pub fn new(
        endpoint: &'a Endpoint,
        target: &'a str,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            host: &endpoint.host,
            port: endpoint.signing_port(),
            region: &endpoint.region,
            service: &endpoint.service,
            target,
            payload_hash: payload_hash(payload),
        }
    }

    /// Value of the `x-amz-date` header.
    pub fn amz_date(&self) -> String {
        self.timestamp.format(ISO8601_CONDENSED).to_string()
    }

    /// Value of the `host` header.
    pub fn host_header(&self) -> String {
        host_header(self.host, self.port)
    }

    /// The canonical request of this attempt.
    pub fn canonical_request(&self) -> String {
        canonical_request(
            self.host,
            self.port,
            &self.amz_date(),
            self.target,
            &self.payload_hash,
        )
    }

    /// The string to sign of this attempt.
    pub fn string_to_sign(&self) -> String {
        string_to_sign(
            self.timestamp,
            &self.canonical_request(),
            self.region,
            self.service,
        )
    }
}

/// Header values produced by signing one attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Authorization {
    /// Value of the `Authorization` header.
    pub authorization: String,
    /// Value of the `X-Amz-Security-Token` header, for session credentials.
    pub security_token: Option<String>,
    /// Value of the `X-Amz-Date` header the signature covers.
    pub amz_date: String,
}

/// Sign one attempt.
///
/// Fails with [`Error::Signing`] when the access key or secret is missing,
/// or when session credentials come without a token.
pub fn sign(context: &SigningContext<'_>, credentials: &Credentials) -> Result<Authorization> {
    if credentials.access_key.is_empty() {
        return Err(Error::signing(context.target, "no access key defined"));
    }
    if credentials.secret.is_empty() {
        return Err(Error::signing(context.target, "no secret defined"));
    }
    let security_token = match credentials.token.as_deref() {
        Some(token) if !token.is_empty() => Some(token.to_string()),
        _ if credentials.use_session_credentials => {
            return Err(Error::signing(
                context.target,
                "session credentials require a token",
            ));
        }
        _ => None,
    };
    let date = context.timestamp.format(ISO_DATE).to_string();
    let key = signing_key(&credentials.secret, &date, context.region, context.service);
    let signature = hex::encode(hmac(&key, &context.string_to_sign()));
    let authorization = format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={signature}",
        credentials.access_key,
        credential_scope(context.timestamp, context.region, context.service),
        signed_headers(context.target),
    );
    Ok(Authorization {
        authorization,
        security_token,
        amz_date: context.amz_date(),
    })
}
