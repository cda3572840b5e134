//! Request signing for the platform's app endpoints.
//!
//! A signed request carries the caller's fields plus a set of client fields
//! (`access_key`, `build`, `platform`, `ts`, `version`, `appkey`). All fields
//! are sorted by key, form-encoded, suffixed with the app secret and hashed
//! with MD5; the hex digest is appended as `sign`.
//!
//! Signing is pure: identical payload, options and timestamp always produce
//! byte-identical output. Signatures are never cached because the timestamp is
//! part of the signed content.

use crate::models::PlatformConstants;
use md5::{Digest, Md5};
use std::collections::BTreeMap;

/// Platform tag sent by the desktop client.
pub const PLATFORM: &str = "pc_link";

/// Which client fields are merged into a signed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignOptions {
    pub access_key: bool,
    pub build: bool,
    pub platform: bool,
    pub ts: bool,
    pub version: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            access_key: true,
            build: true,
            platform: true,
            ts: true,
            version: true,
        }
    }
}

impl SignOptions {
    /// Fields used by web endpoints such as the identity call.
    pub fn web() -> Self {
        Self {
            access_key: false,
            build: false,
            version: false,
            ..Self::default()
        }
    }

    pub fn without_access_key(self) -> Self {
        Self {
            access_key: false,
            ..self
        }
    }
}

/// Signs payloads with one set of client constants.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    app_key: String,
    app_secret: String,
    build: String,
    version: String,
}

impl RequestSigner {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        build: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            build: build.into(),
            version: version.into(),
        }
    }

    pub fn from_constants(constants: &PlatformConstants) -> Self {
        Self::new(
            &constants.app_key,
            &constants.app_secret,
            &constants.build,
            &constants.version,
        )
    }

    /// Sign `payload` with an explicit unix timestamp.
    ///
    /// Caller fields override client fields of the same name.
    pub fn sign<I, K, V>(&self, payload: I, options: SignOptions, ts: i64) -> SignedParams
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = BTreeMap::new();
        if options.access_key {
            params.insert("access_key".to_string(), String::new());
        }
        if options.build {
            params.insert("build".to_string(), self.build.clone());
        }
        if options.platform {
            params.insert("platform".to_string(), PLATFORM.to_string());
        }
        if options.ts {
            params.insert("ts".to_string(), ts.to_string());
        }
        if options.version {
            params.insert("version".to_string(), self.version.clone());
        }
        params.insert("appkey".to_string(), self.app_key.clone());
        for (key, value) in payload {
            params.insert(key.into(), value.into());
        }
        // A caller-supplied signature is never part of the signed content.
        params.remove("sign");

        let sign = digest(&params, &self.app_secret);
        params.insert("sign".to_string(), sign);
        SignedParams {
            params,
            csrf_attached: false,
        }
    }

    /// Sign `payload` with the current time.
    pub fn sign_now<I, K, V>(&self, payload: I, options: SignOptions) -> SignedParams
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.sign(payload, options, chrono::Utc::now().timestamp())
    }

    /// Recompute the signature of `params` and compare it to its `sign`.
    ///
    /// A csrf pair attached with [`SignedParams::with_csrf`] is left out;
    /// `csrf` fields that were part of the signed payload are checked.
    pub fn verify(&self, params: &SignedParams) -> bool {
        let Some(sign) = params.signature() else {
            return false;
        };
        let mut unsigned = params.params.clone();
        unsigned.remove("sign");
        if params.csrf_attached {
            unsigned.remove("csrf");
            unsigned.remove("csrf_token");
        }
        digest(&unsigned, &self.app_secret) == sign
    }
}

/// Sorted, signed parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedParams {
    params: BTreeMap<String, String>,
    // Set once `with_csrf` replaced any signed csrf fields.
    csrf_attached: bool,
}

impl SignedParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn signature(&self) -> Option<&str> {
        self.get("sign")
    }

    /// Attach the csrf pair required by mutating calls.
    ///
    /// The pair is added after signing and is not covered by `sign`.
    pub fn with_csrf(mut self, csrf: &str) -> Self {
        self.params.insert("csrf".to_string(), csrf.to_string());
        self.params.insert("csrf_token".to_string(), csrf.to_string());
        self.csrf_attached = true;
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Pairs in key order, ready for a query string or form body.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Form-encoded representation in key order.
    pub fn encode(&self) -> String {
        encode(&self.params)
    }
}

/// `application/x-www-form-urlencoded` serialization, space as `+`.
fn encode(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", quote_plus(k), quote_plus(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn quote_plus(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

fn digest(params: &BTreeMap<String, String>, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(encode(params).as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
