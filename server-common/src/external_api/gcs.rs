pub mod storage {
    use std::{fmt, path::Path, path::PathBuf, str::FromStr, sync::Arc};

    use anyhow::{anyhow, Context, Result};
    use base64::Engine;
    use chrono::{DateTime, Duration, Utc};
    use itertools::Itertools;
    use rsa::{
        pkcs1::DecodeRsaPrivateKey,
        pkcs1v15::SigningKey,
        pkcs8::DecodePrivateKey,
        signature::{SignatureEncoding, Signer},
        RsaPrivateKey,
    };
    use secrecy::{ExposeSecret, SecretString};
    use serde::Deserialize;
    use sha2::{Digest, Sha256};
    use thiserror::Error;
    use tracing::{debug, info};

    use crate::env::optional_env;

    pub const DEFAULT_STORAGE_HOST: &str = "storage.googleapis.com";
    pub const MAX_V4_EXPIRES_SECONDS: i64 = 7 * 24 * 60 * 60;

    const ENV_CREDENTIALS_FILE_PATH: &str = "GOOGLE_CREDENTIALS_FILE_PATH";
    const ENV_BUCKET_NAME: &str = "BUCKET_NAME";
    const ENV_ACCESS_ID: &str = "GOOGLE_ACCESS_ID";
    const ENV_PRIVATE_KEY: &str = "PRIVATE_KEY";
    const ENV_STORAGE_HOST: &str = "GCS_STORAGE_HOST";
    const ENV_SIGNING_SCHEME: &str = "GCS_SIGNING_SCHEME";

    const V4_ALGORITHM: &str = "GOOG4-RSA-SHA256";
    const V4_SCOPE_SUFFIX: &str = "auto/storage/goog4_request";

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum SigningScheme {
        V2,
        #[default]
        V4,
    }

    #[derive(Debug, Error)]
    #[error("unknown signing scheme: {0}")]
    pub struct UnknownSigningScheme(String);

    impl FromStr for SigningScheme {
        type Err = UnknownSigningScheme;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.to_ascii_lowercase().as_str() {
                "v2" => Ok(SigningScheme::V2),
                "v4" => Ok(SigningScheme::V4),
                _ => Err(UnknownSigningScheme(s.to_owned())),
            }
        }
    }

    #[derive(Debug, Error)]
    pub enum SignError {
        #[error("object name is empty")]
        EmptyObjectName,
        #[error("expires must be positive, got {0}s")]
        NonPositiveExpires(i64),
        #[error("expires {0}s exceeds the maximum of {MAX_V4_EXPIRES_SECONDS}s")]
        ExpiresTooLong(i64),
        #[error("rsa signing failed: {0}")]
        Signature(#[from] rsa::signature::Error),
    }

    /// Settings for [`GcsClient`]. Every field left as `None` is read from
    /// the environment, then from the service account credentials file.
    #[derive(Debug, Clone, Default)]
    pub struct GcsConfig {
        pub credentials_file: Option<PathBuf>,
        pub bucket_name: Option<String>,
        pub access_id: Option<String>,
        pub private_key: Option<SecretString>,
        pub storage_host: Option<String>,
        pub scheme: Option<SigningScheme>,
    }

    #[derive(Default, Deserialize)]
    struct ServiceAccountKey {
        client_email: Option<String>,
        private_key: Option<String>,
    }

    #[derive(Clone)]
    pub struct GcsClient {
        bucket_name: String,
        access_id: String,
        storage_host: String,
        scheme: SigningScheme,
        signing_key: Arc<SigningKey<Sha256>>,
    }

    impl GcsClient {
        pub fn new(
            bucket_name: String,
            access_id: String,
            private_key: &SecretString,
            storage_host: String,
            scheme: SigningScheme,
        ) -> Result<Self> {
            let private_key = parse_private_key(private_key.expose_secret())?;

            Ok(Self {
                bucket_name,
                access_id,
                storage_host,
                scheme,
                signing_key: Arc::new(SigningKey::new(private_key)),
            })
        }

        pub fn from_env() -> Result<Self> {
            GcsConfig::default().try_into()
        }

        pub fn bucket_name(&self) -> &str {
            &self.bucket_name
        }

        /// Build a signed URL for `verb` on `object_name`, valid for `expires`
        /// starting at `now`. Signing is local; nothing is sent to the backend
        /// and the object does not need to exist.
        pub fn signed_url(
            &self,
            verb: &str,
            object_name: &str,
            expires: Duration,
            now: DateTime<Utc>,
        ) -> Result<String, SignError> {
            if object_name.is_empty() {
                return Err(SignError::EmptyObjectName);
            }
            if expires <= Duration::zero() {
                return Err(SignError::NonPositiveExpires(expires.num_seconds()));
            }

            match self.scheme {
                SigningScheme::V2 => self.sign_v2(verb, object_name, now + expires),
                SigningScheme::V4 => self.sign_v4(verb, object_name, expires, now),
            }
        }

        fn canonical_uri(&self, object_name: &str) -> String {
            let object = object_name
                .split('/')
                .map(|segment| urlencoding::encode(segment))
                .join("/");
            format!("/{}/{}", self.bucket_name, object)
        }

        /// Returns `(canonical_uri, query_string, string_to_sign)`.
        fn v4_request(
            &self,
            verb: &str,
            object_name: &str,
            expires: Duration,
            now: DateTime<Utc>,
        ) -> (String, String, String) {
            let request_time = now.format("%Y%m%dT%H%M%SZ").to_string();
            let request_day = now.format("%Y%m%d");
            let credential_scope = format!("{request_day}/{V4_SCOPE_SUFFIX}");
            let canonical_uri = self.canonical_uri(object_name);

            let query_string = [
                ("X-Goog-Algorithm", V4_ALGORITHM.to_owned()),
                (
                    "X-Goog-Credential",
                    format!("{}/{credential_scope}", self.access_id),
                ),
                ("X-Goog-Date", request_time.clone()),
                ("X-Goog-Expires", expires.num_seconds().to_string()),
                ("X-Goog-SignedHeaders", "host".to_owned()),
            ]
            .iter()
            .sorted_by(|(k1, _), (k2, _)| k1.cmp(k2))
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .join("&");

            let canonical_request = format!(
                "{verb}\n{canonical_uri}\n{query_string}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
                self.storage_host
            );
            debug!("canonical_request: {}", canonical_request);

            let string_to_sign = format!(
                "{V4_ALGORITHM}\n{request_time}\n{credential_scope}\n{}",
                hex(&Sha256::digest(canonical_request.as_bytes()))
            );

            (canonical_uri, query_string, string_to_sign)
        }

        fn sign_v4(
            &self,
            verb: &str,
            object_name: &str,
            expires: Duration,
            now: DateTime<Utc>,
        ) -> Result<String, SignError> {
            if expires.num_seconds() > MAX_V4_EXPIRES_SECONDS {
                return Err(SignError::ExpiresTooLong(expires.num_seconds()));
            }

            let (canonical_uri, query_string, string_to_sign) =
                self.v4_request(verb, object_name, expires, now);
            let signature = hex(&self.sign(string_to_sign.as_bytes())?);

            Ok(format!(
                "https://{}{canonical_uri}?{query_string}&X-Goog-Signature={signature}",
                self.storage_host
            ))
        }

        fn sign_v2(
            &self,
            verb: &str,
            object_name: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<String, SignError> {
            let expires = expires_at.timestamp();
            let string_to_sign = format!(
                "{verb}\n\n\n{expires}\n/{}/{}",
                self.bucket_name, object_name
            );
            let signature = base64::engine::general_purpose::STANDARD
                .encode(self.sign(string_to_sign.as_bytes())?);

            Ok(format!(
                "https://{}{}?GoogleAccessId={}&Expires={}&Signature={}",
                self.storage_host,
                self.canonical_uri(object_name),
                urlencoding::encode(&self.access_id),
                expires,
                urlencoding::encode(&signature)
            ))
        }

        fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignError> {
            Ok(self.signing_key.try_sign(message)?.to_vec())
        }
    }

    impl fmt::Debug for GcsClient {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("GcsClient")
                .field("bucket_name", &self.bucket_name)
                .field("access_id", &self.access_id)
                .field("storage_host", &self.storage_host)
                .field("scheme", &self.scheme)
                .finish_non_exhaustive()
        }
    }

    impl TryFrom<GcsConfig> for GcsClient {
        type Error = anyhow::Error;

        fn try_from(value: GcsConfig) -> Result<Self> {
            let credentials_file = match value.credentials_file {
                Some(path) => Some(path),
                None => optional_env::<PathBuf>(ENV_CREDENTIALS_FILE_PATH)?,
            };
            let service_account = credentials_file
                .as_deref()
                .map(ServiceAccountKey::from_file)
                .transpose()?
                .unwrap_or_default();

            let bucket_name = match value.bucket_name {
                Some(bucket_name) => bucket_name,
                None => optional_env(ENV_BUCKET_NAME)?.ok_or(anyhow!("bucket name is not set"))?,
            };

            let access_id = match value.access_id {
                Some(access_id) => access_id,
                None => optional_env(ENV_ACCESS_ID)?
                    .or(service_account.client_email)
                    .ok_or(anyhow!("access id is not set"))?,
            };

            let private_key = match value.private_key {
                Some(private_key) => private_key,
                None => optional_env::<String>(ENV_PRIVATE_KEY)?
                    .map(|key| unescape_newlines(&key))
                    .or(service_account.private_key)
                    .map(SecretString::from)
                    .ok_or(anyhow!("private key is not set"))?,
            };

            let storage_host = match value.storage_host {
                Some(storage_host) => storage_host,
                None => optional_env(ENV_STORAGE_HOST)?
                    .unwrap_or_else(|| DEFAULT_STORAGE_HOST.to_owned()),
            };

            let scheme = match value.scheme {
                Some(scheme) => scheme,
                None => optional_env(ENV_SIGNING_SCHEME)?.unwrap_or_default(),
            };

            info!(
                "signing for bucket {} as {} with {:?}",
                bucket_name, access_id, scheme
            );
            GcsClient::new(bucket_name, access_id, &private_key, storage_host, scheme)
        }
    }

    impl ServiceAccountKey {
        fn from_file(path: &Path) -> Result<Self> {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read credentials file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse credentials file {}", path.display()))
        }
    }

    /// Keys passed through environment variables usually carry `\n` as two
    /// literal characters.
    pub fn unescape_newlines(key: &str) -> String {
        key.replace("\\n", "\n")
    }

    fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
        let pem = pem.trim();
        RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| anyhow!("private key is not a valid PKCS#8 or PKCS#1 PEM: {e}"))
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|n| format!("{:02x}", n)).join("")
    }

}
