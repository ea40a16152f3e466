use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use server_common::external_api::gcs::storage::GcsClient;

/// Signed URLs only ever grant read access.
pub const SIGNED_URL_VERB: &str = "GET";
pub const SIGNED_URL_LIFETIME_MINUTES: i64 = 15;

pub fn signed_url_lifetime() -> Duration {
    Duration::minutes(SIGNED_URL_LIFETIME_MINUTES)
}

/// A bearer credential for one object. The backend enforces the expiry;
/// nothing is kept here once it is handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub verb: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Signer: Send + Sync + 'static {
    /// Sign `object_name` for [`SIGNED_URL_VERB`], valid for
    /// [`signed_url_lifetime`]. Must always resolve.
    async fn sign(&self, object_name: &str) -> Result<SignedUrl>;
}

#[derive(Debug, Clone)]
pub struct GcsSigner {
    client: GcsClient,
}

impl GcsSigner {
    pub fn new(client: GcsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Signer for GcsSigner {
    async fn sign(&self, object_name: &str) -> Result<SignedUrl> {
        let now = Utc::now();
        let lifetime = signed_url_lifetime();

        // rsa signing is cpu bound, keep it off the async workers
        let client = self.client.clone();
        let object = object_name.to_owned();
        let url = tokio::task::spawn_blocking(move || {
            client.signed_url(SIGNED_URL_VERB, &object, lifetime, now)
        })
        .await
        .context("signing task failed")?
        .context("unable to generate signed URL")?;

        Ok(SignedUrl {
            url,
            verb: SIGNED_URL_VERB,
            expires_at: now + lifetime,
        })
    }
}

#[cfg(test)]
pub mod stub {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use anyhow::bail;

    use super::*;

    pub const HANG_OBJECT: &str = "hang.txt";
    pub const PANIC_OBJECT: &str = "panic.txt";

    /// Signer double: objects named `bad*` fail, [`HANG_OBJECT`] never
    /// resolves, [`PANIC_OBJECT`] panics, everything else succeeds after its
    /// configured delay.
    #[derive(Default)]
    pub struct StubSigner {
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StubSigner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(mut self, object_name: &str, delay: Duration) -> Self {
            self.delays.insert(object_name.to_owned(), delay);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Signer for StubSigner {
        async fn sign(&self, object_name: &str) -> Result<SignedUrl> {
            self.calls.lock().unwrap().push(object_name.to_owned());
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if object_name == HANG_OBJECT {
                std::future::pending::<()>().await;
            }
            if object_name == PANIC_OBJECT {
                panic!("stub signer panicked on {object_name}");
            }

            match self.delays.get(object_name) {
                Some(delay) => tokio::time::sleep(*delay).await,
                None => tokio::task::yield_now().await,
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if object_name.starts_with("bad") {
                bail!("unable to generate signed URL: key rejected for {object_name}");
            }

            Ok(SignedUrl {
                url: format!("https://signed.test/{object_name}?sig=stub"),
                verb: SIGNED_URL_VERB,
                expires_at: Utc::now() + signed_url_lifetime(),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use secrecy::SecretString;
    use server_common::external_api::gcs::storage::{SigningScheme, DEFAULT_STORAGE_HOST};

    use super::*;

    const TEST_KEY: &str =
        include_str!("../../../../server-common/tests/fixtures/test-key.pem");

    fn gcs_signer() -> GcsSigner {
        let client = GcsClient::new(
            "test-bucket".to_owned(),
            "signer@test-project.iam.gserviceaccount.com".to_owned(),
            &SecretString::from(TEST_KEY.to_owned()),
            DEFAULT_STORAGE_HOST.to_owned(),
            SigningScheme::V4,
        )
        .unwrap();
        GcsSigner::new(client)
    }

    #[tokio::test]
    async fn test_gcs_signer_uses_fixed_verb_and_lifetime() {
        let before = Utc::now();
        let signed = gcs_signer().sign("reports/2024.pdf").await.unwrap();
        let after = Utc::now();

        assert_eq!(signed.verb, "GET");
        assert!(signed.expires_at >= before + Duration::minutes(15));
        assert!(signed.expires_at <= after + Duration::minutes(15));
        assert!(signed
            .url
            .starts_with("https://storage.googleapis.com/test-bucket/reports/2024.pdf?"));
        assert!(signed.url.contains("X-Goog-Expires=900"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_gcs_signer_concurrent_signs() {
        let signer = Arc::new(gcs_signer());
        let tasks = (0..16)
            .map(|i| {
                let signer = signer.clone();
                tokio::spawn(async move { signer.sign(&format!("batch/{i}.txt")).await })
            })
            .collect::<Vec<_>>();

        for (i, task) in tasks.into_iter().enumerate() {
            let signed = task.await.unwrap().unwrap();
            assert!(signed.url.contains(&format!("/test-bucket/batch/{i}.txt?")));
        }
    }

    #[tokio::test]
    async fn test_gcs_signer_reports_failure() {
        let err = gcs_signer().sign("").await.unwrap_err();

        assert_eq!(
            format!("{err:#}"),
            "unable to generate signed URL: object name is empty"
        );
    }
}
