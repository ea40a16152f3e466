use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, info, warn};

use super::signer::{SignedUrl, Signer};

pub const TIMED_OUT: &str = "signing timed out";
pub const TASK_ABORTED: &str = "signing task aborted";

/// Client key -> object name. The client key is opaque and only used to join
/// the response back to the request.
pub type IssuanceRequest = HashMap<String, String>;

/// Client key -> outcome, exactly one entry per request entry.
pub type IssuanceResponse = HashMap<String, IssuanceOutcome>;

#[derive(Debug)]
struct IssuanceItem {
    client_key: String,
    object_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceOutcome {
    Credential(SignedUrl),
    Failure(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssuerLimits {
    /// Sign calls in flight per batch. `None` is one per item.
    pub max_concurrency: Option<usize>,
    /// Upper bound on a whole batch. Items still unresolved when it passes
    /// are reported as [`TIMED_OUT`].
    pub batch_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct BatchIssuer {
    signer: Arc<dyn Signer>,
    limits: IssuerLimits,
}

enum Interrupted {
    TimedOut,
    ChannelClosed,
}

impl BatchIssuer {
    pub fn new(signer: Arc<dyn Signer>, limits: IssuerLimits) -> Self {
        Self { signer, limits }
    }

    /// Sign every object in `request` concurrently and wait for all of them.
    ///
    /// A failing item only affects its own entry; the batch itself never
    /// fails.
    pub async fn issue(&self, request: IssuanceRequest) -> IssuanceResponse {
        let items = request
            .into_iter()
            .map(|(client_key, object_name)| IssuanceItem {
                client_key,
                object_name,
            })
            .collect::<Vec<_>>();

        let mut response = IssuanceResponse::with_capacity(items.len());
        if items.is_empty() {
            return response;
        }
        info!("issuing {} signed urls", items.len());

        let deadline = self.limits.batch_timeout.map(|timeout| Instant::now() + timeout);
        let semaphore = self
            .limits
            .max_concurrency
            .map(|permits| Arc::new(Semaphore::new(permits)));

        // one slot per item, senders never wait
        let (sender, mut receiver) = mpsc::channel(items.len());
        let mut pending = HashSet::with_capacity(items.len());
        // dropping the set aborts every task, also when the caller drops this future
        let mut tasks = JoinSet::new();

        for item in items {
            pending.insert(item.client_key.clone());

            let signer = self.signer.clone();
            let semaphore = semaphore.clone();
            let sender = sender.clone();
            tasks.spawn(async move {
                let _permit = match &semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };

                let outcome = match signer.sign(&item.object_name).await {
                    Ok(signed_url) => {
                        debug!(
                            "signed {} {} until {}",
                            signed_url.verb, item.object_name, signed_url.expires_at
                        );
                        IssuanceOutcome::Credential(signed_url)
                    }
                    Err(e) => {
                        warn!(
                            "failed to generate signed URL for {}: {:#}",
                            item.object_name, e
                        );
                        IssuanceOutcome::Failure(format!("{e:#}"))
                    }
                };

                let _ = sender.send((item.client_key, outcome)).await;
            });
        }
        drop(sender);

        let mut interrupted = None;
        while !pending.is_empty() {
            let received = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, receiver.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        interrupted = Some(Interrupted::TimedOut);
                        break;
                    }
                },
                None => receiver.recv().await,
            };

            // every sender is gone, the rest died without reporting
            let Some((client_key, outcome)) = received else {
                interrupted = Some(Interrupted::ChannelClosed);
                break;
            };

            pending.remove(&client_key);
            response.insert(client_key, outcome);
        }

        if let Some(interrupted) = interrupted {
            tasks.abort_all();

            while let Ok((client_key, outcome)) = receiver.try_recv() {
                pending.remove(&client_key);
                response.insert(client_key, outcome);
            }

            let reason = match interrupted {
                Interrupted::TimedOut => TIMED_OUT,
                Interrupted::ChannelClosed => TASK_ABORTED,
            };
            warn!("{} signed urls unresolved: {}", pending.len(), reason);
            for client_key in pending {
                response.insert(client_key, IssuanceOutcome::Failure(reason.to_owned()));
            }
        }

        let failed = response
            .values()
            .filter(|outcome| matches!(outcome, IssuanceOutcome::Failure(_)))
            .count();
        info!("issued {} signed urls, {} failed", response.len(), failed);

        response
    }
}
