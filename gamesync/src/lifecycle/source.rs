//! Where manifests come from.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::manifest::{Manifest, ReleaseChannel};
use crate::transfer::{BoxFuture, FetchRequest, RetryStrategy, Transport};

use super::error::LifecycleResult;

/// Supplies a freshly fetched manifest for every operation.
pub trait ManifestSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, LifecycleResult<Manifest>>;
}

/// Fetches `checksums.json` from the release channel.
pub struct HttpManifestSource {
    transport: Arc<dyn Transport>,
    channel: ReleaseChannel,
    retry: RetryStrategy,
}

impl HttpManifestSource {
    pub fn new(transport: Arc<dyn Transport>, channel: ReleaseChannel) -> Self {
        Self {
            transport,
            channel,
            retry: RetryStrategy::whole_file(),
        }
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }
}

impl ManifestSource for HttpManifestSource {
    fn fetch(&self) -> BoxFuture<'_, LifecycleResult<Manifest>> {
        Box::pin(async move {
            let url = self.channel.manifest_url();
            let mut attempt = 0;

            let body = loop {
                attempt += 1;
                let request = FetchRequest::new(&url)
                    .with_channel_key(self.channel.channel_key.clone());

                let result = match self.transport.fetch(request).await {
                    Ok(response) => response.read_to_end().await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(body) => break body,
                    Err(e) => match self.retry.should_retry(&e, attempt) {
                        Some(delay) => {
                            warn!(url = %url, attempt, error = %e, "Manifest fetch failed, retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e.into()),
                    },
                }
            };

            let manifest = Manifest::from_slice(&body)?;
            debug!(
                url = %url,
                files = manifest.files.len(),
                version = manifest.version.as_deref().unwrap_or("-"),
                "Fetched manifest"
            );
            Ok(manifest)
        })
    }
}
