//! Release channel addressing.

/// File name of the manifest document at the root of a channel.
pub const MANIFEST_FILE_NAME: &str = "checksums.json";

/// Header carrying the access key of restricted channels.
pub const CHANNEL_KEY_HEADER: &str = "channel-key";

/// Descriptive client identifier sent with every request.
pub fn user_agent() -> String {
    format!("gamesync/{}", env!("CARGO_PKG_VERSION"))
}

/// A named, independently versioned distribution stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseChannel {
    /// Channel name, e.g. `live` or `beta`.
    pub name: String,
    /// Base URL every manifest path is resolved against.
    pub base_url: String,
    /// Access key for restricted channels.
    pub channel_key: Option<String>,
}

impl ReleaseChannel {
    /// Create an open (unauthenticated) channel.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            channel_key: None,
        }
    }

    /// Attach an access key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.channel_key = Some(key.into());
        self
    }

    /// Resolve a manifest-relative path to a full URL.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// URL of the channel manifest.
    pub fn manifest_url(&self) -> String {
        self.url_for(MANIFEST_FILE_NAME)
    }

    /// Host part of the base URL, used for connectivity probes.
    pub fn host(&self) -> Option<&str> {
        let rest = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        let authority = rest.split('/').next()?;
        let host = authority.rsplit('@').next()?;
        let host = host.split(':').next()?;
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}
