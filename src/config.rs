//! Runtime configuration.
//!
//! Settings come from an optional TOML file, for example:
//!
//! ```toml
//! master-url = "ws://spotnet.local:8080"
//! reconnect = true
//! reconnect-delay = 10
//! ```
//!
//! Values given on the command line take precedence over the file.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::{
    error::{Error, Result},
    protocol::Codec,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Websocket endpoint of the master.
    pub master_url: Url,

    /// Identity announced in outbound envelopes.
    pub client_sender: String,

    /// Identity inbound envelopes must carry.
    pub master_sender: String,

    /// Larger inbound frames are dropped without parsing.
    pub max_message_size: usize,

    /// Whether to open a new channel after the previous one ended.
    pub reconnect: bool,

    /// Base delay before reconnecting.
    pub reconnect_delay: Duration,
}

/// Configuration file contents. Every key is optional.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigFile {
    master_url: Option<Url>,
    client_sender: Option<String>,
    master_sender: Option<String>,
    max_message_size: Option<usize>,
    reconnect: Option<bool>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    reconnect_delay: Option<Duration>,
}

impl Config {
    /// Configuration files are small; anything larger is refused unread.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

    /// Upper bound of the random delay added to each reconnect.
    const RECONNECT_JITTER: Duration = Duration::from_secs(1);

    /// Creates a configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(master_url: Url) -> Self {
        Self {
            master_url,
            client_sender: Codec::CLIENT_SENDER.to_owned(),
            master_sender: Codec::MASTER_SENDER.to_owned(),
            max_message_size: Codec::MAX_MESSAGE_SIZE,
            reconnect: false,
            reconnect_delay: Self::DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Loads the configuration file at `path`, if any, and lets
    /// `master_url` override the one it names.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is too large, cannot be read or parsed,
    /// if no master URL is given at all, or if [`validate`](Self::validate)
    /// fails.
    pub fn load(path: Option<&Path>, master_url: Option<Url>) -> Result<Self> {
        let contents = match path {
            Some(path) => {
                let file_size = fs::metadata(path)?.len();
                if file_size > Self::MAX_FILE_SIZE {
                    return Err(Error::invalid_argument(format!(
                        "{} is too large ({file_size} bytes)",
                        path.display()
                    )));
                }

                debug!("loading configuration from {}", path.display());
                fs::read_to_string(path)?
            }
            None => String::new(),
        };

        Self::from_toml(&contents, master_url)
    }

    /// Parses TOML `contents` and lets `master_url` override the one it
    /// names.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load), without the file access.
    pub fn from_toml(contents: &str, master_url: Option<Url>) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)?;

        let master_url = master_url
            .or(file.master_url)
            .ok_or_else(|| Error::invalid_argument("no master url configured"))?;

        let mut config = Self::new(master_url);
        if let Some(client_sender) = file.client_sender {
            config.client_sender = client_sender;
        }
        if let Some(master_sender) = file.master_sender {
            config.master_sender = master_sender;
        }
        if let Some(max_message_size) = file.max_message_size {
            config.max_message_size = max_message_size;
        }
        if let Some(reconnect) = file.reconnect {
            config.reconnect = reconnect;
        }
        if let Some(reconnect_delay) = file.reconnect_delay {
            config.reconnect_delay = reconnect_delay;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the URL is not a websocket URL, if a
    /// sender identity is empty, if both identities are the same, or if the
    /// message size limit is zero.
    pub fn validate(&self) -> Result<()> {
        let scheme = self.master_url.scheme();
        if scheme != "ws" && scheme != "wss" {
            return Err(Error::invalid_argument(format!(
                "master url should use ws or wss, not {scheme}"
            )));
        }

        if self.master_url.host_str().is_none() {
            return Err(Error::invalid_argument("master url has no host"));
        }

        if self.client_sender.is_empty() || self.master_sender.is_empty() {
            return Err(Error::invalid_argument("sender identities should not be empty"));
        }

        if self.client_sender == self.master_sender {
            return Err(Error::invalid_argument(format!(
                "client and master should not both be `{}`",
                self.client_sender
            )));
        }

        if self.max_message_size == 0 {
            return Err(Error::invalid_argument("max message size should not be zero"));
        }

        Ok(())
    }

    /// The delay before the next reconnect, with jitter so that many
    /// clients do not come back at once.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        let jitter = Self::RECONNECT_JITTER.as_millis().try_into().unwrap_or(u64::MAX);
        self.reconnect_delay + Duration::from_millis(fastrand::u64(..jitter))
    }
}
