use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for an IPFS node's RPC API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    /// Base URL of the RPC API, without the `/api/v0` suffix.
    pub api_url: String,
    /// Deadline for every call except `name/resolve`, which carries its own.
    /// IPNS publishes routinely take tens of seconds.
    pub request_timeout_secs: u64,
    /// Key type used when generating naming keys.
    pub key_type: String,
}

impl IpfsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".into(),
            request_timeout_secs: 120,
            key_type: "ed25519".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = IpfsConfig::default();
        assert_eq!(c.api_url, "http://127.0.0.1:5001");
        assert_eq!(c.request_timeout(), Duration::from_secs(120));
        assert_eq!(c.key_type, "ed25519");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: IpfsConfig = toml::from_str(r#"api_url = "http://ipfs:5001""#).unwrap();
        assert_eq!(c.api_url, "http://ipfs:5001");
        assert_eq!(c.request_timeout_secs, 120);
    }
}
