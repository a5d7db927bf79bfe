//! Bus provider selection.

use std::sync::Arc;

use tracing::info;

use crate::config::BusConfig;

use super::dds::DdsProvider;
use super::provider::BusProvider;
use super::zenoh::ZenohProvider;

/// Creates a bus provider from its config tag.
pub struct BusFactory;

impl BusFactory {
    /// Build the provider named by `config.provider` (`"dds"` or `"zenoh"`).
    pub fn create(config: &BusConfig) -> anyhow::Result<Arc<dyn BusProvider>> {
        match config.provider.to_ascii_lowercase().as_str() {
            "dds" => {
                info!(domain_id = config.domain_id, "creating dds bus provider");
                Ok(Arc::new(DdsProvider::new(config.domain_id)))
            }
            "zenoh" => {
                info!("creating zenoh bus provider");
                Ok(Arc::new(ZenohProvider::new(config.zenoh_config.clone())))
            }
            other => anyhow::bail!(
                "unsupported bus provider: '{other}' (supported: {})",
                Self::supported_types().join(", ")
            ),
        }
    }

    pub fn supported_types() -> Vec<&'static str> {
        vec!["dds", "zenoh"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_both_provider_kinds() {
        let mut config = BusConfig::default();
        config.provider = "dds".into();
        assert!(BusFactory::create(&config).is_ok());

        config.provider = "ZENOH".into();
        assert!(BusFactory::create(&config).is_ok());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut config = BusConfig::default();
        config.provider = "kafka".into();
        let err = BusFactory::create(&config).unwrap_err();
        assert!(err.to_string().contains("unsupported bus provider"));
    }

    #[test]
    fn lists_supported_types() {
        assert_eq!(BusFactory::supported_types(), vec!["dds", "zenoh"]);
    }
}
