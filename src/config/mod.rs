pub mod schema;

pub use schema::{Config, EventsConfig, GatewayConfig, StreamConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(!config.default_provider.is_empty());
        assert!(!config.default_model.is_empty());
        assert!(config.default_temperature > 0.0);
        assert!(config.gateway.port > 0);
    }
}
