//! Global subscriber installation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_engine::config::LoggingConfig;
use packet_engine::error::EngineError;
use packet_engine::utils::logging::init_logging;
use serial_test::serial;

#[test]
#[serial]
fn init_logging_installs_once() {
    let config = LoggingConfig {
        json_format: true,
        ..LoggingConfig::default()
    };
    init_logging(&config).unwrap();
    tracing::info!("subscriber live");

    let again = init_logging(&LoggingConfig::default());
    assert!(matches!(again, Err(EngineError::ConfigError(_))));
}
