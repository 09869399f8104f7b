use lamco_clipboard_transfer::config::LoggingConfig;
use lamco_clipboard_transfer::logging::init_logging;

// Only test in this binary; the subscriber is process-global.
#[test]
fn test_second_init_fails_cleanly() {
    let config = LoggingConfig {
        level: "error".to_string(),
        format: "compact".to_string(),
    };

    assert!(init_logging(&config).is_ok());
    assert!(init_logging(&config).is_err());
}
