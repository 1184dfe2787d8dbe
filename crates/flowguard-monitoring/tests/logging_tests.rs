use flowguard_monitoring::{build_filter, init, LogExt, LogFormat, MonitoringConfig};

#[test]
fn config_deserializes_with_defaults() {
    let config: MonitoringConfig =
        serde_json::from_str(r#"{ "format": "json" }"#).expect("valid config");

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.log_filter, "info");
    assert_eq!(config.service_name, "flowguard");
}

#[test]
fn filter_accepts_configured_directives() {
    let config = MonitoringConfig {
        log_filter: "warn,flowguard_core=debug".to_string(),
        ..MonitoringConfig::default()
    };

    assert!(build_filter(&config).is_ok());
}

#[test]
fn init_installs_subscriber_once() {
    let config = MonitoringConfig::default().with_format(LogFormat::Compact);

    assert!(init(config.clone()).is_ok());
    assert!(init(config).is_err());

    let failed: Result<(), String> = Err("boom".to_string());
    assert_eq!(failed.log_err("operation failed"), Err("boom".to_string()));
}
