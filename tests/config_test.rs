use mysql_transfer::EngineConfig;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_full_kafka_config() {
    let file = write_config(
        r#"
        [source]
        host = "127.0.0.1"
        port = 3306
        username = "root"
        password = "secret"
        server_id = 1001

        [[rules]]
        schema = "app"
        table = "users"

        [destination]
        kind = "kafka"
        brokers = "localhost:9092"
        "#,
    );

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.source.host, "127.0.0.1");
    assert_eq!(config.rules.len(), 1);
    assert_eq!(config.queue_capacity, 4096);
    assert_eq!(config.metrics_interval_secs, 10);
}

#[test]
fn rejects_a_config_with_no_rules() {
    let file = write_config(
        r#"
        [source]
        host = "127.0.0.1"
        port = 3306
        username = "root"
        password = "secret"

        rules = []

        [destination]
        kind = "log"
        "#,
    );

    assert!(EngineConfig::load(file.path()).is_err());
}

#[test]
fn env_overlay_overrides_password() {
    let file = write_config(
        r#"
        [source]
        host = "127.0.0.1"
        port = 3306
        username = "root"
        password = "from-file"

        [[rules]]
        schema = "app"
        table = "users"

        [destination]
        kind = "log"
        "#,
    );

    std::env::set_var("TRANSFER_SOURCE__PASSWORD", "from-env");
    let config = EngineConfig::load(file.path()).unwrap();
    std::env::remove_var("TRANSFER_SOURCE__PASSWORD");

    assert_eq!(config.source.password, "from-env");
}
