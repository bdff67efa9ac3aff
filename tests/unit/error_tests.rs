//! Unit tests for `AppError` display prefixes and conversions.

use pluggable_discovery::AppError;

#[test]
fn every_variant_renders_its_category_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Command("x".into()), "command failed: x"),
        (AppError::Timeout("x".into()), "timeout: x"),
        (AppError::Discovery("x".into()), "discovery: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn detail_strips_the_prefix() {
    let err = AppError::Discovery("device busy".into());
    assert_eq!(err.detail(), "device busy");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn json_error_converts_to_protocol_variant() {
    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = AppError::from(json);
    assert!(
        matches!(err, AppError::Protocol(ref msg) if msg.starts_with("malformed envelope")),
        "unexpected: {err}"
    );
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err = AppError::from(toml_err);
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn errors_are_cloneable_and_comparable() {
    let err = AppError::Transport("closed".into());
    assert_eq!(err.clone(), err);
}
