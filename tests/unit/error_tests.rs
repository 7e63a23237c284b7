//! Unit tests for `AppError` display format and conversions.

use usi_bridge::AppError;

#[test]
fn display_prefixes_name_the_failure_kind() {
    let cases = [
        (AppError::StartupFailure("x".into()), "startup failure: x"),
        (AppError::HandshakeTimeout("x".into()), "handshake timeout: x"),
        (AppError::ProcessCrash("x".into()), "process crash: x"),
        (AppError::PipeBroken("x".into()), "pipe broken: x"),
        (AppError::Validation("x".into()), "validation: x"),
        (AppError::NotRunning("x".into()), "not running: x"),
        (AppError::NotReady("x".into()), "not ready: x"),
        (AppError::ThinkInProgress("x".into()), "think in progress: x"),
        (AppError::ThinkTimeout("x".into()), "think timeout: x"),
        (AppError::SessionClosed("x".into()), "session closed: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Config("x".into()), "config: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn errors_are_cloneable_for_fan_out() {
    let err = AppError::ProcessCrash("engine process exited with code 3".into());
    let copies = vec![err.clone(), err.clone()];
    assert!(copies.iter().all(|c| *c == err));
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse = toml::from_str::<toml::Value>("servers = [").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Validation("sfen is required".into()));
}
