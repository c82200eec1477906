use remote_eval::AppError;

#[test]
fn display_prefixes_category() {
    assert_eq!(
        AppError::Frame("too long".into()).to_string(),
        "frame: too long"
    );
    assert_eq!(
        AppError::Auth("authentication required".into()).to_string(),
        "auth: authentication required"
    );
    assert_eq!(
        AppError::DuplicateId("'a' in flight".into()).to_string(),
        "duplicate id: 'a' in flight"
    );
    assert_eq!(
        AppError::Execution("exit 1".into()).to_string(),
        "execution: exit 1"
    );
    assert_eq!(
        AppError::Bind("port busy".into()).to_string(),
        "bind: port busy"
    );
    assert_eq!(
        AppError::Cancelled("teardown".into()).to_string(),
        "cancelled: teardown"
    );
}

#[test]
fn message_strips_the_category_prefix() {
    let err = AppError::Execution("interpreter exited with exit status: 2".into());
    assert_eq!(err.message(), "interpreter exited with exit status: 2");

    let err = AppError::Cancelled("execution cancelled".into());
    assert_eq!(err.message(), "execution cancelled");
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(_)), "got {err:?}");
}

#[test]
fn toml_errors_convert_to_config() {
    let parse_err = toml::from_str::<toml::Value>("not [ valid").expect_err("invalid toml");
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}
