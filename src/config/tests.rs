use super::*;

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:5003");
    assert_eq!(settings.server.public_url.as_str(), "http://127.0.0.1:5003/");
    assert_eq!(settings.storage.directory, PathBuf::from("data"));
    assert_eq!(settings.storage.ttl, Duration::from_secs(24 * 3600));
    assert_eq!(settings.storage.sweep_interval, Duration::from_secs(3600));
    assert_eq!(settings.storage.sweep_retry, Duration::from_secs(300));
    assert_eq!(settings.cache.capacity.get(), 100);
    assert_eq!(settings.workers.pool_size.get(), 2);
    assert_eq!(settings.uploads.max_request_bytes.get(), 5 * 1024 * 1024);
    assert_eq!(settings.rate_limit.max_requests.get(), 30);
    assert!(settings.render.screenshot_enabled);
    assert_eq!(settings.render.screenshot_width, 1600);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.storage.ttl_hours = Some(48);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        storage: StorageOverrides {
            storage_ttl_hours: Some(2),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.storage.ttl, Duration::from_secs(2 * 3600));
}

#[test]
fn public_url_must_parse() {
    let mut raw = RawSettings::default();
    raw.server.public_url = Some("not a url".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid url");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "server.public_url",
            ..
        }
    ));
}

#[test]
fn zero_sizes_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.capacity = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.capacity",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.workers.pool_size = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "workers.pool_size",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.storage.ttl_hours = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["markmap-service"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "markmap-service",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--public-url",
        "http://maps.example.com:5113",
        "--render-screenshot-enabled",
        "false",
        "--storage-directory",
        "/srv/markmap",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.public_url.as_deref(),
                Some("http://maps.example.com:5113")
            );
            assert_eq!(serve.overrides.render.screenshot_enabled, Some(false));
            assert_eq!(
                serve.overrides.storage.storage_directory.as_deref(),
                Some(std::path::Path::new("/srv/markmap"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_sweep_arguments() {
    let args = CliArgs::parse_from([
        "markmap-service",
        "sweep",
        "--storage-ttl-hours",
        "6",
    ]);

    match args.command.expect("sweep command") {
        Command::Sweep(sweep) => {
            assert_eq!(sweep.storage.storage_ttl_hours, Some(6));
            let mut raw = RawSettings::default();
            raw.apply_storage_overrides(&sweep.storage);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert_eq!(settings.storage.ttl, Duration::from_secs(6 * 3600));
        }
        _ => panic!("wrong command parsed"),
    }
}
