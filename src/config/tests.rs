use super::*;

#[test]
fn defaults_are_applied() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
    assert_eq!(settings.server.base_url, "");
    assert!(settings.server.secure_cookies);
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.paths.templates_dir, PathBuf::from("templates"));
    assert_eq!(settings.paths.templates_extension, "html");
    assert_eq!(settings.paths.recipes_dir, PathBuf::from("recipes"));
    assert_eq!(settings.tokens.cookie_name, "token");
    assert_eq!(settings.watcher.debounce, Duration::from_millis(500));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn disable_https_turns_off_secure_cookies() {
    let mut raw = RawSettings::default();
    raw.server.secure_cookies = Some(true);

    raw.apply_serve_overrides(&ServeOverrides {
        disable_https: true,
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.server.secure_cookies);
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
fn base_url_is_normalized() {
    let mut raw = RawSettings::default();
    raw.server.base_url = Some("/rezepte/".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.server.base_url, "/rezepte");

    let mut raw = RawSettings::default();
    raw.server.base_url = Some("rezepte".to_string());
    let err = Settings::from_raw(raw).expect_err("relative base url");
    assert!(matches!(err, LoadError::Invalid { key: "server.base_url", .. }));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "server.port", .. })
    ));

    let mut raw = RawSettings::default();
    raw.watcher.debounce_ms = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "watcher.debounce_ms", .. })
    ));
}

#[test]
fn invalid_cookie_name_is_rejected() {
    let mut raw = RawSettings::default();
    raw.tokens.cookie_name = Some("to ken".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "tokens.cookie_name", .. })
    ));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["recipes"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "recipes",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--disable-https",
        "--tokens-file",
        "/etc/recipes/tokens.json",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert!(serve.overrides.disable_https);
            assert_eq!(
                serve.overrides.tokens.file.as_deref(),
                Some(std::path::Path::new("/etc/recipes/tokens.json"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_issue_token_arguments() {
    let args = CliArgs::parse_from([
        "recipes",
        "issue-token",
        "--tokens-key-file",
        "/tmp/key",
        "alice",
    ]);

    match args.command.expect("issue-token command") {
        Command::IssueToken(issue) => {
            assert_eq!(issue.identifier, "alice");
            assert_eq!(
                issue.tokens.key_file.as_deref(),
                Some(std::path::Path::new("/tmp/key"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
