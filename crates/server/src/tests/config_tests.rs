use super::*;

use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn defaults_listen_on_all_interfaces() {
    let settings = settings_from_sources(None, env_from(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.ws_port, 5545);
    assert_eq!(settings.port, 8080);
    assert_eq!(
        settings.ws_addr().expect("addr").to_string(),
        "0.0.0.0:5545"
    );
}

#[test]
fn file_values_override_defaults() {
    let file = r#"
        host = "127.0.0.1"
        port = 9000
        ws_port = "6000"
        web_dir = "./stim/web"
    "#;
    let settings = settings_from_sources(Some(file), env_from(&[]));
    assert_eq!(settings.host, "127.0.0.1");
    assert_eq!(settings.port, 9000);
    assert_eq!(settings.ws_port, 6000);
    assert_eq!(settings.web_dir, PathBuf::from("./stim/web"));
}

#[test]
fn env_overrides_file_and_prefixed_env_wins() {
    let file = r#"port = 9000"#;
    let settings = settings_from_sources(
        Some(file),
        env_from(&[
            ("STIM_PORT", "9100"),
            ("STIM_WS_PORT", "7000"),
            ("APP__WS_PORT", "7001"),
            ("APP__WEB_DIR", "/srv/stim"),
        ]),
    );
    assert_eq!(settings.port, 9100);
    assert_eq!(settings.ws_port, 7001);
    assert_eq!(settings.web_dir, PathBuf::from("/srv/stim"));
}

#[test]
fn unparseable_sources_are_ignored() {
    let settings = settings_from_sources(
        Some("this is = = not toml"),
        env_from(&[("STIM_PORT", "eighty"), ("APP__WS_PORT", "70000")]),
    );
    assert_eq!(settings, Settings::default());
}

#[test]
fn bad_host_is_reported() {
    let settings = settings_from_sources(None, env_from(&[("STIM_HOST", "not a host")]));
    assert!(settings.http_addr().is_err());
}
