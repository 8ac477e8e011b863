//! Endpoint configuration parsing.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use rosgate_bridge::config::{self, CertFormat};

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("port: 1234").unwrap();
    assert_eq!(cfg.encoding, "json");
    assert_eq!(cfg.parse_port().unwrap(), 1234);
    assert!(cfg.use_security());
    assert_eq!(cfg.format, CertFormat::Pem);
    assert!(cfg.jwt_validator().is_none());
}

#[test]
fn missing_port_fails_parse_port() {
    let cfg = config::load_from_str("encoding: json").unwrap();
    assert!(cfg.parse_port().is_err());
}

#[test]
fn unsupported_encoding_is_refused() {
    assert!(config::load_from_str("encoding: cbor\nport: 1").is_err());
}

#[test]
fn security_none_selects_tcp() {
    let cfg = config::load_from_str("port: 1\nsecurity: none").unwrap();
    assert!(!cfg.use_security());
}

#[test]
fn unknown_sibling_keys_are_tolerated() {
    let cfg = config::load_from_str(
        r#"
port: 80
types:
  idl: "struct A { int32 x; };"
extra: { nested: true }
"#,
    )
    .unwrap();
    assert_eq!(cfg.parse_port().unwrap(), 80);
}

#[test]
fn client_keys_parse() {
    let cfg = config::load_from_str(
        r#"
host: bridge.example.com
port: 443
token: "abc.def.ghi"
"#,
    )
    .unwrap();
    assert_eq!(cfg.host.as_deref(), Some("bridge.example.com"));
    assert_eq!(cfg.token.as_deref(), Some("abc.def.ghi"));
}

#[test]
fn cert_paths_resolve_against_the_config_directory_first() {
    use std::path::Path;

    // A config directory well outside the test runner's working directory.
    let dir = std::env::temp_dir().join(format!("rosgate-config-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("bridge.crt"), "---").unwrap();
    std::fs::write(dir.join("bridge.key"), "---").unwrap();

    let config_path = dir.join("bridge.yaml");
    std::fs::write(&config_path, "port: 443\ncert: bridge.crt\nkey: bridge.key\n").unwrap();

    let cfg = config::load_from_file(&config_path).unwrap();
    assert_eq!(cfg.config_dir(), Some(dir.as_path()));

    // The relative names do not exist in the CWD; they must resolve against
    // the directory the config was loaded from.
    let cert = cfg.resolve_config_path(cfg.cert.as_deref().unwrap()).unwrap();
    let key = cfg.resolve_config_path(cfg.key.as_deref().unwrap()).unwrap();
    assert_eq!(cert, dir.join("bridge.crt"));
    assert_eq!(key, dir.join("bridge.key"));

    // A name that exists in none of the searched directories is an error.
    assert!(cfg.resolve_config_path(Path::new("missing.pem")).is_err());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn configs_parsed_from_strings_have_no_config_directory() {
    let cfg = config::load_from_str("port: 443\ncert: bridge.crt").unwrap();
    assert_eq!(cfg.config_dir(), None);
}

#[test]
fn asn1_format_parses() {
    let cfg = config::load_from_str("port: 1\nformat: \"asn.1\"").unwrap();
    assert_eq!(cfg.format, CertFormat::Asn1);
}

fn sign_hs256(secret: &str, payload: &serde_json::Value) -> String {
    let h = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"alg": "HS256"})).unwrap());
    let p = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    let signing_input = format!("{h}.{p}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signing_input.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signing_input}.{sig}")
}

#[test]
fn authentication_block_builds_a_working_validator() {
    let cfg = config::load_from_str(
        r#"
port: 443
authentication:
  policies:
    - secret: K
      rules:
        sub: "client-*"
    - secret: S
      rules:
        sub: "station-?"
"#,
    )
    .unwrap();

    let validator = cfg.jwt_validator().unwrap();
    assert!(validator.verify(&sign_hs256("K", &json!({"sub": "client-42"}))).is_ok());
    assert!(validator.verify(&sign_hs256("S", &json!({"sub": "station-7"}))).is_ok());
    assert!(validator.verify(&sign_hs256("K", &json!({"sub": "other"}))).is_err());
    // The glob `?` matches exactly one character.
    assert!(validator.verify(&sign_hs256("S", &json!({"sub": "station-77"}))).is_err());
}

#[test]
fn single_policy_authentication_block_parses() {
    let cfg = config::load_from_str(
        r#"
port: 443
authentication:
  secret: K
  rules:
    sub: "client-*"
"#,
    )
    .unwrap();

    let validator = cfg.jwt_validator().unwrap();
    assert!(validator.verify(&sign_hs256("K", &json!({"sub": "client-1"}))).is_ok());
}
