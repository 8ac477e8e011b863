//! JWT admission policies.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use rosgate_bridge::policy::{glob_to_regex, JwtValidator, VerificationPolicy};

/// Produce a compact HS256 token signed with `secret`.
fn sign_hs256(secret: &str, payload: &Value) -> String {
    sign_with_header(secret, &json!({"alg": "HS256", "typ": "JWT"}), payload)
}

fn sign_with_header(secret: &str, header: &Value, payload: &Value) -> String {
    let h = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap());
    let p = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    let signing_input = format!("{h}.{p}");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signing_input.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{signing_input}.{sig}")
}

fn client_policy(secret: &str) -> VerificationPolicy {
    VerificationPolicy::new(
        vec![("sub".to_string(), glob_to_regex("client-*"))],
        Vec::new(),
        secret.to_string(),
    )
}

#[test]
fn matching_signed_token_is_admitted() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));

    let token = sign_hs256("K", &json!({"sub": "client-42"}));
    assert!(validator.verify(&token).is_ok());
}

#[test]
fn claim_mismatch_is_rejected() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));

    let token = sign_hs256("K", &json!({"sub": "other"}));
    assert!(validator.verify(&token).is_err());

    let token = sign_hs256("K", &json!({"aud": "client-42"}));
    assert!(validator.verify(&token).is_err(), "missing claim must fail");
}

#[test]
fn wrong_key_is_rejected() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));

    let token = sign_hs256("not-K", &json!({"sub": "client-42"}));
    assert!(validator.verify(&token).is_err());
}

#[test]
fn unsigned_token_is_rejected() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));

    let h = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"alg": "none"})).unwrap());
    let p = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"sub": "client-42"})).unwrap());
    let token = format!("{h}.{p}.");
    assert!(validator.verify(&token).is_err());
}

#[test]
fn garbage_tokens_are_rejected() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));

    assert!(validator.verify("").is_err());
    assert!(validator.verify("only-one-part").is_err());
    assert!(validator.verify("a.b").is_err());
    assert!(validator.verify("!!!.###.$$$").is_err());
}

#[test]
fn header_rules_are_checked_against_the_header() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(VerificationPolicy::new(
        vec![("sub".to_string(), glob_to_regex("client-*"))],
        vec![("alg".to_string(), glob_to_regex("HS256"))],
        "K".to_string(),
    ));

    let token = sign_hs256("K", &json!({"sub": "client-1"}));
    assert!(validator.verify(&token).is_ok());

    // Header rule that can never match the produced header.
    let mut strict = JwtValidator::new();
    strict.add_verification_policy(VerificationPolicy::new(
        Vec::new(),
        vec![("alg".to_string(), glob_to_regex("RS256"))],
        "K".to_string(),
    ));
    assert!(strict.verify(&token).is_err());
}

#[test]
fn rules_must_match_the_claim_in_its_entirety() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(VerificationPolicy::new(
        vec![("sub".to_string(), "client".to_string())],
        Vec::new(),
        "K".to_string(),
    ));

    // "client-42" contains "client" but does not equal it.
    let token = sign_hs256("K", &json!({"sub": "client-42"}));
    assert!(validator.verify(&token).is_err());

    let token = sign_hs256("K", &json!({"sub": "client"}));
    assert!(validator.verify(&token).is_ok());
}

#[test]
fn numeric_claims_render_as_strings_for_matching() {
    let mut validator = JwtValidator::new();
    validator.add_verification_policy(VerificationPolicy::new(
        vec![("version".to_string(), glob_to_regex("2"))],
        Vec::new(),
        "K".to_string(),
    ));

    let token = sign_hs256("K", &json!({"version": 2}));
    assert!(validator.verify(&token).is_ok());
}

#[test]
fn admission_requires_exactly_one_subprotocol() {
    use rosgate_bridge::transport::server::admit;

    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));
    let token = sign_hs256("K", &json!({"sub": "client-1"}));

    // No validator configured: admit, selecting nothing.
    assert_eq!(admit(None, &[]).unwrap(), None);
    assert_eq!(admit(None, &[token.clone()]).unwrap(), None);

    // With a validator: exactly one offered subprotocol, and it must verify.
    assert_eq!(
        admit(Some(&validator), &[token.clone()]).unwrap(),
        Some(token.clone())
    );
    assert!(admit(Some(&validator), &[]).is_err());
    assert!(admit(Some(&validator), &[token.clone(), token.clone()]).is_err());
    assert!(admit(Some(&validator), &["garbage".to_string()]).is_err());
}

#[test]
fn adding_a_policy_never_shrinks_the_admitted_set() {
    let admitted = sign_hs256("K", &json!({"sub": "client-9"}));
    let stranger = sign_hs256("S", &json!({"sub": "station-1"}));

    let mut validator = JwtValidator::new();
    validator.add_verification_policy(client_policy("K"));
    assert!(validator.verify(&admitted).is_ok());
    assert!(validator.verify(&stranger).is_err());

    // A second policy admits the stranger without affecting the first.
    validator.add_verification_policy(VerificationPolicy::new(
        vec![("sub".to_string(), glob_to_regex("station-*"))],
        Vec::new(),
        "S".to_string(),
    ));
    assert!(validator.verify(&admitted).is_ok());
    assert!(validator.verify(&stranger).is_ok());
}
