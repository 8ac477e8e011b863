//! JSON Web Token validation.
//!
//! A [`VerificationPolicy`] bundles a set of claim rules (regexes over
//! payload and header claims) with the HMAC secret the token must be signed
//! under. [`JwtValidator`] holds policies in registration order; the first
//! policy that fully matches a token admits it.

use std::collections::HashMap;
use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::Value;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

/// Why a token was not admitted.
#[derive(Debug, Error)]
#[error("token verification failed: {0}")]
pub struct VerificationError(pub String);

/// `(claim name, regex string)`.
pub type Rule = (String, String);

/// One verification policy: claim rules plus the signing secret.
///
/// Rule regexes are compiled once per policy, on first use, into one cached
/// map for payload rules and one for header rules. A rule matches only when
/// the claim exists, renders as a string, and the regex matches it in its
/// entirety.
pub struct VerificationPolicy {
    secret: String,
    rules: Vec<Rule>,
    header_rules: Vec<Rule>,
    matchers: OnceLock<HashMap<String, Regex>>,
    header_matchers: OnceLock<HashMap<String, Regex>>,
}

impl VerificationPolicy {
    pub fn new(rules: Vec<Rule>, header_rules: Vec<Rule>, secret_or_pubkey: String) -> Self {
        Self {
            secret: secret_or_pubkey,
            rules,
            header_rules,
            matchers: OnceLock::new(),
            header_matchers: OnceLock::new(),
        }
    }

    pub fn secret_or_pubkey(&self) -> &str {
        &self.secret
    }

    fn compile(rules: &[Rule]) -> HashMap<String, Regex> {
        let mut out = HashMap::with_capacity(rules.len());
        for (claim, pattern) in rules {
            // Anchor so the rule must match the claim in its entirety.
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(re) => {
                    out.insert(claim.clone(), re);
                }
                Err(e) => {
                    tracing::error!("Invalid rule regex '{pattern}' for claim '{claim}': {e}");
                }
            }
        }
        out
    }

    fn check_rules(
        rules: &[Rule],
        matchers: &HashMap<String, Regex>,
        claims: &Value,
        what: &str,
    ) -> Result<(), VerificationError> {
        for (claim, pattern) in rules {
            let re = matchers.get(claim).ok_or_else(|| {
                VerificationError(format!("rule for {what} claim '{claim}' did not compile"))
            })?;

            let value = claims.get(claim).ok_or_else(|| {
                VerificationError(format!("{what} claim '{claim}' is missing"))
            })?;
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                _ => {
                    return Err(VerificationError(format!(
                        "{what} claim '{claim}' is not renderable as a string"
                    )));
                }
            };

            if !re.is_match(&rendered) {
                return Err(VerificationError(format!(
                    "{what} claim '{claim}' value '{rendered}' does not match '{pattern}'"
                )));
            }
        }
        Ok(())
    }

    /// Check this policy against a decoded token. All payload rules, all
    /// header rules and the signature must pass.
    pub fn check(
        &self,
        token: &ParsedToken<'_>,
        header: &Value,
        payload: &Value,
    ) -> Result<(), VerificationError> {
        let matchers = self.matchers.get_or_init(|| Self::compile(&self.rules));
        let header_matchers = self
            .header_matchers
            .get_or_init(|| Self::compile(&self.header_rules));

        Self::check_rules(&self.rules, matchers, payload, "payload")?;
        Self::check_rules(&self.header_rules, header_matchers, header, "header")?;

        self.verify_signature(token, header)
    }

    fn verify_signature(
        &self,
        token: &ParsedToken<'_>,
        header: &Value,
    ) -> Result<(), VerificationError> {
        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| VerificationError("token header declares no 'alg'".into()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(token.signature_b64)
            .map_err(|_| VerificationError("token signature is not valid base64url".into()))?;

        let signed = token.signing_input();
        let key = self.secret.as_bytes();

        let ok = match alg {
            "HS256" => match Hmac::<Sha256>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(signed);
                    mac.verify_slice(&signature).is_ok()
                }
                Err(_) => false,
            },
            "HS384" => match Hmac::<Sha384>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(signed);
                    mac.verify_slice(&signature).is_ok()
                }
                Err(_) => false,
            },
            "HS512" => match Hmac::<Sha512>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(signed);
                    mac.verify_slice(&signature).is_ok()
                }
                Err(_) => false,
            },
            other => {
                return Err(VerificationError(format!(
                    "unsupported signing algorithm '{other}'"
                )));
            }
        };

        if ok {
            Ok(())
        } else {
            Err(VerificationError("signature does not verify".into()))
        }
    }
}

/// The three dot-separated segments of a compact JWT.
pub struct ParsedToken<'a> {
    pub header_b64: &'a str,
    pub payload_b64: &'a str,
    pub signature_b64: &'a str,
    raw: &'a str,
}

impl<'a> ParsedToken<'a> {
    pub fn parse(token: &'a str) -> Result<Self, VerificationError> {
        let mut parts = token.splitn(3, '.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(VerificationError(
                "token is not a three-part compact JWT".into(),
            ));
        };
        Ok(Self {
            header_b64,
            payload_b64,
            signature_b64,
            raw: token,
        })
    }

    /// The bytes the signature covers: `header.payload`.
    fn signing_input(&self) -> &'a [u8] {
        let len = self.header_b64.len() + 1 + self.payload_b64.len();
        self.raw.as_bytes().get(..len).unwrap_or_default()
    }

    fn decode_json(segment: &str, what: &str) -> Result<Value, VerificationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| VerificationError(format!("token {what} is not valid base64url")))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| VerificationError(format!("token {what} is not valid JSON")))
    }
}

/// Validates tokens against the configured policies, in registration order.
#[derive(Default)]
pub struct JwtValidator {
    verification_policies: Vec<VerificationPolicy>,
}

impl JwtValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy. If multiple policies can process a token, the first one
    /// added that fully matches is used.
    pub fn add_verification_policy(&mut self, policy: VerificationPolicy) {
        self.verification_policies.push(policy);
    }

    pub fn is_empty(&self) -> bool {
        self.verification_policies.is_empty()
    }

    /// Verify a compact JWT. Succeeds iff at least one policy fully matches
    /// the token's claims and its signature verifies under that policy's key.
    pub fn verify(&self, token: &str) -> Result<(), VerificationError> {
        let parsed = ParsedToken::parse(token)?;
        let header = ParsedToken::decode_json(parsed.header_b64, "header")?;
        let payload = ParsedToken::decode_json(parsed.payload_b64, "payload")?;

        let mut last_error = VerificationError("no verification policy configured".into());
        for policy in &self.verification_policies {
            match policy.check(&parsed, &header, &payload) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}
