use std::fmt;

use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::request::RequestInfo;

/// Digest credentials carried in a request's `auth` object.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct DigestAuth {
    pub realm: String,
    pub username: String,
    /// Server nonce. Peers send it either as a string or a number.
    #[serde(deserialize_with = "nonce_text")]
    pub nonce: String,
    pub cnonce: String,
    pub response: String,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl fmt::Debug for DigestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestAuth")
            .field("realm", &self.realm)
            .field("username", &self.username)
            .field("nonce", &self.nonce)
            .field("cnonce", &self.cnonce)
            .field(
                "response",
                &format_args!("<redacted:{} bytes>", self.response.len()),
            )
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Checks digest credentials against the pre-shared key.
///
/// The router only consumes the verdict; hashing and nonce bookkeeping
/// belong to the implementation.
pub trait DigestVerifier {
    fn verify(&self, auth: &DigestAuth, method: &str, psk: &str) -> bool;
}

impl<F> DigestVerifier for F
where
    F: Fn(&DigestAuth, &str, &str) -> bool,
{
    fn verify(&self, auth: &DigestAuth, method: &str, psk: &str) -> bool {
        self(auth, method, psk)
    }
}

/// Authentication gate. Never fails; a `false` verdict is the caller's
/// cue to answer with an authorization error.
pub(crate) fn check_digest_auth(
    request: &mut RequestInfo,
    verifier: Option<&(dyn DigestVerifier + 'static)>,
    psk: Option<&str>,
) -> bool {
    if request.authn.username.is_some() || request.is_trusted() {
        return true;
    }

    let Some(raw) = request.auth() else {
        debug!(id = request.id(), method = request.method(), "no auth in request");
        return false;
    };
    let digest: DigestAuth = match serde_json::from_str(raw.get()) {
        Ok(digest) => digest,
        Err(e) => {
            warn!(id = request.id(), error = %e, "unparsable auth object");
            return false;
        }
    };

    let (Some(verifier), Some(psk)) = (verifier, psk) else {
        warn!(id = request.id(), "digest auth requested but no verifier or psk configured");
        return false;
    };

    if verifier.verify(&digest, request.method(), psk) {
        debug!(id = request.id(), username = %digest.username, "digest auth accepted");
        request.authn.username = Some(digest.username);
        true
    } else {
        warn!(id = request.id(), username = %digest.username, "digest auth rejected");
        false
    }
}

fn nonce_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Nonce {
        Text(String),
        Number(u64),
    }

    Ok(match Nonce::deserialize(deserializer)? {
        Nonce::Text(text) => text,
        Nonce::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use rpcmux_frame::parse_frame;

    use super::*;
    use crate::registry::{ChannelId, ChannelRegistry};
    use crate::request::FrameInfo;

    const AUTH_FRAME: &[u8] = br#"{"id":1,"method":"Sys.Reboot","auth":{"realm":"dev1","username":"admin","nonce":1700000000,"cnonce":"c1","response":"ok"}}"#;

    fn channel() -> ChannelId {
        let (channel, _handle) = rpcmux_channel::MemoryChannel::new("mem");
        ChannelRegistry::new(1).add("", Box::new(channel), false, std::time::Instant::now())
    }

    fn request(raw: &[u8], trusted: bool) -> RequestInfo {
        let frame = parse_frame(raw).unwrap();
        let info = FrameInfo {
            channel_type: "mem".to_string(),
            channel_is_trusted: trusted,
        };
        RequestInfo::from_frame(&frame, channel(), &info)
    }

    fn accept_ok(auth: &DigestAuth, method: &str, psk: &str) -> bool {
        auth.response == "ok" && method == "Sys.Reboot" && psk == "secret"
    }

    #[test]
    fn trusted_channel_passes_without_credentials() {
        let mut ri = request(br#"{"id":1,"method":"M"}"#, true);
        assert!(check_digest_auth(&mut ri, None, None));
        assert_eq!(ri.authn.username, None);
    }

    #[test]
    fn valid_digest_sets_username() {
        let mut ri = request(AUTH_FRAME, false);
        assert!(check_digest_auth(&mut ri, Some(&accept_ok), Some("secret")));
        assert_eq!(ri.authn.username.as_deref(), Some("admin"));

        // Already authenticated: the verifier is not consulted again.
        assert!(check_digest_auth(&mut ri, None, None));
    }

    #[test]
    fn wrong_psk_is_rejected() {
        let mut ri = request(AUTH_FRAME, false);
        assert!(!check_digest_auth(&mut ri, Some(&accept_ok), Some("other")));
        assert_eq!(ri.authn.username, None);
    }

    #[test]
    fn missing_pieces_are_rejected() {
        let mut no_auth = request(br#"{"id":1,"method":"M"}"#, false);
        assert!(!check_digest_auth(&mut no_auth, Some(&accept_ok), Some("secret")));

        let mut no_psk = request(AUTH_FRAME, false);
        assert!(!check_digest_auth(&mut no_psk, Some(&accept_ok), None));

        let mut no_verifier = request(AUTH_FRAME, false);
        assert!(!check_digest_auth(&mut no_verifier, None, Some("secret")));

        let mut garbage = request(br#"{"id":1,"method":"M","auth":[1,2]}"#, false);
        assert!(!check_digest_auth(&mut garbage, Some(&accept_ok), Some("secret")));
    }

    #[test]
    fn nonce_accepts_string_and_number() {
        let text: DigestAuth = serde_json::from_str(
            r#"{"realm":"r","username":"u","nonce":"abc","cnonce":"c","response":"x"}"#,
        )
        .unwrap();
        assert_eq!(text.nonce, "abc");

        let number: DigestAuth = serde_json::from_str(
            r#"{"realm":"r","username":"u","nonce":42,"cnonce":"c","response":"x"}"#,
        )
        .unwrap();
        assert_eq!(number.nonce, "42");
        assert!(!format!("{number:?}").contains("\"x\""));
    }
}
