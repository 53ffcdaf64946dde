//! Issues and verifies the opaque write-tokens of BEP-5.
//!
//! A `get_peers` response carries a token; a later `announce_peer` must echo
//! it, which proves the announcer controls the address it announced from.
//! Tokens are `HMAC-SHA1(secret, remote address bytes)` under a secret that
//! rotates every five minutes; the previous secret stays accepted for one
//! further interval, so a token is good for at least five and at most ten
//! minutes.
use std::sync::RwLock;
use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use swarmscan_primitives::endpoint::Endpoint;

type HmacSha1 = Hmac<Sha1>;

/// How often the secret advances.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(300);

const SECRET_LEN: usize = 32;

type Secret = [u8; SECRET_LEN];

fn random_secret() -> Secret {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

fn hmac_token(secret: &Secret, endpoint: &Endpoint) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(&endpoint.address_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Keeps the current and the previous secret.
pub struct TokenManager {
    secrets: RwLock<(Secret, Secret)>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new((random_secret(), random_secret())),
        }
    }

    /// The token to hand out with a `get_peers` response to `endpoint`.
    #[must_use]
    pub fn issue(&self, endpoint: &Endpoint) -> Vec<u8> {
        let secrets = self.secrets.read().expect("the token lock should not be poisoned");
        hmac_token(&secrets.0, endpoint)
    }

    /// Whether `token` was issued to `endpoint` under the current or the
    /// previous secret.
    #[must_use]
    pub fn verify(&self, endpoint: &Endpoint, token: &[u8]) -> bool {
        let secrets = self.secrets.read().expect("the token lock should not be poisoned");
        token == hmac_token(&secrets.0, endpoint) || token == hmac_token(&secrets.1, endpoint)
    }

    /// Advances the secret; the old current secret stays accepted for one
    /// more interval.
    pub fn rotate(&self) {
        let mut secrets = self.secrets.write().expect("the token lock should not be poisoned");
        secrets.1 = secrets.0;
        secrets.0 = random_secret();
    }
}

#[cfg(test)]
mod tests {
    use swarmscan_primitives::endpoint::Endpoint;

    use super::TokenManager;

    fn endpoint() -> Endpoint {
        "192.0.2.1:6881".parse().unwrap()
    }

    #[test]
    fn an_issued_token_should_verify() {
        let manager = TokenManager::new();

        let token = manager.issue(&endpoint());

        assert!(manager.verify(&endpoint(), &token));
    }

    #[test]
    fn a_random_token_should_not_verify() {
        let manager = TokenManager::new();

        assert!(!manager.verify(&endpoint(), b"not a token"));
    }

    #[test]
    fn a_token_should_not_verify_for_a_different_address() {
        let manager = TokenManager::new();
        let other: Endpoint = "192.0.2.2:6881".parse().unwrap();

        let token = manager.issue(&endpoint());

        assert!(!manager.verify(&other, &token));
    }

    #[test]
    fn a_token_is_bound_to_the_address_not_the_port() {
        let manager = TokenManager::new();
        let same_host: Endpoint = "192.0.2.1:9999".parse().unwrap();

        let token = manager.issue(&endpoint());

        assert!(manager.verify(&same_host, &token));
    }

    #[test]
    fn a_token_should_survive_one_rotation_but_not_two() {
        let manager = TokenManager::new();

        let token = manager.issue(&endpoint());

        manager.rotate();
        assert!(manager.verify(&endpoint(), &token));

        manager.rotate();
        assert!(!manager.verify(&endpoint(), &token));
    }

    #[test]
    fn tokens_should_change_after_a_rotation() {
        let manager = TokenManager::new();

        let before = manager.issue(&endpoint());
        manager.rotate();
        let after = manager.issue(&endpoint());

        assert_ne!(before, after);
    }
}
