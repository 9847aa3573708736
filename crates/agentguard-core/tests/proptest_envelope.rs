//! Property-based tests for the webhook security envelope

#![allow(clippy::expect_used, clippy::unwrap_used)]

use agentguard_core::{constant_time_eq, FieldCipher, HmacSigner};
use proptest::prelude::*;

const SECRET: &[u8] = b"an-adequately-long-signing-secret!!!";

fn signer() -> HmacSigner {
    HmacSigner::new(SECRET).unwrap()
}

proptest! {
    /// Signing is deterministic for fixed inputs.
    #[test]
    fn sign_deterministic(payload in any::<Vec<u8>>(), ts in 0i64..=i64::MAX / 2) {
        let s = signer();
        let sig1 = s.sign(&payload, "req", ts, "nonce");
        let sig2 = s.sign(&payload, "req", ts, "nonce");
        prop_assert_eq!(sig1, sig2);
    }

    /// Sign/verify roundtrip always works when the clock agrees.
    #[test]
    fn sign_verify_roundtrip(payload in any::<Vec<u8>>(), ts in 0i64..=i64::MAX / 2) {
        let s = signer();
        let sig = s.sign(&payload, "req", ts, "nonce");
        prop_assert!(s.verify_at(&payload, &sig, "req", ts, "nonce", ts));
    }

    /// Tampering with the payload invalidates the signature.
    #[test]
    fn verify_fails_wrong_payload(
        payload1 in any::<Vec<u8>>(),
        payload2 in any::<Vec<u8>>(),
        ts in 0i64..=i64::MAX / 2,
    ) {
        prop_assume!(payload1 != payload2);
        let s = signer();
        let sig = s.sign(&payload1, "req", ts, "nonce");
        prop_assert!(!s.verify_at(&payload2, &sig, "req", ts, "nonce", ts));
    }

    /// Tampering with the request id invalidates the signature.
    #[test]
    fn verify_fails_wrong_request_id(
        id1 in "[a-z0-9-]{1,32}",
        id2 in "[a-z0-9-]{1,32}",
        ts in 0i64..=i64::MAX / 2,
    ) {
        prop_assume!(id1 != id2);
        let s = signer();
        let sig = s.sign(b"payload", &id1, ts, "nonce");
        prop_assert!(!s.verify_at(b"payload", &sig, &id2, ts, "nonce", ts));
    }

    /// Different nonces produce different signatures.
    #[test]
    fn different_nonces_different_signatures(
        n1 in "[a-f0-9]{1,32}",
        n2 in "[a-f0-9]{1,32}",
    ) {
        prop_assume!(n1 != n2);
        let s = signer();
        prop_assert_ne!(s.sign(b"payload", "req", 1000, &n1), s.sign(b"payload", "req", 1000, &n2));
    }

    /// Constant-time comparison agrees with ordinary equality.
    #[test]
    fn constant_time_eq_matches_eq(a in any::<Vec<u8>>(), b in any::<Vec<u8>>()) {
        prop_assert_eq!(constant_time_eq(&a, &b), a == b);
    }

    /// Encryption roundtrips arbitrary JSON-shaped strings bitwise.
    #[test]
    fn encrypt_decrypt_roundtrip(value in any::<String>()) {
        let cipher = FieldCipher::new([3u8; 32]);
        let json = serde_json::Value::String(value);
        let envelope = cipher.encrypt(&json).unwrap();
        prop_assert_eq!(cipher.decrypt(&envelope).unwrap(), json);
    }
}
