// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[test]
fn token_round_trips() {
    let token = sign_token("secret", "cust-1", Role::Customer, Duration::from_secs(60));
    let claims = verify_token("secret", &token).unwrap();
    assert_eq!(claims.user_id, "cust-1");
    assert_eq!(claims.role, Role::Customer);
    assert!(claims.expires_at > epoch_ms());
}

#[test]
fn wrong_secret_rejected() {
    let token = sign_token("secret", "cust-1", Role::Customer, Duration::from_secs(60));
    assert_eq!(verify_token("other", &token).unwrap_err(), ApiError::Unauthorized);
}

#[test]
fn tampered_payload_rejected() {
    let token = sign_token("secret", "cust-1", Role::Customer, Duration::from_secs(60));
    let (_, sig) = token.split_once('.').unwrap();
    let forged_payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(format!("cust-1|transporter|{}", epoch_ms() + 60_000));
    let forged = format!("{forged_payload}.{sig}");
    assert_eq!(verify_token("secret", &forged).unwrap_err(), ApiError::Unauthorized);
}

#[test]
fn expired_token_rejected() {
    let token = sign_token("secret", "cust-1", Role::Customer, Duration::from_millis(0));
    assert_eq!(verify_token("secret", &token).unwrap_err(), ApiError::Unauthorized);
}

#[test]
fn malformed_tokens_rejected() {
    for bad in ["", "nodot", "a.b", "!!!.???"] {
        assert_eq!(verify_token("secret", bad).unwrap_err(), ApiError::Unauthorized);
    }
}
