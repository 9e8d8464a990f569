use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `x-signature` header: `ts=<timestamp>,v1=<hex mac>`.
#[derive(Debug)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, ServiceError> {
    let mut ts = None;
    let mut v1 = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.to_string()),
            Some(("v1", value)) => v1 = Some(value.to_string()),
            _ => {}
        }
    }

    match (ts, v1) {
        (Some(ts), Some(v1)) if !ts.is_empty() && !v1.is_empty() => {
            Ok(SignatureHeader { ts, v1 })
        }
        _ => Err(ServiceError::InvalidSignature(
            "malformed x-signature header".to_string(),
        )),
    }
}

/// Reconstructs the gateway's signed manifest. The component order and the
/// trailing semicolon are part of the signing contract and must match the
/// gateway byte for byte.
pub fn signed_manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{data_id};request-id:{request_id};ts:{ts};")
}

/// Verifies an inbound webhook signature against the shared secret.
/// `data_id` comes from the `data.id` query parameter and `request_id`
/// from the `x-request-id` header; either may be empty when absent.
pub fn verify_webhook_signature(
    secret: &str,
    data_id: &str,
    request_id: &str,
    signature_header: &str,
) -> Result<(), ServiceError> {
    let parsed = parse_signature_header(signature_header)?;
    let manifest = signed_manifest(data_id, request_id, &parsed.ts);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InvalidSignature("invalid secret".to_string()))?;
    mac.update(manifest.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(&expected, &parsed.v1) {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature(
            "signature mismatch".to_string(),
        ))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "super-secret";

    fn sign(data_id: &str, request_id: &str, ts: &str) -> String {
        let manifest = signed_manifest(data_id, request_id, ts);
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let v1 = sign("12345", "req-abc", "1700000000");
        let header = format!("ts=1700000000,v1={v1}");
        assert!(verify_webhook_signature(SECRET, "12345", "req-abc", &header).is_ok());
    }

    #[test]
    fn identical_manifests_produce_identical_macs() {
        assert_eq!(
            sign("12345", "req-abc", "1700000000"),
            sign("12345", "req-abc", "1700000000")
        );
    }

    #[test]
    fn tampered_payment_id_is_rejected() {
        let v1 = sign("12345", "req-abc", "1700000000");
        let header = format!("ts=1700000000,v1={v1}");
        assert!(verify_webhook_signature(SECRET, "99999", "req-abc", &header).is_err());
    }

    #[test]
    fn tampered_timestamp_is_rejected() {
        let v1 = sign("12345", "req-abc", "1700000000");
        let header = format!("ts=1700009999,v1={v1}");
        assert!(verify_webhook_signature(SECRET, "12345", "req-abc", &header).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(parse_signature_header("garbage").is_err());
        assert!(parse_signature_header("ts=,v1=").is_err());
        assert!(parse_signature_header("v1=abc").is_err());
    }

    #[test]
    fn header_with_spaces_parses() {
        let parsed = parse_signature_header("ts=1700000000, v1=deadbeef").unwrap();
        assert_eq!(parsed.ts, "1700000000");
        assert_eq!(parsed.v1, "deadbeef");
    }
}
