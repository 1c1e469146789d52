use sha2::{Digest, Sha256};

/// SHA-256 of a public key's SPKI DER, as 16 groups of four hex digits.
///
/// Both parties can read this aloud to confirm they hold the same key.
pub fn fingerprint(spki_der: &[u8]) -> String {
    let digest = Sha256::digest(spki_der);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.as_bytes()
        .chunks(4)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First eight hex digits of `fingerprint`, for compact display.
pub fn short_fingerprint(spki_der: &[u8]) -> String {
    fingerprint(spki_der).replace(' ', "")[..8].to_string()
}
