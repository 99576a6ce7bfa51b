use sha2::{Digest, Sha256};

/// Number of hex characters of the payload digest shown in log lines
const FINGERPRINT_LEN: usize = 16;

/// Hex encoded SHA-256 of `data`
pub fn get_sum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Short digest of a payload used to correlate log lines across nodes
pub fn fingerprint(data: &[u8]) -> String {
    let mut sum = get_sum(data);
    sum.truncate(FINGERPRINT_LEN);
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_sum() {
        assert_eq!(
            get_sum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_prefix() {
        let payload = b"consensus vote";
        let fp = fingerprint(payload);
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(get_sum(payload).starts_with(&fp));
    }
}
