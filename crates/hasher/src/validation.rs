use crate::HashError;
use crate::kernel::DIGEST_LEN;

/// Checks that `digest` is a lowercase hex MD5 digest.
///
/// Digests become file names on the store side, so anything else (empty,
/// uppercase, separators, `..`) is rejected before it reaches a path.
pub fn validate_digest(digest: &str) -> Result<(), HashError> {
    if digest.len() != DIGEST_LEN * 2 {
        return Err(HashError::InvalidDigest(format!(
            "expected {} hex characters, got {}",
            DIGEST_LEN * 2,
            digest.len()
        )));
    }
    if !digest
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(HashError::InvalidDigest(format!(
            "not lowercase hex: {digest}"
        )));
    }
    Ok(())
}
