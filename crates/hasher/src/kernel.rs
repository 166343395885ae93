use md5::{Digest, Md5};

/// Size of an MD5 digest in bytes.
pub const DIGEST_LEN: usize = 16;

/// Streaming MD5 with sticky finalization.
///
/// Once [`finalize_to_bytes`](Self::finalize_to_bytes) has run, further
/// [`update`](Self::update) calls are ignored and every finalize call returns
/// the same digest until [`reset`](Self::reset).
#[derive(Clone, Default)]
pub struct Md5Kernel {
    state: Md5,
    finalized: Option<[u8; DIGEST_LEN]>,
}

impl Md5Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the initial chaining values and clears any finalized digest.
    pub fn reset(&mut self) {
        self.state = Md5::new();
        self.finalized = None;
    }

    /// Feeds `data` into the digest. Partial blocks are buffered internally.
    pub fn update(&mut self, data: &[u8]) {
        if self.finalized.is_some() {
            return;
        }
        self.state.update(data);
    }

    /// Pads, appends the bit length, and returns the 16-byte digest.
    pub fn finalize_to_bytes(&mut self) -> [u8; DIGEST_LEN] {
        if let Some(digest) = self.finalized {
            return digest;
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&self.state.finalize_reset());
        self.finalized = Some(digest);
        digest
    }

    /// Lowercase hex form of [`finalize_to_bytes`](Self::finalize_to_bytes).
    pub fn finalize_to_hex(&mut self) -> String {
        hex::encode(self.finalize_to_bytes())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }
}

/// One-shot MD5 of a byte buffer.
pub fn md5_bytes(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut kernel = Md5Kernel::new();
    kernel.update(data);
    kernel.finalize_to_bytes()
}

/// One-shot MD5 of a byte buffer, lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5_bytes(data))
}

/// One-shot MD5 of the UTF-8 encoding of `text`, lowercase hex.
pub fn md5_text(text: &str) -> String {
    md5_hex(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            md5_text("The quick brown fox jumps over the lazy dog"),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn text_helper_hashes_utf8() {
        assert_eq!(md5_text("héllo"), md5_hex("héllo".as_bytes()));
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut kernel = Md5Kernel::new();
        // Split across block boundaries at odd offsets.
        for piece in data.chunks(37) {
            kernel.update(piece);
        }
        assert_eq!(kernel.finalize_to_hex(), md5_hex(&data));
    }

    #[test]
    fn update_after_finalize_is_ignored() {
        let mut kernel = Md5Kernel::new();
        kernel.update(b"abc");
        let first = kernel.finalize_to_hex();
        kernel.update(b"more bytes");
        assert!(kernel.is_finalized());
        assert_eq!(kernel.finalize_to_hex(), first);
    }

    #[test]
    fn reset_starts_over() {
        let mut kernel = Md5Kernel::new();
        kernel.update(b"garbage");
        kernel.finalize_to_bytes();
        kernel.reset();
        assert!(!kernel.is_finalized());
        kernel.update(b"abc");
        assert_eq!(kernel.finalize_to_hex(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn hex_is_lowercase_32_chars() {
        let hex = md5_hex(b"\xff\xfe");
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
