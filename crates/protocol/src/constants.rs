/// Fixed chunk size: 10 MiB. The last chunk of a file may be smaller.
pub const CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Header carrying the opaque authenticated owner identifier.
pub const OWNER_HEADER: &str = "x-owner-id";

/// MIME type recorded when the client does not send one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Length of a lowercase hex MD5 digest.
pub const DIGEST_HEX_LEN: usize = 32;

/// Route paths, relative to the server root.
pub mod routes {
    pub const STATUS: &str = "/api/upload/status";
    pub const HANDSHAKE: &str = "/api/upload/handshake";
    pub const CHUNK: &str = "/api/upload/chunk";
    pub const CANCEL: &str = "/api/upload/cancel";
}
