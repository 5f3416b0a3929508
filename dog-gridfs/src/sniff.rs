//! Content type sniffing.
//!
//! Two strategies, used on different paths:
//! - [`sniff_content`] looks at the leading bytes of an in-memory payload
//!   (whole-object writes through `BlobAdapter`);
//! - [`sniff_extension`] maps the key's file extension (streaming writes,
//!   where the content is not known up front).
//!
//! Neither fails: anything unresolvable yields a default type.

use crate::BlobKey;

/// Only this many leading bytes are ever inspected
pub const SNIFF_WINDOW: usize = 1024;

/// Fallback for unknown extensions and text-like payloads
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Fallback for payloads that are neither a known format nor text
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Guess a MIME type from the first [`SNIFF_WINDOW`] bytes of `content`.
pub fn sniff_content(content: &[u8]) -> &'static str {
    let window = &content[..content.len().min(SNIFF_WINDOW)];

    if let Some(kind) = infer::get(window) {
        return kind.mime_type();
    }

    if looks_like_text(window) {
        DEFAULT_CONTENT_TYPE
    } else {
        BINARY_CONTENT_TYPE
    }
}

/// Guess a MIME type from the extension of `key`, `text/plain` if unknown.
pub fn sniff_extension(key: &BlobKey) -> &'static str {
    key.extension()
        .and_then(|ext| mime_guess::from_ext(ext).first_raw())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

fn looks_like_text(window: &[u8]) -> bool {
    let valid_utf8 = match std::str::from_utf8(window) {
        Ok(_) => true,
        // A multi-byte sequence cut off by the window edge is still text
        Err(e) => e.error_len().is_none(),
    };

    valid_utf8
        && !window
            .iter()
            .any(|&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b)) || b == 0x7f)
}
