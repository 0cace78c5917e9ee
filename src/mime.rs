pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Sniff a media type from leading magic bytes, for sources that don't declare one.
pub fn detect_media_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, 0x50, 0x4E, 0x47, ..] => "image/png",
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif",
        [0x42, 0x4D, ..] => "image/bmp",
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => "image/webp",
        _ => {
            tracing::debug!(
                "Unrecognized file signature (first 4 bytes: {:02X?})",
                &bytes[..bytes.len().min(4)]
            );
            FALLBACK_MEDIA_TYPE
        }
    }
}
