use super::domain::MemberId;

/// Object storage boundary (the managed storage product in production).
/// Receipts and avatars are stored under bare keys; URLs are minted on demand.
pub trait ObjectStore: Send + Sync {
    /// Uploads without overwrite; an existing key is an error.
    fn upload(&self, bucket: &str, path: &str, content: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, bucket: &str, path: &str) -> Result<(), StorageError>;
    /// Issues a fresh time-limited URL for a bare key.
    fn signed_url(&self, bucket: &str, path: &str, ttl_secs: u32) -> Result<String, StorageError>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object already exists at {0}")]
    AlreadyExists(String),
    #[error("object not found at {0}")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Rewrites anything that could break a storage key or a header, control
/// characters included, to `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = if name.trim().is_empty() { "archivo" } else { name };
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '(' | ')' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Receipt key: `<member_id>/<upload_millis>-<sanitized_filename>`.
pub fn receipt_path(member: &MemberId, upload_millis: i64, file_name: &str) -> String {
    format!(
        "{}/{}-{}",
        member.0,
        upload_millis,
        sanitize_file_name(file_name)
    )
}

/// Avatar key: `<member_id>/avatar-<millis>.<ext>`.
pub fn avatar_path(member: &MemberId, upload_millis: i64, extension: &str) -> String {
    format!("{}/avatar-{}.{}", member.0, upload_millis, extension)
}

/// Normalizes whatever a receipt column holds back to the bare key.
///
/// Accepts bare keys, bucket-prefixed keys, and previously issued signed or
/// public URLs (`.../object/sign/<bucket>/<key>?token=...`,
/// `.../object/public/<bucket>/<key>`). Returns `None` when no key can be
/// recovered.
pub fn extract_object_path(raw: &str, bucket: &str) -> Option<String> {
    let mut value = raw.trim().to_string();
    if value.is_empty() {
        return None;
    }

    if value.starts_with("http://") || value.starts_with("https://") {
        let without_scheme = value.splitn(2, "//").nth(1)?;
        let path_start = without_scheme.find('/')?;
        let full_path = &without_scheme[path_start..];
        let path = full_path.split('?').next().unwrap_or(full_path);

        let needle = format!("/{}/", bucket.to_lowercase());
        let idx = path.to_lowercase().find(&needle)?;
        value = percent_decode(&path[idx + needle.len()..]);
    }

    let prefix = format!("{bucket}/");
    if let Some(stripped) = value.strip_prefix(&prefix) {
        value = stripped.to_string();
    }

    let value = value.trim_start_matches('/').to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// Minimal %XX decoding: storage keys only ever carry encoded spaces and
// similar single-byte escapes.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(hex) = bytes.get(i + 1..i + 3) {
                if let Ok(byte) = u8::from_str_radix(&String::from_utf8_lossy(hex), 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_hostile_file_names() {
        assert_eq!(
            sanitize_file_name("voucher\nmarch?.png"),
            "voucher_march_.png"
        );
        assert_eq!(sanitize_file_name("  "), "archivo");
        assert_eq!(sanitize_file_name("pago (1).pdf"), "pago (1).pdf");
    }

    #[test]
    fn receipt_path_scheme() {
        let member = MemberId("abc-123".to_string());
        assert_eq!(
            receipt_path(&member, 1767456000000, "voucher.png"),
            "abc-123/1767456000000-voucher.png"
        );
    }

    #[test]
    fn avatar_path_scheme() {
        let member = MemberId("abc-123".to_string());
        assert_eq!(
            avatar_path(&member, 1767456000000, "jpg"),
            "abc-123/avatar-1767456000000.jpg"
        );
    }

    #[test]
    fn bare_keys_pass_through() {
        assert_eq!(
            extract_object_path("uid/123-voucher.png", "Recibos"),
            Some("uid/123-voucher.png".to_string())
        );
    }

    #[test]
    fn bucket_prefixed_keys_are_stripped() {
        assert_eq!(
            extract_object_path("Recibos/uid/123-voucher.png", "Recibos"),
            Some("uid/123-voucher.png".to_string())
        );
    }

    #[test]
    fn signed_urls_are_normalized() {
        let url =
            "https://x.supabase.co/storage/v1/object/sign/Recibos/uid/123-voucher.png?token=abc";
        assert_eq!(
            extract_object_path(url, "Recibos"),
            Some("uid/123-voucher.png".to_string())
        );
    }

    #[test]
    fn truncated_signed_urls_still_normalize() {
        let url = "https://x.supabase.co/object/sign/Recibos/uid/123-voucher.png?token=abc";
        assert_eq!(
            extract_object_path(url, "Recibos"),
            Some("uid/123-voucher.png".to_string())
        );
    }

    #[test]
    fn public_urls_are_normalized() {
        let url = "https://x.supabase.co/storage/v1/object/public/Recibos/uid/123%20voucher.png";
        assert_eq!(
            extract_object_path(url, "Recibos"),
            Some("uid/123 voucher.png".to_string())
        );
    }

    #[test]
    fn foreign_urls_yield_nothing() {
        assert_eq!(
            extract_object_path("https://example.com/otros/uid/file.png", "Recibos"),
            None
        );
        assert_eq!(extract_object_path("", "Recibos"), None);
    }
}
