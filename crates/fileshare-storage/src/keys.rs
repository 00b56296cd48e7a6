//! Shared object key generation for storage backends.
//!
//! Key format: `{user_id}/{yyyy}/{MM}/{dd}/{file_id}/{file_name}`, plus
//! [`ENCRYPTED_SUFFIX`] for the ciphertext copy.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Suffix distinguishing the ciphertext copy from the original.
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

const FALLBACK_FILE_NAME: &str = "file";

/// Reduce an uploaded file name to a single safe path segment.
///
/// Directory parts (either separator) and control characters are dropped;
/// names that end up empty or consist only of dots become `file`.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Key for the plaintext copy of a file.
pub fn object_key(user_id: Uuid, at: DateTime<Utc>, file_id: Uuid, file_name: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        user_id,
        at.format("%Y/%m/%d"),
        file_id,
        sanitize_file_name(file_name)
    )
}

/// Key for the ciphertext copy of a file.
pub fn encrypted_object_key(
    user_id: Uuid,
    at: DateTime<Utc>,
    file_id: Uuid,
    file_name: &str,
) -> String {
    format!("{}{}", object_key(user_id, at, file_id, file_name), ENCRYPTED_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        "2024-03-07T23:59:59Z".parse().unwrap()
    }

    #[test]
    fn test_key_layout_is_date_partitioned() {
        let user = Uuid::nil();
        let file: Uuid = "7d0c1f6e-3c1a-4a55-9a0b-6f8a4b9d2e11".parse().unwrap();

        assert_eq!(
            object_key(user, at(), file, "report.txt"),
            format!("{}/2024/03/07/{}/report.txt", user, file)
        );
        assert_eq!(
            encrypted_object_key(user, at(), file, "report.txt"),
            format!("{}/2024/03/07/{}/report.txt.encrypted", user, file)
        );
    }

    #[test]
    fn test_keys_are_deterministic() {
        let user = Uuid::new_v4();
        let file = Uuid::new_v4();
        assert_eq!(
            object_key(user, at(), file, "a.pdf"),
            object_key(user, at(), file, "a.pdf")
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.txt"), "report.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\doc.pdf"), "doc.pdf");
        assert_eq!(sanitize_file_name("bad\nname.txt"), "badname.txt");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name("dir/"), "file");
        assert_eq!(sanitize_file_name("notes..v2.md"), "notes..v2.md");
    }
}
