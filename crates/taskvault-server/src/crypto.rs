use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;

pub const SIGNING_KEY_LEN: usize = 32;

/// The HMAC key for locally signed blob links.
///
/// `TASKVAULT_SIGNING_KEY` (base64, 32 bytes) wins when set. Otherwise the key
/// is read from `~/.config/taskvault/signing.key`, generated on first use.
pub fn resolve_signing_key() -> Result<Vec<u8>, String> {
    match std::env::var("TASKVAULT_SIGNING_KEY") {
        Ok(encoded) if !encoded.trim().is_empty() => {
            decode_key(&encoded).map_err(|e| format!("TASKVAULT_SIGNING_KEY: {e}"))
        }
        _ => Ok(load_or_generate_key_at(&key_file_path())),
    }
}

fn decode_key(encoded: &str) -> Result<Vec<u8>, String> {
    let bytes = B64
        .decode(encoded.trim())
        .map_err(|e| format!("base64 decode: {e}"))?;
    if bytes.len() != SIGNING_KEY_LEN {
        return Err(format!(
            "expected {SIGNING_KEY_LEN} bytes, got {}",
            bytes.len()
        ));
    }
    Ok(bytes)
}

fn load_or_generate_key_at(path: &Path) -> Vec<u8> {
    if let Ok(data) = fs::read_to_string(path) {
        match decode_key(&data) {
            Ok(key) => return key,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable signing key"),
        }
    }

    let mut key = vec![0u8; SIGNING_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(path, B64.encode(&key)) {
        // Links signed with this key stop verifying after a restart.
        tracing::warn!(path = %path.display(), error = %e, "could not persist signing key");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }

    key
}

fn key_file_path() -> PathBuf {
    key_file_path_from(
        std::env::var("XDG_CONFIG_HOME").ok(),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn key_file_path_from(xdg_config_home: Option<String>, home: Option<PathBuf>) -> PathBuf {
    if let Some(xdg) = xdg_config_home {
        PathBuf::from(xdg).join("taskvault").join("signing.key")
    } else if let Some(home) = home {
        home.join(".config/taskvault").join("signing.key")
    } else {
        PathBuf::from("taskvault").join("signing.key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_persisted_and_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("taskvault").join("signing.key");

        let first = load_or_generate_key_at(&path);
        assert_eq!(first.len(), SIGNING_KEY_LEN);
        assert!(path.exists());

        let second = load_or_generate_key_at(&path);
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn corrupt_key_file_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("signing.key");
        fs::write(&path, "not base64 at all!!").unwrap();

        let key = load_or_generate_key_at(&path);
        assert_eq!(key.len(), SIGNING_KEY_LEN);
        assert_eq!(decode_key(&fs::read_to_string(&path).unwrap()).unwrap(), key);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let short = B64.encode(b"short");
        assert!(decode_key(&short).unwrap_err().contains("expected 32 bytes"));
        assert!(decode_key(&B64.encode([7u8; 32])).is_ok());
    }

    #[test]
    fn key_file_path_xdg() {
        let path = key_file_path_from(Some("/tmp/xdg-test".into()), None);
        assert_eq!(path, PathBuf::from("/tmp/xdg-test/taskvault/signing.key"));
    }

    #[test]
    fn key_file_path_home() {
        let path = key_file_path_from(None, Some(PathBuf::from("/home/testuser")));
        assert_eq!(
            path,
            PathBuf::from("/home/testuser/.config/taskvault/signing.key")
        );
    }

    #[test]
    fn key_file_path_no_env() {
        assert_eq!(
            key_file_path_from(None, None),
            PathBuf::from("taskvault/signing.key")
        );
    }
}
