// SPDX-License-Identifier: GPL-3.0-or-later
//! Secrets file bootstrap: `config_root/secrets.json`, generated on
//! first startup and mode `0600` thereafter.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secrets {
    pub jwt_secret: String,
}

fn generate_jwt_secret() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Loads secrets from `path`, generating and persisting a fresh file if it
/// is missing, unreadable, or missing the `jwt_secret` key.
pub fn load_or_generate(path: &Path) -> Result<Secrets> {
    if path.exists() {
        match std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str::<Secrets>(&s).ok())
        {
            Some(secrets) if !secrets.jwt_secret.is_empty() => {
                info!(target: "config", path = %path.display(), "loaded secrets");
                return Ok(secrets);
            }
            _ => warn!(target: "config", "secrets file present but invalid, regenerating"),
        }
    } else {
        info!(target: "config", "secrets file not found, generating new secrets");
    }

    let secrets = Secrets {
        jwt_secret: generate_jwt_secret(),
    };
    save(path, &secrets)?;
    Ok(secrets)
}

fn save(path: &Path, secrets: &Secrets) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(secrets)?;
    let mut file = std::fs::File::create(path)
    .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(body.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
        .with_context(|| format!("chmod 0600 {}", path.display()))?;
    }

    warn!(
        target: "config",
        path = %path.display(),
        "generated new secrets file — back this up, losing it invalidates all sessions"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_on_first_run() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("secrets.json");
        let secrets = load_or_generate(&path).unwrap();
        assert!(!secrets.jwt_secret.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn reloads_identical_secret_on_second_run() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("secrets.json");
        let first = load_or_generate(&path).unwrap();
        let second = load_or_generate(&path).unwrap();
        assert_eq!(first.jwt_secret, second.jwt_secret);
    }

    #[test]
    fn regenerates_when_jwt_secret_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("secrets.json");
        std::fs::write(&path, r#"{"other": "value"}"#).unwrap();
        let secrets = load_or_generate(&path).unwrap();
        assert!(!secrets.jwt_secret.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("secrets.json");
        load_or_generate(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
