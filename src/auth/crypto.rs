//! AES-256-GCM envelopes for secrets at rest.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TOKEN_KEY_ENV: &str = "GMAIL_AGENT_TOKEN_KEY";
pub const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedEnvelope {
    version: u8,
    nonce_hex: String,
    ciphertext_hex: String,
}

pub fn seal<T: Serialize>(value: &T, encryption_key: &[u8; KEY_BYTES]) -> Result<String> {
    let mut plaintext = serde_json::to_vec(value).context("serialize secret payload")?;
    let key = aead_key(encryption_key)?;

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| anyhow!("generate random nonce for secret encryption"))?;

    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut plaintext,
    )
    .map_err(|_| anyhow!("encrypt secret payload"))?;

    let envelope = EncryptedEnvelope {
        version: ENVELOPE_VERSION,
        nonce_hex: hex_encode(&nonce_bytes),
        ciphertext_hex: hex_encode(&plaintext),
    };

    serde_json::to_string(&envelope).context("serialize encrypted envelope")
}

pub fn open<T: DeserializeOwned>(raw: &str, encryption_key: &[u8; KEY_BYTES]) -> Result<T> {
    let envelope: EncryptedEnvelope =
        serde_json::from_str(raw).context("parse encrypted envelope")?;

    if envelope.version != ENVELOPE_VERSION {
        return Err(anyhow!(
            "unsupported envelope version {}",
            envelope.version
        ));
    }

    let nonce_vec = hex_decode(&envelope.nonce_hex).context("decode envelope nonce")?;
    let nonce_bytes: [u8; NONCE_BYTES] = nonce_vec
        .try_into()
        .map_err(|_| anyhow!("invalid nonce length in envelope"))?;
    let mut ciphertext =
        hex_decode(&envelope.ciphertext_hex).context("decode envelope ciphertext")?;

    let key = aead_key(encryption_key)?;
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| anyhow!("decrypt secret payload"))?;

    serde_json::from_slice(plaintext).context("parse decrypted secret payload")
}

/// Resolve the token encryption key: `GMAIL_AGENT_TOKEN_KEY` when set,
/// otherwise a key file next to the database, generated on first use.
pub fn resolve_key(key_path: &Path) -> Result<[u8; KEY_BYTES]> {
    let from_env = std::env::var(TOKEN_KEY_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if let Some(raw) = from_env {
        return parse_key_hex(&raw)
            .with_context(|| format!("{TOKEN_KEY_ENV} must be 64 hex characters (32 bytes)"));
    }

    load_or_create_key_file(key_path)
}

fn load_or_create_key_file(path: &Path) -> Result<[u8; KEY_BYTES]> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read token key file {}", path.display()))?;
        return parse_key_hex(&raw)
            .with_context(|| format!("token key file {} is malformed", path.display()));
    }

    let mut key = [0u8; KEY_BYTES];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| anyhow!("generate token encryption key"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create key directory {}", parent.display()))?;
    }
    std::fs::write(path, hex_encode(&key))
        .with_context(|| format!("write token key file {}", path.display()))?;
    restrict_permissions(path)?;

    info!("generated token encryption key at {}", path.display());
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn aead_key(encryption_key: &[u8; KEY_BYTES]) -> Result<LessSafeKey> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, encryption_key)
        .map_err(|_| anyhow!("construct AES-256-GCM key"))?;
    Ok(LessSafeKey::new(unbound_key))
}

pub fn parse_key_hex(raw: &str) -> Result<[u8; KEY_BYTES]> {
    let decoded = hex_decode(raw).context("decode key hex")?;
    decoded
        .try_into()
        .map_err(|_| anyhow!("encryption key must be 32 bytes"))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(raw: &str) -> Result<Vec<u8>> {
    let value = raw.trim();
    if value.len() % 2 != 0 {
        return Err(anyhow!("hex string length must be even"));
    }

    value
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = decode_hex_nibble(pair[0]).ok_or_else(|| anyhow!("invalid hex digit"))?;
            let lo = decode_hex_nibble(pair[1]).ok_or_else(|| anyhow!("invalid hex digit"))?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::{load_or_create_key_file, open, parse_key_hex, seal};

    const TEST_KEY_HEX: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Secret {
        token: String,
    }

    #[test]
    fn sealed_payload_hides_plaintext_and_opens() {
        let key = parse_key_hex(TEST_KEY_HEX).expect("parse key");
        let secret = Secret {
            token: "ya29.secret".to_string(),
        };

        let sealed = seal(&secret, &key).expect("seal");
        assert!(!sealed.contains("ya29.secret"));

        let opened: Secret = open(&sealed, &key).expect("open");
        assert_eq!(opened, secret);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key = parse_key_hex(TEST_KEY_HEX).expect("parse key");
        let other = [7u8; 32];
        let sealed = seal(
            &Secret {
                token: "t".to_string(),
            },
            &key,
        )
        .expect("seal");

        assert!(open::<Secret>(&sealed, &other).is_err());
    }

    #[test]
    fn short_key_hex_is_rejected() {
        assert!(parse_key_hex("abcd").is_err());
        assert!(parse_key_hex("zz").is_err());
    }

    #[test]
    fn key_file_is_created_once_and_reused() {
        let path = std::env::temp_dir()
            .join(format!("gmail-agent-key-{}", Uuid::new_v4()))
            .join("token.key");

        let first = load_or_create_key_file(&path).expect("create key");
        let second = load_or_create_key_file(&path).expect("reload key");
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
