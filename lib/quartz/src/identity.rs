use crate::crypto;
use crate::encoding::{base64, hex};
use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

pub const PUBLIC_KEY_SIZE: usize = crypto::SIGN_PUBLIC_KEY_SIZE;

/// Long-term Ed25519 identity key pair. The secret half never leaves this struct.
#[derive(Clone)]
pub struct IdentityKeys {
    public: [u8; crypto::SIGN_PUBLIC_KEY_SIZE],
    secret: [u8; crypto::SIGN_SECRET_KEY_SIZE],
}

impl IdentityKeys {
    /// Generates a fresh throwaway identity.
    #[inline]
    pub fn generate() -> IdentityKeys {
        let (public, secret) = crypto::sign_keypair();
        IdentityKeys { public, secret }
    }

    /// Derives the identity for a fixed 32-byte seed.
    #[inline]
    pub fn from_seed(seed: &[u8; crypto::SIGN_SEED_SIZE]) -> IdentityKeys {
        let (public, secret) = crypto::sign_seed_keypair(seed);
        IdentityKeys { public, secret }
    }

    #[inline]
    pub fn public(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    #[inline]
    pub fn sign(&self, message: &[u8]) -> [u8; crypto::SIGNATURE_SIZE] {
        crypto::sign_detached(message, &self.secret)
    }

    /// Hex rendering of the public half, suitable for pinning on the peer side.
    #[inline]
    pub fn public_hex(&self) -> String {
        hex::encode(&self.public)
    }
}

impl fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("public", &self.public_hex())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    MalformedHex,
    MalformedSsh,
    UnsupportedKeyType(String),
    Io(String),
}

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyParseError::MalformedHex => write!(f, "malformed hex key literal"),
            KeyParseError::MalformedSsh => write!(f, "malformed ssh key literal"),
            KeyParseError::UnsupportedKeyType(kind) => write!(f, "unsupported key type {}", kind),
            KeyParseError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

/// A key argument as given on the command line or in configuration. A literal that parses as
/// neither key material nor a remote reference is treated as a shared password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    /// 32 raw key bytes, hex or ssh-ed25519 encoded.
    Public([u8; PUBLIC_KEY_SIZE]),
    /// A key hosted elsewhere (`github:user`, `gitlab:user`, `gpg:fingerprint`).
    Remote { service: String, name: String },
    /// Shared password for the password handshake mode.
    Password(String),
}

impl KeyRef {
    /// Parses a key argument. Hex and ssh literals become `Public`; the remote reference
    /// prefixes become `Remote`; anything else is a password.
    pub fn parse(literal: &str) -> Result<KeyRef, KeyParseError> {
        let trimmed = literal.trim();

        for service in &["github", "gitlab", "gpg"] {
            let prefix = format!("{}:", service);
            if let Some(name) = trimmed.strip_prefix(prefix.as_str()) {
                return Ok(KeyRef::Remote {
                    service: (*service).to_string(),
                    name: name.to_string(),
                });
            }
        }

        if trimmed.starts_with("ssh-") {
            return parse_ssh_line(trimmed).map(KeyRef::Public);
        }

        if trimmed.len() == PUBLIC_KEY_SIZE * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return parse_hex_key(trimmed).map(KeyRef::Public);
        }

        Ok(KeyRef::Password(trimmed.to_string()))
    }
}

/// Resolver seam for `Remote` key references. The bundled binaries do not ship one; key
/// fetching over HTTPS lives outside the core.
pub trait KeyResolver {
    fn resolve(&self, service: &str, name: &str) -> Result<[u8; PUBLIC_KEY_SIZE], KeyParseError>;
}

fn parse_hex_key(literal: &str) -> Result<[u8; PUBLIC_KEY_SIZE], KeyParseError> {
    let bytes = hex::decode(literal).ok_or(KeyParseError::MalformedHex)?;

    if bytes.len() != PUBLIC_KEY_SIZE {
        return Err(KeyParseError::MalformedHex);
    }

    let mut key = [0u8; PUBLIC_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Parses a single `ssh-ed25519 <base64-blob> [comment]` line. The blob layout is the
/// OpenSSH wire format: length-prefixed algorithm name followed by the raw key.
fn parse_ssh_line(line: &str) -> Result<[u8; PUBLIC_KEY_SIZE], KeyParseError> {
    let mut fields = line.split_whitespace();

    let algorithm = fields.next().ok_or(KeyParseError::MalformedSsh)?;
    if algorithm != "ssh-ed25519" {
        return Err(KeyParseError::UnsupportedKeyType(algorithm.to_string()));
    }

    let blob_b64 = fields.next().ok_or(KeyParseError::MalformedSsh)?;
    let blob = base64::decode(blob_b64).map_err(|_| KeyParseError::MalformedSsh)?;

    let mut cursor = &blob[..];

    let name_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| KeyParseError::MalformedSsh)? as usize;
    let mut name = vec![0u8; name_len];
    cursor
        .read_exact(&mut name)
        .map_err(|_| KeyParseError::MalformedSsh)?;
    if name != b"ssh-ed25519" {
        return Err(KeyParseError::MalformedSsh);
    }

    let key_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| KeyParseError::MalformedSsh)? as usize;
    if key_len != PUBLIC_KEY_SIZE {
        return Err(KeyParseError::MalformedSsh);
    }

    let mut key = [0u8; PUBLIC_KEY_SIZE];
    cursor
        .read_exact(&mut key)
        .map_err(|_| KeyParseError::MalformedSsh)?;

    Ok(key)
}

/// Set of identity keys authorized to connect. Loaded from a file with one hex or
/// ssh-ed25519 entry per line; `#` starts a comment.
#[derive(Debug, Clone, Default)]
pub struct KeyAllowList {
    keys: Vec<[u8; PUBLIC_KEY_SIZE]>,
}

impl KeyAllowList {
    #[inline]
    pub fn new() -> KeyAllowList {
        KeyAllowList { keys: Vec::new() }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<KeyAllowList, KeyParseError> {
        let content = fs::read_to_string(path).map_err(|err| KeyParseError::Io(err.to_string()))?;
        Self::from_str_lines(&content)
    }

    pub fn from_str_lines(content: &str) -> Result<KeyAllowList, KeyParseError> {
        let mut list = KeyAllowList::new();

        for raw_line in content.lines() {
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            let key = if line.starts_with("ssh-") {
                parse_ssh_line(line)?
            } else {
                parse_hex_key(line)?
            };

            list.push(key);
        }

        Ok(list)
    }

    #[inline]
    pub fn push(&mut self, key: [u8; PUBLIC_KEY_SIZE]) {
        self.keys.push(key);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Membership test in constant time per entry.
    #[inline]
    pub fn contains(&self, key: &[u8; PUBLIC_KEY_SIZE]) -> bool {
        let mut found = false;
        for entry in &self.keys {
            found |= crypto::verify_32(entry, key);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn ssh_line_for(key: &[u8; PUBLIC_KEY_SIZE]) -> String {
        let mut blob = Vec::new();
        blob.write_u32::<BigEndian>(11).unwrap();
        blob.write_all(b"ssh-ed25519").unwrap();
        blob.write_u32::<BigEndian>(PUBLIC_KEY_SIZE as u32).unwrap();
        blob.write_all(key).unwrap();

        format!("ssh-ed25519 {} test@host", base64::encode(&blob))
    }

    #[test]
    fn test_parse_hex_literal() {
        let identity = IdentityKeys::generate();
        let literal = identity.public_hex();

        match KeyRef::parse(&literal).unwrap() {
            KeyRef::Public(key) => assert_eq!(&key, identity.public()),
            other => panic!("Unexpected parse {:?}", other),
        }
    }

    #[test]
    fn test_parse_ssh_literal() {
        let identity = IdentityKeys::generate();
        let line = ssh_line_for(identity.public());

        match KeyRef::parse(&line).unwrap() {
            KeyRef::Public(key) => assert_eq!(&key, identity.public()),
            other => panic!("Unexpected parse {:?}", other),
        }
    }

    #[test]
    fn test_parse_remote_reference() {
        match KeyRef::parse("github:someone").unwrap() {
            KeyRef::Remote { service, name } => {
                assert_eq!(service, "github");
                assert_eq!(name, "someone");
            }
            other => panic!("Unexpected parse {:?}", other),
        }
    }

    #[test]
    fn test_parse_password_fallback() {
        assert_eq!(
            KeyRef::parse("s3cret").unwrap(),
            KeyRef::Password("s3cret".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_wrong_ssh_type() {
        let result = KeyRef::parse("ssh-rsa AAAA comment");
        assert_eq!(
            result.unwrap_err(),
            KeyParseError::UnsupportedKeyType("ssh-rsa".to_string())
        );
    }

    #[test]
    fn test_allowlist_lines_and_comments() {
        let a = IdentityKeys::generate();
        let b = IdentityKeys::generate();
        let c = IdentityKeys::generate();

        let content = format!(
            "# authorized clients\n{}\n\n{}   # workstation\n",
            a.public_hex(),
            ssh_line_for(b.public())
        );

        let list = KeyAllowList::from_str_lines(&content).unwrap();

        assert_eq!(list.len(), 2);
        assert!(list.contains(a.public()));
        assert!(list.contains(b.public()));
        assert!(!list.contains(c.public()));
    }

    #[test]
    fn test_sign_with_identity() {
        let identity = IdentityKeys::generate();
        let signature = identity.sign(b"challenge");

        assert!(crypto::sign_verify(&signature, b"challenge", identity.public()));
    }
}
