use byteorder::{BigEndian, WriteBytesExt};
use ctor::ctor;
use libsodium_sys;

pub const MAC_SIZE: usize = libsodium_sys::crypto_aead_xchacha20poly1305_IETF_ABYTES as usize;
pub const KEY_SIZE: usize = libsodium_sys::crypto_aead_xchacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_aead_xchacha20poly1305_IETF_NPUBBYTES as usize;

pub const SIGN_PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_sign_PUBLICKEYBYTES as usize;
pub const SIGN_SECRET_KEY_SIZE: usize = libsodium_sys::crypto_sign_SECRETKEYBYTES as usize;
pub const SIGN_SEED_SIZE: usize = libsodium_sys::crypto_sign_SEEDBYTES as usize;
pub const SIGNATURE_SIZE: usize = libsodium_sys::crypto_sign_BYTES as usize;

pub const ECDH_PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_scalarmult_BYTES as usize;
pub const ECDH_SECRET_KEY_SIZE: usize = libsodium_sys::crypto_scalarmult_SCALARBYTES as usize;

pub const PWHASH_SALT_SIZE: usize = libsodium_sys::crypto_pwhash_SALTBYTES as usize;

pub const HASH_SIZE: usize = libsodium_sys::crypto_generichash_BYTES as usize;
pub const MAC_LONG_SIZE: usize = 64;

/// Initialize the sodium infrastructure
#[ctor]
fn INIT_SODIUM() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed")
        }
    }
}

/// Builds a full AEAD nonce from the per-direction prefix and the record counter.
#[inline]
pub fn build_nonce(prefix: &[u8; NONCE_SIZE - 8], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes[..NONCE_SIZE - 8].copy_from_slice(prefix);
    (&mut nonce_bytes[NONCE_SIZE - 8..])
        .write_u64::<BigEndian>(counter)
        .expect("Error creating nonce");
    nonce_bytes
}

/// Encrypts the provided plain text into the cipher buffer. The encrypted message size will be the
/// plain text size plus the MAC size (16 bytes). The function will fail if the cipher slice is not
/// exactly that large.
///
/// The additional data, nonce and key must match those used during encryption, the decryption will
/// fail otherwise.
#[inline]
pub fn aead_encrypt(
    cipher: &mut [u8],
    plain: &[u8],
    additional_data: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> bool {
    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "Encryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_encrypt(
            cipher.as_mut_ptr(),
            ::std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            ::std::ptr::null(),
            nonce.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Decrypts the provided ciphertext into the plain buffer. The decoded message size is equal to
/// the cipher text length minus the MAC (16 bytes).
#[inline]
pub fn aead_decrypt(
    plain: &mut [u8],
    cipher: &[u8],
    additional_data: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> bool {
    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "Decryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            ::std::ptr::null_mut(),
            ::std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            nonce.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Generates a fresh Ed25519 signing key pair.
#[inline]
pub fn sign_keypair() -> ([u8; SIGN_PUBLIC_KEY_SIZE], [u8; SIGN_SECRET_KEY_SIZE]) {
    let mut public = [0u8; SIGN_PUBLIC_KEY_SIZE];
    let mut secret = [0u8; SIGN_SECRET_KEY_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_keypair(public.as_mut_ptr(), secret.as_mut_ptr());
    }

    (public, secret)
}

/// Derives the Ed25519 signing key pair for a 32-byte seed.
#[inline]
pub fn sign_seed_keypair(
    seed: &[u8; SIGN_SEED_SIZE],
) -> ([u8; SIGN_PUBLIC_KEY_SIZE], [u8; SIGN_SECRET_KEY_SIZE]) {
    let mut public = [0u8; SIGN_PUBLIC_KEY_SIZE];
    let mut secret = [0u8; SIGN_SECRET_KEY_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_seed_keypair(public.as_mut_ptr(), secret.as_mut_ptr(), seed.as_ptr());
    }

    (public, secret)
}

/// Produces a detached Ed25519 signature over the message.
#[inline]
pub fn sign_detached(message: &[u8], secret: &[u8; SIGN_SECRET_KEY_SIZE]) -> [u8; SIGNATURE_SIZE] {
    let mut signature = [0u8; SIGNATURE_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_detached(
            signature.as_mut_ptr(),
            ::std::ptr::null_mut(),
            message.as_ptr(),
            message.len() as u64,
            secret.as_ptr(),
        );
    }

    signature
}

/// Verifies a detached Ed25519 signature.
#[inline]
pub fn sign_verify(
    signature: &[u8; SIGNATURE_SIZE],
    message: &[u8],
    public: &[u8; SIGN_PUBLIC_KEY_SIZE],
) -> bool {
    unsafe {
        libsodium_sys::crypto_sign_verify_detached(
            signature.as_ptr(),
            message.as_ptr(),
            message.len() as u64,
            public.as_ptr(),
        ) == 0
    }
}

/// Generates a fresh X25519 key pair for a single connection.
#[inline]
pub fn ecdh_keypair() -> ([u8; ECDH_PUBLIC_KEY_SIZE], [u8; ECDH_SECRET_KEY_SIZE]) {
    let mut secret = [0u8; ECDH_SECRET_KEY_SIZE];
    let mut public = [0u8; ECDH_PUBLIC_KEY_SIZE];

    random_bytes(&mut secret);

    unsafe {
        libsodium_sys::crypto_scalarmult_base(public.as_mut_ptr(), secret.as_ptr());
    }

    (public, secret)
}

/// Computes the X25519 shared secret. Returns false for degenerate peer keys.
#[inline]
pub fn ecdh(
    shared: &mut [u8; ECDH_PUBLIC_KEY_SIZE],
    secret: &[u8; ECDH_SECRET_KEY_SIZE],
    peer_public: &[u8; ECDH_PUBLIC_KEY_SIZE],
) -> bool {
    unsafe {
        libsodium_sys::crypto_scalarmult(shared.as_mut_ptr(), secret.as_ptr(), peer_public.as_ptr()) == 0
    }
}

/// Keyed BLAKE2b over the concatenation of the message parts. The output length must be
/// between 32 and 64 bytes.
#[inline]
pub fn keyed_hash(out: &mut [u8], key: &[u8], parts: &[&[u8]]) {
    if out.len() < HASH_SIZE || out.len() > MAC_LONG_SIZE {
        panic!("Keyed hash output length {} outside supported range", out.len());
    }

    let mut message = Vec::new();
    for part in parts {
        message.extend_from_slice(part);
    }

    unsafe {
        libsodium_sys::crypto_generichash(
            out.as_mut_ptr(),
            out.len(),
            message.as_ptr(),
            message.len() as u64,
            key.as_ptr(),
            key.len(),
        );
    }
}

/// Argon2id password hash with interactive-strength parameters.
#[inline]
pub fn password_key(
    out: &mut [u8; KEY_SIZE],
    password: &[u8],
    salt: &[u8; PWHASH_SALT_SIZE],
) -> bool {
    unsafe {
        libsodium_sys::crypto_pwhash(
            out.as_mut_ptr(),
            out.len() as u64,
            password.as_ptr() as *const _,
            password.len() as u64,
            salt.as_ptr(),
            libsodium_sys::crypto_pwhash_OPSLIMIT_INTERACTIVE as u64,
            libsodium_sys::crypto_pwhash_MEMLIMIT_INTERACTIVE as usize,
            libsodium_sys::crypto_pwhash_ALG_ARGON2ID13 as i32,
        ) == 0
    }
}

/// Constant-time comparison of two 32-byte values.
#[inline]
pub fn verify_32(a: &[u8; 32], b: &[u8; 32]) -> bool {
    unsafe { libsodium_sys::crypto_verify_32(a.as_ptr(), b.as_ptr()) == 0 }
}

/// Constant-time comparison of two 64-byte values.
#[inline]
pub fn verify_64(a: &[u8; 64], b: &[u8; 64]) -> bool {
    unsafe { libsodium_sys::crypto_verify_64(a.as_ptr(), b.as_ptr()) == 0 }
}

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_roundtrip() {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);

        let prefix = [7u8; NONCE_SIZE - 8];
        let nonce = build_nonce(&prefix, 42);

        let plain = b"colored glyphs";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];

        assert!(aead_encrypt(&mut cipher, plain, &[], &nonce, &key));

        let mut decoded = vec![0u8; plain.len()];
        assert!(aead_decrypt(&mut decoded, &cipher, &[], &nonce, &key));
        assert_eq!(&decoded, plain);
    }

    #[test]
    fn test_aead_tamper_detected() {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);

        let nonce = build_nonce(&[0u8; NONCE_SIZE - 8], 0);

        let plain = b"payload";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(aead_encrypt(&mut cipher, plain, &[], &nonce, &key));

        cipher[3] ^= 0x10;

        let mut decoded = vec![0u8; plain.len()];
        assert!(!aead_decrypt(&mut decoded, &cipher, &[], &nonce, &key));
    }

    #[test]
    fn test_sign_roundtrip() {
        let (public, secret) = sign_keypair();

        let signature = sign_detached(b"offer", &secret);
        assert!(sign_verify(&signature, b"offer", &public));
        assert!(!sign_verify(&signature, b"other", &public));
    }

    #[test]
    fn test_seed_keypair_deterministic() {
        let seed = [9u8; SIGN_SEED_SIZE];
        let (public_a, _) = sign_seed_keypair(&seed);
        let (public_b, _) = sign_seed_keypair(&seed);

        assert_eq!(public_a, public_b);
    }

    #[test]
    fn test_ecdh_agreement() {
        let (public_a, secret_a) = ecdh_keypair();
        let (public_b, secret_b) = ecdh_keypair();

        let mut shared_a = [0u8; ECDH_PUBLIC_KEY_SIZE];
        let mut shared_b = [0u8; ECDH_PUBLIC_KEY_SIZE];

        assert!(ecdh(&mut shared_a, &secret_a, &public_b));
        assert!(ecdh(&mut shared_b, &secret_b, &public_a));
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn test_password_key_deterministic() {
        let salt = [3u8; PWHASH_SALT_SIZE];

        let mut key_a = [0u8; KEY_SIZE];
        let mut key_b = [0u8; KEY_SIZE];

        assert!(password_key(&mut key_a, b"s3cret", &salt));
        assert!(password_key(&mut key_b, b"s3cret", &salt));
        assert!(verify_32(&key_a, &key_b));

        let mut key_c = [0u8; KEY_SIZE];
        assert!(password_key(&mut key_c, b"other", &salt));
        assert!(!verify_32(&key_a, &key_c));
    }

    #[test]
    fn test_keyed_hash_distinct_contexts() {
        let key = [1u8; KEY_SIZE];

        let mut out_a = [0u8; HASH_SIZE];
        let mut out_b = [0u8; HASH_SIZE];

        keyed_hash(&mut out_a, &key, &[b"ctx-a"]);
        keyed_hash(&mut out_b, &key, &[b"ctx-b"]);

        assert_ne!(out_a, out_b);
    }
}
