use crate::net::{CryptoError, NetError, NetResult};
use byteorder::{BigEndian, ByteOrder};
use quartz::crypto;
use quartz::identity::IdentityKeys;

pub const NONCE_PREFIX_SIZE: usize = crypto::NONCE_SIZE - 8;

/// Bytes an encrypted record adds on top of its plaintext: the counter and the MAC.
pub const ENVELOPE_OVERHEAD: usize = 8 + crypto::MAC_SIZE;

const SESSION_CONTEXT: &[u8] = b"glyphcast.session.v1";
const PASSWORD_CONTEXT: &[u8] = b"glyphcast.password.v1";
const PREFIX_C2S_CONTEXT: &[u8] = b"glyphcast.nonce.c2s";
const PREFIX_S2C_CONTEXT: &[u8] = b"glyphcast.nonce.s2c";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            Role::Client => crate::net::packet::ROLE_TAG_CLIENT,
            Role::Server => crate::net::packet::ROLE_TAG_SERVER,
        }
    }

    #[inline]
    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// Sending half of the record layer. Owned by the session writer; the sole mutator of
/// the outgoing nonce counter.
pub struct TxCrypto {
    key: [u8; crypto::KEY_SIZE],
    prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u64,
    exhausted: bool,
}

impl TxCrypto {
    /// Encrypts one record. The output layout is `[counter:u64 BE][ciphertext|tag]`.
    pub fn seal(&mut self, plain: &[u8]) -> NetResult<Vec<u8>> {
        if self.exhausted {
            return Err(NetError::Crypto(CryptoError::NonceExhausted));
        }

        let nonce = crypto::build_nonce(&self.prefix, self.counter);

        let mut record = vec![0u8; 8 + plain.len() + crypto::MAC_SIZE];
        BigEndian::write_u64(&mut record[..8], self.counter);

        if !crypto::aead_encrypt(&mut record[8..], plain, &[], &nonce, &self.key) {
            return Err(NetError::Crypto(CryptoError::AuthFailed));
        }

        self.counter = self.counter.wrapping_add(1);
        if self.counter == 0 {
            // Wrapped back to the starting value: the nonce space is spent.
            self.exhausted = true;
        }

        Ok(record)
    }

    #[inline]
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Receiving half of the record layer. Owned by the session reader; verifies the
/// counter parsed from the wire stays strictly monotonic.
pub struct RxCrypto {
    key: [u8; crypto::KEY_SIZE],
    prefix: [u8; NONCE_PREFIX_SIZE],
    next_counter: u64,
}

impl RxCrypto {
    /// Opens one record produced by the peer's `seal`.
    pub fn open(&mut self, record: &[u8]) -> NetResult<Vec<u8>> {
        if record.len() < ENVELOPE_OVERHEAD {
            return Err(NetError::Crypto(CryptoError::BufferTooSmall));
        }

        let counter = BigEndian::read_u64(&record[..8]);
        if counter != self.next_counter {
            return Err(NetError::Crypto(CryptoError::AuthFailed));
        }

        let nonce = crypto::build_nonce(&self.prefix, counter);

        let cipher = &record[8..];
        let mut plain = vec![0u8; cipher.len() - crypto::MAC_SIZE];

        if !crypto::aead_decrypt(&mut plain, cipher, &[], &nonce, &self.key) {
            return Err(NetError::Crypto(CryptoError::AuthFailed));
        }

        self.next_counter = counter.wrapping_add(1);

        Ok(plain)
    }
}

/// Per-connection crypto state: the ephemeral X25519 pair, the optional identity and
/// password material, and (once key exchange completes) both record-layer halves.
pub struct SessionCrypto {
    role: Role,
    identity: Option<IdentityKeys>,
    ephemeral_public: [u8; crypto::ECDH_PUBLIC_KEY_SIZE],
    ephemeral_secret: [u8; crypto::ECDH_SECRET_KEY_SIZE],
    password: Option<String>,
    password_key: Option<[u8; crypto::KEY_SIZE]>,
    password_salt: [u8; crypto::PWHASH_SALT_SIZE],
    tx: Option<TxCrypto>,
    rx: Option<RxCrypto>,
}

impl SessionCrypto {
    /// Public-key mode: long-term identity plus a fresh per-connection ephemeral pair.
    pub fn new_pubkey(role: Role, identity: IdentityKeys) -> SessionCrypto {
        let (ephemeral_public, ephemeral_secret) = crypto::ecdh_keypair();

        SessionCrypto {
            role,
            identity: Some(identity),
            ephemeral_public,
            ephemeral_secret,
            password: None,
            password_key: None,
            password_salt: [0u8; crypto::PWHASH_SALT_SIZE],
            tx: None,
            rx: None,
        }
    }

    /// Password mode. The server generates the KDF salt and derives its key up front;
    /// the client derives once the salt arrives with the server's accept.
    pub fn new_password(role: Role, password: &str) -> NetResult<SessionCrypto> {
        let (ephemeral_public, ephemeral_secret) = crypto::ecdh_keypair();

        let mut state = SessionCrypto {
            role,
            identity: None,
            ephemeral_public,
            ephemeral_secret,
            password: Some(password.to_string()),
            password_key: None,
            password_salt: [0u8; crypto::PWHASH_SALT_SIZE],
            tx: None,
            rx: None,
        };

        if role == Role::Server {
            crypto::random_bytes(&mut state.password_salt);
            state.derive_password_key()?;
        }

        Ok(state)
    }

    fn derive_password_key(&mut self) -> NetResult<()> {
        let password = match &self.password {
            Some(password) => password.clone(),
            None => return Err(NetError::Crypto(CryptoError::BadPassword)),
        };

        let mut key = [0u8; crypto::KEY_SIZE];
        if !crypto::password_key(&mut key, password.as_bytes(), &self.password_salt) {
            return Err(NetError::Crypto(CryptoError::BadPassword));
        }

        self.password_key = Some(key);
        Ok(())
    }

    /// Client side of password mode: adopt the server-chosen salt and derive.
    pub fn adopt_password_salt(&mut self, salt: &[u8; crypto::PWHASH_SALT_SIZE]) -> NetResult<()> {
        self.password_salt = *salt;
        self.derive_password_key()
    }

    #[inline]
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    #[inline]
    pub fn password_salt(&self) -> &[u8; crypto::PWHASH_SALT_SIZE] {
        &self.password_salt
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn identity(&self) -> Option<&IdentityKeys> {
        self.identity.as_ref()
    }

    #[inline]
    pub fn ephemeral_public(&self) -> &[u8; crypto::ECDH_PUBLIC_KEY_SIZE] {
        &self.ephemeral_public
    }

    #[inline]
    pub fn key_exchange_complete(&self) -> bool {
        self.tx.is_some()
    }

    /// Runs ECDH against the peer's ephemeral key and derives the session key and both
    /// directional nonce prefixes. The key binds the shared secret and both public keys
    /// (initiator first); password mode additionally folds in the password key.
    pub fn set_peer_ephemeral(
        &mut self,
        peer_public: &[u8; crypto::ECDH_PUBLIC_KEY_SIZE],
    ) -> NetResult<()> {
        let mut shared = [0u8; crypto::ECDH_PUBLIC_KEY_SIZE];
        if !crypto::ecdh(&mut shared, &self.ephemeral_secret, peer_public) {
            return Err(NetError::Crypto(CryptoError::AuthFailed));
        }

        let (client_public, server_public) = match self.role {
            Role::Client => (&self.ephemeral_public, peer_public),
            Role::Server => (peer_public, &self.ephemeral_public),
        };

        let mut session_key = [0u8; crypto::KEY_SIZE];
        crypto::keyed_hash(
            &mut session_key,
            &shared,
            &[SESSION_CONTEXT, client_public, server_public],
        );

        if self.password.is_some() {
            let password_key = match self.password_key {
                Some(key) => key,
                None => return Err(NetError::Crypto(CryptoError::BadPassword)),
            };

            let mut mixed = [0u8; crypto::KEY_SIZE];
            crypto::keyed_hash(&mut mixed, &password_key, &[PASSWORD_CONTEXT, &session_key]);
            session_key = mixed;
        }

        let mut c2s = [0u8; crypto::KEY_SIZE];
        let mut s2c = [0u8; crypto::KEY_SIZE];
        crypto::keyed_hash(&mut c2s, &session_key, &[PREFIX_C2S_CONTEXT]);
        crypto::keyed_hash(&mut s2c, &session_key, &[PREFIX_S2C_CONTEXT]);

        let mut c2s_prefix = [0u8; NONCE_PREFIX_SIZE];
        let mut s2c_prefix = [0u8; NONCE_PREFIX_SIZE];
        c2s_prefix.copy_from_slice(&c2s[..NONCE_PREFIX_SIZE]);
        s2c_prefix.copy_from_slice(&s2c[..NONCE_PREFIX_SIZE]);

        let (tx_prefix, rx_prefix) = match self.role {
            Role::Client => (c2s_prefix, s2c_prefix),
            Role::Server => (s2c_prefix, c2s_prefix),
        };

        self.tx = Some(TxCrypto {
            key: session_key,
            prefix: tx_prefix,
            counter: 0,
            exhausted: false,
        });
        self.rx = Some(RxCrypto {
            key: session_key,
            prefix: rx_prefix,
            next_counter: 0,
        });

        Ok(())
    }

    /// Encrypts one record with the outgoing half.
    pub fn encrypt(&mut self, plain: &[u8]) -> NetResult<Vec<u8>> {
        match &mut self.tx {
            Some(tx) => tx.seal(plain),
            None => Err(NetError::Crypto(CryptoError::KeyExchangeIncomplete)),
        }
    }

    /// Decrypts one record with the incoming half.
    pub fn decrypt(&mut self, record: &[u8]) -> NetResult<Vec<u8>> {
        match &mut self.rx {
            Some(rx) => rx.open(record),
            None => Err(NetError::Crypto(CryptoError::KeyExchangeIncomplete)),
        }
    }

    /// Keyed MAC of a handshake challenge under the password-derived key.
    pub fn challenge_mac(&self, challenge: &[u8]) -> NetResult<[u8; 64]> {
        let password_key = match self.password_key {
            Some(key) => key,
            None => return Err(NetError::Crypto(CryptoError::BadPassword)),
        };

        let mut mac = [0u8; 64];
        crypto::keyed_hash(&mut mac, &password_key, &[challenge]);
        Ok(mac)
    }

    /// Constant-time verification of a password challenge MAC.
    pub fn verify_challenge_mac(&self, challenge: &[u8], mac: &[u8; 64]) -> bool {
        match self.challenge_mac(challenge) {
            Ok(expected) => crypto::verify_64(&expected, mac),
            Err(_) => false,
        }
    }

    /// Splits the completed context into its writer and reader halves.
    pub fn into_record_halves(self) -> NetResult<(TxCrypto, RxCrypto)> {
        match (self.tx, self.rx) {
            (Some(tx), Some(rx)) => Ok((tx, rx)),
            _ => Err(NetError::Crypto(CryptoError::KeyExchangeIncomplete)),
        }
    }
}
