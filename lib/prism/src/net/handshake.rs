use crate::net::packet::{
    self, error_code, ErrorInfo, KeyExchangeBody, Packet, PacketType,
};
use crate::net::secure::{Role, RxCrypto, SessionCrypto, TxCrypto};
use crate::net::{CryptoError, NetError, NetResult, ProtocolError};
use quartz::crypto;
use quartz::identity::{IdentityKeys, KeyAllowList};
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeState {
    Init,
    KeyExchange,
    Authenticating,
    Ready,
    Failed(FailureCause),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureCause {
    Unauthorized,
    BadPassword,
    Timeout,
    Protocol,
    BadSignature,
    ServerKeyMismatch,
}

impl FailureCause {
    /// Wire code for the `ERROR` packet sent to the rejected peer.
    #[inline]
    pub fn error_code(self) -> u16 {
        match self {
            FailureCause::Unauthorized => error_code::UNAUTHORIZED,
            FailureCause::BadPassword => error_code::BAD_PASSWORD,
            FailureCause::Timeout => error_code::TIMEOUT,
            FailureCause::Protocol | FailureCause::BadSignature => error_code::PROTOCOL,
            FailureCause::ServerKeyMismatch => error_code::UNAUTHORIZED,
        }
    }

    #[inline]
    pub fn from_error_code(code: u16) -> FailureCause {
        match code {
            error_code::UNAUTHORIZED => FailureCause::Unauthorized,
            error_code::BAD_PASSWORD => FailureCause::BadPassword,
            error_code::TIMEOUT => FailureCause::Timeout,
            _ => FailureCause::Protocol,
        }
    }

    /// The single diagnostic word(s) printed to the user.
    #[inline]
    pub fn describe(self) -> &'static str {
        match self {
            FailureCause::Unauthorized => "unauthorized",
            FailureCause::BadPassword => "bad password",
            FailureCause::Timeout => "timeout",
            FailureCause::Protocol => "protocol violation",
            FailureCause::BadSignature => "bad signature",
            FailureCause::ServerKeyMismatch => "server key mismatch",
        }
    }

    fn as_error(self) -> NetError {
        match self {
            FailureCause::Unauthorized | FailureCause::ServerKeyMismatch => {
                NetError::Crypto(CryptoError::Unauthorized)
            }
            FailureCause::BadPassword => NetError::Crypto(CryptoError::BadPassword),
            FailureCause::BadSignature => NetError::Crypto(CryptoError::AuthFailed),
            FailureCause::Timeout => NetError::Timeout,
            FailureCause::Protocol => NetError::Protocol(ProtocolError::UnexpectedType),
        }
    }
}

/// Authentication material for one endpoint of a handshake.
#[derive(Clone)]
pub enum AuthConfig {
    PubKey {
        identity: IdentityKeys,
        /// Server side: the set of client identities allowed to connect. `None` admits
        /// any identity that proves possession of its key.
        allowlist: Option<KeyAllowList>,
        /// Client side: pinned server identity.
        expected_server: Option<[u8; 32]>,
    },
    Password(String),
}

/// One endpoint of the ordered handshake exchange. Both sides begin in `Init` and move
/// strictly forward; any unexpected packet parks the machine in `Failed` for good.
pub struct Handshake {
    role: Role,
    state: HandshakeState,
    crypto: SessionCrypto,
    allowlist: Option<KeyAllowList>,
    expected_server: Option<[u8; 32]>,
    peer_identity: Option<[u8; 32]>,
    challenge: [u8; packet::CHALLENGE_SIZE],
    deadline: Instant,
}

impl Handshake {
    pub fn new(role: Role, auth: AuthConfig, now: Instant, budget: Duration) -> NetResult<Handshake> {
        let (crypto, allowlist, expected_server) = match auth {
            AuthConfig::PubKey {
                identity,
                allowlist,
                expected_server,
            } => (SessionCrypto::new_pubkey(role, identity), allowlist, expected_server),
            AuthConfig::Password(password) => {
                (SessionCrypto::new_password(role, &password)?, None, None)
            }
        };

        Ok(Handshake {
            role,
            state: HandshakeState::Init,
            crypto,
            allowlist,
            expected_server,
            peer_identity: None,
            challenge: [0u8; packet::CHALLENGE_SIZE],
            deadline: now + budget,
        })
    }

    #[inline]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    #[inline]
    pub fn failure(&self) -> Option<FailureCause> {
        match self.state {
            HandshakeState::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    #[inline]
    pub fn peer_identity(&self) -> Option<&[u8; 32]> {
        self.peer_identity.as_ref()
    }

    /// The client's opening move. No-op on the server side.
    pub fn initial_packets(&mut self) -> NetResult<Vec<Packet>> {
        if self.role != Role::Client || self.state != HandshakeState::Init {
            return Ok(Vec::new());
        }

        let offer = self.key_exchange_body()?;
        self.state = HandshakeState::KeyExchange;

        Ok(vec![Packet::new(PacketType::PubKeyOffer, offer.encode())])
    }

    /// Marks the handshake failed when the wall-clock budget has run out.
    pub fn check_deadline(&mut self, now: Instant) -> NetResult<()> {
        match self.state {
            HandshakeState::Ready | HandshakeState::Failed(_) => Ok(()),
            _ if now >= self.deadline => Err(self.fail(FailureCause::Timeout)),
            _ => Ok(()),
        }
    }

    /// Consumes one handshake packet and produces the packets to send in response.
    pub fn advance(&mut self, incoming: &Packet, now: Instant) -> NetResult<Vec<Packet>> {
        if let HandshakeState::Failed(cause) = self.state {
            return Err(cause.as_error());
        }

        if now >= self.deadline {
            return Err(self.fail(FailureCause::Timeout));
        }

        match (self.state, self.role, incoming.ptype) {
            (HandshakeState::Init, Role::Server, PacketType::PubKeyOffer) => {
                self.server_take_offer(incoming)
            }
            (HandshakeState::KeyExchange, Role::Client, PacketType::PubKeyAccept) => {
                self.client_take_accept(incoming)
            }
            (HandshakeState::Authenticating, Role::Client, PacketType::AuthChallenge) => {
                self.client_take_challenge(incoming)
            }
            (HandshakeState::Authenticating, Role::Server, PacketType::AuthResponse) => {
                self.server_take_response(incoming)
            }
            (HandshakeState::Authenticating, Role::Client, PacketType::SessionReady) => {
                self.state = HandshakeState::Ready;
                Ok(Vec::new())
            }
            _ => Err(self.fail(FailureCause::Protocol)),
        }
    }

    /// Hands the completed crypto context over to the session threads.
    pub fn into_session(self) -> NetResult<(TxCrypto, RxCrypto, Option<[u8; 32]>)> {
        if self.state != HandshakeState::Ready {
            return Err(NetError::Crypto(CryptoError::KeyExchangeIncomplete));
        }

        let peer_identity = self.peer_identity;
        let (tx, rx) = self.crypto.into_record_halves()?;

        Ok((tx, rx, peer_identity))
    }

    fn fail(&mut self, cause: FailureCause) -> NetError {
        self.state = HandshakeState::Failed(cause);
        cause.as_error()
    }

    /// Builds this side's offer/accept body. In password mode the identity field
    /// carries the KDF salt and the signature stays zeroed.
    fn key_exchange_body(&self) -> NetResult<KeyExchangeBody> {
        let ephemeral = *self.crypto.ephemeral_public();

        if self.crypto.has_password() {
            let mut identity = [0u8; 32];
            identity[..crypto::PWHASH_SALT_SIZE].copy_from_slice(self.crypto.password_salt());

            return Ok(KeyExchangeBody {
                identity,
                ephemeral,
                signature: [0u8; 64],
            });
        }

        let identity_keys = self
            .crypto
            .identity()
            .ok_or(NetError::Crypto(CryptoError::KeyExchangeIncomplete))?;
        let identity = *identity_keys.public();

        let message = KeyExchangeBody::signed_message(&identity, &ephemeral, self.role.tag());
        let signature = identity_keys.sign(&message);

        Ok(KeyExchangeBody {
            identity,
            ephemeral,
            signature,
        })
    }

    fn server_take_offer(&mut self, incoming: &Packet) -> NetResult<Vec<Packet>> {
        let offer = match KeyExchangeBody::decode(&incoming.body) {
            Ok(offer) => offer,
            Err(_) => return Err(self.fail(FailureCause::Protocol)),
        };

        if !self.crypto.has_password() {
            let message = KeyExchangeBody::signed_message(
                &offer.identity,
                &offer.ephemeral,
                Role::Client.tag(),
            );
            if !crypto::sign_verify(&offer.signature, &message, &offer.identity) {
                return Err(self.fail(FailureCause::BadSignature));
            }

            if let Some(allowlist) = &self.allowlist {
                if !allowlist.contains(&offer.identity) {
                    return Err(self.fail(FailureCause::Unauthorized));
                }
            }

            self.peer_identity = Some(offer.identity);
        }

        if self.crypto.set_peer_ephemeral(&offer.ephemeral).is_err() {
            return Err(self.fail(FailureCause::BadSignature));
        }

        let accept = match self.key_exchange_body() {
            Ok(accept) => accept,
            Err(_) => return Err(self.fail(FailureCause::Protocol)),
        };

        crypto::random_bytes(&mut self.challenge);

        self.state = HandshakeState::Authenticating;

        Ok(vec![
            Packet::new(PacketType::PubKeyAccept, accept.encode()),
            Packet::new(PacketType::AuthChallenge, self.challenge.to_vec()),
        ])
    }

    fn client_take_accept(&mut self, incoming: &Packet) -> NetResult<Vec<Packet>> {
        let accept = match KeyExchangeBody::decode(&incoming.body) {
            Ok(accept) => accept,
            Err(_) => return Err(self.fail(FailureCause::Protocol)),
        };

        if self.crypto.has_password() {
            let mut salt = [0u8; crypto::PWHASH_SALT_SIZE];
            salt.copy_from_slice(&accept.identity[..crypto::PWHASH_SALT_SIZE]);

            if self.crypto.adopt_password_salt(&salt).is_err() {
                return Err(self.fail(FailureCause::BadPassword));
            }
        } else {
            if let Some(expected) = &self.expected_server {
                if !crypto::verify_32(expected, &accept.identity) {
                    return Err(self.fail(FailureCause::ServerKeyMismatch));
                }
            }

            let message = KeyExchangeBody::signed_message(
                &accept.identity,
                &accept.ephemeral,
                Role::Server.tag(),
            );
            if !crypto::sign_verify(&accept.signature, &message, &accept.identity) {
                return Err(self.fail(FailureCause::BadSignature));
            }

            self.peer_identity = Some(accept.identity);
        }

        if self.crypto.set_peer_ephemeral(&accept.ephemeral).is_err() {
            return Err(self.fail(FailureCause::BadSignature));
        }

        self.state = HandshakeState::Authenticating;
        Ok(Vec::new())
    }

    fn client_take_challenge(&mut self, incoming: &Packet) -> NetResult<Vec<Packet>> {
        let challenge = match packet::decode_challenge(&incoming.body) {
            Ok(challenge) => challenge,
            Err(_) => return Err(self.fail(FailureCause::Protocol)),
        };

        let response = if self.crypto.has_password() {
            match self.crypto.challenge_mac(&challenge) {
                Ok(mac) => mac,
                Err(_) => return Err(self.fail(FailureCause::BadPassword)),
            }
        } else {
            match self.crypto.identity() {
                Some(identity) => identity.sign(&challenge),
                None => return Err(self.fail(FailureCause::Protocol)),
            }
        };

        Ok(vec![Packet::new(PacketType::AuthResponse, response.to_vec())])
    }

    fn server_take_response(&mut self, incoming: &Packet) -> NetResult<Vec<Packet>> {
        let response = match packet::decode_auth_response(&incoming.body) {
            Ok(response) => response,
            Err(_) => return Err(self.fail(FailureCause::Protocol)),
        };

        if self.crypto.has_password() {
            if !self.crypto.verify_challenge_mac(&self.challenge, &response) {
                return Err(self.fail(FailureCause::BadPassword));
            }
        } else {
            let peer = match self.peer_identity {
                Some(peer) => peer,
                None => return Err(self.fail(FailureCause::Protocol)),
            };

            if !crypto::sign_verify(&response, &self.challenge, &peer) {
                return Err(self.fail(FailureCause::BadSignature));
            }
        }

        self.state = HandshakeState::Ready;
        Ok(vec![Packet::empty(PacketType::SessionReady)])
    }
}

/// The diagnostic packet sent to a rejected peer before the socket closes.
pub fn rejection_packet(cause: FailureCause) -> Packet {
    let info = ErrorInfo {
        code: cause.error_code(),
        message: cause.describe().to_string(),
    };

    Packet::new(PacketType::Error, packet::encode_error(&info))
}
