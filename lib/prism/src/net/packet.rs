use crate::net::{NetError, NetResult, ProtocolError};
use crate::ClientId;
use crate::MAX_PACKET_BODY;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use quartz::crypto;
use std::io::{Read, Write};

/// Media payload flag: the payload region holds a zlib stream.
pub const FLAG_COMPRESSED: u16 = 0x0001;

/// Role tags mixed into the offer/accept signatures.
pub const ROLE_TAG_CLIENT: u8 = 0x01;
pub const ROLE_TAG_SERVER: u8 = 0x02;

/// Fixed-size handshake body lengths.
pub const KEY_BODY_SIZE: usize = 32 + 32 + 64;
pub const CHALLENGE_SIZE: usize = 32;
pub const AUTH_RESPONSE_SIZE: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PacketType {
    Hello,
    Ping,
    Pong,
    Bye,
    Error,
    AsciiFrame,
    ImageFrame,
    AudioFrame,
    PubKeyOffer,
    PubKeyAccept,
    AuthChallenge,
    AuthResponse,
    SessionReady,
    EncryptedEnvelope,
    Join,
    Leave,
    Roster,
    Unknown(u16),
}

impl PacketType {
    #[inline]
    pub fn code(self) -> u16 {
        match self {
            PacketType::Hello => 0x0001,
            PacketType::Ping => 0x0002,
            PacketType::Pong => 0x0003,
            PacketType::Bye => 0x0004,
            PacketType::Error => 0x0005,
            PacketType::AsciiFrame => 0x0010,
            PacketType::ImageFrame => 0x0011,
            PacketType::AudioFrame => 0x0012,
            PacketType::PubKeyOffer => 0x0020,
            PacketType::PubKeyAccept => 0x0021,
            PacketType::AuthChallenge => 0x0022,
            PacketType::AuthResponse => 0x0023,
            PacketType::SessionReady => 0x0024,
            PacketType::EncryptedEnvelope => 0x0025,
            PacketType::Join => 0x0030,
            PacketType::Leave => 0x0031,
            PacketType::Roster => 0x0032,
            PacketType::Unknown(code) => code,
        }
    }

    #[inline]
    pub fn from_code(code: u16) -> PacketType {
        match code {
            0x0001 => PacketType::Hello,
            0x0002 => PacketType::Ping,
            0x0003 => PacketType::Pong,
            0x0004 => PacketType::Bye,
            0x0005 => PacketType::Error,
            0x0010 => PacketType::AsciiFrame,
            0x0011 => PacketType::ImageFrame,
            0x0012 => PacketType::AudioFrame,
            0x0020 => PacketType::PubKeyOffer,
            0x0021 => PacketType::PubKeyAccept,
            0x0022 => PacketType::AuthChallenge,
            0x0023 => PacketType::AuthResponse,
            0x0024 => PacketType::SessionReady,
            0x0025 => PacketType::EncryptedEnvelope,
            0x0030 => PacketType::Join,
            0x0031 => PacketType::Leave,
            0x0032 => PacketType::Roster,
            other => PacketType::Unknown(other),
        }
    }

    #[inline]
    pub fn is_media(self) -> bool {
        matches!(
            self,
            PacketType::AsciiFrame | PacketType::ImageFrame | PacketType::AudioFrame
        )
    }

    #[inline]
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            PacketType::PubKeyOffer
                | PacketType::PubKeyAccept
                | PacketType::AuthChallenge
                | PacketType::AuthResponse
                | PacketType::SessionReady
        )
    }
}

/// A decoded wire packet: the type tag and the raw body bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub ptype: PacketType,
    pub body: Vec<u8>,
}

impl Packet {
    #[inline]
    pub fn new(ptype: PacketType, body: Vec<u8>) -> Packet {
        Packet { ptype, body }
    }

    #[inline]
    pub fn empty(ptype: PacketType) -> Packet {
        Packet {
            ptype,
            body: Vec::new(),
        }
    }
}

fn malformed<T>() -> NetResult<T> {
    Err(NetError::Protocol(ProtocolError::Malformed))
}

// ---------------------------------------------------------------------------
// Media bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiFrame {
    pub width: u16,
    pub height: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub width: u16,
    pub height: u16,
    pub pixel_format: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub seq: u64,
    pub samples: Vec<f32>,
}

fn deflate(payload: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).ok()?;
    encoder.finish().ok()
}

fn inflate(compressed: &[u8], expected_len: usize) -> NetResult<Vec<u8>> {
    if expected_len > MAX_PACKET_BODY {
        return Err(NetError::Protocol(ProtocolError::DecompressFailed));
    }

    let mut decoder = ZlibDecoder::new(compressed).take(expected_len as u64 + 1);
    let mut payload = Vec::with_capacity(expected_len);

    decoder
        .read_to_end(&mut payload)
        .map_err(|_| NetError::Protocol(ProtocolError::DecompressFailed))?;

    if payload.len() != expected_len {
        return Err(NetError::Protocol(ProtocolError::DecompressFailed));
    }

    Ok(payload)
}

/// Applies the wire compression policy: the compressed form is used only when it is at
/// most 80% of the original size. Returns the flags and the payload region.
fn compression_policy(payload: &[u8]) -> (u16, u32, Vec<u8>) {
    if let Some(compressed) = deflate(payload) {
        if compressed.len() * 5 <= payload.len() * 4 {
            let compressed_len = compressed.len() as u32;
            return (FLAG_COMPRESSED, compressed_len, compressed);
        }
    }

    (0, payload.len() as u32, payload.to_vec())
}

pub fn encode_ascii_frame(width: u16, height: u16, payload: &[u8]) -> Vec<u8> {
    let (flags, compressed_len, region) = compression_policy(payload);

    let mut body = Vec::with_capacity(14 + region.len());
    body.write_u16::<BigEndian>(width).unwrap();
    body.write_u16::<BigEndian>(height).unwrap();
    body.write_u16::<BigEndian>(flags).unwrap();
    body.write_u32::<BigEndian>(compressed_len).unwrap();
    body.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    body.extend_from_slice(&region);

    body
}

pub fn decode_ascii_frame(body: &[u8]) -> NetResult<AsciiFrame> {
    let mut cursor = body;

    if body.len() < 14 {
        return malformed();
    }

    let width = cursor.read_u16::<BigEndian>()?;
    let height = cursor.read_u16::<BigEndian>()?;
    let flags = cursor.read_u16::<BigEndian>()?;
    let compressed_len = cursor.read_u32::<BigEndian>()? as usize;
    let uncompressed_len = cursor.read_u32::<BigEndian>()? as usize;

    let payload = decode_media_payload(cursor, flags, compressed_len, uncompressed_len)?;

    Ok(AsciiFrame {
        width,
        height,
        payload,
    })
}

pub fn encode_image_frame(width: u16, height: u16, pixel_format: u32, payload: &[u8]) -> Vec<u8> {
    let (flags, compressed_len, region) = compression_policy(payload);

    let mut body = Vec::with_capacity(18 + region.len());
    body.write_u16::<BigEndian>(width).unwrap();
    body.write_u16::<BigEndian>(height).unwrap();
    body.write_u16::<BigEndian>(flags).unwrap();
    body.write_u32::<BigEndian>(compressed_len).unwrap();
    body.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    body.write_u32::<BigEndian>(pixel_format).unwrap();
    body.extend_from_slice(&region);

    body
}

pub fn decode_image_frame(body: &[u8]) -> NetResult<ImageFrame> {
    let mut cursor = body;

    if body.len() < 18 {
        return malformed();
    }

    let width = cursor.read_u16::<BigEndian>()?;
    let height = cursor.read_u16::<BigEndian>()?;
    let flags = cursor.read_u16::<BigEndian>()?;
    let compressed_len = cursor.read_u32::<BigEndian>()? as usize;
    let uncompressed_len = cursor.read_u32::<BigEndian>()? as usize;
    let pixel_format = cursor.read_u32::<BigEndian>()?;

    let payload = decode_media_payload(cursor, flags, compressed_len, uncompressed_len)?;

    Ok(ImageFrame {
        width,
        height,
        pixel_format,
        payload,
    })
}

fn decode_media_payload(
    region: &[u8],
    flags: u16,
    compressed_len: usize,
    uncompressed_len: usize,
) -> NetResult<Vec<u8>> {
    if region.len() != compressed_len {
        return malformed();
    }

    if flags & FLAG_COMPRESSED != 0 {
        inflate(region, uncompressed_len)
    } else {
        if compressed_len != uncompressed_len {
            return malformed();
        }
        Ok(region.to_vec())
    }
}

pub fn encode_audio_frame(seq: u64, samples: &[f32]) -> Vec<u8> {
    let mut body = Vec::with_capacity(12 + samples.len() * 4);
    body.write_u64::<BigEndian>(seq).unwrap();
    body.write_u32::<BigEndian>(samples.len() as u32).unwrap();

    for sample in samples {
        body.write_u32::<BigEndian>(sample.to_bits()).unwrap();
    }

    body
}

pub fn decode_audio_frame(body: &[u8]) -> NetResult<AudioFrame> {
    let mut cursor = body;

    if body.len() < 12 {
        return malformed();
    }

    let seq = cursor.read_u64::<BigEndian>()?;
    let count = cursor.read_u32::<BigEndian>()? as usize;

    if cursor.len() != count * 4 {
        return malformed();
    }

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        samples.push(f32::from_bits(cursor.read_u32::<BigEndian>()?));
    }

    Ok(AudioFrame { seq, samples })
}

// ---------------------------------------------------------------------------
// Handshake bodies
// ---------------------------------------------------------------------------

/// Body of `PUBKEY_OFFER` and `PUBKEY_ACCEPT`. In password mode the identity field
/// carries the password KDF salt (zero padded) and the signature is all zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangeBody {
    pub identity: [u8; 32],
    pub ephemeral: [u8; 32],
    pub signature: [u8; 64],
}

impl KeyExchangeBody {
    /// The byte string the offer/accept signature covers.
    pub fn signed_message(identity: &[u8; 32], ephemeral: &[u8; 32], role_tag: u8) -> Vec<u8> {
        let mut message = Vec::with_capacity(65);
        message.extend_from_slice(identity);
        message.extend_from_slice(ephemeral);
        message.push(role_tag);
        message
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(KEY_BODY_SIZE);
        body.extend_from_slice(&self.identity);
        body.extend_from_slice(&self.ephemeral);
        body.extend_from_slice(&self.signature);
        body
    }

    pub fn decode(body: &[u8]) -> NetResult<KeyExchangeBody> {
        if body.len() != KEY_BODY_SIZE {
            return malformed();
        }

        let mut decoded = KeyExchangeBody {
            identity: [0u8; 32],
            ephemeral: [0u8; 32],
            signature: [0u8; 64],
        };

        decoded.identity.copy_from_slice(&body[..32]);
        decoded.ephemeral.copy_from_slice(&body[32..64]);
        decoded.signature.copy_from_slice(&body[64..]);

        Ok(decoded)
    }
}

pub fn decode_challenge(body: &[u8]) -> NetResult<[u8; CHALLENGE_SIZE]> {
    if body.len() != CHALLENGE_SIZE {
        return malformed();
    }

    let mut challenge = [0u8; CHALLENGE_SIZE];
    challenge.copy_from_slice(body);
    Ok(challenge)
}

pub fn decode_auth_response(body: &[u8]) -> NetResult<[u8; AUTH_RESPONSE_SIZE]> {
    if body.len() != AUTH_RESPONSE_SIZE {
        return malformed();
    }

    let mut response = [0u8; AUTH_RESPONSE_SIZE];
    response.copy_from_slice(body);
    Ok(response)
}

// ---------------------------------------------------------------------------
// Control bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub proto: u16,
    pub name: String,
}

pub fn encode_hello(hello: &Hello) -> Vec<u8> {
    let name = hello.name.as_bytes();

    let mut body = Vec::with_capacity(4 + name.len());
    body.write_u16::<BigEndian>(hello.proto).unwrap();
    body.write_u16::<BigEndian>(name.len() as u16).unwrap();
    body.extend_from_slice(name);
    body
}

pub fn decode_hello(body: &[u8]) -> NetResult<Hello> {
    let mut cursor = body;

    if body.len() < 4 {
        return malformed();
    }

    let proto = cursor.read_u16::<BigEndian>()?;
    let name_len = cursor.read_u16::<BigEndian>()? as usize;

    if cursor.len() != name_len {
        return malformed();
    }

    let name = std::str::from_utf8(cursor)
        .map_err(|_| NetError::Protocol(ProtocolError::Malformed))?
        .to_string();

    Ok(Hello { proto, name })
}

/// Failure codes carried by `ERROR` packets so a rejected peer can report the cause.
pub mod error_code {
    pub const UNAUTHORIZED: u16 = 1;
    pub const BAD_PASSWORD: u16 = 2;
    pub const TIMEOUT: u16 = 3;
    pub const PROTOCOL: u16 = 4;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: u16,
    pub message: String,
}

pub fn encode_error(info: &ErrorInfo) -> Vec<u8> {
    let message = info.message.as_bytes();

    let mut body = Vec::with_capacity(4 + message.len());
    body.write_u16::<BigEndian>(info.code).unwrap();
    body.write_u16::<BigEndian>(message.len() as u16).unwrap();
    body.extend_from_slice(message);
    body
}

pub fn decode_error(body: &[u8]) -> NetResult<ErrorInfo> {
    let mut cursor = body;

    if body.len() < 4 {
        return malformed();
    }

    let code = cursor.read_u16::<BigEndian>()?;
    let message_len = cursor.read_u16::<BigEndian>()? as usize;

    if cursor.len() != message_len {
        return malformed();
    }

    let message = String::from_utf8_lossy(cursor).to_string();

    Ok(ErrorInfo { code, message })
}

/// Builds a `PING`/`PONG` body around a random echo nonce.
pub fn encode_ping_nonce(nonce: u64) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.write_u64::<BigEndian>(nonce).unwrap();
    body
}

pub fn decode_ping_nonce(body: &[u8]) -> NetResult<u64> {
    let mut cursor = body;

    if body.len() != 8 {
        return malformed();
    }

    Ok(cursor.read_u64::<BigEndian>()?)
}

pub fn fresh_ping_nonce() -> u64 {
    let mut bytes = [0u8; 8];
    crypto::random_bytes(&mut bytes);
    u64::from_be_bytes(bytes)
}

// ---------------------------------------------------------------------------
// Membership bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMember {
    pub id: ClientId,
    pub identity: [u8; 32],
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub generation: u64,
    pub members: Vec<RosterMember>,
}

pub fn encode_roster(roster: &Roster) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u64::<BigEndian>(roster.generation).unwrap();
    body.write_u16::<BigEndian>(roster.members.len() as u16).unwrap();

    for member in &roster.members {
        body.write_u32::<BigEndian>(member.id).unwrap();
        body.extend_from_slice(&member.identity);
        let name = member.name.as_bytes();
        body.write_u16::<BigEndian>(name.len() as u16).unwrap();
        body.extend_from_slice(name);
    }

    body
}

pub fn decode_roster(body: &[u8]) -> NetResult<Roster> {
    let mut cursor = body;

    if body.len() < 10 {
        return malformed();
    }

    let generation = cursor.read_u64::<BigEndian>()?;
    let count = cursor.read_u16::<BigEndian>()? as usize;

    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let id = cursor.read_u32::<BigEndian>().or_else(|_| malformed())?;

        if cursor.len() < 34 {
            return malformed();
        }
        let mut identity = [0u8; 32];
        identity.copy_from_slice(&cursor[..32]);
        cursor = &cursor[32..];

        let name_len = cursor.read_u16::<BigEndian>()? as usize;
        if cursor.len() < name_len {
            return malformed();
        }
        let name = String::from_utf8_lossy(&cursor[..name_len]).to_string();
        cursor = &cursor[name_len..];

        members.push(RosterMember { id, identity, name });
    }

    if !cursor.is_empty() {
        return malformed();
    }

    Ok(Roster {
        generation,
        members,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub id: ClientId,
    pub identity: [u8; 32],
    pub name: String,
}

pub fn encode_join(join: &Join) -> Vec<u8> {
    let name = join.name.as_bytes();

    let mut body = Vec::with_capacity(38 + name.len());
    body.write_u32::<BigEndian>(join.id).unwrap();
    body.extend_from_slice(&join.identity);
    body.write_u16::<BigEndian>(name.len() as u16).unwrap();
    body.extend_from_slice(name);
    body
}

pub fn decode_join(body: &[u8]) -> NetResult<Join> {
    let mut cursor = body;

    if body.len() < 38 {
        return malformed();
    }

    let id = cursor.read_u32::<BigEndian>()?;

    let mut identity = [0u8; 32];
    identity.copy_from_slice(&cursor[..32]);
    cursor = &cursor[32..];

    let name_len = cursor.read_u16::<BigEndian>()? as usize;
    if cursor.len() != name_len {
        return malformed();
    }
    let name = String::from_utf8_lossy(cursor).to_string();

    Ok(Join { id, identity, name })
}

pub fn encode_leave(id: ClientId) -> Vec<u8> {
    let mut body = Vec::with_capacity(4);
    body.write_u32::<BigEndian>(id).unwrap();
    body
}

pub fn decode_leave(body: &[u8]) -> NetResult<ClientId> {
    let mut cursor = body;

    if body.len() != 4 {
        return malformed();
    }

    Ok(cursor.read_u32::<BigEndian>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_code_roundtrip() {
        let types = [
            PacketType::Hello,
            PacketType::Ping,
            PacketType::Pong,
            PacketType::Bye,
            PacketType::Error,
            PacketType::AsciiFrame,
            PacketType::ImageFrame,
            PacketType::AudioFrame,
            PacketType::PubKeyOffer,
            PacketType::PubKeyAccept,
            PacketType::AuthChallenge,
            PacketType::AuthResponse,
            PacketType::SessionReady,
            PacketType::EncryptedEnvelope,
            PacketType::Join,
            PacketType::Leave,
            PacketType::Roster,
        ];

        for ptype in &types {
            assert_eq!(PacketType::from_code(ptype.code()), *ptype);
        }

        assert_eq!(PacketType::from_code(0x7FFF), PacketType::Unknown(0x7FFF));
    }

    #[test]
    fn test_ascii_frame_compressible_payload() {
        // Highly repetitive payload compresses far below the 80% threshold.
        let payload = vec![b'#'; 4096];
        let body = encode_ascii_frame(80, 24, &payload);

        let mut cursor = &body[4..6];
        let flags = cursor.read_u16::<BigEndian>().unwrap();
        assert_ne!(flags & FLAG_COMPRESSED, 0);
        assert!(body.len() < payload.len());

        let decoded = decode_ascii_frame(&body).unwrap();
        assert_eq!(decoded.width, 80);
        assert_eq!(decoded.height, 24);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_ascii_frame_incompressible_payload_stays_raw() {
        let mut payload = vec![0u8; 2048];
        quartz::crypto::random_bytes(&mut payload);

        let body = encode_ascii_frame(64, 18, &payload);

        let mut cursor = &body[4..6];
        let flags = cursor.read_u16::<BigEndian>().unwrap();
        assert_eq!(flags & FLAG_COMPRESSED, 0);

        let decoded = decode_ascii_frame(&body).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_ascii_frame_truncated_rejected() {
        let body = encode_ascii_frame(10, 10, b"0123456789");
        let result = decode_ascii_frame(&body[..body.len() - 1]);

        assert_eq!(result.unwrap_err(), NetError::Protocol(ProtocolError::Malformed));
    }

    #[test]
    fn test_ascii_frame_corrupt_zlib_rejected() {
        let payload = vec![b'@'; 4096];
        let mut body = encode_ascii_frame(80, 24, &payload);

        // Wreck the zlib header.
        body[14] ^= 0xFF;
        body[15] ^= 0xFF;

        let result = decode_ascii_frame(&body);
        assert_eq!(
            result.unwrap_err(),
            NetError::Protocol(ProtocolError::DecompressFailed)
        );
    }

    #[test]
    fn test_image_frame_roundtrip_keeps_pixel_format() {
        let payload = vec![7u8; 300];
        let body = encode_image_frame(16, 16, 0xDEAD_BEEF, &payload);

        let decoded = decode_image_frame(&body).unwrap();
        assert_eq!(decoded.pixel_format, 0xDEAD_BEEF);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_audio_frame_roundtrip() {
        let samples: Vec<f32> = (0..960).map(|idx| (idx as f32 / 960.0) - 0.5).collect();
        let body = encode_audio_frame(41, &samples);

        let decoded = decode_audio_frame(&body).unwrap();
        assert_eq!(decoded.seq, 41);
        assert_eq!(decoded.samples, samples);
    }

    #[test]
    fn test_audio_frame_length_mismatch_rejected() {
        let body = encode_audio_frame(1, &[0.0, 0.5, -0.5]);
        let result = decode_audio_frame(&body[..body.len() - 2]);

        assert_eq!(result.unwrap_err(), NetError::Protocol(ProtocolError::Malformed));
    }

    #[test]
    fn test_key_exchange_body_roundtrip() {
        let body = KeyExchangeBody {
            identity: [1u8; 32],
            ephemeral: [2u8; 32],
            signature: [3u8; 64],
        };

        let decoded = KeyExchangeBody::decode(&body.encode()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_hello_roundtrip() {
        let hello = Hello {
            proto: 1,
            name: "ada".to_string(),
        };

        assert_eq!(decode_hello(&encode_hello(&hello)).unwrap(), hello);
    }

    #[test]
    fn test_hello_rejects_invalid_utf8() {
        let mut body = encode_hello(&Hello {
            proto: 1,
            name: "abc".to_string(),
        });
        let len = body.len();
        body[len - 1] = 0xFF;

        assert_eq!(
            decode_hello(&body).unwrap_err(),
            NetError::Protocol(ProtocolError::Malformed)
        );
    }

    #[test]
    fn test_roster_roundtrip() {
        let roster = Roster {
            generation: 9,
            members: vec![
                RosterMember {
                    id: 1,
                    identity: [0xAA; 32],
                    name: "ada".to_string(),
                },
                RosterMember {
                    id: 2,
                    identity: [0xBB; 32],
                    name: "grace".to_string(),
                },
            ],
        };

        assert_eq!(decode_roster(&encode_roster(&roster)).unwrap(), roster);
    }

    #[test]
    fn test_roster_trailing_bytes_rejected() {
        let roster = Roster {
            generation: 1,
            members: Vec::new(),
        };

        let mut body = encode_roster(&roster);
        body.push(0);

        assert_eq!(
            decode_roster(&body).unwrap_err(),
            NetError::Protocol(ProtocolError::Malformed)
        );
    }

    #[test]
    fn test_join_leave_roundtrip() {
        let join = Join {
            id: 77,
            identity: [5u8; 32],
            name: "kay".to_string(),
        };

        assert_eq!(decode_join(&encode_join(&join)).unwrap(), join);
        assert_eq!(decode_leave(&encode_leave(77)).unwrap(), 77);
    }

    #[test]
    fn test_ping_nonce_roundtrip() {
        let nonce = fresh_ping_nonce();
        assert_eq!(decode_ping_nonce(&encode_ping_nonce(nonce)).unwrap(), nonce);
    }

    #[test]
    fn test_error_roundtrip() {
        let info = ErrorInfo {
            code: error_code::UNAUTHORIZED,
            message: "unauthorized".to_string(),
        };

        assert_eq!(decode_error(&encode_error(&info)).unwrap(), info);
    }
}
