use crate::net::buffer::Buffer;
use crate::net::packet::{Packet, PacketType};
use crate::net::{NetError, NetResult, ProtocolError};
use crate::ClientId;
use crate::{MAGIC, MAX_PACKET_BODY};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Frame header: magic (4) + type (2) + length (4) + crc32c (4).
pub const HEADER_SIZE: usize = 14;

/// Frames a packet body for the wire. Fails only when the body exceeds the
/// protocol maximum.
pub fn encode(ptype: PacketType, body: &[u8]) -> NetResult<Vec<u8>> {
    if body.len() > MAX_PACKET_BODY {
        return Err(NetError::Protocol(ProtocolError::LengthExceeded));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.write_u32::<BigEndian>(MAGIC).unwrap();
    frame.write_u16::<BigEndian>(ptype.code()).unwrap();
    frame.write_u32::<BigEndian>(body.len() as u32).unwrap();
    frame.write_u32::<BigEndian>(crc32c::crc32c(body)).unwrap();
    frame.extend_from_slice(body);

    Ok(frame)
}

#[inline]
pub fn encode_packet(packet: &Packet) -> NetResult<Vec<u8>> {
    encode(packet.ptype, &packet.body)
}

/// Parses one packet off the stream buffer. Returns `Wait` until a whole frame is
/// available; consumes the frame bytes on success. Unrecognized type codes decode to
/// `PacketType::Unknown` so the caller may ignore rather than disconnect.
pub fn decode_next(buffer: &mut Buffer) -> NetResult<Packet> {
    let stream = buffer.as_slice();

    if stream.len() < HEADER_SIZE {
        return Err(NetError::Wait);
    }

    let mut header = &stream[..HEADER_SIZE];
    let magic = header.read_u32::<BigEndian>()?;
    let type_code = header.read_u16::<BigEndian>()?;
    let length = header.read_u32::<BigEndian>()? as usize;
    let crc = header.read_u32::<BigEndian>()?;

    if magic != MAGIC {
        return Err(NetError::Protocol(ProtocolError::MagicMismatch));
    }

    if length > MAX_PACKET_BODY {
        return Err(NetError::Protocol(ProtocolError::LengthExceeded));
    }

    if stream.len() < HEADER_SIZE + length {
        return Err(NetError::Wait);
    }

    let body = &stream[HEADER_SIZE..HEADER_SIZE + length];

    if crc32c::crc32c(body) != crc {
        return Err(NetError::Protocol(ProtocolError::CrcMismatch));
    }

    let packet = Packet::new(PacketType::from_code(type_code), body.to_vec());
    buffer.consume(HEADER_SIZE + length);

    Ok(packet)
}

/// Decodes a packet from a standalone byte string (a decrypted envelope plaintext).
pub fn decode_frame(bytes: &[u8]) -> NetResult<Packet> {
    let mut buffer = Buffer::new(bytes.len().max(HEADER_SIZE));
    buffer
        .extend(bytes)
        .map_err(|_| NetError::Protocol(ProtocolError::LengthExceeded))?;

    let packet = decode_next(&mut buffer)?;

    if !buffer.is_empty() {
        return Err(NetError::Protocol(ProtocolError::Malformed));
    }

    Ok(packet)
}

/// Record-layer plaintext: the hub's source stamp followed by the framed inner packet.
/// Clients always send source 0; the hub rewrites the stamp when fanning out.
pub fn encode_routed(source: ClientId, packet: &Packet) -> NetResult<Vec<u8>> {
    let framed = encode_packet(packet)?;

    let mut routed = Vec::with_capacity(4 + framed.len());
    routed.write_u32::<BigEndian>(source).unwrap();
    routed.extend_from_slice(&framed);

    Ok(routed)
}

pub fn decode_routed(plain: &[u8]) -> NetResult<(ClientId, Packet)> {
    if plain.len() < 4 + HEADER_SIZE {
        return Err(NetError::Protocol(ProtocolError::Malformed));
    }

    let mut cursor = &plain[..4];
    let source = cursor.read_u32::<BigEndian>()?;

    let packet = decode_frame(&plain[4..])?;

    Ok((source, packet))
}
