//! Fixed-layout frames of the block-grid protocol.
//!
//! Every frame starts with a one-byte opcode; the opcode alone determines the
//! frame length, so there is no length prefix. Multi-byte integers are
//! big-endian and strings are 64 ASCII bytes padded with spaces.
//!
//! Both directions are implemented here so the server and the probe client
//! share one definition of the layout.

use crate::block::Block;
use crate::position::Position;
use thiserror::Error;

/// Fixed length of every string field on the wire.
pub const STRING_LENGTH: usize = 64;

/// Payload bytes carried by every map chunk frame.
pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpCode(u8),
    #[error("opcode {0:?} is not valid in this direction")]
    WrongDirection(OpCode),
    #[error("truncated {opcode:?} frame: expected {expected} bytes, got {actual}")]
    Truncated {
        opcode: OpCode,
        expected: usize,
        actual: usize,
    },
    #[error("invalid map chunk length {0}")]
    InvalidChunkLength(i16),
    #[error("unknown block id {0}")]
    InvalidBlock(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Handshake = 0x00,
    Ping = 0x01,
    MapBegin = 0x02,
    MapChunk = 0x03,
    MapEnd = 0x04,
    SetBlockClient = 0x05,
    SetBlockServer = 0x06,
    AddEntity = 0x07,
    Teleport = 0x08,
    MoveRotate = 0x09,
    Move = 0x0A,
    Rotate = 0x0B,
    RemoveEntity = 0x0C,
    Message = 0x0D,
    Kick = 0x0E,
    SetPermission = 0x0F,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<OpCode, ProtocolError> {
        let opcode = match value {
            0x00 => OpCode::Handshake,
            0x01 => OpCode::Ping,
            0x02 => OpCode::MapBegin,
            0x03 => OpCode::MapChunk,
            0x04 => OpCode::MapEnd,
            0x05 => OpCode::SetBlockClient,
            0x06 => OpCode::SetBlockServer,
            0x07 => OpCode::AddEntity,
            0x08 => OpCode::Teleport,
            0x09 => OpCode::MoveRotate,
            0x0A => OpCode::Move,
            0x0B => OpCode::Rotate,
            0x0C => OpCode::RemoveEntity,
            0x0D => OpCode::Message,
            0x0E => OpCode::Kick,
            0x0F => OpCode::SetPermission,
            other => return Err(ProtocolError::UnknownOpCode(other)),
        };
        Ok(opcode)
    }

    /// Total frame length including the opcode byte.
    pub fn frame_size(self) -> usize {
        match self {
            OpCode::Handshake => 131,
            OpCode::Ping => 1,
            OpCode::MapBegin => 1,
            OpCode::MapChunk => 1028,
            OpCode::MapEnd => 7,
            OpCode::SetBlockClient => 9,
            OpCode::SetBlockServer => 8,
            OpCode::AddEntity => 74,
            OpCode::Teleport => 10,
            OpCode::MoveRotate => 7,
            OpCode::Move => 5,
            OpCode::Rotate => 4,
            OpCode::RemoveEntity => 2,
            OpCode::Message => 66,
            OpCode::Kick => 65,
            OpCode::SetPermission => 2,
        }
    }
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Handshake {
        protocol_version: u8,
        name: String,
        verification_key: String,
        magic: u8,
    },
    Ping,
    /// Coordinates use grid axes: `z` is height.
    SetBlock {
        x: i16,
        y: i16,
        z: i16,
        mode: u8,
        block: u8,
    },
    Teleport {
        player_id: u8,
        position: Position,
    },
    Message {
        unused: u8,
        text: String,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    Handshake {
        protocol_version: u8,
        server_name: String,
        motd: String,
        permission: u8,
    },
    Ping,
    MapBegin,
    /// `data` holds the meaningful bytes only; encoding pads it to
    /// [`CHUNK_SIZE`] with zeroes and reports `data.len()` in the size field.
    MapChunk {
        data: Vec<u8>,
        percent: u8,
    },
    MapEnd {
        width: i16,
        height: i16,
        length: i16,
    },
    SetBlock {
        x: i16,
        y: i16,
        z: i16,
        block: Block,
    },
    AddEntity {
        id: u8,
        name: String,
        position: Position,
    },
    Teleport {
        id: u8,
        position: Position,
    },
    RemoveEntity {
        id: u8,
    },
    Message {
        id: u8,
        text: String,
    },
    Kick {
        reason: String,
    },
    SetPermission {
        permission: u8,
    },
}

impl ClientPacket {
    pub fn opcode(&self) -> OpCode {
        match self {
            ClientPacket::Handshake { .. } => OpCode::Handshake,
            ClientPacket::Ping => OpCode::Ping,
            ClientPacket::SetBlock { .. } => OpCode::SetBlockClient,
            ClientPacket::Teleport { .. } => OpCode::Teleport,
            ClientPacket::Message { .. } => OpCode::Message,
        }
    }

    /// Frame length for an opcode a client may send.
    pub fn frame_size(opcode: u8) -> Result<usize, ProtocolError> {
        let opcode = OpCode::from_u8(opcode)?;
        match opcode {
            OpCode::Handshake
            | OpCode::Ping
            | OpCode::SetBlockClient
            | OpCode::Teleport
            | OpCode::Message => Ok(opcode.frame_size()),
            other => Err(ProtocolError::WrongDirection(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = FrameWriter::new(self.opcode());
        match self {
            ClientPacket::Handshake {
                protocol_version,
                name,
                verification_key,
                magic,
            } => {
                out.put_u8(*protocol_version);
                out.put_string(name);
                out.put_string(verification_key);
                out.put_u8(*magic);
            }
            ClientPacket::Ping => {}
            ClientPacket::SetBlock {
                x,
                y,
                z,
                mode,
                block,
            } => {
                out.put_i16(*x);
                out.put_i16(*z);
                out.put_i16(*y);
                out.put_u8(*mode);
                out.put_u8(*block);
            }
            ClientPacket::Teleport {
                player_id,
                position,
            } => {
                out.put_u8(*player_id);
                out.put_position(position);
            }
            ClientPacket::Message { unused, text } => {
                out.put_u8(*unused);
                out.put_string(text);
            }
        }
        out.finish()
    }

    /// Decodes one complete frame (opcode included).
    pub fn decode_frame(frame: &[u8]) -> Result<ClientPacket, ProtocolError> {
        let mut input = FrameReader::new(frame)?;
        let expected = ClientPacket::frame_size(input.opcode as u8)?;
        input.require(expected)?;
        let packet = match input.opcode {
            OpCode::Handshake => ClientPacket::Handshake {
                protocol_version: input.get_u8(),
                name: input.get_string(),
                verification_key: input.get_string(),
                magic: input.get_u8(),
            },
            OpCode::Ping => ClientPacket::Ping,
            OpCode::SetBlockClient => {
                let x = input.get_i16();
                let z = input.get_i16();
                let y = input.get_i16();
                ClientPacket::SetBlock {
                    x,
                    y,
                    z,
                    mode: input.get_u8(),
                    block: input.get_u8(),
                }
            }
            OpCode::Teleport => ClientPacket::Teleport {
                player_id: input.get_u8(),
                position: input.get_position(),
            },
            OpCode::Message => ClientPacket::Message {
                unused: input.get_u8(),
                text: input.get_string(),
            },
            other => return Err(ProtocolError::WrongDirection(other)),
        };
        Ok(packet)
    }

    /// Decodes the first frame in `buf`, returning it with the number of bytes
    /// consumed, or `None` when more bytes are needed.
    pub fn decode(buf: &[u8]) -> Result<Option<(ClientPacket, usize)>, ProtocolError> {
        let Some(&opcode) = buf.first() else {
            return Ok(None);
        };
        let size = ClientPacket::frame_size(opcode)?;
        if buf.len() < size {
            return Ok(None);
        }
        ClientPacket::decode_frame(&buf[..size]).map(|packet| Some((packet, size)))
    }
}

impl ServerPacket {
    pub fn opcode(&self) -> OpCode {
        match self {
            ServerPacket::Handshake { .. } => OpCode::Handshake,
            ServerPacket::Ping => OpCode::Ping,
            ServerPacket::MapBegin => OpCode::MapBegin,
            ServerPacket::MapChunk { .. } => OpCode::MapChunk,
            ServerPacket::MapEnd { .. } => OpCode::MapEnd,
            ServerPacket::SetBlock { .. } => OpCode::SetBlockServer,
            ServerPacket::AddEntity { .. } => OpCode::AddEntity,
            ServerPacket::Teleport { .. } => OpCode::Teleport,
            ServerPacket::RemoveEntity { .. } => OpCode::RemoveEntity,
            ServerPacket::Message { .. } => OpCode::Message,
            ServerPacket::Kick { .. } => OpCode::Kick,
            ServerPacket::SetPermission { .. } => OpCode::SetPermission,
        }
    }

    /// Frame length for an opcode the server may send.
    pub fn frame_size(opcode: u8) -> Result<usize, ProtocolError> {
        let opcode = OpCode::from_u8(opcode)?;
        match opcode {
            OpCode::SetBlockClient | OpCode::MoveRotate | OpCode::Move | OpCode::Rotate => {
                Err(ProtocolError::WrongDirection(opcode))
            }
            other => Ok(other.frame_size()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = FrameWriter::new(self.opcode());
        match self {
            ServerPacket::Handshake {
                protocol_version,
                server_name,
                motd,
                permission,
            } => {
                out.put_u8(*protocol_version);
                out.put_string(server_name);
                out.put_string(motd);
                out.put_u8(*permission);
            }
            ServerPacket::Ping | ServerPacket::MapBegin => {}
            ServerPacket::MapChunk { data, percent } => {
                let length = data.len().min(CHUNK_SIZE);
                out.put_i16(length as i16);
                out.put_bytes(&data[..length]);
                out.put_zeroes(CHUNK_SIZE - length);
                out.put_u8(*percent);
            }
            ServerPacket::MapEnd {
                width,
                height,
                length,
            } => {
                out.put_i16(*width);
                out.put_i16(*height);
                out.put_i16(*length);
            }
            ServerPacket::SetBlock { x, y, z, block } => {
                out.put_i16(*x);
                out.put_i16(*z);
                out.put_i16(*y);
                out.put_u8(block.id());
            }
            ServerPacket::AddEntity { id, name, position } => {
                out.put_u8(*id);
                out.put_string(name);
                out.put_position(position);
            }
            ServerPacket::Teleport { id, position } => {
                out.put_u8(*id);
                out.put_position(position);
            }
            ServerPacket::RemoveEntity { id } => out.put_u8(*id),
            ServerPacket::Message { id, text } => {
                out.put_u8(*id);
                out.put_string(text);
            }
            ServerPacket::Kick { reason } => out.put_string(reason),
            ServerPacket::SetPermission { permission } => out.put_u8(*permission),
        }
        out.finish()
    }

    /// Decodes one complete frame (opcode included).
    pub fn decode_frame(frame: &[u8]) -> Result<ServerPacket, ProtocolError> {
        let mut input = FrameReader::new(frame)?;
        let expected = ServerPacket::frame_size(input.opcode as u8)?;
        input.require(expected)?;
        let packet = match input.opcode {
            OpCode::Handshake => ServerPacket::Handshake {
                protocol_version: input.get_u8(),
                server_name: input.get_string(),
                motd: input.get_string(),
                permission: input.get_u8(),
            },
            OpCode::Ping => ServerPacket::Ping,
            OpCode::MapBegin => ServerPacket::MapBegin,
            OpCode::MapChunk => {
                let length = input.get_i16();
                if length < 0 || length as usize > CHUNK_SIZE {
                    return Err(ProtocolError::InvalidChunkLength(length));
                }
                let padded = input.get_bytes(CHUNK_SIZE);
                ServerPacket::MapChunk {
                    data: padded[..length as usize].to_vec(),
                    percent: input.get_u8(),
                }
            }
            OpCode::MapEnd => ServerPacket::MapEnd {
                width: input.get_i16(),
                height: input.get_i16(),
                length: input.get_i16(),
            },
            OpCode::SetBlockServer => {
                let x = input.get_i16();
                let z = input.get_i16();
                let y = input.get_i16();
                let raw = input.get_u8();
                let block = Block::from_id(raw).ok_or(ProtocolError::InvalidBlock(raw))?;
                ServerPacket::SetBlock { x, y, z, block }
            }
            OpCode::AddEntity => ServerPacket::AddEntity {
                id: input.get_u8(),
                name: input.get_string(),
                position: input.get_position(),
            },
            OpCode::Teleport => ServerPacket::Teleport {
                id: input.get_u8(),
                position: input.get_position(),
            },
            OpCode::RemoveEntity => ServerPacket::RemoveEntity { id: input.get_u8() },
            OpCode::Message => ServerPacket::Message {
                id: input.get_u8(),
                text: input.get_string(),
            },
            OpCode::Kick => ServerPacket::Kick {
                reason: input.get_string(),
            },
            OpCode::SetPermission => ServerPacket::SetPermission {
                permission: input.get_u8(),
            },
            other => return Err(ProtocolError::WrongDirection(other)),
        };
        Ok(packet)
    }

    /// Decodes the first frame in `buf`, returning it with the number of bytes
    /// consumed, or `None` when more bytes are needed.
    pub fn decode(buf: &[u8]) -> Result<Option<(ServerPacket, usize)>, ProtocolError> {
        let Some(&opcode) = buf.first() else {
            return Ok(None);
        };
        let size = ServerPacket::frame_size(opcode)?;
        if buf.len() < size {
            return Ok(None);
        }
        ServerPacket::decode_frame(&buf[..size]).map(|packet| Some((packet, size)))
    }
}

/// Pads or truncates `text` to a fixed-width ASCII field. Non-ASCII characters
/// become `?`.
pub fn encode_string(text: &str) -> [u8; STRING_LENGTH] {
    let mut field = [b' '; STRING_LENGTH];
    for (slot, ch) in field.iter_mut().zip(text.chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
    field
}

/// Reads a fixed-width field back, dropping the trailing padding.
pub fn decode_string(field: &[u8]) -> String {
    let text: String = field
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect();
    text.trim_end_matches(' ').to_string()
}

struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    fn new(opcode: OpCode) -> Self {
        let mut buf = Vec::with_capacity(opcode.frame_size());
        buf.push(opcode as u8);
        Self { buf }
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_string(&mut self, value: &str) {
        self.buf.extend_from_slice(&encode_string(value));
    }

    fn put_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    fn put_zeroes(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    fn put_position(&mut self, position: &Position) {
        self.put_i16(position.x);
        self.put_i16(position.z);
        self.put_i16(position.y);
        self.put_u8(position.r);
        self.put_u8(position.l);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct FrameReader<'a> {
    opcode: OpCode,
    frame: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let first = *frame.first().ok_or(ProtocolError::UnknownOpCode(0xFF))?;
        Ok(Self {
            opcode: OpCode::from_u8(first)?,
            frame,
            offset: 1,
        })
    }

    fn require(&self, expected: usize) -> Result<(), ProtocolError> {
        if self.frame.len() < expected {
            return Err(ProtocolError::Truncated {
                opcode: self.opcode,
                expected,
                actual: self.frame.len(),
            });
        }
        Ok(())
    }

    // Callers check the frame length up front with `require`.
    fn get_bytes(&mut self, count: usize) -> &'a [u8] {
        let bytes = &self.frame[self.offset..self.offset + count];
        self.offset += count;
        bytes
    }

    fn get_u8(&mut self) -> u8 {
        self.get_bytes(1)[0]
    }

    fn get_i16(&mut self) -> i16 {
        let bytes = self.get_bytes(2);
        i16::from_be_bytes([bytes[0], bytes[1]])
    }

    fn get_string(&mut self) -> String {
        decode_string(self.get_bytes(STRING_LENGTH))
    }

    fn get_position(&mut self) -> Position {
        let x = self.get_i16();
        let z = self.get_i16();
        let y = self.get_i16();
        Position {
            x,
            y,
            z,
            r: self.get_u8(),
            l: self.get_u8(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_sizes_match_opcode_table() {
        let position = Position::new(1, 2, 3);
        let packets = vec![
            ServerPacket::Handshake {
                protocol_version: 7,
                server_name: "name".into(),
                motd: "motd".into(),
                permission: 0x64,
            },
            ServerPacket::MapBegin,
            ServerPacket::MapChunk {
                data: vec![1, 2, 3],
                percent: 50,
            },
            ServerPacket::MapEnd {
                width: 16,
                height: 16,
                length: 16,
            },
            ServerPacket::SetBlock {
                x: 1,
                y: 2,
                z: 3,
                block: Block::Grass,
            },
            ServerPacket::AddEntity {
                id: 255,
                name: "me".into(),
                position,
            },
            ServerPacket::Teleport { id: 255, position },
            ServerPacket::RemoveEntity { id: 3 },
            ServerPacket::Message {
                id: 0,
                text: "hi".into(),
            },
            ServerPacket::Kick {
                reason: "bye".into(),
            },
            ServerPacket::SetPermission { permission: 0 },
        ];
        for packet in packets {
            assert_eq!(packet.encode().len(), packet.opcode().frame_size(), "{:?}", packet.opcode());
        }
    }

    #[test]
    fn test_set_block_client_wire_order() {
        // x, then height, then y
        let frame = [0x05, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x01, 0x03];
        let packet = ClientPacket::decode_frame(&frame).unwrap();
        assert_eq!(
            packet,
            ClientPacket::SetBlock {
                x: 1,
                z: 2,
                y: 3,
                mode: 1,
                block: 3,
            }
        );
    }

    #[test]
    fn test_set_block_server_is_big_endian() {
        let bytes = ServerPacket::SetBlock {
            x: 0x0102,
            y: 0x0304,
            z: 0x0506,
            block: Block::Dirt,
        }
        .encode();
        assert_eq!(bytes, vec![0x06, 0x01, 0x02, 0x05, 0x06, 0x03, 0x04, 0x03]);
    }

    #[test]
    fn test_string_padding_and_trimming() {
        let field = encode_string("Notch");
        assert_eq!(&field[..5], b"Notch");
        assert!(field[5..].iter().all(|&b| b == b' '));
        assert_eq!(decode_string(&field), "Notch");

        let long = "x".repeat(80);
        assert_eq!(decode_string(&encode_string(&long)).len(), STRING_LENGTH);
        assert_eq!(decode_string(&encode_string("é")), "?");
    }

    #[test]
    fn test_final_chunk_is_zero_padded() {
        let bytes = ServerPacket::MapChunk {
            data: vec![0xAA; 10],
            percent: 99,
        }
        .encode();
        assert_eq!(i16::from_be_bytes([bytes[1], bytes[2]]), 10);
        assert!(bytes[3..13].iter().all(|&b| b == 0xAA));
        assert!(bytes[13..3 + CHUNK_SIZE].iter().all(|&b| b == 0));
        assert_eq!(bytes[3 + CHUNK_SIZE], 99);

        match ServerPacket::decode_frame(&bytes).unwrap() {
            ServerPacket::MapChunk { data, percent } => {
                assert_eq!(data, vec![0xAA; 10]);
                assert_eq!(percent, 99);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let frame = ClientPacket::Message {
            unused: 0xFF,
            text: "hello".into(),
        }
        .encode();
        assert_eq!(ClientPacket::decode(&frame[..10]).unwrap(), None);
        assert_eq!(ClientPacket::decode(&[]).unwrap(), None);

        let mut two = frame.clone();
        two.extend_from_slice(&ClientPacket::Ping.encode());
        let (first, used) = ClientPacket::decode(&two).unwrap().unwrap();
        assert_eq!(used, frame.len());
        assert!(matches!(first, ClientPacket::Message { ref text, .. } if text == "hello"));
        let (second, _) = ClientPacket::decode(&two[used..]).unwrap().unwrap();
        assert_eq!(second, ClientPacket::Ping);
    }

    #[test]
    fn test_client_rejects_server_only_opcodes() {
        assert_eq!(
            ClientPacket::decode(&[0x02]),
            Err(ProtocolError::WrongDirection(OpCode::MapBegin))
        );
        assert_eq!(ClientPacket::decode(&[0x42]), Err(ProtocolError::UnknownOpCode(0x42)));
    }

    #[test]
    fn test_truncated_frame_is_reported() {
        let err = ClientPacket::decode_frame(&[0x05, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                opcode: OpCode::SetBlockClient,
                expected: 9,
                actual: 2,
            }
        );
    }

    #[test]
    fn test_handshake_fields() {
        let frame = ClientPacket::Handshake {
            protocol_version: 7,
            name: "Player1".into(),
            verification_key: "abc".into(),
            magic: 0x42,
        }
        .encode();
        assert_eq!(frame.len(), 131);
        match ClientPacket::decode_frame(&frame).unwrap() {
            ClientPacket::Handshake {
                protocol_version,
                name,
                verification_key,
                magic,
            } => {
                assert_eq!(protocol_version, 7);
                assert_eq!(name, "Player1");
                assert_eq!(verification_key, "abc");
                assert_eq!(magic, 0x42);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }
}
