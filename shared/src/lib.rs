pub mod block;
pub mod map_transfer;
pub mod packet;
pub mod position;

pub use block::{Block, MAX_CUSTOM_BLOCK_TYPE, MAX_LEGAL_BLOCK_TYPE};
pub use map_transfer::{chunk_packets, compress_map, MapAssembler, MapTransferError};
pub use packet::{ClientPacket, OpCode, ProtocolError, ServerPacket, CHUNK_SIZE, STRING_LENGTH};
pub use position::{Position, UNITS_PER_BLOCK};

pub const PROTOCOL_VERSION: u8 = 7;

/// Magic byte a client sends in its handshake to advertise protocol extensions.
pub const EXTENSION_MAGIC: u8 = 0x42;

/// Handshake permission byte granting use of solid (admin) blocks.
pub const PERMISSION_OP: u8 = 0x64;
pub const PERMISSION_NORMAL: u8 = 0x00;

/// Entity id a client uses to refer to itself.
pub const SELF_ID: u8 = 255;

/// Chat colour escape character.
pub const COLOR_ESCAPE: char = '&';
