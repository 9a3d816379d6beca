pub mod buffer;
pub mod command;
pub mod decoder;
pub mod encoder;

pub use buffer::{FrameBuffer, READ_BUFFER_INIT_SIZE};
pub use command::Command;
pub use decoder::{
    DecodeError, MAX_BULK_SIZE, MAX_NUM_ARG, MAX_TELNET_LINE, ProtocolDecoder, ProtocolError,
};
pub use encoder::{Reply, ResponseEncoder, encode_command, serialize_frame};
