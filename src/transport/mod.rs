//! Transport layer: byte-stream framing for handshake lines and payloads.

pub mod frame;

pub use frame::{
    recv_exact, recv_frame, recv_line, send_frame, send_line, MAX_FRAME_SIZE, MAX_LINE_LENGTH,
};
