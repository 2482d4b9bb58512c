// Serial request channel
//
// Provides:
// - Byte framing of requests arriving over a serial link
// - A reader thread that decodes frames into a request queue

pub mod frame;
mod server;

pub use frame::{checksum, encode_request, FrameDecoder, Request, LEGACY_CHECKSUM, PREAMBLE};
pub use server::RequestServer;
