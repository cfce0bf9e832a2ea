//! Wire protocol shared between the browser extension and the host.
//!
//! The extension speaks the Chrome/Firefox native-messaging convention:
//! every message is a 4-byte little-endian length prefix followed by a
//! UTF-8 JSON payload, on stdin/stdout of the host process.

pub mod framing;
pub mod messages;

pub use framing::{read_frame, write_frame, write_message, FrameError, MAX_FRAME_LEN};
pub use messages::{ExtensionMessage, HostMessage, MessagePayload, Status, Task, STOP_SENTINEL};
