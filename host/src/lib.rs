//! The native-messaging host daemon: stdin/stdout relay, outbound writer,
//! and the backend process supervisor.

pub mod relay;
pub mod supervisor;
