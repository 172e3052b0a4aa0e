#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Core protocol and runtime for glyphcast: the framed wire codec, the
//! authenticated record layer, the per-connection session threads, the server
//! hub and the client-side audio plumbing.

/// Wire protocol magic, first four bytes of every frame.
pub const MAGIC: u32 = 0xA5C1_1CA7;

/// Upper bound on a single packet body.
pub const MAX_PACKET_BODY: usize = 4 * 1024 * 1024;

pub use quartz::ClientId;

pub mod audio;
pub mod net;
pub mod pipeline;
