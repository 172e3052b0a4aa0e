//! Client-side audio plumbing: the per-source jitter rings and the mixer that
//! drains them into the playback device.

pub mod mixer;
pub mod ring;
