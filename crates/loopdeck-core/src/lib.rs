//! Loopdeck Core - Multi-track loop playback and mixing engine
//!
//! The engine plays up to eight independently time-stretched audio loops,
//! drives a per-track step sequencer from the host transport, and hot-swaps
//! freshly loaded audio into live tracks without audible glitches. The GUI,
//! the network client that fetches generated loops, and the plugin shell are
//! external collaborators; this crate only consumes host transport snapshots
//! and MIDI, and produces the main mix plus per-track solo buses.

pub mod analysis;
pub mod engine;
pub mod error;
pub mod loader;
pub mod params;
pub mod session;
pub mod stretch;
pub mod track;
pub mod types;
pub mod voice;

pub use types::*;
