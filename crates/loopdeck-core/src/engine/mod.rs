//! Audio engine - tracks, rendering, mixing, sequencing
//!
//! Components of the audio-side engine:
//! - TrackManager: slot-bound track collection
//! - renderer/master: per-track rendering and the main mix bus
//! - SequencerClock: host-PPQ-driven step sequencing
//! - LoopEngine: facade tying everything together per block

mod clock;
mod command;
mod engine;
pub mod gc;
mod manager;
mod master;
mod midi;
mod renderer;
mod swap;

pub use clock::*;
pub use command::*;
pub use engine::*;
pub use manager::*;
pub use master::*;
pub use midi::*;
pub use renderer::*;
pub use swap::*;
