pub mod frame;
pub mod framer;
pub mod queue;

pub use frame::{resample, rms, to_mono, AudioFrame};
pub use framer::{Framer, IncomingAudio};
pub use queue::{FrameQueue, PushOutcome};
