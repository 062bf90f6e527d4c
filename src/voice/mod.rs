//! Voice processing module
//!
//! Audio capture, speech boundary detection, duplex codec streaming and
//! playback scheduling. Components report back through [`Emitter`] callbacks
//! that the session maps onto its event queue.

use std::sync::Arc;

pub mod capture;
pub mod clip;
pub mod codec;
pub mod duplex;
pub mod framing;
pub mod output;
pub mod playback;
pub mod vad;
pub mod wake_word;
pub mod wav;

pub use capture::{CpalMicrophone, FrameChunker, Microphone, SampleSink};
pub use clip::{ClipLoader, HttpClipLoader, StreamResampler};
pub use codec::{CodecBackend, CodecParams, FrameDecoder, FrameEncoder, UnsupportedBackend};
pub use duplex::{AudioFrame, DuplexAudioStreamer};
pub use framing::TaggedFrame;
pub use output::{AudioOutput, CpalOutput, Timeline, VoiceId};
pub use playback::{PlaybackEvent, PlaybackScheduler};
pub use vad::{
    BoundaryTracker, DeliveryGate, DetectorEvent, EnergyClassifier, SpeechBoundaryDetector,
    SpeechClassifier, SpeechSegment,
};
pub use wake_word::{WakeMatch, WakeWordMatcher};
pub use wav::{WavAudio, samples_to_wav, wav_to_samples};

/// Callback through which a component reports events, callable from any thread
pub type Emitter<E> = Arc<dyn Fn(E) + Send + Sync>;
