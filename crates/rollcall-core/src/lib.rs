//! rollcall-core — Face-recognition attendance logging.
//!
//! Matches detected faces against an enrolled gallery, debounces repeat
//! sightings with a per-identity cooldown, and appends `Present` rows to a
//! per-day CSV ledger. Face detection and embedding are supplied by a
//! [`FaceEmbedder`] implementation; frames by a [`FrameSource`].

pub mod config;
pub mod cooldown;
pub mod embedder;
pub mod enroll;
pub mod frame;
pub mod ledger;
pub mod matcher;
pub mod pipeline;
pub mod types;

pub use config::Config;
pub use cooldown::CooldownTracker;
pub use embedder::{EmbedError, FaceEmbedder};
pub use frame::{Frame, FrameSource};
pub use ledger::{AttendanceRecord, Ledger, LedgerError};
pub use matcher::{EuclideanMatcher, Matcher};
pub use pipeline::{FrameOutput, Orchestrator, PipelineError};
pub use types::{Annotation, Detection, Embedding, FaceBox, Gallery, Identity, MatchResult};
