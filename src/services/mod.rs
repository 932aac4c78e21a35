//! Core services: probing, metadata interpretation, scanning, checkpoints,
//! duplicate detection and integrity checking.

pub mod checkpoint;
pub mod duplicates;
pub mod integrity;
pub mod metadata;
pub mod probe;
pub mod scanner;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use duplicates::{DuplicateDetector, DuplicateGroup, DuplicateMethod};
pub use integrity::{IntegrityChecker, IntegrityResult};
pub use metadata::{AudioCodec, ContainerFormat, HdrFormat, VideoCodec, VideoMetadata};
pub use probe::{ProbeError, ProbeRunner};
pub use scanner::{
    RecoveryInfo, ScanCompletion, ScanConfig, ScanEngine, ScanError, ScanLogEntry, ScanLogLevel,
    ScanProgress, ScanState,
};
