pub mod builders;
pub mod fakes;

pub use builders::{SpecBuilder, StepBuilder, TestSpec, TestStep};
pub use fakes::{
    FakeEngine, MemoryStreamer, RecordingReporter, RecordingUploader, ReportEvent, StepScript,
};
