pub mod app;
pub mod builtin;
pub mod shutdown;

pub use app::{Application, ApplicationHandle};
pub use builtin::{DeadLetterReportJob, DedupSweepJob, DEAD_LETTER_REPORT_JOB, DEDUP_SWEEP_JOB};
pub use shutdown::ShutdownManager;
