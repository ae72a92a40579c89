// Core queue engine - independent of any frontend

pub mod chunk;
pub mod dispatch;
pub mod fairness;
pub mod folder;
pub mod job;
pub mod nvenc;
pub mod probe;
pub mod process_ctl;
pub mod queue;
pub mod runner;
pub mod status;
pub mod watch;

pub use dispatch::Dispatcher;
pub use job::{CodecFamily, Job, JobKind, JobParams, JobStatus, Outcome, StatusSink, Trim};
pub use nvenc::NvencProber;
pub use runner::Runner;
