pub mod client;
pub mod errors;
pub mod info;
pub mod source;
pub mod status;

pub use client::Dremel3DPrinter;
pub use errors::PrinterError;
pub use info::PrinterInfo;
pub use source::PrinterStatusSource;
pub use status::{JobState, JobStatus};
