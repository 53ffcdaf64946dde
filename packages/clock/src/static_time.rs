//! The time when the application started, kept as a process-wide static so
//! the stopped clock can be reset to it.
use std::time::SystemTime;

lazy_static! {
    /// The time at the start of the application.
    pub static ref TIME_AT_APP_START: SystemTime = SystemTime::now();
}
