//! Setup for the crawler application: configuration resolution and logging
//! initialization. The pieces here only build dependencies; nothing is
//! started. Starting happens in [`app`](crate::app).
pub mod config;
pub mod logging;
