//! Application-level orchestration.
//!
//! This module owns the session lifecycle (server, profiler, load, report) and
//! post-session processing such as exports. The CLI layer calls into this
//! module and renders the events it emits.

mod post_process;
mod session;
mod toolchain;

pub(crate) use post_process::process_session_completion;
pub(crate) use session::Session;
