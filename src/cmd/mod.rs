//! CLI command implementations.
//!
//! | Module    | Commands handled                        |
//! |-----------|------------------------------------------|
//! | `watch`   | `Watch`, `Start`                         |
//! | `control` | `State`, `Pause`, `Resume`, `Cancel`     |

pub mod control;
pub mod watch;

pub use control::{cmd_cancel, cmd_pause, cmd_resume, cmd_state};
pub use watch::{cmd_start, cmd_watch};
