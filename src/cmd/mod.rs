//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module  | Commands handled      |
//! |---------|-----------------------|
//! | `run`   | `Start`, `Resume`     |
//! | `story` | `Status`, `Stop`      |

pub mod run;
pub mod story;

pub use run::{cmd_resume, cmd_start};
pub use story::{cmd_status, cmd_stop};

/// How a finished command maps onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit code 0.
    Success,
    /// Exit code 1: the command itself failed (missing state, I/O).
    Failure,
    /// Exit code 2: a gate blocked, or the story is already complete.
    Blocked,
}

impl CommandOutcome {
    pub fn code(self) -> u8 {
        match self {
            CommandOutcome::Success => 0,
            CommandOutcome::Failure => 1,
            CommandOutcome::Blocked => 2,
        }
    }
}
