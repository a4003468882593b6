//! OS glue for the desk agent.
//!
//! Provides:
//! - `CommandEffector` - Performs actions through platform commands
//! - `CommandScreenSource` - Screenshots through a capture command
//! - Executable resolution and command building utilities

pub mod capture;
pub mod command;
pub mod effector;
pub mod shell;

pub use capture::CommandScreenSource;
pub use command::{CommandError, CommandParts, CommandTemplate};
pub use effector::CommandEffector;
pub use shell::{Platform, resolve_executable_path};
