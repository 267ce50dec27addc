//! Command execution inside image root filesystems.
//!
//! Build steps that need the image's own tooling (`apt-get`, `pip`) run
//! through a [`CommandRunner`]. Production code uses [`ChrootRunner`];
//! tests substitute fakes or mockall mocks.

pub mod error;
pub mod executor;

pub use error::ExecError;
pub use executor::{ChrootRunner, CommandOutput, CommandRunner, Invocation};
