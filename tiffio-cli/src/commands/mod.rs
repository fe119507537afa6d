//! CLI subcommand implementations.

pub mod copy;
pub mod info;

pub use copy::CmdCopy;
pub use info::CmdInfo;
