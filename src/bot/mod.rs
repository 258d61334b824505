//! Bot boundary layer: commands, reply texts and the dispatch loop.

pub mod command;
pub mod dispatcher;
pub mod replies;

pub use command::{Command, CommandParser};
pub use dispatcher::{BotDeps, Dispatcher};
