//! CLI commands implementation

pub mod append;
pub mod db;
pub mod init;
pub mod process;
pub mod read;
pub mod status;
pub mod worker;

pub use append::*;
pub use db::*;
pub use init::*;
pub use process::*;
pub use read::*;
pub use status::*;
pub use worker::*;
