pub mod capture;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod history;
pub mod install;
pub mod logging;
pub mod paths;
pub mod remote;
pub mod shell;
pub mod sync;
pub mod update;
