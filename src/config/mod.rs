pub mod cli;
pub mod print;

pub use cli::CliConfig;
pub use print::PrintSettings;
