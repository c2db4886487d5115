pub mod orchestrator;
pub mod progress;

pub use orchestrator::{MigrationFailure, MigrationReport, Migrator};
pub use progress::{ConsoleProgress, Phase, ProgressSink};
