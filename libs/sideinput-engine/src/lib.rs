pub mod bootstrap;
pub mod config;
pub mod error;
pub mod generators;
pub mod harness;
pub mod info;
pub mod live;
pub mod retry;
pub mod schedule;
pub mod synchronizer;
pub mod watcher;

pub use bootstrap::{SynchronizerService, build_generator};
pub use config::SideInputConfig;
pub use error::EngineError;
pub use harness::spawn_generator_task;
pub use live::LiveValue;
pub use retry::RetryPolicy;
pub use schedule::{Schedule, TickSource, Trigger};
pub use synchronizer::Synchronizer;
pub use watcher::{ConsumerState, SideInputWatcher, Transition, spawn_watcher, wait_for_side_inputs};
