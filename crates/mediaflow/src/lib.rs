pub mod catalog;
pub mod clock;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod lock;
pub mod logging;
pub mod model;
pub mod naming;
pub mod profile;
pub mod repo;
pub mod stage;
pub mod storage;
pub mod transfer;
pub mod worker;

pub use catalog::{seed_catalog, SeedSummary};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{load_config, Catalog, CoordinatorConfig};
pub use coordinator::Coordinator;
pub use db::Database;
pub use error::{
    ConfigError, ExecError, MediaflowError, OperationError, ProfileError, RepoError, Result,
    StorageError,
};
pub use lock::{acquire_lock, finish_lock};
pub use logging::init_logging;
pub use profile::{
    register_command_operations, ApplyResponse, Operation, OperationHandler, OperationRegistry,
    OperationRequest, ProfileResolver, ResolvedProfile,
};
pub use repo::{Repository, RepositorySet};
pub use stage::StageContext;
