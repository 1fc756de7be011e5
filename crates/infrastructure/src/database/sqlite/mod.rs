pub mod sqlite_execution_repository;

pub use sqlite_execution_repository::SqliteExecutionRepository;
