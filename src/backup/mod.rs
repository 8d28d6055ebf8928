mod logic;
pub(crate) mod db_dump; // pg_dump | gzip into scratch storage
pub(crate) mod s3_upload; // publishing artifacts to object storage

pub use db_dump::DumpPipeline;
pub use logic::run_backup_flow;
pub use s3_upload::{LocalDirStore, ObjectStore, S3ObjectStore};
