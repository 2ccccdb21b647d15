//! Infrastructure adapters: Postgres persistence and Redis pub/sub.

pub mod pubsub;
pub mod store;

pub use pubsub::EvaluatedSubmission;
pub use store::postgres::PgStore;
