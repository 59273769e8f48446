pub mod db_pool;
pub mod registry;
pub mod schema;
pub mod schema_manager;
