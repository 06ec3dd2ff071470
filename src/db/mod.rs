pub mod connection;
pub mod runs;
pub mod schema;

pub use connection::Database;
