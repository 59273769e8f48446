use duckdb::{AccessMode, Config, Connection};
use r2d2::ManageConnection;

/// r2d2 manager for a single DuckDB file. Target databases are opened
/// read-only; the history ledger opens its own file read-write.
pub struct DuckDBConnectionManager {
    connection_string: String,
    read_only: bool,
}

impl DuckDBConnectionManager {
    pub fn read_only(connection_string: String) -> Self {
        Self {
            connection_string,
            read_only: true,
        }
    }

    pub fn read_write(connection_string: String) -> Self {
        Self {
            connection_string,
            read_only: false,
        }
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if self.read_only {
            let config = Config::default().access_mode(AccessMode::ReadOnly)?;
            Connection::open_with_flags(&self.connection_string, config)
        } else {
            Connection::open(&self.connection_string)
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
