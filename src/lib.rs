pub mod config;
pub mod error;
pub mod producer;
pub mod registry;
pub mod runloop;
pub mod scheduler;
pub mod schema;
pub mod source;
pub mod state;
pub mod table;
pub mod websocket;

pub use config::{ConfigError, ServerConfig};
pub use error::{Result, TableError};
pub use producer::{Cursor, Producer, WellLogProducer};
pub use registry::{TableHandle, TableRegistry};
pub use runloop::{DispatchMode, LoopDispatcher, RunLoop};
pub use scheduler::TickTimer;
pub use schema::{ColumnType, Row, Schema, Value};
pub use source::{load_well_log, well_log_schema, SourceFrame};
pub use state::{health_check, AppState};
pub use table::{BoundedTable, TableDiff, TableHost, TableSnapshot};
pub use websocket::handle_websocket;
