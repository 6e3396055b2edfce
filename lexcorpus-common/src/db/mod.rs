//! Database layer: models, initialization, and the denormalization
//! synchronization engine

pub mod denorm;
pub mod init;
pub mod models;
pub mod registry;
pub mod table_schemas;
pub mod values;
pub mod writer;

pub use denorm::*;
pub use init::*;
pub use models::*;
pub use registry::*;
pub use table_schemas::*;
pub use values::*;
pub use writer::*;
