//! Service layer for business logic.

pub mod ingestor;

pub use ingestor::{IngestError, IngestReceipt, Ingestor, ReplayReport, SideEffect};
