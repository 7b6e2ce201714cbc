//! Data ingestion: mutation records, realtime watermarks, and the
//! orchestrator that feeds the cache.

mod orchestrator;
mod realtime;
mod record;

pub use orchestrator::DataOrchestrator;
pub use orchestrator::LoadStats;
pub use realtime::RealtimeWatermarks;
pub use record::DeltaRecord;
pub use record::MutationType;
pub use record::RecordValue;
