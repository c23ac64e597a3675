mod in_memory;
mod log;
mod op_id;

pub use in_memory::InMemoryLog;
pub use log::Log;
pub use log::LogEntry;
pub use op_id::OpId;
pub use op_id::Term;
