mod batch;
pub mod engine;
pub mod events;
pub mod gate;
pub mod notify;
pub mod retry;
pub mod scanner;
pub mod session_log;

pub use engine::{UploadEngine, UploadError, UploadHandle};
pub use events::{EventSink, ItemStatus, LogLevel, QueueEntry, UploadEvent};
pub use gate::{Cancelled, ConcurrencyGate, GateHandle};
pub use notify::{CompletionNotifier, Disposer, LogNotifier, NotifyFilter};
pub use retry::{classify, ErrorKind, RetryDecision, RetryState};
pub use scanner::{FileSetCollector, ScanError};
