pub mod cli;
pub mod config;
pub mod core;
pub mod logging;
pub mod models;
pub mod remote;

pub use crate::config::{DisposalMode, TransferMode, UploadConfig};
pub use crate::core::{
    CompletionNotifier, ConcurrencyGate, Disposer, EventSink, GateHandle, LogNotifier, NotifyFilter,
    UploadEngine, UploadError, UploadEvent, UploadHandle,
};
pub use crate::models::{RunStatus, SessionResult, TransferOutcome, UploadItem, UploadReport};
pub use crate::remote::{GitHubClient, MemoryRemote, RemoteError, RemoteObjectClient};
