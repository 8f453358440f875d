//! Companion engine: persisted page state, background tasks and the study API.
mod client;
mod clock;
mod filename;
mod persist;
mod scheduler;
mod snapshot;
mod storage;
mod store;
mod tracker;
mod transport;

pub use client::{ClientSettings, DownloadTarget, StudyClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use filename::download_filename;
pub use persist::{ensure_writable_dir, AtomicFileWriter, PersistError};
pub use scheduler::WriteScheduler;
pub use snapshot::{load_page_states, save_page_states};
pub use storage::{DisabledStorage, FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use store::{PageStateStore, StoreSettings};
pub use tracker::{
    CompleteCallback, ErrorCallback, TaskContext, TaskError, TaskOptions, TaskScope, TaskSettings,
    TaskTracker,
};
pub use transport::{
    AiHealth, ChatRequest, Download, FailureKind, NoProgress, ProgressSink, ReqwestTransport,
    StudyApi, TransportError, TransportSettings, UploadRequest,
};
