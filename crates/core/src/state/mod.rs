pub mod codec;
pub mod db;
pub mod history;
pub mod pipeline_state;
pub mod report;
pub mod snapshots;

pub use db::InquiryDb;

pub use codec::{decode, decode_link, encode, share_link, DecodeError};
pub use pipeline_state::{PipelineState, StylizedFact, ToolResults};
pub use report::render_report;
pub use snapshots::{
    run_key, MemorySnapshotStore, SnapshotRecord, SnapshotStore, SqliteSnapshotStore,
    AUTOSAVE_KEY,
};
