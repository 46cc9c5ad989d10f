//! Monitor sessions: identity tagging, recording, persistence and export.

pub mod dual;
pub mod export;
pub mod session;

pub use dual::{DualSession, SessionOptions};
pub use export::{csv_string, write_csv, ExportError, ExportTimezone};
pub use session::{
    last_session_key, load_last_session, ExportSettings, MonitorSession, MonitorStatus,
};
