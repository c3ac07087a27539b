//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

/// Filesystem layout
pub mod paths {
    /// Config directory name under the user's home
    pub const CONFIG_DIR_NAME: &str = ".streamwright";

    /// Config file name inside the config directory
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Logs subdirectory name
    pub const LOGS_DIR_NAME: &str = "logs";

    /// Log file name
    pub const LOG_FILE_NAME: &str = "streamwright.log";
}

/// Streamed edit application
pub mod edits {
    /// Consumed bytes kept in a line accumulator before its buffer is compacted
    pub const ACCUMULATOR_COMPACT_BYTES: usize = 8 * 1024;

    /// Line terminator used when a document has none yet
    pub const DEFAULT_EOL: &str = "\n";

    /// Save documents once an edit request ends
    pub const SAVE_ON_END: bool = true;

    /// Put the document back to its pre-request content when an edit fails mid-stream
    pub const RESTORE_ON_FAILURE: bool = true;

    /// Id prefix for the transient lease taken by whole-content edits
    pub const DIRECT_LEASE_PREFIX: &str = "direct-";
}

/// Event routing
pub mod router {
    /// Emit an edits-info placeholder on the first chat delta of an exchange
    pub const EDITS_PLACEHOLDER: bool = true;

    /// Description shown on the placeholder
    pub const PLACEHOLDER_DESCRIPTION: &str = "Thinking...";
}

/// Chat/response model
pub mod model {
    /// Maximum characters of the first request used as a session title
    pub const TITLE_MAX_CHARS: usize = 50;

    /// Title used before any request exists
    pub const DEFAULT_TITLE: &str = "Session";

    /// Current session snapshot format version
    pub const SNAPSHOT_VERSION: u32 = 3;

    /// Change notification channel capacity
    pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

    /// Representation of an edit group in the plain-text response
    pub const EDITS_SUMMARY: &str = "Made changes.";
}
