// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{MultilineConfig, TailConfig};

#[derive(Debug, Args, Clone)]
pub struct TailArgs {
    /// Comma-separated glob patterns for files to include (e.g., "/var/log/*.log,/tmp/*.log")
    #[arg(long, env = "TAILFOLD_INCLUDE", value_delimiter = ',', required = true)]
    pub include: Vec<String>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "TAILFOLD_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Attach the full source path to every event under this header
    #[arg(long, env = "TAILFOLD_FILE_HEADER")]
    pub file_header: Option<String>,

    /// Attach the source file's base name to every event under this header
    #[arg(long, env = "TAILFOLD_BASENAME_HEADER")]
    pub basename_header: Option<String>,

    /// Maximum line length in bytes; longer lines are skipped
    #[arg(long, env = "TAILFOLD_MAX_LINE_LENGTH", default_value = "65536")]
    pub max_line_length: usize,

    /// Read files that already exist at startup from their first line
    #[arg(long, env = "TAILFOLD_READ_EXISTING", default_value = "false")]
    pub read_existing: bool,

    /// Regex matching continuation lines of a multi-line record
    #[arg(long, env = "TAILFOLD_MULTILINE_PATTERN")]
    pub multiline_pattern: Option<String>,

    /// Treat lines matching the multi-line pattern as record starts instead
    #[arg(long, env = "TAILFOLD_MULTILINE_NEGATE", default_value = "false")]
    pub multiline_negate: bool,

    /// Regex matching the first line of a multi-line record
    #[arg(long, env = "TAILFOLD_MULTILINE_FIRST_LINE_PATTERN")]
    pub multiline_first_line_pattern: Option<String>,

    /// Take headers of a joined record from its first line (true) or its last line (false)
    #[arg(
        long,
        env = "TAILFOLD_MULTILINE_ASSIGN_TO_PREVIOUS",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub multiline_assign_to_previous: bool,

    /// Emit every incomplete multi-line record at the end of each drain cycle
    #[arg(long, env = "TAILFOLD_MULTILINE_FLUSH_ENTIRE_BUFFER", default_value = "false")]
    pub multiline_flush_entire_buffer: bool,

    /// Number of buffered lines that forces an immediate drain
    #[arg(long, env = "TAILFOLD_BUFFER_CAPACITY", default_value = "1000")]
    pub buffer_capacity: usize,

    /// Path of the JSON file recording read positions across restarts
    #[arg(long, env = "TAILFOLD_POSITION_PATH")]
    pub position_path: Option<PathBuf>,

    /// Interval in milliseconds between drains of the multi-line buffer
    #[arg(long, env = "TAILFOLD_DRAIN_INTERVAL_MS", default_value = "500")]
    pub drain_interval_ms: u64,

    /// Interval in milliseconds between sweeps for deleted or replaced files
    #[arg(long, env = "TAILFOLD_REAP_INTERVAL_MS", default_value = "5000")]
    pub reap_interval_ms: u64,

    /// Interval in milliseconds between position checkpoints
    #[arg(long, env = "TAILFOLD_CHECKPOINT_INTERVAL_MS", default_value = "1000")]
    pub checkpoint_interval_ms: u64,

    /// Maximum number of file-system notifications queued for processing
    #[arg(long, env = "TAILFOLD_NOTIFICATION_QUEUE_SIZE", default_value = "1024")]
    pub notification_queue_size: usize,

    /// Maximum time in milliseconds to wait for background tasks during shutdown
    #[arg(long, env = "TAILFOLD_SHUTDOWN_TIMEOUT_MS", default_value = "2000")]
    pub shutdown_timeout_ms: u64,
}

impl From<TailArgs> for TailConfig {
    fn from(args: TailArgs) -> Self {
        TailConfig {
            include: args.include,
            exclude: args.exclude,
            file_header: args.file_header,
            base_name_header: args.basename_header,
            max_line_length: args.max_line_length,
            read_existing: args.read_existing,
            multiline: MultilineConfig {
                continuation_pattern: args.multiline_pattern,
                negate: args.multiline_negate,
                first_line_pattern: args.multiline_first_line_pattern,
                assign_headers_to_previous: args.multiline_assign_to_previous,
                flush_entire_buffer: args.multiline_flush_entire_buffer,
                buffer_capacity: args.buffer_capacity,
            },
            position_path: args.position_path,
            drain_interval: Duration::from_millis(args.drain_interval_ms),
            reap_interval: Duration::from_millis(args.reap_interval_ms),
            checkpoint_interval: Duration::from_millis(args.checkpoint_interval_ms),
            notification_queue_size: args.notification_queue_size,
            shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
        }
    }
}
