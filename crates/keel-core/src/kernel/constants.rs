/// Application name
pub const APP_NAME: &str = "Keel";

/// Application version
pub const APP_VERSION: &str = "0.1.0";

/// Project manifest file name, looked up in the project root
pub const MANIFEST_FILE: &str = "keel.toml";

/// Directory holding the tool-local override inside the project root
pub const LOCAL_OVERRIDE_DIR: &str = ".keel";

/// Tool-local and tool-global override file name
pub const OVERRIDE_FILE: &str = "config.toml";

/// Directory name below `$XDG_CONFIG_HOME` for the global override
pub const GLOBAL_CONFIG_DIR: &str = "keel";

/// Lock artifact written to the project root after a successful sync
pub const LOCK_FILE: &str = "keel.lock";

/// Stamp file placed in every committed dependency directory
pub const STAMP_FILE: &str = ".keel-stamp.json";

/// Default install root below the user's home directory
pub const DEFAULT_INSTALL_DIR: &str = ".keel";

/// Default tool path, relative to the project root
pub const DEFAULT_TOOL_PATH: &str = "tool";

/// Default build path, relative to the project root
pub const DEFAULT_BUILD_PATH: &str = "build";

/// Cache directory created below the install root
pub const CACHE_DIR_NAME: &str = ".cache";

/// Subdirectory of the tool path that plugins receive their directories in
pub const TOOL_DIR_NAME: &str = "keel";

/// Prefix for staging directories created next to a commit destination
pub const STAGING_PREFIX: &str = ".keel-staging-";

/// Default number of concurrent dependency sync workers
pub const DEFAULT_SYNC_WORKERS: usize = 4;

/// Upper bound for concurrent dependency sync workers
pub const MAX_SYNC_WORKERS: usize = 64;

/// Default number of retries for transient sync failures
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Upper bound for retries of transient sync failures
pub const MAX_RETRY_LIMIT: u32 = 10;

/// Default base delay between retries, doubled on every attempt
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Cap on a single retry delay
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Default timeout for a single plugin call
pub const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 600;

/// Exit code: success
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code: configuration error
pub const EXIT_CONFIGURATION_ERROR: u8 = 1;

/// Exit code: plugin error
pub const EXIT_PLUGIN_ERROR: u8 = 2;

/// Exit code: partial dependency failure under the collect-all policy
pub const EXIT_PARTIAL_FAILURE: u8 = 3;
