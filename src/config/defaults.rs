//! Default configuration values

/// Name of the project manifest
pub const MANIFEST_FILE: &str = "firmforge.toml";

/// Per-directory ignore manifest
pub const IGNORE_FILE: &str = ".buildignore";

/// Generated configuration header, written into the build directory
pub const CONFIG_HEADER: &str = "firmforge_config.h";

/// Prefix of the per-language build-profile fingerprint files
pub const PROFILE_FILE_PREFIX: &str = ".profile";

/// Default output directory
pub const DEFAULT_BUILD_DIR: &str = "BUILD";

/// Compile jobs run on the worker pool only when there are more than
/// `workers * POOL_THRESHOLD_FACTOR` of them
pub const POOL_THRESHOLD_FACTOR: usize = 2;

/// Hard wall-clock bound for draining the compile pool (in seconds)
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 3600;

/// Segment alignment applied by the image assembler
pub const DEFAULT_SEGMENT_ALIGNMENT: u32 = 256;

/// Data bytes per Intel HEX record
pub const HEX_RECORD_WIDTH: usize = 16;

/// Fill byte for gaps in flat binary images
pub const FLASH_FILL_BYTE: u8 = 0xFF;

/// Diagnostic marker emitted by sources that do not support the target
pub const NOT_SUPPORTED_MARKER: &str = "[NOT_SUPPORTED]";

/// Macro carrying the build timestamp; excluded from profile fingerprints
pub const TIMESTAMP_SYMBOL: &str = "FIRMFORGE_BUILD_TIMESTAMP";

/// Name of the compilation database written into the build directory
pub const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";
