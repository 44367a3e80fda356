// Constants for the incremental interpreter

/// Name of the throwaway function a fragment is wrapped in for classification
pub const CLASSIFY_FUNCTION: &str = "__incc_classify";

/// Prefix of synthesized statement entry points; a counter is appended
pub const ENTRY_PREFIX: &str = "__incc_stmt_";

/// Starting address of the global segment
/// Globals and string literals live here and are never freed
pub const GLOBAL_SEGMENT_BASE: u64 = 0x0001_0000;

/// Size of the global segment in bytes
pub const GLOBAL_SEGMENT_CAPACITY: usize = 16 * 1024 * 1024;

/// Starting address of the stack segment
/// Far above the global segment so the two never overlap
pub const STACK_SEGMENT_BASE: u64 = 0x4000_0000;

/// Size of the stack segment in bytes
pub const STACK_SEGMENT_CAPACITY: usize = 8 * 1024 * 1024;

/// Maximum number of nested calls before execution traps
pub const MAX_CALL_DEPTH: usize = 256;

/// Prefix of the wrappers synthesized to call a function by name
pub const CALL_PREFIX: &str = "__incc_call_";
