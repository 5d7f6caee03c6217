//! Tool definitions and the name-keyed tool registry.
//!
//! - [`core`]: the [`Tool`] trait, [`ToolSet`], [`FnTool`], [`DisabledTool`],
//!   argument validation and result truncation.

pub mod core;

pub use self::core::{
    DEFAULT_MAX_RESULT_BYTES, DisabledTool, FnTool, Tool, ToolFuture, ToolOutput, ToolSet,
    log_tool_call, parse_int_arg, parse_string_arg, parse_tool_args, truncate_result,
    validate_tool_arguments,
};
