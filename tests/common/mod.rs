#![allow(dead_code)]

pub use winepilot_test_utils::builders;
pub use winepilot_test_utils::process;
pub use winepilot_test_utils::{init_tracing, with_timeout};
