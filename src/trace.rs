//! 日志追踪宏
//!
//! 对 `tracing` crate 的一层薄包装。启用 `tracing` feature 时，这些宏展开为
//! 对应的 `tracing::*!` 调用；未启用时展开为空，不产生任何运行时开销，
//! 也不会对参数求值。
//!
//! 生命周期中的关键节点（命中连接池、新建连接、重试、重定向、认证、
//! 中止、超时、连接池淘汰）都通过这些宏记录。

// 并非每个宏都会在所有 feature 组合下被用到
#![allow(unused_macros)]

macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}
