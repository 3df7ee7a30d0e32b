//! 条件编译配置宏
//!
//! `cfg_feature!` 为每个被包裹的 item 同时加上 `#[cfg(...)]` 与
//! `#[cfg_attr(docsrs, doc(cfg(...)))]`，这样 docs.rs 上会标出该 API 依赖的 feature。
//!
//! 本模块通过 `#[macro_use]` 在 `lib.rs` 中最先引入，整个 crate 均可使用。

macro_rules! cfg_feature {
    (
        #![$meta:meta]
        $($item:item)*
    ) => {
        $(
            #[cfg($meta)]
            #[cfg_attr(docsrs, doc(cfg($meta)))]
            $item
        )*
    }
}

/// 仅在启用 `tokio` feature 时编译，对应默认的运行时实现。
macro_rules! cfg_tokio {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "tokio"]
            $($item)*
        }
    }
}

/// 仅在启用 `tcp` feature 时编译，对应真实的 TCP 传输。
macro_rules! cfg_tcp {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "tcp"]
            $($item)*
        }
    }
}
