// 以下 lint 属性控制编译器的警告行为：
#![deny(missing_docs)]                                     // 所有公共 API 必须有文档注释
#![deny(missing_debug_implementations)]                    // 所有公共类型必须实现 Debug
#![cfg_attr(test, deny(rust_2018_idioms))]                 // 测试时要求 Rust 2018 惯用写法
#![cfg_attr(all(test, feature = "full"), deny(warnings))]  // 测试 + full 模式下警告即错误
#![cfg_attr(docsrs, feature(doc_cfg))]                     // docs.rs 上显示 feature 标记

//! # courier
//!
//! courier 是一个异步 HTTP/1.1 客户端的**请求生命周期引擎**。
//!
//! 应用提交一个 [`Request`](client::Request) 并注册一个
//! [`AsyncHandler`](client::AsyncHandler)，状态行、响应头与 body 分片到达时
//! 依次回调该 handler，调用线程不会被阻塞。引擎负责一个逻辑请求从获取连接、
//! 写出请求、处理响应，到重定向 / 认证质询 / 重试，再到归还连接池的整个过程，
//! 并且在取消、超时和连接失败时保持正确。
//!
//! ## 组成
//!
//! - [`body`]：拉取式请求体生成器，可在数据暂不可用时挂起（`Suspend`）。
//! - [`client::pool`]：按分区键划分的连接池，带全局 / 每主机连接数上限。
//! - [`client::RequestFuture`]：单个请求的状态机与结果槽位。
//! - [`client::Client`]：编排者，决定复用还是新建连接，驱动重试、重定向与认证。
//! - [`client::ResponseAccumulator`]：把事件流累积成不可变的 [`Response`](client::Response)。
//! - [`transport`]：窄化的通道抽象，真实的网络 I/O 与响应解析由它的实现者负责。
//!
//! ## 运行时
//!
//! 引擎本身不绑定具体的异步运行时：任务通过 [`rt::Executor`] 派发，
//! 超时通过 [`rt::Timer`] 计时。启用 `tokio` feature（默认开启）后可直接使用
//! [`rt::tokio`] 中的 `TokioExecutor` 与 `TokioTimer`。
//!
//! # Optional Features
//!
//! - `tokio`: 提供基于 tokio 的执行器与定时器（默认开启）。
//! - `tracing`: 通过 `tracing` 输出生命周期日志（默认开启）。
//! - `tcp`: 基于 tokio `TcpStream` 的明文传输实现。
//! - `full`: 以上全部。

// 宏模块必须最先声明，后续模块才能使用其中的宏
#[macro_use]
mod cfg;
#[macro_use]
mod trace;

pub use crate::error::{Error, Result, TimeoutKind};

pub mod body;
pub mod client;
mod common;
mod error;
mod headers;
pub mod rt;
pub mod transport;
