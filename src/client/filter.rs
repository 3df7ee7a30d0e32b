//! I/O 错误过滤器
//!
//! 默认只有说明连接已被对端断开的错误才会触发重试。注册 [`IoExceptionFilter`]
//! 可以让其他 I/O 错误也在新连接上重放请求；重放仍然受重试预算和
//! 重放条件（状态行未到达、不在认证中、body 可重放等）约束。

use std::fmt;
use std::io;

use super::request::Request;

/// 决定一个 I/O 错误之后是否重放请求。
pub trait IoExceptionFilter: Send + Sync + 'static {
    /// 返回 `true` 请求在新连接上重放 `request`。
    fn replay(&self, request: &Request, err: &io::Error) -> bool;
}

impl<F> IoExceptionFilter for F
where
    F: Fn(&Request, &io::Error) -> bool + Send + Sync + 'static,
{
    fn replay(&self, request: &Request, err: &io::Error) -> bool {
        self(request, err)
    }
}

impl fmt::Debug for dyn IoExceptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IoExceptionFilter")
    }
}
