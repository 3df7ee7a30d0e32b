//! 定时器封装
//!
//! `Time` 包裹用户提供的 [`Timer`]，`Dur` 区分超时时长是默认值还是
//! 用户显式配置的值：默认超时在没有定时器时只告警并被禁用，而显式配置的
//! 超时在没有定时器时是编程错误，直接 panic。

use std::time::Duration;
use std::{fmt, sync::Arc};
use std::{pin::Pin, time::Instant};

use crate::rt::Sleep;
use crate::rt::Timer;

/// 用户提供的定时器（或未配置）。
#[derive(Clone)]
pub(crate) enum Time {
    Timer(Arc<dyn Timer + Send + Sync>),
    Empty,
}

/// 超时时长及其来源，`None` 表示禁用。
#[derive(Clone, Copy, Debug)]
pub(crate) enum Dur {
    Default(Option<Duration>),
    Configured(Option<Duration>),
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Time").finish()
    }
}

impl Time {
    pub(crate) fn is_set(&self) -> bool {
        matches!(*self, Time::Timer(_))
    }

    /// # Panics
    /// 未配置定时器时 panic。
    pub(crate) fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        match *self {
            Time::Empty => {
                panic!("You must supply a timer.")
            }
            Time::Timer(ref t) => t.sleep(duration),
        }
    }

    /// # Panics
    /// 未配置定时器时 panic。
    pub(crate) fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        match *self {
            Time::Empty => {
                panic!("You must supply a timer.")
            }
            Time::Timer(ref t) => t.sleep_until(deadline),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        match *self {
            Time::Empty => Instant::now(),
            Time::Timer(ref t) => t.now(),
        }
    }

    pub(crate) fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        match *self {
            Time::Empty => {
                panic!("You must supply a timer.")
            }
            Time::Timer(ref t) => t.reset(sleep, new_deadline),
        }
    }

    pub(crate) fn check(&self, dur: Dur, name: &'static str) -> Option<Duration> {
        match dur {
            Dur::Default(Some(dur)) => match self {
                Time::Empty => {
                    warn!("timeout `{}` has default, but no timer set", name,);
                    None
                }
                Time::Timer(..) => Some(dur),
            },
            Dur::Configured(Some(dur)) => match self {
                Time::Empty => panic!("timeout `{}` set, but no timer set", name,),
                Time::Timer(..) => Some(dur),
            },
            Dur::Default(None) | Dur::Configured(None) => None,
        }
    }
}

impl Dur {
    /// 不考虑定时器时的时长值。
    pub(crate) fn get(&self) -> Option<Duration> {
        match *self {
            Dur::Default(d) | Dur::Configured(d) => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_without_timer_is_disabled() {
        let time = Time::Empty;
        assert_eq!(
            time.check(Dur::Default(Some(Duration::from_secs(5))), "connect_timeout"),
            None
        );
        assert_eq!(time.check(Dur::Configured(None), "read_timeout"), None);
    }

    #[test]
    #[should_panic(expected = "timeout `request_timeout` set, but no timer set")]
    fn configured_without_timer_panics() {
        Time::Empty.check(
            Dur::Configured(Some(Duration::from_secs(1))),
            "request_timeout",
        );
    }
}
