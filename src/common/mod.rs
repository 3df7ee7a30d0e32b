pub(crate) mod exec;
pub(crate) mod future;
pub(crate) mod time;
pub(crate) mod watch;
