pub mod session;
pub mod appender;
