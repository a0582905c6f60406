//! Sensor drivers. Each driver owns a long-lived I/O task and is controlled
//! from the orchestration loop through a small command handle — the task is
//! the only thing that ever touches the socket or serial port.

pub mod gnss;
pub mod radar;
pub mod rf;
