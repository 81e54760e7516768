//! NexaOS per-core task scheduler
//!
//! An EEVDF (Earliest Eligible Virtual Deadline First) scheduler with one
//! independently locked instance per CPU. The kernel plugs its threads and
//! hardware in through the traits in [`scheduler::platform`] and drives the
//! scheduler through [`scheduler::SchedTable`].
//!
//! ## Bring-up order
//!
//! 1. Build a [`config::SchedConfig`] (optionally from the kernel cmdline)
//! 2. Create the [`scheduler::SchedTable`] once and place it in static storage
//! 3. On each CPU, call [`scheduler::SchedTable::bring_up`] with its idle thread
//! 4. Give every new thread a profile with `init_thread` before `activate`

#![no_std]

extern crate alloc;

pub mod config;
pub mod error;
pub mod logger;
pub mod scheduler;

pub use config::SchedConfig;
pub use error::SchedError;

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::FATAL, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
    }};
}
