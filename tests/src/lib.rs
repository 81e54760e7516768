//! NexaOS Scheduler Test Suite
//!
//! This crate tests the scheduler by directly including its source files.
//! This bypasses no_std restrictions while testing the actual scheduler logic.
//!
//! # How it works
//! 1. We define stub macros (kinfo!, ktrace!, etc.) that map to eprintln! or no-op
//! 2. We use `#[path = "..."]` to include scheduler source files directly
//! 3. The `core::` references in scheduler code work because std re-exports core
//!
//! The platform (clock, IPIs, timers, context switch) is provided by `mock`.

// Re-export alloc crate for scheduler code that uses alloc::sync, alloc::vec, etc.
extern crate alloc;

// ===========================================================================
// Kernel macro stubs - these replace the scheduler's logging macros for testing
// ===========================================================================

/// Stub for kinfo! - prints to stderr in tests
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        #[cfg(test)]
        eprintln!("[INFO] {}", format_args!($($arg)*));
    }};
}

/// Stub for ktrace! - no-op in tests (too verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{}};
}

/// Stub for kwarn! - prints to stderr in tests
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        #[cfg(test)]
        eprintln!("[WARN] {}", format_args!($($arg)*));
    }};
}

/// Stub for kerror! - prints to stderr in tests
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        #[cfg(test)]
        eprintln!("[ERROR] {}", format_args!($($arg)*));
    }};
}

/// Stub for kfatal! - prints to stderr in tests
#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        #[cfg(test)]
        eprintln!("[FATAL] {}", format_args!($($arg)*));
    }};
}

/// Stub for kdebug! - no-op in tests
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{}};
}

// ===========================================================================
// Import scheduler source files directly using #[path]
// ===========================================================================

// Tunables and cmdline parsing
#[path = "../../src/config.rs"]
pub mod config;

// Bring-up errors
#[path = "../../src/error.rs"]
pub mod error;

// Level filter and `log` facade forwarding
#[path = "../../src/logger.rs"]
pub mod logger;

// Per-core EEVDF scheduler
#[path = "../../src/scheduler/mod.rs"]
pub mod scheduler;

// ===========================================================================
// Platform mocks (simulates the kernel's threads and per-core hardware)
// ===========================================================================


// ===========================================================================
// Test modules
// ===========================================================================
