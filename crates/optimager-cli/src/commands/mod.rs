//! CLI command implementations

pub mod checksum;
pub mod config;
pub mod image;
pub mod verify;

/// Conditionally println based on silent mode
macro_rules! println_if {
    ($silent:expr) => {
        if !$silent {
            println!();
        }
    };
    ($silent:expr, $($arg:tt)*) => {
        if !$silent {
            println!($($arg)*);
        }
    };
}

pub(crate) use println_if;
