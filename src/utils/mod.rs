//! The `utils` module provides shared definitions used across the `tiermq`
//! crate: the common error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::BrokerError;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
        logging::init("nonsense");
    }
}
