//! Error handling foundation for the lantern-flow platform.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums; rootcause reports carry them across layer boundaries.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    fn fails() -> Result<i32, Boom> {
        let value: std::result::Result<i32, Boom> = Err(Boom);
        Ok(value?)
    }

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn domain_errors_convert_into_reports() {
        assert!(fails().is_err());
    }
}
