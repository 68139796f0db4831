//! Error handling utilities

use tracing::error;

use crate::error::Error;

/// Exit code for invalid configuration
pub const CONFIG_ERROR: i32 = 2;
/// Exit code for everything else
pub const GENERAL_ERROR: i32 = 1;

/// Exit code for an error chain
pub fn exit_code(error: &anyhow::Error) -> i32 {
    let config_error = error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<Error>(),
            Some(Error::Config(_) | Error::Toml(_))
        )
    });

    if config_error {
        CONFIG_ERROR
    } else {
        GENERAL_ERROR
    }
}

/// Report a fatal error and exit.
///
/// - `verbose = 0`: the top-level message only
/// - `verbose >= 1`: the full error chain
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);

    eprintln!("Error: {error}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code(&error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_config_errors_exit_with_config_code() {
        let err: anyhow::Result<()> =
            Err(Error::Config("bad".into())).context("Failed to load configuration");
        assert_eq!(exit_code(&err.unwrap_err()), CONFIG_ERROR);
    }

    #[test]
    fn test_other_errors_exit_with_general_code() {
        let err = anyhow::anyhow!("queue unavailable");
        assert_eq!(exit_code(&err), GENERAL_ERROR);
    }
}
