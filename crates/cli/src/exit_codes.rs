//! CLI Exit Code Registry
//!
//! Single source of truth for `fsexport` exit codes. Schedulers branch on
//! them, so they are part of the shell contract.
//!
//! | Code | Meaning                                                    |
//! |------|------------------------------------------------------------|
//! | 0    | Success (run outcome `complete`)                           |
//! | 1    | General error                                              |
//! | 2    | Usage error (bad arguments)                                |
//! | 3    | Settings file missing, malformed or invalid                |
//! | 4    | Request rejected (bad export type, date, range or run id)  |
//! | 5    | Store error before any export row was written              |
//! | 6    | Run finished `partial`: some export rows committed         |
//! | 7    | Run finished `failed`: no export row committed             |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above

use fuelsale_pipeline::{ExportError, RunOutcome};

/// Success.
pub const EXIT_SUCCESS: u8 = 0;

/// General error. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unparseable values.
pub const EXIT_USAGE: u8 = 2;

/// Settings could not be loaded or failed validation.
pub const EXIT_CONFIG: u8 = 3;

/// Export request rejected before any store was touched.
pub const EXIT_REJECTED: u8 = 4;

/// Store unreachable or failing outside consolidation.
pub const EXIT_STORE: u8 = 5;

/// Run recorded with outcome `partial`.
pub const EXIT_RUN_PARTIAL: u8 = 6;

/// Run recorded with outcome `failed`.
pub const EXIT_RUN_FAILED: u8 = 7;

/// Map a recorded run outcome to its exit code.
pub fn outcome_exit_code(outcome: RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Complete => EXIT_SUCCESS,
        RunOutcome::Partial => EXIT_RUN_PARTIAL,
        RunOutcome::Failed => EXIT_RUN_FAILED,
    }
}

/// Map an engine error to its exit code.
pub fn export_error_exit_code(err: &ExportError) -> u8 {
    match err {
        e if e.is_rejection() => EXIT_REJECTED,
        ExportError::UnknownRun(_) => EXIT_REJECTED,
        ExportError::ConfigParse(_) | ExportError::ConfigValidation(_) => EXIT_CONFIG,
        ExportError::Store(_) => EXIT_STORE,
        _ => EXIT_ERROR,
    }
}
