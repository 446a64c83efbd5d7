use std::process::ExitCode;

pub type CliResult<T> = anyhow::Result<T>;

/// Exit status when the other endpoint could not be reached
const EXIT_UNREACHABLE: u8 = 2;

/// Convert a CliResult to an ExitCode, printing errors to stderr
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            if is_unreachable(&e) {
                ExitCode::from(EXIT_UNREACHABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn is_unreachable(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<perimeter::Error>(),
            Some(
                perimeter::Error::AppUnavailable { .. }
                    | perimeter::Error::AmbiguousProvider { .. }
                    | perimeter::Error::NotConnected
                    | perimeter::Error::ConnectionClosed
            )
        )
    })
}
