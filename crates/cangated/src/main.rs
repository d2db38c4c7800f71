use std::process::ExitCode;

fn main() -> ExitCode {
    match cangated::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("cangated: {error}");
            ExitCode::FAILURE
        }
    }
}
