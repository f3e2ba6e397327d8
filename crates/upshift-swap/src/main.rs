use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use upshift_swap::{execute_plan_file, FINAL_RESPONSE};

fn main() -> ExitCode {
    let Some(plan_path) = env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: upshift-swap <plan-file>");
        return ExitCode::from(2);
    };

    match execute_plan_file(&plan_path) {
        Ok(outcome) => {
            for failure in &outcome.failures {
                eprintln!("{failure}");
            }
            println!("{FINAL_RESPONSE}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
