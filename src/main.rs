// src/main.rs

use pipedag::{cli, errors, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("pipedag error: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run_main() -> errors::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
