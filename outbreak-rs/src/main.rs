use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};
use outbreak::RunConfig;
use runenv::Environment;
use serde_json::json;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    // Run description from the file named on the command line, otherwise from stdin
    let path = env::args().nth(1).map(PathBuf::from);
    let ctx = Environment::<RunConfig>::load(path.as_deref())?;
    let Some(config) = ctx.input.as_ref() else {
        return Err("run description has no input".into());
    };

    let digest = ctx.input_digest();
    info!(
        "{} run, seed {}, replicate {}, input sha256 {digest}",
        config.engine(),
        ctx.seed,
        ctx.replicate
    );

    config.execute(ctx.seed, &ctx)?;

    let provenance = json!({
        "engine": config.engine(),
        "seed": ctx.seed,
        "replicate": ctx.replicate,
        "input_sha256": digest,
    });
    if ctx.output_dir().is_some() {
        ctx.write("run.json", serde_json::to_string_pretty(&provenance)?.as_bytes())?;
    }
    Ok(())
}
