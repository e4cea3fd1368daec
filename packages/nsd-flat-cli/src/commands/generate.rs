use crate::cli::GenerateArgs;
use crate::exit_codes;
use crate::output;
use crate::params;
use nsd_flat::{output_dir, DataSources, DatasetGenerator, DatasetWriter, NsdFlatError};

/// Exit code for failures before the first record is produced
fn setup_exit_code(err: &NsdFlatError) -> i32 {
    match err {
        NsdFlatError::Config(_) | NsdFlatError::UnknownSplit(_) => exit_codes::CONFIG_ERROR,
        NsdFlatError::NotFound(_) | NsdFlatError::Parse(_) => exit_codes::INPUT_ERROR,
        _ => exit_codes::EXECUTION_ERROR,
    }
}

pub fn execute(args: GenerateArgs) -> i32 {
    let layout = match params::validate_root(&args.root) {
        Ok(l) => l,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let config = match params::load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let options = match params::build_options(&args) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let sources = match DataSources::from_layout(&layout, &config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return setup_exit_code(&e);
        }
    };

    let generator = match DatasetGenerator::new(config, sources) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            return setup_exit_code(&e);
        }
    };

    let records = match generator.records(&options) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return setup_exit_code(&e);
        }
    };

    let dir = output_dir(
        &params::output_root(&args),
        &options,
        generator.config().image_size,
    );
    if !args.quiet {
        eprintln!("Generating {} split into {}...", options.split, dir.display());
        eprintln!("  Workers: {}", args.workers);
        if options.debug {
            eprintln!("  Debug: first session of the first subject only");
        }
    }

    let mut writer = match DatasetWriter::create(&dir, args.workers) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if let Err(e) = writer.write_all(records, args.batch_size) {
        eprintln!("Error: generation stopped after {} records: {}", writer.count(), e);
        return exit_codes::EXECUTION_ERROR;
    }

    let manifest = match writer.finish(&options, generator.config()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.json {
        if let Err(e) = output::print_json(&manifest) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else if !args.quiet {
        eprintln!("Wrote {} records to {}", manifest.num_records, dir.display());
    }

    exit_codes::SUCCESS
}
