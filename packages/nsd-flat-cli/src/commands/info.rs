use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use crate::params;
use nsd_flat::Split;
use serde::Serialize;

#[derive(Serialize)]
struct SubjectSummary {
    index: usize,
    name: String,
    sessions: usize,
    train_sessions: [usize; 2],
    test_sessions: [usize; 2],
}

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    trials_per_session: usize,
    grid_width: usize,
    grid_height: usize,
    pixel_size: f64,
    vmax: f32,
    image_size: u32,
    subjects: Vec<SubjectSummary>,
}

pub fn execute(args: InfoArgs) -> i32 {
    let config = match params::load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::CONFIG_ERROR;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return exit_codes::CONFIG_ERROR;
    }

    let mut subjects = Vec::with_capacity(config.subjects.len());
    for (index, subject) in config.subjects.iter().enumerate() {
        let ranges = config
            .session_range(subject, Split::Train)
            .and_then(|train| Ok((train, config.session_range(subject, Split::Test)?)));
        let (train, test) = match ranges {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::CONFIG_ERROR;
            }
        };
        subjects.push(SubjectSummary {
            index,
            name: subject.name.clone(),
            sessions: subject.sessions,
            train_sessions: [train.start, train.end],
            test_sessions: [test.start, test.end],
        });
    }

    let (grid_width, grid_height) = config.grid_size();
    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        trials_per_session: config.trials_per_session(),
        grid_width,
        grid_height,
        pixel_size: config.pixel_size,
        vmax: config.vmax,
        image_size: config.image_size,
        subjects,
    };

    if args.json {
        if let Err(e) = output::print_json(&info) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        println!("nsdflat CLI v{}", info.cli_version);
        println!(
            "Raster: {}x{} at {} mm, range +/-{}",
            info.grid_width, info.grid_height, info.pixel_size, info.vmax
        );
        println!("Trials per session: {}", info.trials_per_session);
        println!("Stimulus size: {}", info.image_size);
        println!();
        println!("{:<8} {:>8} {:>10} {:>10}", "Subject", "Sessions", "Train", "Test");
        for s in &info.subjects {
            println!(
                "{:<8} {:>8} {:>10} {:>10}",
                s.name,
                s.sessions,
                format!("{}..{}", s.train_sessions[0], s.train_sessions[1]),
                format!("{}..{}", s.test_sessions[0], s.test_sessions[1])
            );
        }
    }

    exit_codes::SUCCESS
}
