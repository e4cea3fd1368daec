use crate::cli::GenerateArgs;
use nsd_flat::{DataLayout, DatasetConfig, GenerateOptions};
use std::path::{Path, PathBuf};

/// Load the configuration override, or the built-in NSD constants.
pub fn load_config(path: Option<&str>) -> Result<DatasetConfig, String> {
    match path {
        Some(p) => DatasetConfig::from_json_file(Path::new(p))
            .map_err(|e| format!("Failed to load config '{}': {}", p, e)),
        None => Ok(DatasetConfig::default()),
    }
}

/// Validate the data root: it must be an existing directory.
pub fn validate_root(root: &str) -> Result<DataLayout, String> {
    let path = Path::new(root);
    if !path.is_dir() {
        return Err(format!("Data root not found: {}", root));
    }
    Ok(DataLayout::new(path))
}

pub fn build_options(args: &GenerateArgs) -> Result<GenerateOptions, String> {
    if args.img_size == Some(0) {
        return Err("--img-size must be positive".to_string());
    }
    if args.workers == 0 {
        return Err("--workers must be at least 1".to_string());
    }
    if args.batch_size == 0 {
        return Err("--batch-size must be at least 1".to_string());
    }

    Ok(GenerateOptions {
        split: args.split,
        img_size: args.img_size,
        debug: args.debug,
        debug_trials: args.debug_trials,
        subjects: args.subjects.clone(),
    })
}

/// Output root: `--out` when given, `{root}/processed` otherwise.
pub fn output_root(args: &GenerateArgs) -> PathBuf {
    match &args.out {
        Some(out) => PathBuf::from(out),
        None => Path::new(&args.root).join("processed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use nsd_flat::Split;

    fn generate_args(extra: &[&str]) -> GenerateArgs {
        let argv = ["nsdflat", "generate"].iter().chain(extra.iter()).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Generate(args) => args,
            Command::Info(_) => panic!("expected generate"),
        }
    }

    #[test]
    fn test_build_options() {
        let args = generate_args(&["--split", "test", "--debug", "--subjects", "subj02", "subj05"]);
        let options = build_options(&args).unwrap();
        assert_eq!(options.split, Split::Test);
        assert!(options.debug);
        assert_eq!(
            options.subjects,
            Some(vec!["subj02".to_string(), "subj05".to_string()])
        );
    }

    #[test]
    fn test_build_options_rejects_zero() {
        assert!(build_options(&generate_args(&["--img-size", "0"])).is_err());
        assert!(build_options(&generate_args(&["-j", "0"])).is_err());
    }

    #[test]
    fn test_output_root_default() {
        let args = generate_args(&["--root", "/data/nsd"]);
        assert_eq!(output_root(&args), PathBuf::from("/data/nsd/processed"));
        let args = generate_args(&["--root", "/data/nsd", "--out", "/tmp/out"]);
        assert_eq!(output_root(&args), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Some("/nonexistent/config.json")).unwrap_err();
        assert!(err.contains("not found"));
    }
}
