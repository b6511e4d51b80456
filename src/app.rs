// Declare modules
pub mod cli;
pub mod config;
pub mod error;
pub mod formatter;
pub mod models;
pub mod scanner;

use anyhow::{Context, Result};
use clap::Parser;
use pathdiff::diff_paths;
use std::path::PathBuf;
use std::time::Instant;

use self::cli::Cli;
use self::config::resolve_config;
use self::formatter::{builtin_template, PreloadWriter};
use self::models::{PreloadList, RuntimeConfig, TemplateSource};
use self::scanner::Generator;

/// Outcome of a successful run.
#[derive(Debug)]
pub struct Summary {
    pub output: PathBuf,
    pub count: usize,
}

/// Initializes components and orchestrates data flow.
pub fn run() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    let started = Instant::now();
    let summary = execute(&args)?;

    log::info!(
        "Preload file created successfully at {}.",
        summary.output.display()
    );
    log::info!("Preload script contains {} files.", summary.count);
    log::debug!("Elapsed time: {:.2} sec.", started.elapsed().as_secs_f64());

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Config -> discovery -> render -> write.
pub fn execute(args: &Cli) -> Result<Summary> {
    let config = resolve_config(args)?;

    let list = generate(&config).context("Failed to collect files to preload")?;
    for record in &list {
        let shown = diff_paths(record.path(), &config.root)
            .unwrap_or_else(|| record.path().to_path_buf());
        log::debug!("Preloading {}", shown.display());
    }

    if config.no_status_check {
        log::debug!("Opcache status checks disabled");
    }

    let mut writer = PreloadWriter::new(list);
    let written = match &config.template {
        TemplateSource::File(template) => writer.write(&config.export, template),
        TemplateSource::Builtin { status_check } => {
            writer.write_template(&config.export, builtin_template(*status_check))
        }
    };
    written.with_context(|| {
        format!(
            "Error writing the preload file {}",
            config.export.display()
        )
    })?;

    Ok(Summary {
        count: writer.count()?,
        output: config.export,
    })
}

fn generate(config: &RuntimeConfig) -> error::Result<PreloadList> {
    let mut generator = Generator::new(&config.root);

    for file in &config.files {
        generator.add_file(file)?;
    }
    for path in &config.paths {
        generator.add_path(path)?;
    }
    for path in &config.exclude {
        generator.add_exclude_path(path);
    }
    generator.set_exclude_regex(config.exclude_regex.as_deref())?;
    for extension in &config.extensions {
        generator.add_include_extension(extension);
    }
    generator.add_exclude_files(&config.exclude_files);

    generator.list()
}
