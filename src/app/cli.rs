use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate a script that preloads PHP source files into opcache",
    long_about = "Scans the files and directories listed under extra.preload in the project \
manifest and writes a PHP script (vendor/preload.php by default) that compiles each of them \
into opcache. Use --no-status-check to leave out the opcache availability checks, e.g. when \
the script is included from another preload file."
)]
pub struct Cli {
    /// Project manifest holding the extra.preload section (composer.json or a .toml file)
    #[arg(long, short = 'c', default_value = "composer.json")]
    pub config: PathBuf,

    /// Do not include opcache status checks in the generated file
    #[arg(long)]
    pub no_status_check: bool,

    /// Also log timings and every preloaded file
    #[arg(short, long)]
    pub verbose: bool,
}
