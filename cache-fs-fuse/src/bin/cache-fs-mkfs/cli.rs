use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Directory whose files get copied into the image's root
    #[arg(long, short)]
    pub source: Option<PathBuf>,

    /// Output directory
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// Image size, e.g. `16MiB`
    #[arg(long, short, default_value = "16MiB")]
    pub size: String,
}
