use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Subject identifier recorded with every trial
    #[arg(long, short = 's')]
    pub subject: String,

    /// Directory containing target/ and distractor/ image folders
    #[arg(long, default_value = "stimuli")]
    pub stimuli: PathBuf,

    /// CSV file trial results are appended to
    #[arg(long, default_value = "data.csv")]
    pub data: PathBuf,

    /// Optional JSON session configuration (blocks, keys, timing)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run in a window instead of fullscreen
    #[arg(long, default_value_t = false)]
    pub windowed: bool,
}
