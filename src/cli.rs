use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "autograde", version, about = "Grade student submissions with an LLM")]
pub(crate) struct Args {
    /// Dotenv file to load instead of `.env`
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Skip students already completed in the progress ledger
    #[arg(long, conflicts_with_all = ["retry_failed", "fresh"])]
    pub(crate) resume: bool,

    /// Grade only the students that failed in the previous run
    #[arg(long, conflicts_with = "fresh")]
    pub(crate) retry_failed: bool,

    /// Reset the progress ledger before grading
    #[arg(long)]
    pub(crate) fresh: bool,

    /// Neither consult nor fill the grading cache
    #[arg(long)]
    pub(crate) no_cache: bool,

    /// Empty the persisted grading cache before grading
    #[arg(long)]
    pub(crate) clear_cache: bool,

    /// Worker-pool size (defaults to GRADING_MAX_WORKERS)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) parallel: Option<u16>,

    /// JSON rubric replacing the built-in one
    #[arg(long, value_name = "FILE")]
    pub(crate) criteria: Option<PathBuf>,

    /// Grade a single student
    #[arg(long, value_name = "ID")]
    pub(crate) student: Option<String>,

    /// Write the graded records as JSON
    #[arg(short, long, value_name = "FILE")]
    pub(crate) output: Option<PathBuf>,

    #[arg(long, value_name = "LEVEL")]
    pub(crate) log_level: Option<String>,
}

impl Args {
    pub(crate) fn uses_ledger(&self) -> bool {
        self.resume || self.retry_failed || self.fresh
    }
}
