// Commandline argument parser using clap for CubeTrace

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct TraceArgs {
    #[command(subcommand)]
    /// What to do with the cube and its traces
    pub command: CommandTask,

    /// Directory the traces are stored in
    #[arg(short = 's', long = "store", default_value = "traces")]
    pub store: PathBuf,

    /// RON config file; defaults are used when omitted
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Record the strokes of a simulated cube
    #[command(about)]
    Record(RecordCommand),

    /// List stored traces and how many samples each holds
    #[command(about)]
    List,

    /// Print a stored trace as target-space line segments
    #[command(about)]
    Replay(ReplayCommand),

    /// Drive a simulated cube along a stored trace
    #[command(about)]
    Drive(DriveCommand),

    /// Rename a stored trace
    #[command(about)]
    Rename(RenameCommand),

    /// Delete a stored trace
    #[command(about)]
    Delete(DeleteCommand),
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct RecordCommand {
    /// How long to record for, in seconds
    #[arg(short = 't', long = "seconds", default_value_t = 5.0)]
    pub seconds: f64,

    /// Name of the trace; the cube's name when omitted
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ReplayCommand {
    /// The trace to replay
    pub name: String,

    /// Stop at this record, like a replay slider
    #[arg(short = 'u', long = "upto")]
    pub upto: Option<usize>,

    /// Redraw step by step at the configured pace instead of all at once
    #[arg(short = 'a', long = "animate")]
    pub animate: bool,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct DriveCommand {
    /// The trace to drive along
    pub name: String,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct RenameCommand {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct DeleteCommand {
    pub name: String,
}
