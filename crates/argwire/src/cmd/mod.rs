use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use argwire_call::ChecksumType;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod decode;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one call through an in-process client and echo server.
    Call(CallArgs),
    /// Print the frames stored in a capture file.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ChecksumArg {
    None,
    Crc32,
    Crc32c,
}

impl From<ChecksumArg> for ChecksumType {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::None => ChecksumType::None,
            ChecksumArg::Crc32 => ChecksumType::Crc32,
            ChecksumArg::Crc32c => ChecksumType::Crc32C,
        }
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Service name carried in the call request.
    #[arg(long, default_value = "echo")]
    pub service: String,
    /// First argument (usually the method name).
    #[arg(long, default_value = "")]
    pub arg1: String,
    /// Second argument (usually application headers).
    #[arg(long, default_value = "")]
    pub arg2: String,
    /// Third argument (the body).
    #[arg(long, conflicts_with = "arg3_file")]
    pub arg3: Option<String>,
    /// Read the third argument from a file.
    #[arg(long, value_name = "FILE")]
    pub arg3_file: Option<PathBuf>,
    /// Payload capacity of each frame in bytes.
    #[arg(long, default_value = "65519")]
    pub frame_size: usize,
    /// Checksum applied to argument bytes.
    #[arg(long, value_enum, default_value = "crc32")]
    pub checksum: ChecksumArg,
    /// Frames allowed in the send queue before writes fail.
    #[arg(long, default_value = "512")]
    pub send_buffer: usize,
    /// Call time-to-live (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub ttl: String,
    /// Also write every frame, in both directions, to a capture file.
    #[arg(long, value_name = "FILE")]
    pub capture: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file written by `call --capture`.
    pub path: PathBuf,
    /// Stop after N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
