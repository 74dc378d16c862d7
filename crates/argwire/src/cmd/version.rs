use argwire_call::{ChecksumType, CHUNK_HEADER_SIZE};
use argwire_frame::{HEADER_SIZE, MAX_PAYLOAD_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("argwire {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "build: {} ({})",
        option_env!("ARGWIRE_BUILD_TARGET").unwrap_or("unknown"),
        option_env!("ARGWIRE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("frame header: {HEADER_SIZE} bytes, max payload: {MAX_PAYLOAD_SIZE} bytes");
    println!("chunk header: {CHUNK_HEADER_SIZE} bytes");

    let checksums: Vec<String> = [ChecksumType::None, ChecksumType::Crc32, ChecksumType::Crc32C]
        .iter()
        .map(|ty| format!("{ty} ({})", ty.code()))
        .collect();
    println!("checksums: {}", checksums.join(", "));

    Ok(SUCCESS)
}
