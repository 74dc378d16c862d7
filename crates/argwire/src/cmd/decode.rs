use std::fs::File;
use std::io::{BufReader, Read};

use argwire_frame::{FrameError, FrameReader, MessageType};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_frames, FrameRecord, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let file = File::open(&args.path)
        .map_err(|err| io_error(&format!("failed opening {}", args.path.display()), err))?;
    let mut reader = FrameReader::new(BufReader::new(file));
    let records = read_records(&mut reader, args.count)?;
    print_frames(&records, format);
    Ok(SUCCESS)
}

fn read_records<R: Read>(
    reader: &mut FrameReader<R>,
    limit: Option<usize>,
) -> CliResult<Vec<FrameRecord>> {
    let mut records = Vec::new();
    while limit.is_none_or(|limit| records.len() < limit) {
        match reader.read_frame() {
            Ok(frame) => {
                let direction = direction_of(frame.header.message_type);
                records.push(FrameRecord::describe(direction, &frame));
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(frame_error("failed decoding capture", err)),
        }
    }
    Ok(records)
}

fn direction_of(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::CallReq | MessageType::CallReqContinue => "request",
        MessageType::CallRes | MessageType::CallResContinue | MessageType::Error => "response",
    }
}
