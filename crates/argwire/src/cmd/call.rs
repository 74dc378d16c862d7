use std::fs::{self, File};
use std::io::Write;
use std::time::Duration;

use argwire_call::{CallConfig, CallReq, Connection};
use argwire_frame::{Frame, FrameWriter};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cmd::CallArgs;
use crate::exit::{call_error, frame_error, io_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_args, print_frames, FrameRecord, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let ttl = parse_duration(&args.ttl)?;
    if args.frame_size == 0 {
        return Err(CliError::new(USAGE, "--frame-size must be greater than zero"));
    }
    let arg3 = resolve_arg3(&args)?;
    let config = CallConfig {
        checksum_type: args.checksum.into(),
        send_buffer_size: args.send_buffer,
        exchange_buffer_size: args.send_buffer,
        frame_payload_capacity: args.frame_size,
    };

    let mut capture = match &args.capture {
        Some(path) => Some(FrameWriter::new(File::create(path).map_err(|err| {
            io_error(&format!("failed creating {}", path.display()), err)
        })?)),
        None => None,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed starting runtime", err))?;

    let call_req = CallReq::new(args.service.clone(), ttl);
    let request = [args.arg1.into_bytes(), args.arg2.into_bytes(), arg3];
    let outcome = runtime.block_on(echo_call(config, call_req, &request, &mut capture))?;

    print_frames(&outcome.records, format);
    print_args("response", &outcome.response, format);
    Ok(SUCCESS)
}

struct EchoOutcome {
    records: Vec<FrameRecord>,
    response: [Vec<u8>; 3],
}

/// Send `request` from a client connection to a server connection that
/// echoes the arguments back, recording every frame in between.
async fn echo_call<W: Write>(
    config: CallConfig,
    call_req: CallReq,
    request: &[Vec<u8>; 3],
    capture: &mut Option<FrameWriter<W>>,
) -> CliResult<EchoOutcome> {
    let (client, mut to_server) = Connection::new(config);
    let (server, mut to_client) = Connection::new(config);
    let mut records = Vec::new();

    let mut call = client
        .begin_call(call_req)
        .map_err(|err| call_error("failed starting call", err))?;
    call.request()
        .write_args(&request[0], &request[1], &request[2])
        .map_err(|err| call_error("failed writing request", err))?;

    let mut inbound = None;
    for frame in drain(&mut to_server) {
        record(&mut records, capture, "request", &frame)?;
        if let Some(accepted) = server
            .handle_frame(frame)
            .map_err(|err| call_error("failed routing request frame", err))?
        {
            inbound = Some(accepted);
        }
    }
    let mut inbound =
        inbound.ok_or_else(|| CliError::new(INTERNAL, "server received no call request"))?;
    debug!(id = inbound.id(), service = inbound.service(), "server accepted call");

    let echoed = inbound
        .request()
        .read_args()
        .await
        .map_err(|err| call_error("server failed reading request", err))?;
    inbound
        .response()
        .write_args(&echoed[0], &echoed[1], &echoed[2])
        .map_err(|err| call_error("server failed writing response", err))?;

    for frame in drain(&mut to_client) {
        record(&mut records, capture, "response", &frame)?;
        client
            .handle_frame(frame)
            .map_err(|err| call_error("failed routing response frame", err))?;
    }

    let response = call
        .response()
        .read_args()
        .await
        .map_err(|err| call_error("failed reading response", err))?;
    info!(
        id = call.id(),
        frames = records.len(),
        "call completed"
    );
    Ok(EchoOutcome { records, response })
}

fn drain(receiver: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = receiver.try_recv() {
        frames.push(frame);
    }
    frames
}

fn record<W: Write>(
    records: &mut Vec<FrameRecord>,
    capture: &mut Option<FrameWriter<W>>,
    direction: &'static str,
    frame: &Frame,
) -> CliResult<()> {
    if let Some(writer) = capture.as_mut() {
        writer
            .write_frame(frame)
            .map_err(|err| frame_error("failed writing capture", err))?;
    }
    records.push(FrameRecord::describe(direction, frame));
    Ok(())
}

fn resolve_arg3(args: &CallArgs) -> CliResult<Vec<u8>> {
    if let Some(arg3) = &args.arg3 {
        return Ok(arg3.as_bytes().to_vec());
    }
    if let Some(path) = &args.arg3_file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
