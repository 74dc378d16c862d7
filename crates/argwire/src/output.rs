use std::fmt::Write as _;
use std::io::IsTerminal;

use argwire_call::{
    parse_inbound_fragment, ErrorMessage, FragmentMessages, Message, RequestMessages,
    ResponseMessages,
};
use argwire_frame::{Frame, MessageType, ReadBuffer};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One frame as shown to the user.
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub direction: &'static str,
    pub id: u32,
    pub message_type: &'static str,
    pub frame_size: usize,
    pub more_fragments: bool,
    pub checksum_type: String,
    pub checksum: String,
    pub chunk_bytes: usize,
    /// Set for error frames and fragments that do not parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FrameRecord {
    pub fn describe(direction: &'static str, frame: &Frame) -> Self {
        let message_type = frame.header.message_type;
        let mut record = Self {
            direction,
            id: frame.header.id,
            message_type: message_type.name(),
            frame_size: frame.wire_size(),
            more_fragments: false,
            checksum_type: String::new(),
            checksum: String::new(),
            chunk_bytes: 0,
            note: None,
        };

        if message_type == MessageType::Error {
            let mut message = ErrorMessage::default();
            let parsed = message.read(&mut ReadBuffer::new(frame.clone().into_payload()));
            record.note = Some(match parsed {
                Ok(()) => format!("peer error {:#04x}: {}", message.code, message.message),
                Err(err) => format!("malformed error frame: {err}"),
            });
            return record;
        }

        let initial = matches!(message_type, MessageType::CallReq | MessageType::CallRes);
        let mut request = RequestMessages::default();
        let mut response = ResponseMessages::default();
        let envelope = match message_type {
            MessageType::CallReq | MessageType::CallReqContinue => request.for_fragment(initial),
            _ => response.for_fragment(initial),
        };

        match parse_inbound_fragment(frame.clone(), envelope) {
            Ok(fragment) => {
                record.more_fragments = fragment.has_more_fragments();
                record.checksum_type = fragment.checksum_type.to_string();
                record.checksum = hex(&fragment.checksum);
                record.chunk_bytes = fragment.contents.bytes_remaining();
                if message_type == MessageType::CallReq {
                    record.note = Some(format!(
                        "service={} ttl={}ms",
                        request.call_req.service,
                        request.call_req.ttl.as_millis()
                    ));
                }
            }
            Err(err) => record.note = Some(format!("unparseable fragment: {err}")),
        }
        record
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

pub fn print_frames(records: &[FrameRecord], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for record in records {
                println!(
                    "{}",
                    serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "DIR", "ID", "TYPE", "SIZE", "MORE", "CHECKSUM", "CHUNKS", "NOTE",
                ]);
            for record in records {
                table.add_row(vec![
                    record.direction.to_string(),
                    record.id.to_string(),
                    record.message_type.to_string(),
                    record.frame_size.to_string(),
                    record.more_fragments.to_string(),
                    format!("{} {}", record.checksum_type, record.checksum),
                    record.chunk_bytes.to_string(),
                    record.note.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!(
                    "{} id={} type={} size={} more={} checksum={}:{} chunks={}{}",
                    record.direction,
                    record.id,
                    record.message_type,
                    record.frame_size,
                    record.more_fragments,
                    record.checksum_type,
                    record.checksum,
                    record.chunk_bytes,
                    record
                        .note
                        .as_deref()
                        .map(|note| format!(" ({note})"))
                        .unwrap_or_default()
                );
            }
        }
    }
}

#[derive(Serialize)]
struct ArgsOutput<'a> {
    label: &'a str,
    args: [String; 3],
    sizes: [usize; 3],
}

pub fn print_args(label: &str, args: &[Vec<u8>; 3], format: OutputFormat) {
    let previews = [
        payload_preview(&args[0]),
        payload_preview(&args[1]),
        payload_preview(&args[2]),
    ];
    match format {
        OutputFormat::Json => {
            let out = ArgsOutput {
                label,
                args: previews,
                sizes: [args[0].len(), args[1].len(), args[2].len()],
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![label, "SIZE", "VALUE"]);
            for (i, (arg, preview)) in args.iter().zip(previews).enumerate() {
                table.add_row(vec![
                    format!("arg{}", i + 1),
                    arg.len().to_string(),
                    preview,
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (i, (arg, preview)) in args.iter().zip(previews).enumerate() {
                println!("{label} arg{} size={} value={preview}", i + 1, arg.len());
            }
        }
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if text.len() <= 64 => text.to_string(),
        Ok(_) | Err(_) => format!("<{} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use argwire_call::{CallReq, ChecksumType, WritableFragment};

    use super::*;

    #[test]
    fn describes_initial_request_fragment() {
        let checksum = ChecksumType::Crc32.new_checksum().unwrap();
        let call_req = CallReq::new("echo", Duration::from_millis(250));
        let mut fragment =
            WritableFragment::build(Frame::new(128), 4, &call_req, checksum.as_ref()).unwrap();
        fragment.contents().write_u16(0).unwrap();
        let frame = fragment.finish(checksum.as_ref(), true).unwrap();

        let record = FrameRecord::describe("out", &frame);
        assert_eq!(record.id, 4);
        assert_eq!(record.message_type, "call-req");
        assert!(record.more_fragments);
        assert_eq!(record.checksum_type, "crc32");
        assert_eq!(record.checksum, hex(&checksum.sum()));
        assert_eq!(record.chunk_bytes, 2);
        assert_eq!(record.note.as_deref(), Some("service=echo ttl=250ms"));
    }

    #[test]
    fn describes_garbage_without_panicking() {
        let frame = Frame::with_payload(1, MessageType::CallResContinue, &[0x00, 0x01]).unwrap();
        let record = FrameRecord::describe("in", &frame);
        assert!(record.note.unwrap().starts_with("unparseable fragment"));
    }

    #[test]
    fn previews_long_and_binary_payloads() {
        assert_eq!(payload_preview(b"ok"), "ok");
        assert_eq!(payload_preview(&[0xFF, 0xFE]), "<2 bytes>");
        assert_eq!(payload_preview(&[b'a'; 100]), "<100 bytes>");
    }
}
