//! Decodes hex-encoded produce frames and prints what they carry.
//!
//! Input comes from the command line or, when omitted, from stdin. Whitespace in the hex dump
//! is ignored. Set RUST_LOG=kafka_wire_codec=trace to follow the decoder.

use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kafka_wire_codec::protocol::message::MessageSet;
use kafka_wire_codec::protocol::record_batch::RecordBatch;
use kafka_wire_codec::protocol::records::Records;
use kafka_wire_codec::protocol::request::produce::ProduceRequest;
use kafka_wire_codec::protocol::request::{decode_request, RequestHeader};
use kafka_wire_codec::protocol::response::decode_response;
use kafka_wire_codec::protocol::response::produce::ProduceResponse;
use kafka_wire_codec::{decode, Config};

#[derive(Parser)]
#[command(name = "kafka-wire-inspect")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Largest length or decompressed payload accepted, in bytes
    #[arg(long)]
    max_response_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// A size-prefixed produce request, header included
    Request { hex: Option<String> },
    /// A size-prefixed produce response
    Response {
        /// Produce API version the response answers
        #[arg(short = 'v', long)]
        api_version: i16,
        hex: Option<String>,
    },
    /// A bare record batch
    Batch { hex: Option<String> },
    /// A bare legacy message set
    MessageSet { hex: Option<String> },
}

fn read_frame(hex: Option<String>) -> Result<Vec<u8>> {
    let text = match hex {
        Some(text) => text,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("read stdin")?;
            text
        }
    };
    let compact: String = text.split_whitespace().collect();
    hex::decode(compact).context("parse hex input")
}

/// Directives from RUST_LOG when it parses, otherwise warnings from the codec only.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("kafka_wire_codec=warn"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(
            std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
        ))
        .init();

    let cli = Cli::parse();
    let mut config = Config::default();
    if let Some(max) = cli.max_response_size {
        config = config.with_max_response_size(max);
    }

    match cli.command {
        Commands::Request { hex } => {
            let frame = read_frame(hex)?;
            info!(len = frame.len(), "decoding produce request");
            let (header, request): (RequestHeader, ProduceRequest) =
                decode_request(&frame, &config).context("decode produce request")?;
            print_request(&header, &request);
        }
        Commands::Response { api_version, hex } => {
            let frame = read_frame(hex)?;
            let (header, response): (_, ProduceResponse) =
                decode_response(&frame, api_version, &config).context("decode produce response")?;
            println!("correlation id {}", header.correlation_id);
            print_response(&response);
        }
        Commands::Batch { hex } => {
            let frame = read_frame(hex)?;
            let batch: RecordBatch = decode(&frame, 3, &config).context("decode record batch")?;
            print_batch(&batch, "");
        }
        Commands::MessageSet { hex } => {
            let frame = read_frame(hex)?;
            let set: MessageSet = decode(&frame, 0, &config).context("decode message set")?;
            print_set(&set, "");
        }
    }
    Ok(())
}

fn print_request(header: &RequestHeader, request: &ProduceRequest) {
    println!(
        "{:?} v{} correlation id {} client {:?}",
        header.api_key, header.api_version, header.correlation_id, header.client_id
    );
    println!(
        "acks {} timeout {}ms transactional id {:?}",
        request.required_acks.0, request.timeout, request.transactional_id
    );
    for (topic, partitions) in &request.records {
        for (partition, records) in partitions {
            println!("{topic}/{partition}: {} entries", records.len());
            match records {
                Records::Legacy(set) => print_set(set, "  "),
                Records::Batch(batch) => print_batch(batch, "  "),
            }
        }
    }
}

fn print_response(response: &ProduceResponse) {
    for (topic, partitions) in &response.blocks {
        for (partition, block) in partitions {
            let error = match block.error() {
                Ok(code) => format!("{code:?}"),
                Err(raw) => format!("unknown error {raw}"),
            };
            println!(
                "{topic}/{partition}: {error} offset {} timestamp {:?} log start {:?}",
                block.offset, block.timestamp, block.log_start_offset
            );
        }
    }
    if let Some(throttle) = response.throttle_time_ms {
        println!("throttled {throttle}ms");
    }
}

fn print_set(set: &MessageSet, indent: &str) {
    for (offset, msg) in set.messages() {
        println!(
            "{indent}offset {offset} magic {} timestamp {:?} key {} value {}",
            msg.version,
            msg.timestamp,
            show(msg.key.as_deref()),
            show(msg.value.as_deref())
        );
    }
}

fn print_batch(batch: &RecordBatch, indent: &str) {
    println!(
        "{indent}batch base offset {} codec {:?} producer {}/{} transactional {} control {}",
        batch.base_offset,
        batch.codec,
        batch.producer_id,
        batch.producer_epoch,
        batch.transactional,
        batch.control
    );
    for (offset, timestamp, record) in batch.absolute_records() {
        println!(
            "{indent}  offset {offset} timestamp {timestamp} key {} value {} headers {}",
            show(record.key.as_deref()),
            show(record.value.as_deref()),
            record.headers.len()
        );
    }
}

fn show(bytes: Option<&[u8]>) -> String {
    match bytes {
        None => "null".to_string(),
        Some(b) => match std::str::from_utf8(b) {
            Ok(s) if !s.chars().any(char::is_control) => format!("{s:?}"),
            _ => hex::encode(b),
        },
    }
}
