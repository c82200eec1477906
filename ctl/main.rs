#![forbid(unsafe_code)]

//! `remote-eval-cli` — companion client for `remote-eval`.
//!
//! Connects to the server over TCP, optionally authenticates, submits code,
//! and prints responses until the terminal one arrives. Designed for manual
//! testing and shell scripting; the wire format is one length-prefixed JSON
//! frame per message (4-byte big-endian length, then the payload).

use std::io::{Read, Write};
use std::net::TcpStream;

use clap::Parser;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "remote-eval-cli",
    about = "Submit code to a remote-eval server",
    version,
    long_about = None
)]
struct Cli {
    /// Server address, `host:port`.
    #[arg(long, default_value = "127.0.0.1:4777")]
    addr: String,

    /// Authentication token (omit when the server does not require one).
    #[arg(long)]
    token: Option<String>,

    /// Request id; generated when omitted.
    #[arg(long)]
    id: Option<String>,

    /// Ask for streamed output chunks instead of one buffered result.
    #[arg(long)]
    stream: bool,

    /// Code to execute; read from stdin when omitted.
    code: Option<String>,
}

fn main() {
    let args = Cli::parse();

    match run(&args) {
        Ok(failed) => {
            if failed {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!("Is remote-eval listening on {}?", args.addr);
            std::process::exit(1);
        }
    }
}

/// Send the request and print responses. Returns whether the server
/// reported an error for the request.
fn run(args: &Cli) -> std::result::Result<bool, Box<dyn std::error::Error>> {
    let code = match args.code {
        Some(ref code) => code.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let id = args
        .id
        .clone()
        .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4().simple()));

    let mut stream = TcpStream::connect(&args.addr)?;

    // Token and code travel in one message: authentication and first
    // execution may be combined.
    let mut request = serde_json::json!({
        "id": id,
        "code": code,
        "stream": args.stream,
    });
    if let Some(ref token) = args.token {
        request["token"] = Value::String(token.clone());
    }

    write_frame(&mut stream, &request)?;

    let mut failed = false;
    loop {
        let response = read_frame(&mut stream)?;

        if let Some(err) = response.get("error").and_then(Value::as_str) {
            eprintln!("Error: {err}");
            failed = true;
        }
        if let Some(output) = response.get("output").and_then(Value::as_str) {
            if !output.is_empty() {
                println!("{output}");
            }
        }

        if response
            .get("stream_end")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            break;
        }
    }

    Ok(failed)
}

/// Write one length-prefixed JSON frame.
fn write_frame(
    stream: &mut TcpStream,
    payload: &Value,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let bytes = serde_json::to_vec(payload)?;
    let declared = u32::try_from(bytes.len())?;
    stream.write_all(&declared.to_be_bytes())?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
fn read_frame(stream: &mut TcpStream) -> std::result::Result<Value, Box<dyn std::error::Error>> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let declared = usize::try_from(u32::from_be_bytes(prefix))?;

    let mut payload = vec![0u8; declared];
    stream.read_exact(&mut payload)?;

    Ok(serde_json::from_slice(&payload)?)
}
