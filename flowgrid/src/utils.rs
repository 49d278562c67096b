//! # Utility module

use anyhow::{anyhow, Result};
use log::*;
use std::io::Read;
use std::net::{TcpListener, TcpStream};

/// Linearly map `value` from one range onto another.
///
/// The value is not clamped. An inverted target range flips the direction of the mapping.
///
/// # Arguments
///
/// * `value` - value to map.
/// * `from` - `(start, end)` of the source range.
/// * `to` - `(start, end)` of the target range.
pub fn map_range(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let (a, b) = from;
    let (c, d) = to;
    c + (value - a) / (b - a) * (d - c)
}

/// Open a file or an input stream.
///
/// `tcp://host:port` connects to a remote stream, `tcp://@:port` listens for a single
/// connection. Anything else is treated as a file path.
pub fn open_file(input: &str) -> Result<Box<dyn Read + Send>> {
    if let Some(input) = input.strip_prefix("tcp://") {
        let (addr, port) = input
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid format"))?;
        let port: u16 = str::parse(port)?;

        let stream = if addr == "@" {
            let listener = TcpListener::bind(("0.0.0.0", port))?;
            info!("Listening on port {}", port);
            let (sock, addr) = listener.accept()?;
            info!("Accept {}", addr);
            sock
        } else {
            info!("Connecting to {}", input);
            TcpStream::connect(input)?
        };

        Ok(Box::new(stream))
    } else {
        std::fs::File::open(input)
            .map(|i| Box::new(i) as _)
            .map_err(Into::into)
    }
}
