//! Watch a phx42 over a TCP-bridged serial link and print its readings.
//!
//! Usage: `cargo run --example phx42_monitor -- 192.168.1.50:4242`

use std::env;

use phxlink_core::{DeviceEvent, InputStream, OutputStream, Phx42};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4242".to_string());

    println!("Connecting to {}...", addr);
    let stream = TcpStream::connect(&addr).await?;
    let (reader, writer) = stream.into_split();

    let engine = Phx42::start(InputStream::new(reader), OutputStream::new(writer)).await?;
    println!("Firmware: {}", engine.get_firmware_version().await?);

    let mut events = engine.subscribe();
    engine.start_polling_data(1000).await?;

    for _ in 0..30 {
        match events.recv().await? {
            DeviceEvent::DataPolled { ppm, .. } if ppm >= 0.0 => {
                println!("PPM: {}", ppm);
            }
            DeviceEvent::DataPolled { .. } => {
                println!("PPM: N/A (not ignited)");
            }
            DeviceEvent::Error { message } => eprintln!("error: {}", message),
            DeviceEvent::CommandError { kind, message } => {
                eprintln!("device error ({:?}): {}", kind, message);
            }
            _ => {}
        }
    }

    engine.stop_polling_data().await?;
    engine.shutdown().await;
    Ok(())
}
