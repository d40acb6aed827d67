//! Minimal demonstration of the link façade: connects, reads device
//! identity, enables the ECG stream, and prints decoded records as they
//! arrive. Not the CLI entry point — just the seam other code plugs into.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bht_link::config::LinkConfig;
use bht_link::link::{DeviceDiscovery, SerialTransportFactory};
use bht_link::{init_logging, BioHarnessLink, Message};

struct NoDiscovery;

impl DeviceDiscovery for NoDiscovery {
    fn discover(&self) -> std::io::Result<Vec<(String, String)>> {
        Ok(vec![])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = init_logging(Path::new("./logs"))?;

    let address = std::env::args().nth(1).unwrap_or_else(|| "/dev/rfcomm0".to_string());
    let config = LinkConfig { address: Some(address), ..Default::default() };

    let mut link = BioHarnessLink::start(config, Arc::new(SerialTransportFactory), Arc::new(NoDiscovery))?;

    let serial = link.get_serial_number().await?;
    println!("connected to device {serial}");

    link.toggle_ecg(Some(Arc::new(|msg: Message| {
        println!("{:?}", msg.record.as_map());
    })))
    .await?;

    tokio::time::sleep(Duration::from_secs(30)).await;

    link.toggle_ecg(None).await?;
    link.shutdown().await;
    Ok(())
}
