//! Link subsystem for BioHarness-class chest-strap telemetry: wire protocol
//! codec and the transport/RPC engine that drives it over a serial-style
//! connection to the device.
//!
//! This crate owns framing, CRC validation, bit-packed payload decoding,
//! and the concurrent link that interleaves command/response RPC with
//! continuous periodic telemetry. It does not own a CLI, argument parsing,
//! or any downstream data-publication layer — those are external
//! collaborators that depend on this crate, not the other way around.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bht_link::config::LinkConfig;
//! use bht_link::link::{BioHarnessLink, SerialTransportFactory};
//!
//! # async fn doc() -> Result<(), bht_link::error::LinkError> {
//! struct NoDiscovery;
//! impl bht_link::link::DeviceDiscovery for NoDiscovery {
//!     fn discover(&self) -> std::io::Result<Vec<(String, String)>> {
//!         Ok(vec![])
//!     }
//! }
//!
//! let config = LinkConfig { address: Some("/dev/rfcomm0".to_string()), ..Default::default() };
//! let mut link = BioHarnessLink::start(config, Arc::new(SerialTransportFactory), Arc::new(NoDiscovery))?;
//! let serial = link.get_serial_number().await?;
//! link.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod link;

pub use codec::message::{Fin, Message, MessageId, Record};
pub use config::LinkConfig;
pub use error::{LinkError, LinkResult};
pub use link::{BioHarnessLink, Handler, LinkEngine, StreamKind};

use flexi_logger::{Cleanup, Criterion, DeferredNow, Duplicate, FileSpec, Logger, Naming, WriteMode};
use log::Record as LogRecord;
use std::io::Write;
use std::path::Path;

/// Stderr: colored, time-only, shortened module path.
fn stderr_format(w: &mut dyn Write, now: &mut DeferredNow, record: &LogRecord) -> std::io::Result<()> {
    let module = record.module_path().unwrap_or("<unknown>").strip_prefix("bht_link::").unwrap_or(record.module_path().unwrap_or("<unknown>"));
    write!(w, "{} {:<5} [{}] {}", now.format("%H:%M:%S%.3f"), record.level(), module, record.args())
}

/// File: no colors, full date+time, shortened module path.
fn file_format(w: &mut dyn Write, now: &mut DeferredNow, record: &LogRecord) -> std::io::Result<()> {
    let module = record.module_path().unwrap_or("<unknown>").strip_prefix("bht_link::").unwrap_or(record.module_path().unwrap_or("<unknown>"));
    write!(w, "{} {:<5} [{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), record.level(), module, record.args())
}

/// Initialize structured logging for the link subsystem: file (rotated,
/// size-based) plus a duplicated stderr stream. Host applications (the
/// out-of-scope CLI) call this once at startup; this crate never installs
/// a logger on its own (a library shouldn't reach for global state behind
/// its caller's back).
pub fn init_logging(log_dir: &Path) -> Result<flexi_logger::LoggerHandle, error::LinkError> {
    let to_link_err = |e: impl std::fmt::Display| {
        error::LinkError::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    };
    std::fs::create_dir_all(log_dir)?;
    Logger::try_with_env_or_str("info, bht_link=debug")
        .map_err(to_link_err)?
        .log_to_file(FileSpec::default().directory(log_dir).basename("bht-link"))
        .rotate(Criterion::Size(5_000_000), Naming::Timestamps, Cleanup::KeepLogFiles(5))
        .write_mode(WriteMode::BufferAndFlush)
        .format_for_files(file_format)
        .duplicate_to_stderr(Duplicate::Info)
        .format_for_stderr(stderr_format)
        .start()
        .map_err(to_link_err)
}
