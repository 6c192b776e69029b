//! This crate speaks the wire protocol of the host-side ADB server:
//! the daemon that `adb` starts on `127.0.0.1:5037` and that
//! multiplexes every attached Android device. The library opens a
//! short-lived TCP connection per request, frames length-prefixed
//! textual service requests, parses the `OKAY`/`FAIL` status words
//! and exposes typed operations on top: device discovery, port
//! forwarding in both directions, streaming shell commands, an
//! interactive prompt-synchronised shell session, the binary logcat
//! stream, framebuffer capture and APK installation.
//!
//! ## Usage
//!
//! Add `adbwire` to the dependencies in your project's `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! adbwire = "0.1.0"
//! ```
//!
//! The main entry point is [`client::AdbClient`]. Every operation
//! acquires a fresh connection, so a client is cheap to clone and
//! share; nothing is pooled.
//!
//! ## Terminology Used
//!
//! - `service request`: a framed command such as `host:version` or
//!   `shell:ls`, four hex digits of payload length followed by the
//!   payload.
//!
//! - `transport switch`: the `host:transport:<serial>` preamble that
//!   binds a connection to one device before device-scoped requests.
//!
//! - `forward` / `reverse forward`: a TCP or local-socket proxy from
//!   host to device (or device to host), described by a pair of
//!   [`device::ForwardSpec`] values.
//!
//! - `receiver`: a sink that consumes shell output lines, see
//!   [`receiver::ShellReceiver`].
//!
//! ## Example
//!
//! ```rust no_run
//! use adbwire::client::AdbClient;
//!
//! # #[tokio::main]
//! # async fn main() -> adbwire::error::Result<()> {
//! let client = AdbClient::default();
//! println!("server version {}", client.get_adb_version().await?);
//! for device in client.get_devices().await? {
//!     println!("{device}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cancel;

pub mod client;

pub mod device;

pub mod error;

pub mod framebuffer;

pub mod logcat;

pub mod net;

pub mod receiver;

pub mod shell;

pub mod wire;

#[cfg(test)]
pub(crate) fn test_with_logs() {
    let debug_test = std::env::var("ADBWIRE_DEBUG_TEST").unwrap_or_default() == "true";
    if debug_test {
        use env_logger::Builder;
        use log::LevelFilter;
        let mut builder = Builder::from_default_env();
        let _ = builder.filter(None, LevelFilter::Debug).try_init();
    }
}
