//! dlo-driver
//!
//! Brings up DisplayLink adapters attached to this host: identifies each one,
//! opens its bulk endpoint, reads the monitor's EDID and selects the
//! authorization channel. Follows hot-plug events until interrupted.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{LogFormat, UsbBridge, UsbEvent, create_usb_bridge, setup_logging};
use driver::usb::{EventWaker, UsbHost, spawn_usb_worker};
use driver::{Driver, DriverConfig, DriverSettings};
use protocol::{BusAddress, Serial};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dlo-driver")]
#[command(author, version, about = "DisplayLink adapter driver")]
#[command(long_about = "
Identifies attached DisplayLink adapters, claims their bulk endpoint, reads
the connected monitor's EDID and selects the authorization channel.

EXAMPLES:
    # Bring up attached adapters and follow hot-plug events
    dlo-driver

    # List USB devices and exit
    dlo-driver --list-devices

    # Stream a prepared command file to every adapter, then exit
    dlo-driver --write commands.bin --once

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/dlo-driver/driver.toml
    3. /etc/dlo-driver/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Command stream written to each adapter after it is mounted
    #[arg(short, long, value_name = "FILE")]
    write: Option<std::path::PathBuf>,

    /// Exit after the initial enumeration
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DriverConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level, LogFormat::Pretty).context("Failed to setup logging")?;

    info!("dlo-driver v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let settings = config
        .driver_settings()
        .context("Invalid driver settings")?;

    let payload = match &args.write {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("Failed to read command file: {}", path.display()))?,
        ),
        None => None,
    };

    let (usb_bridge, worker) = create_usb_bridge();
    let (usb_worker_handle, waker) =
        spawn_usb_worker(worker, config.event_poll()).context("Failed to spawn USB worker")?;

    let result = if args.list_devices {
        list_devices_mode(usb_bridge, waker).await
    } else {
        run_service(settings, usb_bridge, waker, payload, args.once).await
    };

    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    result
}

/// List USB devices and exit
async fn list_devices_mode(usb_bridge: UsbBridge, waker: EventWaker) -> Result<()> {
    info!("Listing USB devices...");

    let devices = tokio::task::spawn_blocking(move || {
        let mut host = UsbHost::with_waker(usb_bridge, Box::new(waker));
        let devices = common::TransferEngine::list_devices(&mut host);
        host.shutdown();
        devices
    })
    .await
    .context("Device listing task failed")?
    .map_err(|e| anyhow!("Failed to list devices: {}", e))?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            let marker = if device.is_supported() { "  [adapter]" } else { "" };
            println!(
                "  Bus {:03} Device {:03} {:04x}:{:04x}{}",
                device.address.bus,
                device.address.address,
                device.vendor_id,
                device.product_id,
                marker
            );
        }
    }

    Ok(())
}

/// Mount attached adapters, then follow hot-plug events until Ctrl+C
async fn run_service(
    settings: DriverSettings,
    usb_bridge: UsbBridge,
    waker: EventWaker,
    payload: Option<Vec<u8>>,
    once: bool,
) -> Result<()> {
    let (event_tx, event_rx) = async_channel::unbounded::<UsbEvent>();
    let host = UsbHost::with_waker(usb_bridge.clone(), Box::new(waker));

    let driver_task = tokio::task::spawn_blocking(move || {
        let mut driver = Driver::init(host, settings);

        match driver.list_devices() {
            Ok(devices) => {
                for device in devices.into_iter().filter(|d| d.is_supported()) {
                    mount(&mut driver, device.address, payload.as_deref());
                }
            }
            Err(e) => error!("Initial enumeration failed: {}", e),
        }

        if !once {
            while let Ok(event) = event_rx.recv_blocking() {
                match event {
                    UsbEvent::DeviceArrived { device } if device.is_supported() => {
                        mount(&mut driver, device.address, payload.as_deref());
                    }
                    UsbEvent::DeviceArrived { .. } => {}
                    UsbEvent::DeviceLeft { address } => {
                        driver.on_unmount(address);
                    }
                }
            }
        }

        driver.shutdown().shutdown();
    });

    if !once {
        info!("Press Ctrl+C to shutdown");
        loop {
            tokio::select! {
                event = usb_bridge.recv_event() => match event {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("USB event channel closed: {}", e);
                        break;
                    }
                },
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                    }
                    break;
                }
            }
        }
    }

    event_tx.close();
    driver_task.await.context("Driver task failed")?;

    info!("Driver shutdown complete");
    Ok(())
}

fn mount(driver: &mut Driver<UsbHost>, address: BusAddress, payload: Option<&[u8]>) {
    let serial = match driver.on_mount(address) {
        Ok(serial) => serial,
        Err(e) => {
            warn!("Failed to mount adapter at {}: {}", address, e);
            return;
        }
    };

    if let Some(bytes) = payload
        && let Err(e) = write_payload(driver, &serial, bytes)
    {
        warn!("Writing command file to {} failed: {}", serial, e);
    }
}

/// Stream `bytes` through the staging buffer, one buffer-full at a time
fn write_payload(driver: &mut Driver<UsbHost>, serial: &Serial, bytes: &[u8]) -> Result<()> {
    let capacity = driver.settings().staging_capacity;
    for chunk in bytes.chunks(capacity) {
        driver.stage(serial, chunk)?;
        driver.write(serial)?;
    }
    info!("Wrote {} bytes to {}", bytes.len(), serial);
    Ok(())
}
