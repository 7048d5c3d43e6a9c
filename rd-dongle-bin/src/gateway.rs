//! Wires every component together and runs until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rd_dongle_bridge::ModbusBridge;
use rd_dongle_config::{ConfigStore, Settings};
use rd_dongle_core::{
    sync_psu_clock, DongleInfo, EngineGate, LogAdvertiser, RebootController, RebootReason,
    ServiceAdvertiser,
};
use rd_dongle_modbus::ModbusMaster;
use rd_dongle_scpi::{Identity, RawScpiServer, ScpiEngine};
use rd_dongle_vxi11::{PortmapServer, VxiServer};
use rd_dongle_web::{ControlServer, StagingFirmwareSink, WebState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long to wait for the power supply firmware to boot before giving
/// up and starting degraded.
const PSU_BOOT_WAIT: Duration = Duration::from_secs(5);
const PSU_BOOT_POLL: Duration = Duration::from_millis(100);

/// Run the gateway. Returns once shutdown (ctrl-c or a scheduled reboot)
/// has completed; a reboot request is reported so the supervisor knows a
/// restart is wanted.
pub async fn run(settings: Settings) -> anyhow::Result<Option<RebootReason>> {
    let root = CancellationToken::new();
    let reboot = RebootController::new(root.clone());

    let mut store = ConfigStore::open(&settings.config_path)
        .with_context(|| format!("opening {}", settings.config_path.display()))?;
    if store.take_portal_on_boot()? {
        // Provisioning is an external collaborator; the flag only needs
        // to be consumed here so it fires once.
        info!("configuration portal requested for this boot");
    }
    let baudrate = store.uart_baudrate();

    let master = ModbusMaster::open(&settings.serial_device, baudrate)
        .with_context(|| format!("opening serial device {}", settings.serial_device))?;

    // Give the PSU firmware time to boot before declaring it absent.
    let deadline = tokio::time::Instant::now() + PSU_BOOT_WAIT;
    let profile = loop {
        match master.begin().await {
            Ok(profile) => break Some(profile),
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    warn!(error = %e, "power supply not identified, starting degraded");
                    break None;
                }
                tokio::time::sleep(PSU_BOOT_POLL).await;
            }
        }
    };

    let info = DongleInfo::for_profile(profile.as_deref());
    info!(hostname = %info.hostname, version = info.version, "dongle identity");
    let advertiser: Arc<dyn ServiceAdvertiser> = Arc::new(LogAdvertiser);

    let gate = EngineGate::new();
    let identity = match profile.as_deref() {
        Some(profile) => Identity::from_profile(profile),
        None => Identity {
            manufacturer: "Riden",
            model: "unknown".to_string(),
            serial_number: "00000000".to_string(),
            firmware: "0.0".to_string(),
        },
    };
    let engine = ScpiEngine::new(master.clone(), gate.clone(), identity).into_shared();

    let scpi = RawScpiServer::start(
        SocketAddr::new(settings.bind_address, settings.scpi_port),
        Arc::clone(&engine),
        gate.clone(),
        root.clone(),
    )
    .await
    .context("starting raw scpi server")?;

    let bridge = ModbusBridge::start(
        SocketAddr::new(settings.bind_address, settings.modbus_tcp_port),
        master.clone(),
        root.clone(),
    )
    .await
    .context("starting modbus tcp bridge")?;

    let vxi = VxiServer::start(
        settings.bind_address,
        settings.vxi_port_start,
        settings.vxi_port_end,
        engine,
        gate,
        Arc::clone(&advertiser),
        root.clone(),
    )
    .await;

    PortmapServer::start(
        settings.bind_address,
        settings.rpc_bind_port,
        vxi.port_handle(),
        root.clone(),
    )
    .await
    .context("starting portmap")?;

    if profile.is_some() {
        let timezone = store.timezone_name().to_string();
        if let Err(e) = sync_psu_clock(&master, &timezone).await {
            warn!(error = %e, "psu clock sync failed");
        }
    }

    let store = Arc::new(Mutex::new(store));
    let state = WebState {
        master: master.clone(),
        info: info.clone(),
        store,
        scpi: scpi.clone(),
        bridge: bridge.clone(),
        vxi: vxi.clone(),
        reboot: reboot.clone(),
        firmware: Arc::new(StagingFirmwareSink::new(
            settings.firmware_staging_path.clone(),
        )),
        advertised: settings.advertised_address,
        http_port: settings.http_port,
    };
    let web = ControlServer::start(
        SocketAddr::new(settings.bind_address, settings.http_port),
        state,
        root.clone(),
    )
    .await
    .context("starting http control surface")?;

    // Services are only worth discovering with a PSU behind them.
    if profile.is_some() {
        advertiser.advertise("http", web.port(), &[]);
        advertiser.advertise("lxi", web.port(), &[]);
        advertiser.advertise("scpi-raw", scpi.port(), &[("version", "1999.0")]);
        advertiser.advertise("modbus", bridge.port(), &[("unitid", "1")]);
    }

    info!("gateway up");
    tokio::select! {
        _ = root.cancelled() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "ctrl-c handler failed");
            }
            info!("shutdown requested");
            root.cancel();
        }
    }

    // Let the servers drain their shutdown paths.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(reboot.reason())
}
