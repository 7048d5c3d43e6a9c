use std::convert::Infallible;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use bytes::Bytes;
use futures_util::TryStreamExt;
use rd_dongle_config::timezone_names;
use rd_dongle_core::RebootReason;
use serde::Deserialize;
use tracing::{info, warn};

use crate::html::{
    close_box, current_to_string, info_row, open_box, power_to_string, voltage_to_string,
    HTML_FOOTER, HTML_HEADER, HTML_NO_CONNECTION_BODY,
};
use crate::lxi;
use crate::state::WebState;

/// Streamed responses go out in chunks of roughly this size so one large
/// page cannot hog a worker between yields.
const CHUNK_SIZE: usize = 1000;

/// How long to wait before the reboot actually fires; long enough to
/// flush the response that announced it.
const REBOOT_GRACE: Duration = Duration::from_millis(500);

/// Sample count of the Modbus throughput diagnostic.
const QPS_SAMPLES: u32 = 200;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(get_root))
        .route("/psu/", web::get().to(get_psu))
        .route("/config/", web::get().to(get_config))
        .route("/config/", web::post().to(post_config))
        .route("/disconnect_client/", web::post().to(post_disconnect_client))
        .route("/reboot/dongle/", web::get().to(get_reboot_dongle))
        .route("/firmware/update/", web::post().to(post_firmware_update))
        .route("/lxi/identification", web::get().to(get_lxi_identification))
        .route("/qps/modbus/", web::get().to(get_qps_modbus))
        .default_service(web::route().to(not_found));
}

/// Send a page body with `Transfer-Encoding: chunked`, yielding between
/// chunks.
fn chunked_html(body: String) -> HttpResponse {
    let bytes = Bytes::from(body);
    let chunks: Vec<Result<Bytes, Infallible>> = (0..bytes.len())
        .step_by(CHUNK_SIZE)
        .map(|start| {
            let end = (start + CHUNK_SIZE).min(bytes.len());
            Ok(bytes.slice(start..end))
        })
        .collect();
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .streaming(futures::stream::iter(chunks))
}

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location.to_string()))
        .finish()
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .content_type("text/plain")
        .body("404: Not found")
}

async fn get_root(state: web::Data<WebState>) -> HttpResponse {
    let mut page = String::from(HTML_HEADER);
    if state.master.is_connected() {
        page.push_str(&connected_clients_section(&state).await);
        page.push_str(&power_supply_section(&state));
        page.push_str(&network_section(&state));
        page.push_str(&services_section(&state));
    } else {
        page.push_str(HTML_NO_CONNECTION_BODY);
    }
    page.push_str(HTML_FOOTER);
    chunked_html(page)
}

async fn connected_clients_section(state: &WebState) -> String {
    let mut section = open_box("Connected Clients", None);
    for roster in state.rosters() {
        for client in roster.connected_clients().await {
            section.push_str(&format!(
                "<tr><td>{client}</td><td>{proto}</td>\
                 <td><form method='post' action='/disconnect_client/'>\
                 <input type='hidden' name='ip' value='{client}'>\
                 <input type='hidden' name='protocol' value='{proto}'>\
                 <input type='submit' value='Disconnect'></form></td></tr>",
                proto = roster.protocol(),
            ));
        }
    }
    section.push_str(close_box());
    section
}

fn power_supply_section(state: &WebState) -> String {
    let mut section = open_box("Power Supply", Some(("/psu/", "Details")));
    match state.master.profile() {
        Ok(profile) => {
            section.push_str(&info_row("Model", profile.model.as_str()));
            section.push_str(&info_row("Firmware", &profile.firmware_string()));
            section.push_str(&info_row(
                "Serial Number",
                &format!("{:08}", profile.serial_number),
            ));
        }
        Err(_) => section.push_str(&info_row("Model", "unknown")),
    }
    section.push_str(close_box());
    section
}

fn network_section(state: &WebState) -> String {
    let mut section = open_box("Network Configuration", None);
    section.push_str(&info_row("Hostname", &state.info.hostname));
    section.push_str(&info_row("MDNS", &format!("{}.local", state.info.hostname)));
    section.push_str(&info_row("IP", &state.advertised.to_string()));
    section.push_str(&info_row("Dongle Version", state.info.version));
    section.push_str(close_box());
    section
}

fn services_section(state: &WebState) -> String {
    let vxi_port = state.vxi.current_port();
    let vxi = if vxi_port == 0 {
        "in use".to_string()
    } else {
        vxi_port.to_string()
    };
    let mut section = open_box("Network Services", None);
    section.push_str(&info_row("Web Server Port", &state.http_port.to_string()));
    section.push_str(&info_row("Modbus TCP Port", &state.bridge.port().to_string()));
    section.push_str(&info_row("SCPI Port", &state.scpi.port().to_string()));
    section.push_str(&info_row(
        "SCPI VISA Resource",
        &state.scpi.visa_resource(state.advertised),
    ));
    section.push_str(&info_row("VXI-11 Port", &vxi));
    section.push_str(&info_row(
        "VXI-11 VISA Resource",
        &state.vxi.visa_resource(state.advertised),
    ));
    section.push_str(close_box());
    section
}

async fn get_psu(state: web::Data<WebState>) -> HttpResponse {
    let mut page = String::from(HTML_HEADER);
    match state.master.get_all_values().await {
        Ok(all) => {
            page.push_str(&open_box("Power Supply Details", Some((".", "Refresh"))));
            page.push_str(&info_row("Output", if all.output_on { "On" } else { "Off" }));
            page.push_str(&info_row(
                "Set",
                &format!(
                    "{} / {}",
                    voltage_to_string(all.voltage_set),
                    current_to_string(all.current_set)
                ),
            ));
            page.push_str(&info_row(
                "Out",
                &format!(
                    "{} / {} / {}",
                    voltage_to_string(all.voltage_out),
                    current_to_string(all.current_out),
                    power_to_string(all.power_out)
                ),
            ));
            page.push_str(&info_row("Protection", all.protection.as_str()));
            page.push_str(&info_row(
                "Output Mode",
                match all.output_mode {
                    rd_dongle_modbus::OutputMode::ConstantVoltage => "Constant Voltage",
                    rd_dongle_modbus::OutputMode::ConstantCurrent => "Constant Current",
                    rd_dongle_modbus::OutputMode::Unknown => "Unknown",
                },
            ));
            page.push_str(&info_row("Current Range", &all.current_range.to_string()));
            page.push_str(&info_row(
                "Battery Mode",
                if all.battery_mode { "Yes" } else { "No" },
            ));
            page.push_str(&info_row(
                "Voltage Battery",
                &voltage_to_string(all.voltage_battery),
            ));
            page.push_str(&info_row("Ah", &format!("{:.3} Ah", all.ah)));
            page.push_str(&info_row("Wh", &format!("{:.3} Wh", all.wh)));
            page.push_str(close_box());

            page.push_str(&open_box("Environment", None));
            page.push_str(&info_row("Voltage In", &voltage_to_string(all.voltage_in)));
            page.push_str(&info_row(
                "System Temperature",
                &format!(
                    "{:.0}&deg;C / {:.0}&deg;F",
                    all.system_temperature_celsius, all.system_temperature_fahrenheit
                ),
            ));
            page.push_str(&info_row(
                "Probe Temperature",
                &format!(
                    "{:.0}&deg;C / {:.0}&deg;F",
                    all.probe_temperature_celsius, all.probe_temperature_fahrenheit
                ),
            ));
            page.push_str(close_box());

            page.push_str(&open_box("Settings", None));
            page.push_str(&info_row(
                "Keypad Locked",
                if all.keypad_locked { "Yes" } else { "No" },
            ));
            page.push_str(&info_row(
                "Time",
                &format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    all.clock.year,
                    all.clock.month,
                    all.clock.day,
                    all.clock.hour,
                    all.clock.minute,
                    all.clock.second
                ),
            ));
            page.push_str(&info_row("Take OK", if all.take_ok { "Yes" } else { "No" }));
            page.push_str(&info_row("Take Out", if all.take_out { "Yes" } else { "No" }));
            page.push_str(&info_row(
                "Power on boot",
                if all.power_on_boot { "Yes" } else { "No" },
            ));
            page.push_str(&info_row("Buzzer enabled", if all.buzzer { "Yes" } else { "No" }));
            page.push_str(&info_row("Logo", if all.logo { "Yes" } else { "No" }));
            page.push_str(&info_row("Language", &all.language.to_string()));
            page.push_str(&info_row("Brightness", &all.brightness.to_string()));
            page.push_str(close_box());

            page.push_str(&open_box("Calibration", None));
            page.push_str(&info_row("V_OUT_ZERO", &all.calibration.v_out_zero.to_string()));
            page.push_str(&info_row("V_OUT_SCALE", &all.calibration.v_out_scale.to_string()));
            page.push_str(&info_row("V_BACK_ZERO", &all.calibration.v_back_zero.to_string()));
            page.push_str(&info_row(
                "V_BACK_SCALE",
                &all.calibration.v_back_scale.to_string(),
            ));
            page.push_str(&info_row("I_OUT_ZERO", &all.calibration.i_out_zero.to_string()));
            page.push_str(&info_row("I_OUT_SCALE", &all.calibration.i_out_scale.to_string()));
            page.push_str(&info_row("I_BACK_ZERO", &all.calibration.i_back_zero.to_string()));
            page.push_str(&info_row(
                "I_BACK_SCALE",
                &all.calibration.i_back_scale.to_string(),
            ));
            page.push_str(close_box());

            page.push_str(&open_box("Presets", None));
            for (index, preset) in all.presets.iter().enumerate() {
                page.push_str(&format!(
                    "<tr><th colspan='2' style='text-align:left'>Preset {n} (M{n})</th></tr>",
                    n = index + 1
                ));
                page.push_str(&info_row("Preset Voltage", &voltage_to_string(preset.voltage)));
                page.push_str(&info_row("Preset Current", &current_to_string(preset.current)));
                page.push_str(&info_row(
                    "Preset OVP",
                    &voltage_to_string(preset.over_voltage_protection),
                ));
                page.push_str(&info_row(
                    "Preset OCP",
                    &current_to_string(preset.over_current_protection),
                ));
            }
            page.push_str(close_box());
        }
        Err(_) => page.push_str(HTML_NO_CONNECTION_BODY),
    }
    page.push_str(HTML_FOOTER);
    chunked_html(page)
}

async fn get_config(state: web::Data<WebState>) -> HttpResponse {
    let store = state.store.lock().await;
    let configured_tz = store.timezone_name().to_string();
    let configured_baud = store.uart_baudrate();
    drop(store);

    let mut page = String::from(HTML_HEADER);
    page.push_str("<div class='box'><h2>Configuration</h2><form method='post'>");
    page.push_str("<p>Timezone: <select name='timezone'>");
    page.push_str("<option value=''>none</option>");
    for name in timezone_names() {
        if name == configured_tz {
            page.push_str(&format!("<option value='{name}' selected>{name}</option>"));
        } else {
            page.push_str(&format!("<option value='{name}'>{name}</option>"));
        }
    }
    page.push_str("</select></p><p>UART baud rate: <select name='baudrate'>");
    for baud in [9600u32, 19200, 38400, 57600, 115200] {
        if baud == configured_baud {
            page.push_str(&format!("<option value='{baud}' selected>{baud}</option>"));
        } else {
            page.push_str(&format!("<option value='{baud}'>{baud}</option>"));
        }
    }
    page.push_str("</select></p><input type='submit' value='Save'></form></div>");
    page.push_str(HTML_FOOTER);
    chunked_html(page)
}

#[derive(Debug, Deserialize)]
struct ConfigForm {
    timezone: String,
    baudrate: u32,
}

async fn post_config(state: web::Data<WebState>, form: web::Form<ConfigForm>) -> HttpResponse {
    info!(timezone = %form.timezone, baudrate = form.baudrate, "saving configuration");
    let mut store = state.store.lock().await;
    store.set_timezone_name(form.timezone.clone());
    store.set_uart_baudrate(form.baudrate);
    if let Err(e) = store.commit() {
        warn!(error = %e, "failed to persist configuration");
        return HttpResponse::InternalServerError().body("failed to save configuration");
    }
    see_other("/config/")
}

#[derive(Debug, Deserialize)]
struct DisconnectForm {
    ip: String,
    protocol: String,
}

async fn post_disconnect_client(
    state: web::Data<WebState>,
    form: web::Form<DisconnectForm>,
) -> HttpResponse {
    let Ok(ip) = form.ip.parse::<IpAddr>() else {
        return HttpResponse::BadRequest().body("invalid ip");
    };
    match state.roster(&form.protocol) {
        Some(roster) => {
            info!(ip = %ip, protocol = form.protocol, "disconnect requested");
            roster.disconnect(ip).await;
            see_other("/")
        }
        None => HttpResponse::BadRequest().body("unknown protocol"),
    }
}

#[derive(Debug, Deserialize)]
struct RebootQuery {
    config_portal: Option<String>,
}

async fn get_reboot_dongle(
    state: web::Data<WebState>,
    query: web::Query<RebootQuery>,
) -> HttpResponse {
    let mut page = String::from(HTML_HEADER);
    if query.config_portal.as_deref() == Some("true") {
        let mut store = state.store.lock().await;
        store.set_portal_on_boot();
        if let Err(e) = store.commit() {
            warn!(error = %e, "failed to persist portal flag");
        }
        page.push_str(&format!(
            "<p>Rebooting into the configuration portal. Connect to the \
             <b>{}</b> access point to reconfigure.</p>",
            state.info.hostname
        ));
    } else {
        page.push_str("<p>Rebooting the dongle.</p>");
    }
    page.push_str(HTML_FOOTER);
    // reply first, reset after the grace period
    state.reboot.schedule(RebootReason::Requested, REBOOT_GRACE);
    chunked_html(page)
}

async fn post_firmware_update(
    state: web::Data<WebState>,
    mut payload: Multipart,
) -> HttpResponse {
    let mut image: Vec<u8> = Vec::new();
    while let Ok(Some(mut field)) = payload.try_next().await {
        while let Ok(Some(chunk)) = field.try_next().await {
            image.extend_from_slice(&chunk);
        }
    }
    match state.firmware.stage(&image) {
        Ok(()) => {
            info!(bytes = image.len(), "firmware accepted, rebooting");
            state
                .reboot
                .schedule(RebootReason::FirmwareUpdate, REBOOT_GRACE);
            chunked_html(format!(
                "{HTML_HEADER}<p>Update successful, rebooting.</p>{HTML_FOOTER}"
            ))
        }
        Err(reason) => {
            warn!(reason = %reason, "firmware rejected");
            chunked_html(format!(
                "{HTML_HEADER}<p>Update failed: {reason}</p>{HTML_FOOTER}"
            ))
        }
    }
}

async fn get_lxi_identification(state: web::Data<WebState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/xml")
        .body(lxi::identification_document(&state))
}

async fn get_qps_modbus(state: web::Data<WebState>) -> HttpResponse {
    if !state.master.is_connected() {
        return chunked_html(format!(
            "{HTML_HEADER}{HTML_NO_CONNECTION_BODY}{HTML_FOOTER}"
        ));
    }
    let started = Instant::now();
    let mut failures = 0u32;
    for _ in 0..QPS_SAMPLES {
        if state.master.get_voltage_set().await.is_err() {
            failures += 1;
        }
    }
    let elapsed = started.elapsed().as_secs_f64();
    let qps = f64::from(QPS_SAMPLES) / elapsed;
    chunked_html(format!(
        "{HTML_HEADER}<div class='box'><h2>Modbus Diagnostic</h2>\
         <p>{QPS_SAMPLES} reads in {elapsed:.2} s, {failures} failures: \
         <b>{qps:.1} queries/second</b></p></div>{HTML_FOOTER}"
    ))
}
