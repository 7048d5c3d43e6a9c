use rd_dongle_core::EngineGate;
use rd_dongle_modbus::sim::{SimPsu, SimPsuHandle};
use rd_dongle_modbus::{ModbusMaster, Register};
use rd_dongle_scpi::{Identity, ScpiEngine};

async fn engine_for(sim: SimPsu) -> (ScpiEngine, SimPsuHandle) {
    let (io, handle) = sim.spawn();
    let master = ModbusMaster::spawn(io, 115_200);
    let profile = master.begin().await.unwrap();
    let engine = ScpiEngine::new(
        master,
        EngineGate::new(),
        Identity::from_profile(&profile),
    );
    (engine, handle)
}

async fn run(engine: &mut ScpiEngine, line: &str) -> String {
    engine.execute_line(line).await.unwrap_or_default()
}

#[tokio::test]
async fn idn_reports_identity() {
    let (mut engine, _psu) = engine_for(SimPsu::rd6012()).await;
    assert_eq!(run(&mut engine, "*IDN?\n").await, "Riden,RD6012,00012345,1.32\n");
}

#[tokio::test]
async fn measure_and_source_queries() {
    let sim = SimPsu::rd6012()
        .with_register(Register::VoltageSet, 2400)
        .with_register(Register::VoltageOut, 1205)
        .with_register(Register::CurrentOut, 99)
        .with_register(Register::PowerOutLow, 1190);
    let (mut engine, _psu) = engine_for(sim).await;

    assert_eq!(run(&mut engine, "VOLT?\n").await, "24\n");
    assert_eq!(run(&mut engine, "MEAS:VOLT?\n").await, "12.05\n");
    assert_eq!(run(&mut engine, "MEASURE:SCALAR:CURRENT:DC?\n").await, "0.99\n");
    assert_eq!(run(&mut engine, "MEAS:POW?\n").await, "11.9\n");
}

#[tokio::test]
async fn source_voltage_accepts_unit_suffix() {
    let (mut engine, psu) = engine_for(SimPsu::rd6012()).await;

    assert_eq!(run(&mut engine, "VOLT 3.3V\n").await, "");
    assert_eq!(psu.register(Register::VoltageSet), 330);

    assert_eq!(run(&mut engine, "SOURCE:VOLTAGE:LEVEL:IMMEDIATE:AMPLITUDE 5\n").await, "");
    assert_eq!(psu.register(Register::VoltageSet), 500);

    // amps into a voltage command is a data-type error
    run(&mut engine, "VOLT 3.3A\n").await;
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-104,\"Data type error\"\n"
    );
    assert_eq!(psu.register(Register::VoltageSet), 500);
}

#[tokio::test]
async fn brightness_out_of_range_never_reaches_the_bus() {
    let sim = SimPsu::rd6012().with_register(Register::Brightness, 3);
    let (mut engine, psu) = engine_for(sim).await;

    run(&mut engine, "DISPLAY:BRIGHTNESS 9\n").await;
    assert_eq!(psu.register(Register::Brightness), 3);
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-224,\"Illegal parameter value\"\n"
    );
    assert_eq!(run(&mut engine, "SYST:ERR?\n").await, "0,\"No error\"\n");

    assert_eq!(run(&mut engine, "DISP:BRIG 5\n").await, "");
    assert_eq!(psu.register(Register::Brightness), 5);
    assert_eq!(run(&mut engine, "DISP:BRIG?\n").await, "5\n");
}

#[tokio::test]
async fn language_accepts_names_and_numbers() {
    let (mut engine, psu) = engine_for(SimPsu::rd6012()).await;

    run(&mut engine, "DISP:LANG GERMAN\n").await;
    assert_eq!(psu.register(Register::Language), 2);
    assert_eq!(run(&mut engine, "DISP:LANG?\n").await, "GERMAN\n");

    run(&mut engine, "DISP:LANG 4\n").await;
    assert_eq!(psu.register(Register::Language), 4);

    run(&mut engine, "DISP:LANG 7\n").await;
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-224,\"Illegal parameter value\"\n"
    );
}

#[tokio::test]
async fn output_state_and_mode() {
    let sim = SimPsu::rd6012().with_register(Register::OutputMode, 1);
    let (mut engine, psu) = engine_for(sim).await;

    run(&mut engine, "OUTP 1\n").await;
    assert_eq!(psu.register(Register::Output), 1);
    assert_eq!(run(&mut engine, "OUTP?\n").await, "1\n");
    assert_eq!(run(&mut engine, "OUTPUT:STATE OFF\n").await, "");
    assert_eq!(psu.register(Register::Output), 0);
    assert_eq!(run(&mut engine, "OUTP:MODE?\n").await, "CC\n");

    psu.set_register(Register::OutputMode, 0);
    assert_eq!(run(&mut engine, "OUTP:MODE?\n").await, "CV\n");
    psu.set_register(Register::OutputMode, 9);
    assert_eq!(run(&mut engine, "OUTP:MODE?\n").await, "XX\n");
}

#[tokio::test]
async fn protection_tripped_queries() {
    let sim = SimPsu::rd6012().with_register(Register::Protection, 1);
    let (mut engine, psu) = engine_for(sim).await;

    assert_eq!(run(&mut engine, "VOLT:PROT:TRIP?\n").await, "1\n");
    assert_eq!(run(&mut engine, "CURR:PROT:TRIP?\n").await, "0\n");
    psu.set_register(Register::Protection, 2);
    assert_eq!(run(&mut engine, "CURR:PROT:TRIP?\n").await, "1\n");
}

#[tokio::test]
async fn limits_write_the_live_protection_cells() {
    let (mut engine, psu) = engine_for(SimPsu::rd6012()).await;

    run(&mut engine, "VOLT:LIM 30.5\n").await;
    assert_eq!(psu.register(Register::M0Ovp), 3050);
    run(&mut engine, "CURR:LIM 6.1A\n").await;
    assert_eq!(psu.register(Register::M0Ocp), 610);
}

#[tokio::test]
async fn rcl_recalls_presets_with_bounds() {
    let (mut engine, psu) = engine_for(SimPsu::rd6012()).await;

    run(&mut engine, "*RCL 5\n").await;
    assert_eq!(psu.register(Register::Preset), 5);

    run(&mut engine, "*RCL 0\n").await;
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-224,\"Illegal parameter value\"\n"
    );
    run(&mut engine, "*RCL 10\n").await;
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-224,\"Illegal parameter value\"\n"
    );
}

#[tokio::test]
async fn date_time_and_beeper() {
    let (mut engine, psu) = engine_for(SimPsu::rd6012()).await;

    run(&mut engine, "SYST:DATE 2024,6,1\n").await;
    assert_eq!(psu.register(Register::Year), 2024);
    assert_eq!(psu.register(Register::Month), 6);
    assert_eq!(run(&mut engine, "SYST:DATE?\n").await, "2024,6,1\n");

    run(&mut engine, "SYST:TIME 12,34,56\n").await;
    assert_eq!(run(&mut engine, "SYST:TIME?\n").await, "12,34,56\n");

    run(&mut engine, "SYST:BEEP:STAT ON\n").await;
    assert_eq!(psu.register(Register::Buzzer), 1);
    assert_eq!(run(&mut engine, "SYST:BEEP:STAT?\n").await, "1\n");
}

#[tokio::test]
async fn temperature_requires_a_source() {
    let sim = SimPsu::rd6012()
        .with_register(Register::SystemTemperatureCelsiusValue, 31)
        .with_register(Register::ProbeTemperatureCelsiusSign, 1)
        .with_register(Register::ProbeTemperatureCelsiusValue, 5);
    let (mut engine, _psu) = engine_for(sim).await;

    assert_eq!(run(&mut engine, "MEAS:TEMP? SYSTEM\n").await, "31\n");
    assert_eq!(run(&mut engine, "MEAS:TEMP? PROBE\n").await, "-5\n");

    run(&mut engine, "MEAS:TEMP? AMBIENT\n").await;
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-224,\"Illegal parameter value\"\n"
    );
}

#[tokio::test]
async fn status_model_basics() {
    let (mut engine, _psu) = engine_for(SimPsu::rd6012()).await;

    assert_eq!(run(&mut engine, "*TST?\n").await, "0\n");
    assert_eq!(run(&mut engine, "*OPC?\n").await, "1\n");
    run(&mut engine, "*ESE 255\n").await;
    assert_eq!(run(&mut engine, "*ESE?\n").await, "255\n");
    run(&mut engine, "*OPC\n").await;
    assert_eq!(run(&mut engine, "*ESR?\n").await, "1\n");
    // destructive read
    assert_eq!(run(&mut engine, "*ESR?\n").await, "0\n");
    assert_eq!(run(&mut engine, "SYST:VERS?\n").await, "1999.0\n");
    assert_eq!(run(&mut engine, "STAT:OPER?\n").await, "0\n");
    assert_eq!(run(&mut engine, "STAT:QUES?\n").await, "0\n");
}

#[tokio::test]
async fn undefined_header_is_queued() {
    let (mut engine, _psu) = engine_for(SimPsu::rd6012()).await;
    run(&mut engine, "FREQ 50\n").await;
    assert_eq!(
        run(&mut engine, "SYST:ERR?\n").await,
        "-113,\"Undefined header\"\n"
    );
    assert_eq!(run(&mut engine, "SYST:ERR:COUN?\n").await, "0\n");
}

#[tokio::test]
async fn semicolon_separated_commands_share_one_flush() {
    let sim = SimPsu::rd6012().with_register(Register::VoltageSet, 2400);
    let (mut engine, psu) = engine_for(sim).await;

    let response = run(&mut engine, "VOLT 12;VOLT?;*OPC?\n").await;
    assert_eq!(response, "12;1\n");
    assert_eq!(psu.register(Register::VoltageSet), 1200);
}

#[tokio::test]
async fn external_mode_parks_output_for_one_read() {
    let (mut engine, _psu) = engine_for(SimPsu::rd6012()).await;

    engine.write_external("*IDN?").await;
    assert_eq!(
        engine.read_external().as_deref(),
        Some("Riden,RD6012,00012345,1.32\n")
    );
    // drained exactly once
    assert_eq!(engine.read_external(), None);

    // a non-query write parks an empty response
    engine.write_external("OUTP 1").await;
    assert_eq!(engine.read_external().as_deref(), Some(""));
}
