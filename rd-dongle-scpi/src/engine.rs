use std::sync::Arc;

use rd_dongle_core::EngineGate;
use rd_dongle_modbus::{DeviceProfile, ModbusMaster, OutputMode, Protection};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{
    format_error, ErrorQueue, ERR_COMMAND, ERR_ILLEGAL_PARAMETER_VALUE, ERR_UNDEFINED_HEADER,
};
use crate::params::{Params, Unit};
use crate::status::StatusModel;
use crate::tree::Pattern;

pub type SharedEngine = Arc<Mutex<ScpiEngine>>;

const SCPI_STD_VERSION: &str = "1999.0";

const LANGUAGES: &[(&str, i32)] = &[
    ("ENGLISH", 0),
    ("CHINESE", 1),
    ("GERMAN", 2),
    ("FRENCH", 3),
    ("RUSSIAN", 4),
];

const TEMPERATURE_SOURCES: &[(&str, i32)] = &[("SYSTEM", 0), ("PROBE", 1)];

/// The four `*IDN?` fields.
#[derive(Debug, Clone)]
pub struct Identity {
    pub manufacturer: &'static str,
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
}

impl Identity {
    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self {
            manufacturer: "Riden",
            model: profile.model.to_string(),
            serial_number: format!("{:08}", profile.serial_number),
            firmware: profile.firmware_string(),
        }
    }

    fn idn(&self) -> String {
        format!(
            "{},{},{},{}",
            self.manufacturer, self.model, self.serial_number, self.firmware
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Cmd {
    Cls,
    Ese,
    EseQ,
    EsrQ,
    IdnQ,
    Opc,
    OpcQ,
    Rst,
    Sre,
    SreQ,
    StbQ,
    TstQ,
    Wai,
    SystemErrorNextQ,
    SystemErrorCountQ,
    SystemVersionQ,
    StatusOperationEventQ,
    StatusOperationConditionQ,
    StatusOperationEnable,
    StatusOperationEnableQ,
    StatusQuestionableEventQ,
    StatusQuestionableConditionQ,
    StatusQuestionableEnable,
    StatusQuestionableEnableQ,
    StatusPreset,
    Rcl,
    DisplayBrightness,
    DisplayBrightnessQ,
    DisplayLanguage,
    DisplayLanguageQ,
    SystemDate,
    SystemDateQ,
    SystemTime,
    SystemTimeQ,
    OutputState,
    OutputStateQ,
    OutputModeQ,
    SourceVoltage,
    SourceVoltageQ,
    SourceVoltageProtectionTrippedQ,
    SourceCurrent,
    SourceCurrentQ,
    SourceCurrentProtectionTrippedQ,
    SourceVoltageLimit,
    SourceCurrentLimit,
    MeasureVoltageQ,
    MeasureCurrentQ,
    MeasurePowerQ,
    MeasureTemperatureQ,
    SystemBeeperState,
    SystemBeeperStateQ,
}

struct CommandSpec {
    pattern: Pattern,
    cmd: Cmd,
}

fn spec(pattern: &str, cmd: Cmd) -> CommandSpec {
    CommandSpec {
        pattern: Pattern::compile(pattern),
        cmd,
    }
}

fn command_table() -> Vec<CommandSpec> {
    use Cmd::*;
    vec![
        // IEEE-488.2 mandated
        spec("*CLS", Cls),
        spec("*ESE", Ese),
        spec("*ESE?", EseQ),
        spec("*ESR?", EsrQ),
        spec("*IDN?", IdnQ),
        spec("*OPC", Opc),
        spec("*OPC?", OpcQ),
        spec("*RST", Rst),
        spec("*SRE", Sre),
        spec("*SRE?", SreQ),
        spec("*STB?", StbQ),
        spec("*TST?", TstQ),
        spec("*WAI", Wai),
        // required SCPI tree
        spec("SYSTem:ERRor[:NEXT]?", SystemErrorNextQ),
        spec("SYSTem:ERRor:COUNt?", SystemErrorCountQ),
        spec("SYSTem:VERSion?", SystemVersionQ),
        spec("STATus:OPERation?", StatusOperationEventQ),
        spec("STATus:OPERation:EVENt?", StatusOperationEventQ),
        spec("STATus:OPERation:CONDition?", StatusOperationConditionQ),
        spec("STATus:OPERation:ENABle", StatusOperationEnable),
        spec("STATus:OPERation:ENABle?", StatusOperationEnableQ),
        spec("STATus:QUEStionable[:EVENt]?", StatusQuestionableEventQ),
        spec("STATus:QUEStionable:CONDition?", StatusQuestionableConditionQ),
        spec("STATus:QUEStionable:ENABle", StatusQuestionableEnable),
        spec("STATus:QUEStionable:ENABle?", StatusQuestionableEnableQ),
        spec("STATus:PRESet", StatusPreset),
        // instrument tree
        spec("*RCL", Rcl),
        spec("DISPlay:BRIGhtness", DisplayBrightness),
        spec("DISPlay:BRIGhtness?", DisplayBrightnessQ),
        spec("DISPlay:LANGuage", DisplayLanguage),
        spec("DISPlay:LANGuage?", DisplayLanguageQ),
        spec("SYSTem:DATE", SystemDate),
        spec("SYSTem:DATE?", SystemDateQ),
        spec("SYSTem:TIME", SystemTime),
        spec("SYSTem:TIME?", SystemTimeQ),
        spec("OUTPut[:STATe]", OutputState),
        spec("OUTPut[:STATe]?", OutputStateQ),
        spec("OUTPut:MODE?", OutputModeQ),
        spec("[SOURce]:VOLTage[:LEVel][:IMMediate][:AMPLitude]", SourceVoltage),
        spec("[SOURce]:VOLTage[:LEVel][:IMMediate][:AMPLitude]?", SourceVoltageQ),
        spec(
            "[SOURce]:VOLTage:PROTection:TRIPped?",
            SourceVoltageProtectionTrippedQ,
        ),
        spec("[SOURce]:CURRent[:LEVel][:IMMediate][:AMPLitude]", SourceCurrent),
        spec("[SOURce]:CURRent[:LEVel][:IMMediate][:AMPLitude]?", SourceCurrentQ),
        spec(
            "[SOURce]:CURRent:PROTection:TRIPped?",
            SourceCurrentProtectionTrippedQ,
        ),
        spec("[SOURce]:VOLTage:LIMit", SourceVoltageLimit),
        spec("[SOURce]:CURRent:LIMit", SourceCurrentLimit),
        spec("MEASure[:SCALar]:VOLTage[:DC]?", MeasureVoltageQ),
        spec("MEASure[:SCALar]:CURRent[:DC]?", MeasureCurrentQ),
        spec("MEASure[:SCALar]:POWer[:DC]?", MeasurePowerQ),
        spec(
            "MEASure[:SCALar]:TEMPerature[:THERmistor][:DC]?",
            MeasureTemperatureQ,
        ),
        spec("SYSTem:BEEPer:STATe", SystemBeeperState),
        spec("SYSTem:BEEPer:STATe?", SystemBeeperStateQ),
    ]
}

/// The SCPI engine: command tree, error queue and status model over the
/// serial master.
pub struct ScpiEngine {
    master: ModbusMaster,
    gate: EngineGate,
    identity: Identity,
    commands: Vec<CommandSpec>,
    status: StatusModel,
    errors: ErrorQueue,
    /// Response parked for the external (VXI-11) consumer, drained by
    /// exactly one `read`.
    external_pending: Option<String>,
}

impl ScpiEngine {
    pub fn new(master: ModbusMaster, gate: EngineGate, identity: Identity) -> Self {
        Self {
            master,
            gate,
            identity,
            commands: command_table(),
            status: StatusModel::default(),
            errors: ErrorQueue::default(),
            external_pending: None,
        }
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn gate(&self) -> EngineGate {
        self.gate.clone()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Run one input line: `;`-separated commands, responses flushed as a
    /// single `\n`-terminated unit. `None` when nothing produced output.
    pub async fn execute_line(&mut self, line: &str) -> Option<String> {
        let mut responses: Vec<String> = Vec::new();
        for segment in line.trim().split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            if let Some(response) = self.dispatch(segment).await {
                responses.push(response);
            }
        }
        if responses.is_empty() {
            None
        } else {
            Some(responses.join(";") + "\n")
        }
    }

    /// External-mode write: the flushed output is parked for the next
    /// [`ScpiEngine::read_external`] instead of going to a socket.
    pub async fn write_external(&mut self, payload: &str) {
        let response = self.execute_line(payload).await;
        self.external_pending = Some(response.unwrap_or_default());
    }

    /// Drain the parked output. Empty until a command has flushed, and
    /// drained by the first reader.
    pub fn read_external(&mut self) -> Option<String> {
        self.external_pending.take()
    }

    /// Drop buffered output; called when a transport (re)claims the
    /// engine so a new session never sees a predecessor's data.
    pub fn reset_buffers(&mut self) {
        self.external_pending = None;
    }

    async fn dispatch(&mut self, segment: &str) -> Option<String> {
        let (header, rest) = match segment.split_once(char::is_whitespace) {
            Some((header, rest)) => (header, rest),
            None => (segment, ""),
        };
        let (header, query) = match header.strip_suffix('?') {
            Some(header) => (header, true),
            None => (header, false),
        };
        let cmd = self
            .commands
            .iter()
            .find(|spec| spec.pattern.query == query && spec.pattern.matches(header))
            .map(|spec| spec.cmd);
        let Some(cmd) = cmd else {
            debug!(header, query, "undefined header");
            self.errors.push(ERR_UNDEFINED_HEADER);
            return None;
        };
        match self.run(cmd, Params::parse(rest)).await {
            Ok(response) => response,
            Err(code) => {
                debug!(header, code, "command failed");
                self.errors.push(code);
                None
            }
        }
    }

    async fn run(&mut self, cmd: Cmd, params: Params<'_>) -> Result<Option<String>, i16> {
        use Cmd::*;
        let response = match cmd {
            Cls => {
                self.errors.clear();
                self.status.clear_events();
                None
            }
            Ese => {
                let value = params.u32_at(0)?;
                if value > 255 {
                    return Err(ERR_ILLEGAL_PARAMETER_VALUE);
                }
                self.status.set_ese(value as u8);
                None
            }
            EseQ => Some(self.status.ese().to_string()),
            EsrQ => Some(self.status.take_esr().to_string()),
            IdnQ => Some(self.identity.idn()),
            Opc => {
                self.status.set_operation_complete();
                None
            }
            OpcQ => Some("1".to_string()),
            Rst => {
                self.status.reset();
                None
            }
            Sre => {
                let value = params.u32_at(0)?;
                if value > 255 {
                    return Err(ERR_ILLEGAL_PARAMETER_VALUE);
                }
                self.status.set_sre(value as u8);
                None
            }
            SreQ => Some(self.status.sre().to_string()),
            StbQ => {
                let message_available = self
                    .external_pending
                    .as_ref()
                    .is_some_and(|pending| !pending.is_empty());
                Some(
                    self.status
                        .stb(!self.errors.is_empty(), message_available)
                        .to_string(),
                )
            }
            TstQ => Some("0".to_string()),
            Wai => None,
            SystemErrorNextQ => Some(format_error(self.errors.pop().unwrap_or(0))),
            SystemErrorCountQ => Some(self.errors.len().to_string()),
            SystemVersionQ => Some(SCPI_STD_VERSION.to_string()),
            StatusOperationEventQ | StatusOperationConditionQ => Some("0".to_string()),
            StatusOperationEnable => {
                self.status.operation_enable = params.u32_at(0)? as u16;
                None
            }
            StatusOperationEnableQ => Some(self.status.operation_enable.to_string()),
            StatusQuestionableEventQ | StatusQuestionableConditionQ => Some("0".to_string()),
            StatusQuestionableEnable => {
                self.status.questionable_enable = params.u32_at(0)? as u16;
                None
            }
            StatusQuestionableEnableQ => Some(self.status.questionable_enable.to_string()),
            StatusPreset => {
                self.status.preset();
                None
            }
            Rcl => {
                let profile = params.u32_at(0)?;
                if !(1..=9).contains(&profile) {
                    return Err(ERR_ILLEGAL_PARAMETER_VALUE);
                }
                backend(self.master.recall_preset(profile as u8).await)?;
                None
            }
            DisplayBrightness => {
                let brightness = params.u32_at(0)?;
                if brightness > 5 {
                    return Err(ERR_ILLEGAL_PARAMETER_VALUE);
                }
                backend(self.master.set_brightness(brightness as u8).await)?;
                None
            }
            DisplayBrightnessQ => Some(backend(self.master.get_brightness().await)?.to_string()),
            DisplayLanguage => {
                let language = params
                    .choice_at(0, LANGUAGES)
                    .or_else(|_| params.i32_at(0))
                    .map_err(|_| ERR_ILLEGAL_PARAMETER_VALUE)?;
                if !(0..=4).contains(&language) {
                    return Err(ERR_ILLEGAL_PARAMETER_VALUE);
                }
                backend(self.master.set_language(language as u16).await)?;
                None
            }
            DisplayLanguageQ => {
                let language = backend(self.master.get_language().await)?;
                let name = LANGUAGES
                    .iter()
                    .find(|(_, tag)| *tag == i32::from(language))
                    .map(|(name, _)| (*name).to_string())
                    .unwrap_or_else(|| language.to_string());
                Some(name)
            }
            SystemDate => {
                let year = params.u32_at(0)?;
                let month = params.u32_at(1)?;
                let day = params.u32_at(2)?;
                backend(
                    self.master
                        .set_date(year as u16, month as u16, day as u16)
                        .await,
                )?;
                None
            }
            SystemDateQ => {
                let clock = backend(self.master.get_clock().await)?;
                Some(format!("{},{},{}", clock.year, clock.month, clock.day))
            }
            SystemTime => {
                let hour = params.u32_at(0)?;
                let minute = params.u32_at(1)?;
                let second = params.u32_at(2)?;
                backend(
                    self.master
                        .set_time(hour as u16, minute as u16, second as u16)
                        .await,
                )?;
                None
            }
            SystemTimeQ => {
                let clock = backend(self.master.get_clock().await)?;
                Some(format!("{},{},{}", clock.hour, clock.minute, clock.second))
            }
            OutputState => {
                let on = params.bool_at(0)?;
                backend(self.master.set_output_on(on).await)?;
                None
            }
            OutputStateQ => Some(bool_result(backend(self.master.get_output_on().await)?)),
            OutputModeQ => {
                let mode = backend(self.master.get_output_mode().await)?;
                Some(
                    match mode {
                        OutputMode::ConstantVoltage => "CV",
                        OutputMode::ConstantCurrent => "CC",
                        OutputMode::Unknown => "XX",
                    }
                    .to_string(),
                )
            }
            SourceVoltage => {
                let voltage = params.number_at(0, Unit::Volt)?;
                backend(self.master.set_voltage_set(voltage).await)?;
                None
            }
            SourceVoltageQ => Some(float_result(backend(self.master.get_voltage_set().await)?)),
            SourceVoltageProtectionTrippedQ => {
                let protection = backend(self.master.get_protection().await)?;
                Some(bool_result(protection == Protection::Ovp))
            }
            SourceCurrent => {
                let current = params.number_at(0, Unit::Amp)?;
                backend(self.master.set_current_set(current).await)?;
                None
            }
            SourceCurrentQ => Some(float_result(backend(self.master.get_current_set().await)?)),
            SourceCurrentProtectionTrippedQ => {
                let protection = backend(self.master.get_protection().await)?;
                Some(bool_result(protection == Protection::Ocp))
            }
            SourceVoltageLimit => {
                let voltage = params.number_at(0, Unit::Volt)?;
                backend(self.master.set_over_voltage_protection(voltage).await)?;
                None
            }
            SourceCurrentLimit => {
                let current = params.number_at(0, Unit::Amp)?;
                backend(self.master.set_over_current_protection(current).await)?;
                None
            }
            MeasureVoltageQ => Some(float_result(backend(self.master.get_voltage_out().await)?)),
            MeasureCurrentQ => Some(float_result(backend(self.master.get_current_out().await)?)),
            MeasurePowerQ => Some(float_result(backend(self.master.get_power_out().await)?)),
            MeasureTemperatureQ => {
                let source = params
                    .choice_at(0, TEMPERATURE_SOURCES)
                    .map_err(|_| ERR_ILLEGAL_PARAMETER_VALUE)?;
                let temperature = if source == 0 {
                    backend(self.master.get_system_temperature_celsius().await)?
                } else {
                    backend(self.master.get_probe_temperature_celsius().await)?
                };
                Some(float_result(temperature))
            }
            SystemBeeperState => {
                let on = params.bool_at(0)?;
                backend(self.master.set_buzzer_enabled(on).await)?;
                None
            }
            SystemBeeperStateQ => Some(bool_result(backend(
                self.master.is_buzzer_enabled().await,
            )?)),
        };
        Ok(response)
    }
}

/// Backend failures surface as `-100,"Command error"`; the command never
/// reaches the wire as a protocol error.
fn backend<T>(result: rd_dongle_modbus::Result<T>) -> Result<T, i16> {
    result.map_err(|e| {
        debug!(error = %e, "serial backend failed");
        ERR_COMMAND
    })
}

fn bool_result(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn float_result(value: f64) -> String {
    format!("{value}")
}
