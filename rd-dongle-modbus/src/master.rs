use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{ModbusError, Result};
use crate::frame::{RtuCodec, RtuFrame};
use crate::registers::{preset_base, Register, NUMBER_OF_PRESETS, REGISTER_SPACE};
use crate::scaling::{values_to_milliunits, values_to_temperature, Model, Scaling};
use crate::types::{AllValues, Calibration, Clock, OutputMode, Preset, Protection};

/// Fixed slave address of every RD-series PSU.
pub const SLAVE_ADDRESS: u8 = 1;

/// Deadline for a single transaction. The PSU firmware answers well under
/// this; a silent bus fails the call and returns the bus to idle.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(500);

/// Writing this to [`Register::System`] reboots the PSU into its serial
/// bootloader.
const BOOTLOADER_MAGIC: u16 = 5633;

/// Largest read window. Wider reads are silently truncated by the device,
/// so bulk reads are reassembled from windows of this size.
const READ_WINDOW: u16 = 20;

const READ_HOLDING: u8 = 0x03;
const WRITE_SINGLE: u8 = 0x06;
const WRITE_MULTIPLE: u8 = 0x10;

/// Everything learned from the id register at identification time. The
/// multiplier set is immutable for the rest of the session.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub id: u16,
    pub model: Model,
    pub scaling: Scaling,
    pub serial_number: u32,
    pub firmware_version: u16,
}

impl DeviceProfile {
    /// Firmware as displayed, e.g. register value 132 renders as "1.32".
    pub fn firmware_string(&self) -> String {
        format!(
            "{}.{}",
            self.firmware_version / 100,
            self.firmware_version % 100
        )
    }
}

struct Transaction {
    slave: u8,
    pdu: Bytes,
    reply: oneshot::Sender<Result<Bytes>>,
}

/// Handle to the serial master. Cheap to clone; all clones funnel into the
/// same transaction task, so at most one request is ever in flight on the
/// bus.
#[derive(Clone)]
pub struct ModbusMaster {
    tx: mpsc::Sender<Transaction>,
    profile: Arc<ArcSwapOption<DeviceProfile>>,
}

impl ModbusMaster {
    /// Open the serial device at 8N1 and spawn the transaction task.
    pub fn open(device: &str, baudrate: u32) -> Result<Self> {
        let port = tokio_serial::new(device, baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()?;
        info!(device, baudrate, "serial port open");
        Ok(Self::spawn(port, baudrate))
    }

    /// Run the master over an arbitrary byte stream. Tests drive this with
    /// an in-memory duplex.
    pub fn spawn<T>(io: T, baudrate: u32) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run_bus(io, rx, inter_frame_gap(baudrate)));
        Self {
            tx,
            profile: Arc::new(ArcSwapOption::from(None)),
        }
    }

    /// Identify the PSU and fix the scaling for this session.
    ///
    /// Reads the id register, maps it to a model and loads the serial
    /// number and firmware version. An id that maps to no known model
    /// fails the serial subsystem: typed operations keep returning
    /// [`ModbusError::NotConnected`].
    pub async fn begin(&self) -> Result<Arc<DeviceProfile>> {
        if let Some(profile) = self.profile.load_full() {
            return Ok(profile);
        }
        let id = self.read_one_unchecked(Register::Id).await?;
        let model = Model::from_id(id).ok_or(ModbusError::UnknownModel(id))?;
        let current_range = if model.has_switched_current_range() {
            self.read_one_unchecked(Register::CurrentRange).await?
        } else {
            0
        };
        let serial = self
            .read_unchecked(Register::SerialNumberHigh.into(), 2)
            .await?;
        let serial_number = (u32::from(serial[0]) << 16) + u32::from(serial[1]);
        let firmware_version = self.read_one_unchecked(Register::Firmware).await?;
        let profile = Arc::new(DeviceProfile {
            id,
            model,
            scaling: Scaling::for_model(model, current_range),
            serial_number,
            firmware_version,
        });
        self.profile.store(Some(Arc::clone(&profile)));
        info!(
            model = %profile.model,
            serial_number = profile.serial_number,
            firmware = %profile.firmware_string(),
            "power supply identified"
        );
        Ok(profile)
    }

    pub fn is_connected(&self) -> bool {
        self.profile.load().is_some()
    }

    pub fn profile(&self) -> Result<Arc<DeviceProfile>> {
        self.profile.load_full().ok_or(ModbusError::NotConnected)
    }

    fn scaling(&self) -> Result<Scaling> {
        Ok(self.profile()?.scaling)
    }

    // --- raw seam -------------------------------------------------------

    /// Forward an opaque PDU to `slave` and hand back the raw reply PDU.
    ///
    /// This is the Modbus TCP bridge's passthrough path. It does not
    /// require the PSU to be identified; the transaction still honors the
    /// single-in-flight invariant and the 500 ms deadline.
    pub async fn raw_transaction(&self, slave: u8, pdu: Bytes) -> Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Transaction {
                slave,
                pdu,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ModbusError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ModbusError::ChannelClosed)?
    }

    // --- register-level operations --------------------------------------

    async fn read_unchecked(&self, offset: u16, count: u16) -> Result<Vec<u16>> {
        let mut pdu = BytesMut::with_capacity(5);
        pdu.put_u8(READ_HOLDING);
        pdu.put_u16(offset);
        pdu.put_u16(count);
        let reply = self.raw_transaction(SLAVE_ADDRESS, pdu.freeze()).await?;
        let data = expect_function(&reply, READ_HOLDING)?;
        if data.len() < 1 + 2 * count as usize || data[0] != (2 * count) as u8 {
            return Err(ModbusError::UnexpectedReply);
        }
        Ok(data[1..1 + 2 * count as usize]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }

    async fn read_one_unchecked(&self, reg: Register) -> Result<u16> {
        Ok(self.read_unchecked(reg.into(), 1).await?[0])
    }

    async fn write_unchecked(&self, offset: u16, value: u16) -> Result<()> {
        let mut pdu = BytesMut::with_capacity(5);
        pdu.put_u8(WRITE_SINGLE);
        pdu.put_u16(offset);
        pdu.put_u16(value);
        let pdu = pdu.freeze();
        let reply = self
            .raw_transaction(SLAVE_ADDRESS, pdu.clone())
            .await?;
        expect_function(&reply, WRITE_SINGLE)?;
        if reply != pdu {
            return Err(ModbusError::UnexpectedReply);
        }
        Ok(())
    }

    async fn write_many_unchecked(&self, offset: u16, values: &[u16]) -> Result<()> {
        let mut pdu = BytesMut::with_capacity(6 + 2 * values.len());
        pdu.put_u8(WRITE_MULTIPLE);
        pdu.put_u16(offset);
        pdu.put_u16(values.len() as u16);
        pdu.put_u8((2 * values.len()) as u8);
        for value in values {
            pdu.put_u16(*value);
        }
        let reply = self.raw_transaction(SLAVE_ADDRESS, pdu.freeze()).await?;
        let data = expect_function(&reply, WRITE_MULTIPLE)?;
        if data.len() < 4 || u16::from_be_bytes([data[2], data[3]]) != values.len() as u16 {
            return Err(ModbusError::UnexpectedReply);
        }
        Ok(())
    }

    /// Read `count` holding registers starting at `offset`.
    pub async fn read_holding(&self, offset: u16, count: u16) -> Result<Vec<u16>> {
        self.profile()?;
        self.read_unchecked(offset, count).await
    }

    /// Write a single holding register.
    pub async fn write_holding(&self, offset: u16, value: u16) -> Result<()> {
        self.profile()?;
        self.write_unchecked(offset, value).await
    }

    /// Write a run of holding registers.
    pub async fn write_holding_many(&self, offset: u16, values: &[u16]) -> Result<()> {
        self.profile()?;
        self.write_many_unchecked(offset, values).await
    }

    async fn read_reg(&self, reg: Register) -> Result<u16> {
        Ok(self.read_holding(reg.into(), 1).await?[0])
    }

    async fn read_pair(&self, reg: Register) -> Result<[u16; 2]> {
        let v = self.read_holding(reg.into(), 2).await?;
        Ok([v[0], v[1]])
    }

    async fn read_bool(&self, reg: Register) -> Result<bool> {
        Ok(self.read_reg(reg).await? != 0)
    }

    async fn write_bool(&self, reg: Register, value: bool) -> Result<()> {
        self.write_holding(reg.into(), value as u16).await
    }

    async fn read_voltage(&self, offset: u16) -> Result<f64> {
        let scaling = self.scaling()?;
        Ok(scaling.value_to_voltage(self.read_holding(offset, 1).await?[0]))
    }

    async fn write_voltage(&self, offset: u16, voltage: f64) -> Result<()> {
        let scaling = self.scaling()?;
        self.write_holding(offset, scaling.voltage_to_value(voltage))
            .await
    }

    async fn read_current(&self, offset: u16) -> Result<f64> {
        let scaling = self.scaling()?;
        Ok(scaling.value_to_current(self.read_holding(offset, 1).await?[0]))
    }

    async fn write_current(&self, offset: u16, current: f64) -> Result<()> {
        let scaling = self.scaling()?;
        self.write_holding(offset, scaling.current_to_value(current))
            .await
    }

    // --- identification -------------------------------------------------

    pub fn model(&self) -> Result<Model> {
        Ok(self.profile()?.model)
    }

    pub fn serial_number(&self) -> Result<u32> {
        Ok(self.profile()?.serial_number)
    }

    pub fn firmware_version(&self) -> Result<u16> {
        Ok(self.profile()?.firmware_version)
    }

    // --- measurements ---------------------------------------------------

    pub async fn get_system_temperature_celsius(&self) -> Result<f64> {
        Ok(values_to_temperature(
            self.read_pair(Register::SystemTemperatureCelsiusSign).await?,
        ))
    }

    pub async fn get_system_temperature_fahrenheit(&self) -> Result<f64> {
        Ok(values_to_temperature(
            self.read_pair(Register::SystemTemperatureFahrenheitSign)
                .await?,
        ))
    }

    pub async fn get_probe_temperature_celsius(&self) -> Result<f64> {
        Ok(values_to_temperature(
            self.read_pair(Register::ProbeTemperatureCelsiusSign).await?,
        ))
    }

    pub async fn get_probe_temperature_fahrenheit(&self) -> Result<f64> {
        Ok(values_to_temperature(
            self.read_pair(Register::ProbeTemperatureFahrenheitSign)
                .await?,
        ))
    }

    pub async fn get_voltage_set(&self) -> Result<f64> {
        self.read_voltage(Register::VoltageSet.into()).await
    }

    pub async fn set_voltage_set(&self, voltage: f64) -> Result<()> {
        self.write_voltage(Register::VoltageSet.into(), voltage).await
    }

    pub async fn get_current_set(&self) -> Result<f64> {
        self.read_current(Register::CurrentSet.into()).await
    }

    pub async fn set_current_set(&self, current: f64) -> Result<()> {
        self.write_current(Register::CurrentSet.into(), current).await
    }

    pub async fn get_voltage_out(&self) -> Result<f64> {
        self.read_voltage(Register::VoltageOut.into()).await
    }

    pub async fn get_current_out(&self) -> Result<f64> {
        self.read_current(Register::CurrentOut.into()).await
    }

    pub async fn get_power_out(&self) -> Result<f64> {
        let scaling = self.scaling()?;
        Ok(scaling.values_to_power(self.read_pair(Register::PowerOutHigh).await?))
    }

    pub async fn get_voltage_in(&self) -> Result<f64> {
        let scaling = self.scaling()?;
        Ok(scaling.value_to_voltage_in(self.read_reg(Register::VoltageIn).await?))
    }

    pub async fn is_keypad_locked(&self) -> Result<bool> {
        self.read_bool(Register::Keypad).await
    }

    pub async fn get_protection(&self) -> Result<Protection> {
        Ok(Protection::from_raw(self.read_reg(Register::Protection).await?))
    }

    pub async fn get_output_mode(&self) -> Result<OutputMode> {
        Ok(OutputMode::from_raw(self.read_reg(Register::OutputMode).await?))
    }

    pub async fn get_output_on(&self) -> Result<bool> {
        self.read_bool(Register::Output).await
    }

    pub async fn set_output_on(&self, on: bool) -> Result<()> {
        self.write_bool(Register::Output, on).await
    }

    pub async fn get_current_range(&self) -> Result<u16> {
        self.read_reg(Register::CurrentRange).await
    }

    pub async fn is_battery_mode(&self) -> Result<bool> {
        self.read_bool(Register::BatteryMode).await
    }

    pub async fn get_voltage_battery(&self) -> Result<f64> {
        self.read_voltage(Register::VoltageBattery.into()).await
    }

    pub async fn get_ah(&self) -> Result<f64> {
        Ok(values_to_milliunits(self.read_pair(Register::AhHigh).await?))
    }

    pub async fn get_wh(&self) -> Result<f64> {
        Ok(values_to_milliunits(self.read_pair(Register::WhHigh).await?))
    }

    // --- clock ----------------------------------------------------------

    pub async fn get_clock(&self) -> Result<Clock> {
        let v = self.read_holding(Register::Year.into(), 6).await?;
        Ok(Clock::from_values([v[0], v[1], v[2], v[3], v[4], v[5]]))
    }

    pub async fn set_clock(&self, clock: Clock) -> Result<()> {
        self.write_holding_many(Register::Year.into(), &clock.to_values())
            .await
    }

    pub async fn set_date(&self, year: u16, month: u16, day: u16) -> Result<()> {
        self.write_holding_many(Register::Year.into(), &[year, month, day])
            .await
    }

    pub async fn set_time(&self, hour: u16, minute: u16, second: u16) -> Result<()> {
        self.write_holding_many(Register::Hour.into(), &[hour, minute, second])
            .await
    }

    // --- options --------------------------------------------------------

    pub async fn is_take_ok(&self) -> Result<bool> {
        self.read_bool(Register::TakeOk).await
    }

    pub async fn set_take_ok(&self, on: bool) -> Result<()> {
        self.write_bool(Register::TakeOk, on).await
    }

    pub async fn is_take_out(&self) -> Result<bool> {
        self.read_bool(Register::TakeOut).await
    }

    pub async fn set_take_out(&self, on: bool) -> Result<()> {
        self.write_bool(Register::TakeOut, on).await
    }

    pub async fn is_power_on_boot(&self) -> Result<bool> {
        self.read_bool(Register::PowerOnBoot).await
    }

    pub async fn set_power_on_boot(&self, on: bool) -> Result<()> {
        self.write_bool(Register::PowerOnBoot, on).await
    }

    pub async fn is_buzzer_enabled(&self) -> Result<bool> {
        self.read_bool(Register::Buzzer).await
    }

    pub async fn set_buzzer_enabled(&self, on: bool) -> Result<()> {
        self.write_bool(Register::Buzzer, on).await
    }

    pub async fn is_logo(&self) -> Result<bool> {
        self.read_bool(Register::Logo).await
    }

    pub async fn set_logo(&self, on: bool) -> Result<()> {
        self.write_bool(Register::Logo, on).await
    }

    pub async fn get_language(&self) -> Result<u16> {
        self.read_reg(Register::Language).await
    }

    pub async fn set_language(&self, language: u16) -> Result<()> {
        self.write_holding(Register::Language.into(), language).await
    }

    pub async fn get_brightness(&self) -> Result<u8> {
        Ok(self.read_reg(Register::Brightness).await? as u8)
    }

    pub async fn set_brightness(&self, brightness: u8) -> Result<()> {
        self.write_holding(Register::Brightness.into(), brightness.into())
            .await
    }

    // --- calibration ----------------------------------------------------

    pub async fn get_calibration(&self) -> Result<Calibration> {
        let v = self.read_holding(Register::VOutZero.into(), 8).await?;
        Ok(Calibration::from_values([
            v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7],
        ]))
    }

    pub async fn set_calibration(&self, calibration: Calibration) -> Result<()> {
        self.write_holding_many(Register::VOutZero.into(), &calibration.to_values())
            .await
    }

    // --- presets --------------------------------------------------------

    /// Recall stored preset `index` (one-based: 1 is M1) into the live
    /// setpoints.
    pub async fn recall_preset(&self, index: u8) -> Result<()> {
        if index < 1 || index > NUMBER_OF_PRESETS {
            return Err(ModbusError::InvalidPreset(index));
        }
        self.write_holding(Register::Preset.into(), index.into())
            .await
    }

    /// Read stored slot `slot` (zero-based: 0 is M1).
    pub async fn get_preset(&self, slot: u8) -> Result<Preset> {
        let base = checked_preset_base(slot)?;
        let scaling = self.scaling()?;
        let v = self.read_holding(base, 4).await?;
        Ok(Preset::from_values([v[0], v[1], v[2], v[3]], &scaling))
    }

    /// Store `preset` into slot `slot` (zero-based: 0 is M1).
    pub async fn set_preset(&self, slot: u8, preset: Preset) -> Result<()> {
        let base = checked_preset_base(slot)?;
        let scaling = self.scaling()?;
        self.write_holding_many(base, &preset.to_values(&scaling))
            .await
    }

    pub async fn get_preset_voltage(&self, slot: u8) -> Result<f64> {
        self.read_voltage(checked_preset_base(slot)?).await
    }

    pub async fn set_preset_voltage(&self, slot: u8, voltage: f64) -> Result<()> {
        self.write_voltage(checked_preset_base(slot)?, voltage).await
    }

    pub async fn get_preset_current(&self, slot: u8) -> Result<f64> {
        self.read_current(checked_preset_base(slot)? + 1).await
    }

    pub async fn set_preset_current(&self, slot: u8, current: f64) -> Result<()> {
        self.write_current(checked_preset_base(slot)? + 1, current)
            .await
    }

    pub async fn get_preset_over_voltage_protection(&self, slot: u8) -> Result<f64> {
        self.read_voltage(checked_preset_base(slot)? + 2).await
    }

    pub async fn set_preset_over_voltage_protection(&self, slot: u8, voltage: f64) -> Result<()> {
        self.write_voltage(checked_preset_base(slot)? + 2, voltage)
            .await
    }

    pub async fn get_preset_over_current_protection(&self, slot: u8) -> Result<f64> {
        self.read_current(checked_preset_base(slot)? + 3).await
    }

    pub async fn set_preset_over_current_protection(&self, slot: u8, current: f64) -> Result<()> {
        self.write_current(checked_preset_base(slot)? + 3, current)
            .await
    }

    /// Set the live over-voltage protection (the M0 OVP cell).
    pub async fn set_over_voltage_protection(&self, voltage: f64) -> Result<()> {
        self.write_voltage(Register::M0Ovp.into(), voltage).await
    }

    /// Set the live over-current protection (the M0 OCP cell).
    pub async fn set_over_current_protection(&self, current: f64) -> Result<()> {
        self.write_current(Register::M0Ocp.into(), current).await
    }

    // --- bulk -----------------------------------------------------------

    /// Snapshot the whole interesting register range.
    ///
    /// The range is read in windows of at most [`READ_WINDOW`] cells and
    /// reassembled; the device silently truncates wider reads.
    pub async fn get_all_values(&self) -> Result<AllValues> {
        let scaling = self.scaling()?;
        let mut regs = vec![0u16; REGISTER_SPACE as usize];
        let mut offset = 0u16;
        while offset < REGISTER_SPACE {
            let count = READ_WINDOW.min(REGISTER_SPACE - offset);
            let window = self.read_holding(offset, count).await?;
            regs[offset as usize..(offset + count) as usize].copy_from_slice(&window);
            offset += count;
        }
        Ok(AllValues::from_registers(&regs, &scaling))
    }

    // --- bootloader -----------------------------------------------------

    /// Reboot the PSU into its serial bootloader. Fire and forget: the
    /// device drops off the bus afterwards and subsequent transactions are
    /// expected to time out.
    pub async fn reboot_to_bootloader(&self) -> Result<()> {
        self.write_holding(Register::System.into(), BOOTLOADER_MAGIC)
            .await
    }
}

fn checked_preset_base(slot: u8) -> Result<u16> {
    if slot >= NUMBER_OF_PRESETS {
        return Err(ModbusError::InvalidPreset(slot));
    }
    Ok(preset_base(slot))
}

/// Split a reply PDU into its data, mapping exception replies onto
/// [`ModbusError::Exception`].
fn expect_function(pdu: &[u8], function: u8) -> Result<&[u8]> {
    match pdu.first() {
        Some(&f) if f == function => Ok(&pdu[1..]),
        Some(&f) if f == function | 0x80 => Err(ModbusError::Exception(
            pdu.get(1).copied().unwrap_or(0),
        )),
        _ => Err(ModbusError::UnexpectedReply),
    }
}

/// Silent gap the bus is held idle between frames: 3.5 character times,
/// with the fixed 1.75 ms floor the RTU spec prescribes above 19200 baud.
fn inter_frame_gap(baudrate: u32) -> Duration {
    if baudrate > 19_200 {
        Duration::from_micros(1_750)
    } else {
        Duration::from_micros(u64::from(38_500_000 / baudrate.max(1200)))
    }
}

async fn run_bus<T>(io: T, mut rx: mpsc::Receiver<Transaction>, gap: Duration)
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut framed = Framed::new(io, RtuCodec::responses());
    while let Some(txn) = rx.recv().await {
        // Discard anything that arrived while the bus was idle (late
        // replies from a timed-out transaction, line noise).
        loop {
            match framed.next().now_or_never() {
                Some(Some(Ok(frame))) => {
                    warn!(slave = frame.slave, "discarding stale frame");
                }
                Some(Some(Err(e))) => {
                    warn!(error = %e, "discarding undecodable bytes");
                }
                _ => break,
            }
        }

        let request = RtuFrame {
            slave: txn.slave,
            pdu: txn.pdu,
        };
        if let Err(e) = framed.send(request).await {
            let _ = txn.reply.send(Err(e));
            continue;
        }

        let deadline = tokio::time::Instant::now() + TRANSACTION_TIMEOUT;
        let result = loop {
            match tokio::time::timeout_at(deadline, framed.next()).await {
                Err(_) => break Err(ModbusError::Timeout),
                Ok(None) => break Err(ModbusError::ChannelClosed),
                Ok(Some(Err(e))) => break Err(e),
                Ok(Some(Ok(frame))) => {
                    if frame.slave == txn.slave {
                        debug!(slave = frame.slave, len = frame.pdu.len(), "reply");
                        break Ok(frame.pdu);
                    }
                    warn!(
                        slave = frame.slave,
                        expected = txn.slave,
                        "reply from unexpected slave"
                    );
                }
            }
        };
        let _ = txn.reply.send(result);

        tokio::time::sleep(gap).await;
    }
    debug!("serial master task stopped");
}
