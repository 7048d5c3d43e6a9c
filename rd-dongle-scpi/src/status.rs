//! IEEE-488.2 status model, as far as this instrument carries one.
//!
//! The standard event register latches OPC; the status byte summarizes
//! the event register, the error queue and message availability. The
//! OPERation and QUEStionable structures exist for protocol completeness
//! and always report zero events.

/// Operation-complete bit of the event status register.
const ESR_OPC: u8 = 0x01;
/// Error/event queue summary bit of the status byte.
const STB_EAV: u8 = 0x04;
/// Message-available bit of the status byte.
const STB_MAV: u8 = 0x10;
/// Event-summary bit of the status byte.
const STB_ESB: u8 = 0x20;
/// Master summary bit.
const STB_MSS: u8 = 0x40;

#[derive(Debug, Default)]
pub struct StatusModel {
    esr: u8,
    ese: u8,
    sre: u8,
    pub operation_enable: u16,
    pub questionable_enable: u16,
}

impl StatusModel {
    /// `*CLS`: clear the event register; the caller clears the queue.
    pub fn clear_events(&mut self) {
        self.esr = 0;
    }

    /// `*RST` leaves enables alone per IEEE-488.2; only events drop.
    pub fn reset(&mut self) {
        self.esr = 0;
    }

    pub fn set_operation_complete(&mut self) {
        self.esr |= ESR_OPC;
    }

    /// `*ESR?` reads destructively.
    pub fn take_esr(&mut self) -> u8 {
        std::mem::take(&mut self.esr)
    }

    pub fn ese(&self) -> u8 {
        self.ese
    }

    pub fn set_ese(&mut self, value: u8) {
        self.ese = value;
    }

    pub fn sre(&self) -> u8 {
        self.sre
    }

    pub fn set_sre(&mut self, value: u8) {
        self.sre = value;
    }

    /// Compose the status byte. `error_pending` reflects the error queue,
    /// `message_available` the output buffer.
    pub fn stb(&self, error_pending: bool, message_available: bool) -> u8 {
        let mut stb = 0;
        if error_pending {
            stb |= STB_EAV;
        }
        if message_available {
            stb |= STB_MAV;
        }
        if self.esr & self.ese != 0 {
            stb |= STB_ESB;
        }
        if stb & self.sre & !STB_MSS != 0 {
            stb |= STB_MSS;
        }
        stb
    }

    /// `STATus:PRESet`: enables of the operation/questionable structures
    /// back to their preset values.
    pub fn preset(&mut self) {
        self.operation_enable = 0;
        self.questionable_enable = 0;
    }
}
