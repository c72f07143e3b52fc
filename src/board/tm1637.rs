//! Bit-banged TM1637 four-digit LED driver.
//!
//! The chip speaks an I2C-like two-wire protocol without addresses, LSB
//! first. DIO is open drain with the module's pull-up, so releasing it
//! (driving high) lets the chip pull it low for the ACK.

use anyhow::{bail, Result};
use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, InputOutput, Output, PinDriver};

use segclock::hal::SegmentDisplay;

const CMD_DATA_AUTO_INCREMENT: u8 = 0x40;
const CMD_ADDRESS_DIGIT0: u8 = 0xC0;
const CMD_DISPLAY_ON: u8 = 0x88;
const COLON_BIT: u8 = 0x80;
const BIT_DELAY_US: u32 = 5;
pub const MAX_BRIGHTNESS: u8 = 7;

pub struct Tm1637 {
    clk: PinDriver<'static, AnyOutputPin, Output>,
    dio: PinDriver<'static, AnyIOPin, InputOutput>,
    brightness: u8,
}

impl Tm1637 {
    pub fn new(clk: AnyOutputPin, dio: AnyIOPin) -> Result<Self> {
        let mut clk = PinDriver::output(clk)?;
        let mut dio = PinDriver::input_output_od(dio)?;
        clk.set_high()?;
        dio.set_high()?;
        Ok(Tm1637 {
            clk,
            dio,
            brightness: MAX_BRIGHTNESS,
        })
    }

    pub fn set_brightness(&mut self, level: u8) {
        self.brightness = level.min(MAX_BRIGHTNESS);
    }

    fn bit_delay() {
        Ets::delay_us(BIT_DELAY_US);
    }

    fn start(&mut self) -> Result<()> {
        self.clk.set_high()?;
        self.dio.set_high()?;
        Self::bit_delay();
        self.dio.set_low()?;
        Self::bit_delay();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.clk.set_low()?;
        Self::bit_delay();
        self.dio.set_low()?;
        Self::bit_delay();
        self.clk.set_high()?;
        Self::bit_delay();
        self.dio.set_high()?;
        Self::bit_delay();
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        for bit in 0..8 {
            self.clk.set_low()?;
            if byte & (1 << bit) != 0 {
                self.dio.set_high()?;
            } else {
                self.dio.set_low()?;
            }
            Self::bit_delay();
            self.clk.set_high()?;
            Self::bit_delay();
        }

        // Ninth clock: release DIO and sample the ACK.
        self.clk.set_low()?;
        self.dio.set_high()?;
        Self::bit_delay();
        self.clk.set_high()?;
        Self::bit_delay();
        let acked = self.dio.is_low();
        self.clk.set_low()?;
        Self::bit_delay();
        if !acked {
            bail!("tm1637: no ACK for 0x{:02X}", byte);
        }
        Ok(())
    }

    fn command(&mut self, bytes: &[u8]) -> Result<()> {
        self.start()?;
        let sent = bytes.iter().try_for_each(|&b| self.write_byte(b));
        // Always release the bus, even after a missing ACK.
        self.stop()?;
        sent
    }
}

impl SegmentDisplay for Tm1637 {
    fn render(&mut self, glyphs: &[u8; 4], colon_on: bool) -> Result<()> {
        let mut segments = *glyphs;
        if colon_on {
            segments[1] |= COLON_BIT;
        }
        self.command(&[CMD_DATA_AUTO_INCREMENT])?;
        self.command(&[
            CMD_ADDRESS_DIGIT0,
            segments[0],
            segments[1],
            segments[2],
            segments[3],
        ])?;
        self.command(&[CMD_DISPLAY_ON | self.brightness])
    }
}
