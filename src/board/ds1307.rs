use anyhow::{bail, Context, Result};
use esp_idf_hal::i2c::I2cDriver;
use log::info;

use segclock::clock::WallClock;
use segclock::hal::Rtc;

const DS1307_ADDR: u8 = 0x68;
const REG_SECONDS: u8 = 0x00;
const I2C_TIMEOUT_TICKS: u32 = 100;

// Seconds register bit 7: oscillator halted.
const CH_BIT: u8 = 0x80;
// Hours register bit 6: 12-hour mode.
const MODE_12H: u8 = 0x40;

pub struct Ds1307 {
    i2c: I2cDriver<'static>,
}

fn bcd_to_bin(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// 1 = Sunday ... 7 = Saturday.
fn day_of_week(time: &WallClock) -> u8 {
    // 1970-01-01 was a Thursday.
    ((time.to_unix().div_euclid(86_400) + 4).rem_euclid(7) + 1) as u8
}

impl Ds1307 {
    pub fn new(i2c: I2cDriver<'static>) -> Self {
        Ds1307 { i2c }
    }

    fn read_registers(&mut self) -> Result<[u8; 7]> {
        let mut regs = [0u8; 7];
        self.i2c
            .write_read(DS1307_ADDR, &[REG_SECONDS], &mut regs, I2C_TIMEOUT_TICKS)
            .context("DS1307 did not answer")?;
        Ok(regs)
    }
}

impl Rtc for Ds1307 {
    fn read(&mut self) -> Result<WallClock> {
        let r = self.read_registers()?;
        let hour = if r[2] & MODE_12H != 0 {
            // 12-hour mode: bit 5 = PM, hours 1-12.
            let h12 = bcd_to_bin(r[2] & 0x1F) % 12;
            if r[2] & 0x20 != 0 { h12 + 12 } else { h12 }
        } else {
            bcd_to_bin(r[2] & 0x3F)
        };
        let time = WallClock {
            year: 2000 + bcd_to_bin(r[6]) as u16,
            month: bcd_to_bin(r[5] & 0x1F),
            day: bcd_to_bin(r[4] & 0x3F),
            hour,
            minute: bcd_to_bin(r[1] & 0x7F),
            second: bcd_to_bin(r[0] & 0x7F),
        };
        if !time.is_valid() {
            bail!("DS1307 returned garbage: {:02X?}", r);
        }
        Ok(time)
    }

    fn write(&mut self, time: &WallClock) -> Result<()> {
        if !(2000..=2099).contains(&time.year) || !time.is_valid() {
            bail!("DS1307 cannot hold {}", time);
        }
        // Writing seconds with CH clear also restarts a halted oscillator.
        let frame = [
            REG_SECONDS,
            bin_to_bcd(time.second),
            bin_to_bcd(time.minute),
            bin_to_bcd(time.hour),
            day_of_week(time),
            bin_to_bcd(time.day),
            bin_to_bcd(time.month),
            bin_to_bcd((time.year - 2000) as u8),
        ];
        self.i2c
            .write(DS1307_ADDR, &frame, I2C_TIMEOUT_TICKS)
            .context("DS1307 write failed")?;
        Ok(())
    }

    fn is_running(&mut self) -> Result<bool> {
        let mut seconds = [0u8];
        self.i2c
            .write_read(DS1307_ADDR, &[REG_SECONDS], &mut seconds, I2C_TIMEOUT_TICKS)
            .with_context(|| format!("no DS1307 at 0x{:02X}", DS1307_ADDR))?;
        info!("DS1307 found at 0x{:02X}", DS1307_ADDR);
        Ok(seconds[0] & CH_BIT == 0)
    }
}
