/// Timing parameters for the busy-wait and wake-up protocol.
///
/// The defaults are the W25Q128JV datasheet maxima (section 9.6, AC
/// electrical characteristics). Elapsed time is accounted as
/// `polls * poll_interval_us`, ignoring the time spent on the bus, so a
/// timeout never fires early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Delay between two status register polls.
    pub poll_interval_us: u32,
    /// tPP
    pub page_program_timeout_us: u32,
    /// tSE
    pub sector_erase_timeout_us: u32,
    /// tCE
    pub chip_erase_timeout_us: u32,
    /// tDP, CS high to power-down mode.
    pub power_down_delay_us: u32,
    /// tRES1, CS high to standby after Release Power-down.
    pub release_power_down_delay_us: u32,
    /// Bound on a busy status reported while the chip wakes up.
    pub wake_timeout_us: u32,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            poll_interval_us: 50,
            page_program_timeout_us: 3_000,
            sector_erase_timeout_us: 400_000,
            chip_erase_timeout_us: 200_000_000,
            power_down_delay_us: 3,
            release_power_down_delay_us: 3,
            wake_timeout_us: 1_000,
        }
    }

    pub const fn with_poll_interval_us(mut self, us: u32) -> Self {
        self.poll_interval_us = us;
        self
    }

    pub const fn with_page_program_timeout_us(mut self, us: u32) -> Self {
        self.page_program_timeout_us = us;
        self
    }

    pub const fn with_sector_erase_timeout_us(mut self, us: u32) -> Self {
        self.sector_erase_timeout_us = us;
        self
    }

    pub const fn with_chip_erase_timeout_us(mut self, us: u32) -> Self {
        self.chip_erase_timeout_us = us;
        self
    }

    pub const fn with_power_down_delay_us(mut self, us: u32) -> Self {
        self.power_down_delay_us = us;
        self
    }

    pub const fn with_release_power_down_delay_us(mut self, us: u32) -> Self {
        self.release_power_down_delay_us = us;
        self
    }

    pub const fn with_wake_timeout_us(mut self, us: u32) -> Self {
        self.wake_timeout_us = us;
        self
    }

    /// Poll interval actually used; never zero so a wait always makes progress.
    pub(crate) const fn poll_interval(&self) -> u32 {
        if self.poll_interval_us == 0 {
            1
        } else {
            self.poll_interval_us
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
