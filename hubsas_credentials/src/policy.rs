//! Refresh decisions
//!
//! Everything here is a pure function of its arguments. A token is renewed
//! _mandatorily_ once it has expired, and _proactively_ once a configured percentage
//! of its lifetime has elapsed.
//!
//! Buffer arithmetic multiplies whole seconds by the percentage as a floating-point
//! fraction and truncates the product, so thresholds may be up to one unit below the
//! exact value.

use std::convert::TryFrom;

use aliri_clock::UnixTime;
use hubsas::SasToken;
use serde::{Deserialize, Serialize};

use crate::error::{config_error, ConfigError};

/// Lifetime of newly minted tokens unless configured otherwise
pub const DEFAULT_TOKEN_VALID_SECS: u64 = 3600;

/// Percentage of a token's lifetime after which it is renewed proactively, unless
/// configured otherwise
pub const DEFAULT_TIME_BUFFER_PERCENT: u8 = 85;

/// Whether an expired token needs to be replaced by the caller
///
/// True only when the token has expired and its owner cannot mint another one.
#[must_use]
pub fn is_manual_renewal_necessary(token: &SasToken, now: UnixTime, can_auto_refresh: bool) -> bool {
    token.is_expired_at(now) && !can_auto_refresh
}

/// Whether `token` should be replaced as of `now`
///
/// Expired tokens are always due. Unexpired tokens are due only when `proactive` is
/// requested and the buffer point of their lifetime has been reached.
#[must_use]
pub fn should_refresh(
    token: &SasToken,
    now: UnixTime,
    token_valid_secs: u64,
    time_buffer_percent: u8,
    proactive: bool,
) -> bool {
    if token.is_expired_at(now) {
        true
    } else if proactive {
        now >= proactive_renewal_at(token, token_valid_secs, time_buffer_percent)
    } else {
        false
    }
}

/// The time at which `token` becomes due for proactive renewal
///
/// The token is assumed to have been minted `token_valid_secs` before its expiry.
#[must_use]
pub fn proactive_renewal_at(
    token: &SasToken,
    token_valid_secs: u64,
    time_buffer_percent: u8,
) -> UnixTime {
    let token_start = token.expiry().0.saturating_sub(token_valid_secs);
    let threshold = (token_valid_secs as f64 * buffer_fraction(time_buffer_percent)) as u64;
    UnixTime(token_start.saturating_add(threshold))
}

/// Milliseconds from minting after which a token is due for proactive renewal
#[must_use]
pub fn millis_before_proactive_renewal(token_valid_secs: u64, time_buffer_percent: u8) -> u64 {
    (token_valid_secs as f64 * 1000.0 * buffer_fraction(time_buffer_percent)) as u64
}

/// The expiry to give a token minted at `now`
///
/// One second is added so that a token is never issued already expired due to clock
/// granularity.
#[must_use]
pub fn next_expiry(now: UnixTime, token_valid_secs: u64) -> UnixTime {
    UnixTime(now.0.saturating_add(token_valid_secs).saturating_add(1))
}

fn buffer_fraction(time_buffer_percent: u8) -> f64 {
    f64::from(time_buffer_percent) / 100.0
}

/// Configuration for the lifetime and renewal point of minted tokens
///
/// Values are validated when set; no invalid configuration can be constructed, not
/// even through deserialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRenewalConfig", into = "RawRenewalConfig")]
pub struct RenewalConfig {
    token_valid_secs: u64,
    time_buffer_percent: u8,
}

impl Default for RenewalConfig {
    /// Default renewal configuration
    ///
    /// Tokens live for one hour and are renewed proactively once 85% of that hour has
    /// passed.
    fn default() -> Self {
        Self {
            token_valid_secs: DEFAULT_TOKEN_VALID_SECS,
            time_buffer_percent: DEFAULT_TIME_BUFFER_PERCENT,
        }
    }
}

impl RenewalConfig {
    /// Constructs a new renewal configuration
    ///
    /// # Errors
    ///
    /// `token_valid_secs` is zero, or `time_buffer_percent` is outside `1..=100`.
    pub fn new(token_valid_secs: u64, time_buffer_percent: u8) -> Result<Self, ConfigError> {
        Self::default()
            .with_token_valid_secs(token_valid_secs)?
            .with_time_buffer_percent(time_buffer_percent)
    }

    /// Sets the lifetime of newly minted tokens
    ///
    /// # Errors
    ///
    /// `token_valid_secs` is zero.
    pub fn with_token_valid_secs(mut self, token_valid_secs: u64) -> Result<Self, ConfigError> {
        if token_valid_secs < 1 {
            return Err(config_error("token lifetime must be at least one second"));
        }

        self.token_valid_secs = token_valid_secs;
        Ok(self)
    }

    /// Sets the percentage of a token's lifetime after which it is renewed proactively
    ///
    /// # Errors
    ///
    /// `time_buffer_percent` is outside `1..=100`.
    pub fn with_time_buffer_percent(mut self, time_buffer_percent: u8) -> Result<Self, ConfigError> {
        if !(1..=100).contains(&time_buffer_percent) {
            return Err(config_error(format!(
                "time buffer percentage must be within 1 and 100, got {}",
                time_buffer_percent
            )));
        }

        self.time_buffer_percent = time_buffer_percent;
        Ok(self)
    }

    /// The lifetime of newly minted tokens, in seconds
    #[inline]
    #[must_use]
    pub fn token_valid_secs(&self) -> u64 {
        self.token_valid_secs
    }

    /// The percentage of a token's lifetime after which it is renewed proactively
    #[inline]
    #[must_use]
    pub fn time_buffer_percent(&self) -> u8 {
        self.time_buffer_percent
    }

    /// Applies [`should_refresh()`] with this configuration
    #[inline]
    #[must_use]
    pub fn should_refresh(&self, token: &SasToken, now: UnixTime, proactive: bool) -> bool {
        should_refresh(
            token,
            now,
            self.token_valid_secs,
            self.time_buffer_percent,
            proactive,
        )
    }

    /// Applies [`proactive_renewal_at()`] with this configuration
    #[inline]
    #[must_use]
    pub fn proactive_renewal_at(&self, token: &SasToken) -> UnixTime {
        proactive_renewal_at(token, self.token_valid_secs, self.time_buffer_percent)
    }

    /// Applies [`millis_before_proactive_renewal()`] with this configuration
    #[inline]
    #[must_use]
    pub fn millis_before_proactive_renewal(&self) -> u64 {
        millis_before_proactive_renewal(self.token_valid_secs, self.time_buffer_percent)
    }

    /// Applies [`next_expiry()`] with this configuration
    #[inline]
    #[must_use]
    pub fn next_expiry(&self, now: UnixTime) -> UnixTime {
        next_expiry(now, self.token_valid_secs)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct RawRenewalConfig {
    token_valid_secs: u64,
    time_buffer_percent: u8,
}

impl Default for RawRenewalConfig {
    fn default() -> Self {
        RenewalConfig::default().into()
    }
}

impl From<RenewalConfig> for RawRenewalConfig {
    fn from(config: RenewalConfig) -> Self {
        Self {
            token_valid_secs: config.token_valid_secs,
            time_buffer_percent: config.time_buffer_percent,
        }
    }
}

impl TryFrom<RawRenewalConfig> for RenewalConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRenewalConfig) -> Result<Self, Self::Error> {
        Self::new(raw.token_valid_secs, raw.time_buffer_percent)
    }
}
