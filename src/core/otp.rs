// src/core/otp.rs — One-time passcodes for stale reconnections
//
// The first code is sent to the peer; the wallet shows the whole sequence so
// the user can pick the one the dapp displays.

use crate::infra::errors::ConnectError;

pub const OTP_LENGTH: usize = 3;
const OTP_MIN: u8 = 10;
const OTP_MAX: u8 = 99;

/// Generate `OTP_LENGTH` distinct two-digit codes from the OS CSPRNG.
pub fn generate_otp() -> Result<Vec<u8>, ConnectError> {
    let span = OTP_MAX - OTP_MIN + 1; // 90
    // Largest multiple of `span` that fits in a byte; reject above it to avoid bias.
    let reject_threshold = (256 - (256 % span as u16)) as u8;

    let mut codes = Vec::with_capacity(OTP_LENGTH);
    let mut buf = [0u8; 16];
    while codes.len() < OTP_LENGTH {
        getrandom::getrandom(&mut buf)
            .map_err(|e| anyhow::anyhow!("OS CSPRNG unavailable: {e}"))?;
        for &b in &buf {
            if codes.len() >= OTP_LENGTH {
                break;
            }
            if b >= reject_threshold {
                continue;
            }
            let code = OTP_MIN + b % span;
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }
    Ok(codes)
}
