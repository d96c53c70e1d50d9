use alloy_primitives::U256;
use alloy_primitives::utils::format_ether as format_ether_full;

/// Shortens `0x1234567890abcdef` to `0x1234...cdef` style, keeping `chars`
/// characters on each side after the prefix.
pub fn format_address(address: &str, chars: usize) -> String {
    shorten(address, chars)
}

pub fn format_hash(hash: &str, chars: usize) -> String {
    shorten(hash, chars)
}

fn shorten(value: &str, chars: usize) -> String {
    // Already short enough, or not ASCII hex
    if !value.is_ascii() || value.len() <= chars * 2 + 2 {
        return value.to_string();
    }
    format!("{}...{}", &value[..chars + 2], &value[value.len() - chars..])
}

/// Wei to ether with a fixed number of decimals (truncated, not rounded).
pub fn format_ether(value: U256, decimals: usize) -> String {
    let full = format_ether_full(value);
    match full.split_once('.') {
        Some((whole, _)) if decimals == 0 => whole.to_string(),
        Some((whole, fraction)) => {
            let mut fraction: String = fraction.chars().take(decimals).collect();
            while fraction.len() < decimals {
                fraction.push('0');
            }
            format!("{whole}.{fraction}")
        }
        None => full,
    }
}
