//! Size and fee arithmetic for etching transactions
//!
//! Sizes are computed in weight units and converted to virtual bytes the way
//! the network does (`ceil(weight / 4)`). Every non-OP_RETURN input spent by
//! the pipeline is a taproot key-path spend with a 64-byte Schnorr signature
//! (default sighash), so the estimate is exact for transactions with fewer
//! than 253 inputs and outputs.
//!
//! Example:
//! ```
//! use runeforge_common::math::{estimate_vsize, calculate_fee};
//!
//! // one taproot input, a 20-byte OP_RETURN script and one P2TR output
//! let vsize = estimate_vsize(1, &[20, 34]);
//! assert_eq!(calculate_fee(vsize, 2), vsize as u64 * 2);
//! ```

use crate::types::DUST_THRESHOLD;

/// Version, locktime and the input/output count varints, in weight units
pub const TX_OVERHEAD_WEIGHT: usize = 40;

/// Segwit marker and flag bytes
pub const SEGWIT_MARKER_WEIGHT: usize = 2;

/// Outpoint, empty script_sig and sequence
pub const INPUT_BASE_WEIGHT: usize = 164;

/// Witness item count, signature length and 64-byte Schnorr signature
pub const TAPROOT_KEYSPEND_WITNESS_WEIGHT: usize = 66;

/// Length of a P2TR output script
pub const P2TR_SCRIPT_LEN: usize = 34;

/// Determines if an amount is considered "dust" (too small to be relayed)
pub fn is_dust_amount(amount_sats: u64) -> bool {
    amount_sats < DUST_THRESHOLD
}

/// Weight of one output with a script of `script_len` bytes.
pub fn output_weight(script_len: usize) -> usize {
    // value, script length varint, script
    (8 + 1 + script_len) * 4
}

/// Weight of a transaction spending `inputs` taproot key-path inputs into
/// outputs with the given script lengths.
pub fn estimate_weight(inputs: usize, output_script_lens: &[usize]) -> usize {
    let witness = if inputs > 0 {
        SEGWIT_MARKER_WEIGHT + inputs * TAPROOT_KEYSPEND_WITNESS_WEIGHT
    } else {
        0
    };

    TX_OVERHEAD_WEIGHT
        + inputs * INPUT_BASE_WEIGHT
        + witness
        + output_script_lens
            .iter()
            .map(|len| output_weight(*len))
            .sum::<usize>()
}

/// Virtual size in vbytes, rounded up.
pub fn estimate_vsize(inputs: usize, output_script_lens: &[usize]) -> usize {
    (estimate_weight(inputs, output_script_lens) + 3) / 4
}

/// Calculates the fee for a transaction based on size and fee rate
///
/// # Arguments
/// * `vsize` - The virtual size of the transaction
/// * `fee_rate` - The fee rate in satoshis per vbyte
pub fn calculate_fee(vsize: usize, fee_rate: u64) -> u64 {
    (vsize as u64).saturating_mul(fee_rate)
}
