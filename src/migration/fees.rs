//! Destination storage fee for a set of declared assets

use crate::assets::PreparedAsset;
use crate::config::FeesConfig;
use crate::humanize::ByteSize;

/// `prize * assets + started_mib(total bytes) * fee_per_megabyte`
pub fn storage_fee(fees: &FeesConfig, assets: &[PreparedAsset]) -> u128 {
    let total_bytes: u64 = assets.iter().map(|a| a.descriptor.size).sum();
    let prizes = u128::from(fees.data_object_deletion_prize) * assets.len() as u128;
    let size_fee = u128::from(ByteSize(total_bytes).mib_ceil()) * u128::from(fees.fee_per_megabyte);
    prizes + size_fee
}
