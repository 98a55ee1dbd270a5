//! Storage keys derived from a coin's platform deployments.
//!
//! A coin deployed as a token contract on several chains is stored once per
//! deployment (`<platform>:<address>`) and once under its canonical
//! `asset#<coinId>` key.

use crate::coingecko::CoinDetail;
use crate::errors::Result;
use std::collections::BTreeSet;
use std::future::Future;

/// Canonical storage key for a coin.
pub fn asset_key(coin_id: &str) -> String {
    format!("asset#{}", coin_id)
}

/// Platform storage keys declared by a coin detail payload.
///
/// Keys come out sorted with no duplicates. Entries with an
/// empty platform or address are skipped, and anything that is not a JSON
/// object yields no keys.
pub fn platform_keys(detail: &CoinDetail) -> Vec<String> {
    let Some(platforms) = detail.platforms.as_object() else {
        return Vec::new();
    };

    let mut keys = BTreeSet::new();
    for (platform, address) in platforms {
        let platform = platform.trim();
        let Some(address) = address.as_str().map(str::trim) else {
            continue;
        };
        if platform.is_empty() || address.is_empty() {
            continue;
        }
        keys.insert(format!("{}:{}", platform, address));
    }

    keys.into_iter().collect()
}

/// Run `store` for every platform key, one at a time.
///
/// Each call completes before the next key is produced. The first error
/// stops the iteration.
pub async fn for_each_platform_key<F, Fut>(detail: &CoinDetail, mut store: F) -> Result<()>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for key in platform_keys(detail) {
        store(key).await?;
    }
    Ok(())
}
