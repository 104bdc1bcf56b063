//! Per-category quota math.

use std::collections::BTreeMap;

/// Split `total` articles across `categories`.
///
/// With `distribute_evenly`, every category gets `total / n` and the first
/// `total % n` categories (in list order) get one more, so the quotas sum to
/// `total`. Otherwise every category gets `ceil(total / n)`.
///
/// Duplicate category names are counted once, at their first position.
pub fn category_quotas(
    total: u32,
    categories: &[String],
    distribute_evenly: bool,
) -> BTreeMap<String, u32> {
    let mut unique: Vec<&String> = Vec::with_capacity(categories.len());
    for c in categories {
        if !unique.contains(&c) {
            unique.push(c);
        }
    }
    if unique.is_empty() {
        return BTreeMap::new();
    }

    let n = unique.len() as u32;
    let base = total / n;
    let remainder = total % n;

    unique
        .into_iter()
        .enumerate()
        .map(|(i, category)| {
            let quota = if distribute_evenly {
                base + u32::from((i as u32) < remainder)
            } else {
                total.div_ceil(n)
            };
            (category.clone(), quota)
        })
        .collect()
}
