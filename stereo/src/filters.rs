//! Disparity post-filters shared by both matchers.

use crate::disparity::{DisparityMap, DISPARITY_SCALE};
use std::collections::VecDeque;

/// Invalidate small connected blobs of similar disparity.
///
/// Two 4-neighbours belong to the same blob when both are valid and their raw
/// values differ by at most `max_diff` (in 1/16 pixel units). Blobs of at most
/// `max_speckle_size` pixels are set to the sentinel. Returns the number of
/// pixels removed.
pub fn filter_speckles(map: &mut DisparityMap, max_speckle_size: usize, max_diff: i32) -> usize {
    let (width, height) = (map.width() as usize, map.height() as usize);
    let invalid = map.invalid_value();
    let data = map.data_mut();
    if max_speckle_size == 0 || data.is_empty() {
        return 0;
    }

    let mut labels = vec![0u32; data.len()];
    let mut next_label = 0u32;
    let mut queue = VecDeque::new();
    let mut blob = Vec::new();
    let mut removed = 0;

    for start in 0..data.len() {
        if labels[start] != 0 || data[start] <= invalid {
            continue;
        }
        next_label += 1;
        labels[start] = next_label;
        queue.push_back(start);
        blob.clear();

        while let Some(i) = queue.pop_front() {
            blob.push(i);
            let value = data[i] as i32;
            let (x, y) = (i % width, i / width);
            let neighbours = [
                (x > 0).then(|| i - 1),
                (x + 1 < width).then(|| i + 1),
                (y > 0).then(|| i - width),
                (y + 1 < height).then(|| i + width),
            ];
            for j in neighbours.into_iter().flatten() {
                if labels[j] == 0
                    && data[j] > invalid
                    && (data[j] as i32 - value).abs() <= max_diff
                {
                    labels[j] = next_label;
                    queue.push_back(j);
                }
            }
        }

        if blob.len() <= max_speckle_size {
            for &i in &blob {
                data[i] = invalid;
            }
            removed += blob.len();
        }
    }

    removed
}

/// Speckle range as stored in the parameter set, converted to raw units.
pub(crate) fn speckle_range_raw(range_pixels: i32) -> i32 {
    range_pixels * DISPARITY_SCALE
}
