
//! Median-cut color quantization over a KD-tree in RGBA space.
//!
//! The tree partitions the pixel cloud along the axis of greatest variance,
//! estimated per node by a few power-iteration steps on the channel
//! covariance matrix. Nodes live in an arena and refer to children by index;
//! the whole tree is discarded once the palette and index assignments exist.



/// Splitting stops early once the widest remaining leaf is this uniform.
const SPREAD_EPSILON: f64 = 0.0001;
const POWER_ITERATIONS: usize = 10;


/// Palette and per-pixel assignments produced by `quantize`.
pub struct Quantized {
    /// RGBA palette entries, ordered by descending pixel count.
    pub palette: Vec<[u8; 4]>,
    /// Palette index per input pixel.
    pub indices: Vec<u8>,
    /// The input buffer with every pixel replaced by its palette color.
    pub pixels: Vec<u8>,
}

struct Node {
    i0: usize,
    i1: usize,
    stats: Stats,
    estimate: Estimate,
    left: Option<usize>,
    right: Option<usize>,
}

/// Raw moments of a pixel range: channel sums, second-moment matrix and
/// count. A right sibling's moments are the parent's minus the left child's.
#[derive(Clone)]
struct Stats {
    second: [f64; 16],
    mean_sum: [f64; 4],
    count: usize,
}

/// Derived per-node values: the mean color, the dominant covariance
/// eigenvector (split axis) with its eigenvalue (spread), and the split
/// thresholds in normalized and byte scale.
#[derive(Clone)]
struct Estimate {
    q: [f64; 4],
    axis: [f64; 4],
    spread: f64,
    threshold: f64,
    threshold255: f64,
    rgba: [u8; 4],
}


/// Builds a palette of at most `max_colors` entries over `rgba` (a multiple
/// of 4 bytes) and assigns every pixel its nearest entry.
///
/// Deterministic: the same input always yields the same palette order and
/// assignments.
pub fn quantize(rgba: &[u8], max_colors: usize) -> Quantized {
    // Indices are bytes, so the palette cannot exceed 256 entries.
    let max_colors = max_colors.min(256);
    // The tree partitions a scratch copy in place; index assignment below
    // runs over the original order.
    let mut scratch = rgba.to_vec();
    let mut arena: Vec<Node> = vec![];
    let mut leaves: Vec<usize> = vec![];

    let stats = collect_stats(&scratch, 0, scratch.len());
    arena.push(Node {
        i0: 0,
        i1: scratch.len(),
        estimate: estimate(&stats),
        stats,
        left: None,
        right: None,
    });
    leaves.push(0);

    while leaves.len() < max_colors {
        let mut widest = 0;
        let mut max_spread = 0.0;
        for (li, &id) in leaves.iter().enumerate() {
            if arena[id].estimate.spread > max_spread {
                max_spread = arena[id].estimate.spread;
                widest = li;
            }
        }
        if max_spread < SPREAD_EPSILON {
            break;
        }

        let id = leaves[widest];
        let (i0, i1, axis, threshold255) = {
            let node = &arena[id];
            (node.i0, node.i1, node.estimate.axis, node.estimate.threshold255)
        };
        let split = split_pixels(&mut scratch, i0, i1, &axis, threshold255);
        if split <= i0 || split >= i1 {
            // Degenerate split plane; this leaf cannot be divided.
            arena[id].estimate.spread = 0.0;
            continue;
        }

        let left_stats = collect_stats(&scratch, i0, split);
        let right_stats = subtract_stats(&arena[id].stats, &left_stats);

        let left_id = arena.len();
        arena.push(Node {
            i0,
            i1: split,
            estimate: estimate(&left_stats),
            stats: left_stats,
            left: None,
            right: None,
        });
        let right_id = arena.len();
        arena.push(Node {
            i0: split,
            i1,
            estimate: estimate(&right_stats),
            stats: right_stats,
            left: None,
            right: None,
        });

        arena[id].left = Some(left_id);
        arena[id].right = Some(right_id);
        leaves[widest] = left_id;
        leaves.push(right_id);
    }

    // Larger clusters get the lower palette indices; the sort is stable so
    // equal counts keep their discovery order.
    let mut order = leaves;
    order.sort_by(|&a, &b| arena[b].stats.count.cmp(&arena[a].stats.count));

    let mut palette_index = vec![0u8; arena.len()];
    let mut palette = Vec::with_capacity(order.len());
    for (i, &id) in order.iter().enumerate() {
        palette_index[id] = i as u8;
        palette.push(arena[id].estimate.rgba);
    }

    let mut indices = Vec::with_capacity(rgba.len() / 4);
    let mut pixels = vec![0u8; rgba.len()];
    for (pi, pixel) in rgba.chunks(4).enumerate() {
        let point = [
            f64::from(pixel[0]) / 255.0,
            f64::from(pixel[1]) / 255.0,
            f64::from(pixel[2]) / 255.0,
            f64::from(pixel[3]) / 255.0,
        ];
        let (id, _) = nearest(&arena, 0, &point);
        indices.push(palette_index[id]);
        pixels[pi * 4..pi * 4 + 4].copy_from_slice(&arena[id].estimate.rgba);
    }

    Quantized { palette, indices, pixels }
}


fn collect_stats(pixels: &[u8], i0: usize, i1: usize) -> Stats {
    let mut second = [0.0f64; 16];
    let mut mean_sum = [0.0f64; 4];
    let count = (i1 - i0) / 4;

    let mut i = i0;
    while i < i1 {
        let v = [
            f64::from(pixels[i]) / 255.0,
            f64::from(pixels[i + 1]) / 255.0,
            f64::from(pixels[i + 2]) / 255.0,
            f64::from(pixels[i + 3]) / 255.0,
        ];
        for (j, &vj) in v.iter().enumerate() {
            mean_sum[j] += vj;
            for (k, &vk) in v.iter().enumerate() {
                second[j * 4 + k] += vj * vk;
            }
        }
        i += 4;
    }

    Stats { second, mean_sum, count }
}

fn subtract_stats(parent: &Stats, left: &Stats) -> Stats {
    let mut second = [0.0f64; 16];
    let mut mean_sum = [0.0f64; 4];
    for i in 0..16 {
        second[i] = parent.second[i] - left.second[i];
    }
    for i in 0..4 {
        mean_sum[i] = parent.mean_sum[i] - left.mean_sum[i];
    }
    Stats { second, mean_sum, count: parent.count - left.count }
}

fn estimate(stats: &Stats) -> Estimate {
    let n = stats.count;
    let inv_n = if n == 0 { 0.0 } else { 1.0 / n as f64 };
    let m = &stats.mean_sum;

    // Covariance (times N); float error keeps it slightly off zero even for
    // uniform ranges, hence the epsilon cutoffs elsewhere.
    let mut cov = [0.0f64; 16];
    for j in 0..4 {
        for k in 0..4 {
            cov[j * 4 + k] = stats.second[j * 4 + k] - m[j] * m[k] * inv_n;
        }
    }

    // Power iteration toward the dominant eigenvector.
    let mut axis = [0.5f64; 4];
    let mut spread = 0.0;
    if n != 0 {
        for _ in 0..POWER_ITERATIONS {
            let next = mult_vec(&cov, &axis);
            let len = dot(&next, &next).sqrt();
            axis = scale(1.0 / len, &next);
            if (len - spread).abs() < 1e-9 {
                spread = len;
                break;
            }
            spread = len;
        }
    }

    let q = [m[0] * inv_n, m[1] * inv_n, m[2] * inv_n, m[3] * inv_n];
    let rgba = [
        (255.0 * q[0]).round() as u8,
        (255.0 * q[1]).round() as u8,
        (255.0 * q[2]).round() as u8,
        (255.0 * q[3]).round() as u8,
    ];

    Estimate {
        threshold: dot(&axis, &q),
        threshold255: dot(&scale(255.0, &q), &axis),
        q,
        axis,
        spread,
        rgba,
    }
}

/// Two-pointer partition of the byte range by the signed distance to the
/// split plane; returns the first index of the greater-side partition.
fn split_pixels(pixels: &mut [u8], i0: usize, i1: usize, axis: &[f64; 4], threshold: f64) -> usize {
    let start = i0;
    let end = i1;
    let mut i0 = i0;
    let mut i1 = i1 - 4;

    while i0 < i1 {
        while i0 <= i1 && project(pixels, i0, axis) <= threshold {
            i0 += 4;
        }
        while i1 > i0 && project(pixels, i1, axis) > threshold {
            i1 -= 4;
        }
        if i0 >= i1 {
            break;
        }
        for j in 0..4 {
            pixels.swap(i0 + j, i1 + j);
        }
        i0 += 4;
        i1 -= 4;
    }

    // Walk back to the last pixel on the near side; the split is just after.
    let mut s = i0.min(end - 4);
    loop {
        if project(pixels, s, axis) <= threshold {
            return s + 4;
        }
        if s < start + 4 {
            return start;
        }
        s -= 4;
    }
}

fn project(pixels: &[u8], i: usize, axis: &[f64; 4]) -> f64 {
    f64::from(pixels[i]) * axis[0]
        + f64::from(pixels[i + 1]) * axis[1]
        + f64::from(pixels[i + 2]) * axis[2]
        + f64::from(pixels[i + 3]) * axis[3]
}

/// Branch-and-bound descent: the near side is searched first, and the far
/// side only when the plane distance alone cannot rule it out.
fn nearest(arena: &[Node], id: usize, point: &[f64; 4]) -> (usize, f64) {
    let node = &arena[id];
    match (node.left, node.right) {
        (Some(left), Some(right)) => {
            let plane = dot(&node.estimate.axis, point) - node.estimate.threshold;
            let (near, far) = if plane <= 0.0 { (left, right) } else { (right, left) };

            let (near_id, near_dist) = nearest(arena, near, point);
            if near_dist <= plane * plane {
                return (near_id, near_dist);
            }
            let (far_id, far_dist) = nearest(arena, far, point);
            if far_dist < near_dist {
                (far_id, far_dist)
            } else {
                (near_id, near_dist)
            }
        },
        _ => {
            let q = &node.estimate.q;
            let mut dist = 0.0;
            for c in 0..4 {
                let d = point[c] - q[c];
                dist += d * d;
            }
            (id, dist)
        },
    }
}


fn mult_vec(m: &[f64; 16], v: &[f64; 4]) -> [f64; 4] {
    let mut out = [0.0f64; 4];
    for (j, value) in out.iter_mut().enumerate() {
        for k in 0..4 {
            *value += m[j * 4 + k] * v[k];
        }
    }
    out
}

fn dot(x: &[f64; 4], y: &[f64; 4]) -> f64 {
    x[0] * y[0] + x[1] * y[1] + x[2] * y[2] + x[3] * y[3]
}

fn scale(a: f64, y: &[f64; 4]) -> [f64; 4] {
    [a * y[0], a * y[1], a * y[2], a * y[3]]
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_colors_survive_exactly() {
        let mut rgba = vec![];
        for i in 0..64 {
            if i % 2 == 0 {
                rgba.extend_from_slice(&[255, 0, 0, 255]);
            } else {
                rgba.extend_from_slice(&[0, 0, 255, 255]);
            }
        }
        let result = quantize(&rgba, 16);
        assert_eq!(result.palette.len(), 2);
        assert!(result.palette.contains(&[255, 0, 0, 255]));
        assert!(result.palette.contains(&[0, 0, 255, 255]));
        for (pixel, &index) in rgba.chunks(4).zip(result.indices.iter()) {
            assert_eq!(&result.palette[usize::from(index)][..], pixel);
        }
    }

    #[test]
    fn test_single_color_input() {
        let rgba = [7u8, 8, 9, 255].iter().cloned().cycle().take(40).collect::<Vec<_>>();
        let result = quantize(&rgba, 8);
        assert_eq!(result.palette.len(), 1);
        assert!(result.indices.iter().all(|&i| i == 0));
    }

    #[test]
    fn test_palette_ordered_by_population() {
        let mut rgba = vec![];
        for _ in 0..30 {
            rgba.extend_from_slice(&[0, 255, 0, 255]);
        }
        for _ in 0..10 {
            rgba.extend_from_slice(&[255, 255, 255, 255]);
        }
        let result = quantize(&rgba, 4);
        assert_eq!(result.palette[0], [0, 255, 0, 255]);
    }
}
