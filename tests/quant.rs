use animg_codec::quant::quantize;

use rand::prelude::*;



fn random_pixels(count: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rgba = vec![0u8; count * 4];
    for pixel in rgba.chunks_mut(4) {
        for channel in pixel.iter_mut() {
            *channel = rng.gen();
        }
    }
    rgba
}

/// Well-separated colors so every cluster is unambiguous.
fn separated_colors(count: usize) -> Vec<[u8; 4]> {
    (0..count)
        .map(|i| {
            let v = (i * 255 / count.max(1)) as u8;
            [v, 255 - v, (i % 2) as u8 * 200, 255]
        })
        .collect()
}


#[test]
fn test_deterministic() {
    let rgba = random_pixels(500, 3);
    let first = quantize(&rgba, 16);
    let second = quantize(&rgba, 16);
    assert_eq!(first.palette, second.palette);
    assert_eq!(first.indices, second.indices);
}

#[test]
fn test_palette_size_is_min_of_target_and_distinct() {
    let colors = separated_colors(10);
    let mut rgba = vec![];
    for i in 0..400 {
        rgba.extend_from_slice(&colors[i % 10]);
    }

    let capped = quantize(&rgba, 4);
    assert_eq!(capped.palette.len(), 4);

    let uncapped = quantize(&rgba, 32);
    assert_eq!(uncapped.palette.len(), 10);
}

#[test]
fn test_indices_always_in_range() {
    let rgba = random_pixels(1000, 9);
    for &target in &[2usize, 5, 16, 256] {
        let result = quantize(&rgba, target);
        assert!(result.palette.len() <= target);
        assert!(!result.palette.is_empty());
        assert_eq!(result.indices.len(), 1000);
        for &index in &result.indices {
            assert!(usize::from(index) < result.palette.len());
        }
    }
}

#[test]
fn test_alpha_is_a_quantization_axis() {
    // Same color at two alphas must not collapse into one entry.
    let mut rgba = vec![];
    for i in 0..100 {
        rgba.extend_from_slice(&[200, 100, 50, if i % 2 == 0 { 255 } else { 0 }]);
    }
    let result = quantize(&rgba, 8);
    assert_eq!(result.palette.len(), 2);
}

#[test]
fn test_assignment_picks_nearest_entry() {
    let colors = separated_colors(6);
    let mut rgba = vec![];
    for i in 0..600 {
        rgba.extend_from_slice(&colors[i % 6]);
    }
    let result = quantize(&rgba, 6);

    // Six uniform clusters: every pixel maps back to exactly its own color.
    for (pixel, &index) in rgba.chunks(4).zip(result.indices.iter()) {
        assert_eq!(&result.palette[usize::from(index)][..], pixel);
    }
}

#[test]
fn test_quantized_pixel_buffer_matches_palette() {
    let rgba = random_pixels(256, 11);
    let result = quantize(&rgba, 8);
    for (i, &index) in result.indices.iter().enumerate() {
        assert_eq!(&result.pixels[i * 4..i * 4 + 4], &result.palette[usize::from(index)][..]);
    }
}
