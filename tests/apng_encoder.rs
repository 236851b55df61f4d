use animg_codec::apng::decoder::Image;
use animg_codec::apng::encoder::{encode, EncodeOptions, Filter};
use animg_codec::apng::{ColorType, Delay, Frame};
use animg_codec::{decode_animation, LoopCount};

use rand::prelude::*;



fn delay() -> Delay {
    Delay::new(1, 10)
}

fn roundtrip(width: u32, height: u32, frames: &[Vec<u8>], options: &EncodeOptions) -> (Vec<u8>, Vec<Vec<u8>>) {
    let inputs: Vec<Frame> = frames.iter().map(|rgba| Frame { rgba, delay: delay() }).collect();
    let mut encoded = vec![];
    encode(&mut encoded, width, height, &inputs, options).unwrap();
    let decoded = Image::decode(&encoded).unwrap().frames_rgba().unwrap();
    (encoded, decoded)
}

/// A deterministic opaque gradient with more than 256 distinct colors.
fn gradient(width: usize, height: usize) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            rgba.extend_from_slice(&[x as u8, y as u8, (x * 7 + y * 13) as u8, 255]);
        }
    }
    rgba
}


#[test]
fn test_roundtrip_opaque_rgb() {
    let frame = gradient(20, 20);
    let (encoded, decoded) = roundtrip(20, 20, &[frame.clone()], &EncodeOptions::default());

    // A single fully opaque frame with many colors lands on truecolor RGB.
    let image = Image::decode(&encoded).unwrap();
    assert_eq!(image.header.color_type, ColorType::Rgb);
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0], frame);
}

#[test]
fn test_roundtrip_rgba_with_alpha() {
    let mut frame = gradient(20, 20);
    for (i, chunk) in frame.chunks_mut(4).enumerate() {
        chunk[3] = 55 + (i % 200) as u8;
    }
    let options = EncodeOptions { forbid_palette: true, ..Default::default() };
    let (encoded, decoded) = roundtrip(20, 20, &[frame.clone()], &options);

    let image = Image::decode(&encoded).unwrap();
    assert_eq!(image.header.color_type, ColorType::Rgba);
    assert_eq!(decoded[0], frame);
}

#[test]
fn test_roundtrip_palettized() {
    // Four colors, one of them translucent.
    let colors: [[u8; 4]; 4] = [
        [255, 0, 0, 255],
        [0, 255, 0, 255],
        [0, 0, 255, 255],
        [0, 0, 0, 128],
    ];
    let mut frame = vec![];
    for i in 0..64 {
        frame.extend_from_slice(&colors[i % 4]);
    }
    let (encoded, decoded) = roundtrip(8, 8, &[frame.clone()], &EncodeOptions::default());

    let image = Image::decode(&encoded).unwrap();
    assert_eq!(image.header.color_type, ColorType::Palette);
    assert_eq!(image.header.bit_depth, 2);
    assert!(image.transparency.is_some());
    assert_eq!(decoded[0], frame);
}

#[test]
fn test_roundtrip_palettized_binary() {
    let mut frame = vec![];
    for i in 0..64 {
        frame.extend_from_slice(if i % 2 == 0 { &[0, 0, 0, 255] } else { &[255, 255, 255, 255] });
    }
    let (encoded, decoded) = roundtrip(8, 8, &[frame.clone()], &EncodeOptions::default());
    assert_eq!(Image::decode(&encoded).unwrap().header.bit_depth, 1);
    assert_eq!(decoded[0], frame);
}

#[test]
fn test_roundtrip_every_fixed_filter() {
    let frame = gradient(16, 16);
    for filter in &[Filter::None, Filter::Sub, Filter::Up, Filter::Average, Filter::Paeth] {
        let options = EncodeOptions { filter: Some(*filter), ..Default::default() };
        let (_, decoded) = roundtrip(16, 16, &[frame.clone()], &options);
        assert_eq!(decoded[0], frame, "filter {:?}", filter);
    }
}

#[test]
fn test_roundtrip_animation() {
    let base = gradient(12, 12);
    // Second frame changes a small box, third reverts to the base.
    let mut second = base.clone();
    for y in 3..6 {
        for x in 2..7 {
            let i = (y * 12 + x) * 4;
            second[i..i + 4].copy_from_slice(&[9, 99, 199, 255]);
        }
    }
    let frames = vec![base.clone(), second.clone(), base.clone()];
    let (encoded, decoded) = roundtrip(12, 12, &frames, &EncodeOptions::default());

    let image = Image::decode(&encoded).unwrap();
    assert_eq!(image.animation.map(|a| a.num_frames), Some(3));
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[0], base);
    assert_eq!(decoded[1], second);
    assert_eq!(decoded[2], base);
}

#[test]
fn test_animation_frames_are_reduced() {
    let base = vec![255u8; 10 * 10 * 4];
    let mut second = base.clone();
    let i = (4 * 10 + 4) * 4;
    second[i..i + 4].copy_from_slice(&[0, 0, 0, 255]);

    let inputs = vec![
        Frame { rgba: &base, delay: delay() },
        Frame { rgba: &second, delay: delay() },
    ];
    let mut encoded = vec![];
    encode(&mut encoded, 10, 10, &inputs, &EncodeOptions::default()).unwrap();

    let image = Image::decode(&encoded).unwrap();
    let rect = image.frames[1].control.rect;
    assert_eq!((rect.x, rect.y, rect.width, rect.height), (4, 4, 1, 1));
}

#[test]
fn test_quantized_encode_caps_palette() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut frame = vec![0u8; 24 * 24 * 4];
    for pixel in frame.chunks_mut(4) {
        pixel[0] = rng.gen();
        pixel[1] = rng.gen();
        pixel[2] = rng.gen();
        pixel[3] = 255;
    }

    let options = EncodeOptions { max_colors: Some(16), ..Default::default() };
    let inputs = vec![Frame { rgba: &frame, delay: delay() }];
    let mut encoded = vec![];
    encode(&mut encoded, 24, 24, &inputs, &options).unwrap();

    let image = Image::decode(&encoded).unwrap();
    assert_eq!(image.header.color_type, ColorType::Palette);
    assert!(image.palette.as_ref().unwrap().len() / 3 <= 16);

    let decoded = image.frames_rgba().unwrap();
    let mut distinct: Vec<&[u8]> = decoded[0].chunks(4).collect();
    distinct.sort();
    distinct.dedup();
    assert!(distinct.len() <= 16);
}

#[test]
fn test_play_count_written() {
    let frames = vec![gradient(4, 4), vec![0u8; 64]];

    let infinite = roundtrip(4, 4, &frames, &EncodeOptions::default()).0;
    assert_eq!(decode_animation(&infinite).unwrap().loop_count, LoopCount::Infinite);

    let finite = roundtrip(4, 4, &frames, &EncodeOptions { plays: 3, ..Default::default() }).0;
    assert_eq!(decode_animation(&finite).unwrap().loop_count, LoopCount::Finite(3));
}

#[test]
fn test_delay_survives_roundtrip() {
    let frames = vec![gradient(4, 4), vec![0u8; 64]];
    let (encoded, _) = roundtrip(4, 4, &frames, &EncodeOptions::default());

    let animation = decode_animation(&encoded).unwrap();
    assert_eq!(animation.frames[0].delay_ms, 100);
    assert_eq!(animation.frames[1].delay_ms, 100);
}

#[test]
fn test_empty_frame_list_is_rejected() {
    let mut out = vec![];
    assert!(encode(&mut out, 4, 4, &[], &EncodeOptions::default()).is_err());
}

#[test]
fn test_wrong_buffer_size_is_rejected() {
    let rgba = vec![0u8; 12];
    let frames = [Frame { rgba: &rgba, delay: delay() }];
    let mut out = vec![];
    assert!(encode(&mut out, 4, 4, &frames, &EncodeOptions::default()).is_err());
}
