
//! Codec for animated images: decodes GIF87a/89a and PNG/APNG to RGBA8 frame
//! sequences, and encodes RGBA8 frame sequences back to (A)PNG.

pub mod apng;
pub mod errors;
pub mod gif;
pub mod quant;

use crate::apng::decoder::Image;
use crate::errors::{CodecError, CodecResult, Completion};
use crate::gif::decoder::GifReader;
use crate::gif::ChannelOrder;



/// A sub-rectangle of the logical canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Container format, decided once from the magic bytes. No other sniffing
/// is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Gif,
    Png,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Infinite,
    Finite(u32),
}

/// A decoded frame sequence, ready for a playback layer to drive.
pub struct Animation {
    pub width: u32,
    pub height: u32,
    pub loop_count: LoopCount,
    pub frames: Vec<AnimationFrame>,
}

pub struct AnimationFrame {
    /// Canvas-sized RGBA8 buffer.
    pub rgba: Vec<u8>,
    pub delay_ms: u32,
    /// For GIF frames, the sub-rectangle this frame actually painted; APNG
    /// frames are delivered fully composited.
    pub rect: Option<Rect>,
    pub completion: Completion,
}


pub fn detect_format(buf: &[u8]) -> ImageFormat {
    if buf.len() >= 6
        && &buf[0..4] == b"GIF8"
        && (buf[4] == b'7' || buf[4] == b'9')
        && buf[5] == b'a'
    {
        return ImageFormat::Gif;
    }
    if buf.len() >= 8 && buf[0..8] == apng::decoder::SIGNATURE {
        return ImageFormat::Png;
    }
    ImageFormat::Unsupported
}

/// Decodes a GIF or (A)PNG byte buffer into its frame sequence.
///
/// GIF frames are each blitted onto a fresh transparent canvas, with `rect`
/// reporting the painted region; callers that want accumulation can drive
/// `GifReader::decode_frame` themselves. APNG frames come out composited.
pub fn decode_animation(buf: &[u8]) -> CodecResult<Animation> {
    match detect_format(buf) {
        ImageFormat::Gif => decode_gif_animation(buf),
        ImageFormat::Png => decode_png_animation(buf),
        ImageFormat::Unsupported => Err(CodecError::UnsupportedFormat),
    }
}

fn decode_gif_animation(buf: &[u8]) -> CodecResult<Animation> {
    let reader = GifReader::parse(buf)?;
    let canvas_len = reader.width() as usize * reader.height() as usize * 4;

    let mut frames = Vec::with_capacity(reader.frames().len());
    for index in 0..reader.frames().len() {
        let mut rgba = vec![0u8; canvas_len];
        let completion = reader.decode_frame(index, &mut rgba, ChannelOrder::Rgba)?;
        let descriptor = reader.frame(index)?;
        frames.push(AnimationFrame {
            rgba,
            delay_ms: u32::from(descriptor.delay) * 10,
            rect: Some(descriptor.rect),
            completion,
        });
    }

    let loop_count = match reader.loop_count() {
        Some(0) | None => LoopCount::Infinite,
        Some(n) => LoopCount::Finite(u32::from(n)),
    };

    Ok(Animation {
        width: reader.width(),
        height: reader.height(),
        loop_count,
        frames,
    })
}

fn decode_png_animation(buf: &[u8]) -> CodecResult<Animation> {
    let image = Image::decode(buf)?;
    let buffers = image.frames_rgba()?;
    let animated = image.animation.is_some() && !image.frames.is_empty();

    let mut frames = Vec::with_capacity(buffers.len());
    for (index, rgba) in buffers.into_iter().enumerate() {
        let delay_ms = if animated { image.frames[index].control.delay.as_millis() } else { 0 };
        frames.push(AnimationFrame { rgba, delay_ms, rect: None, completion: Completion::Complete });
    }

    let loop_count = match image.animation {
        Some(control) if control.num_plays != 0 => LoopCount::Finite(control.num_plays),
        _ => LoopCount::Infinite,
    };

    Ok(Animation {
        width: image.header.width,
        height: image.header.height,
        loop_count,
        frames,
    })
}


#[cfg(test)]
mod tests {
    use super::{detect_format, ImageFormat};

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"GIF89a\x01\x00"), ImageFormat::Gif);
        assert_eq!(detect_format(b"GIF87a\x01\x00"), ImageFormat::Gif);
        assert_eq!(detect_format(b"GIF88a\x01\x00"), ImageFormat::Unsupported);
        assert_eq!(
            detect_format(&[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00]),
            ImageFormat::Png
        );
        assert_eq!(detect_format(b"BM\x01\x02"), ImageFormat::Unsupported);
        assert_eq!(detect_format(b""), ImageFormat::Unsupported);
    }
}
