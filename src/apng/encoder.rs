
use std::collections::HashMap;
use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};
use enum_iterator::IntoEnumIterator;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use flate2::Crc;

use super::chunks;
use super::decoder::{paeth, SIGNATURE};
use super::{BlendOperator, Delay, DisposeOperator, Frame};
use crate::errors::{CodecError, CodecResult};
use crate::quant;
use crate::Rect;



/// Scanline filter types, by their PNG tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoEnumIterator)]
pub enum Filter {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

#[derive(Debug, Default, Clone)]
pub struct EncodeOptions {
    /// When set, the quantizer reduces all frames to a shared palette of at
    /// most this many colors.
    pub max_colors: Option<u16>,
    /// Never emit a palettized image, even when few colors are in use.
    pub forbid_palette: bool,
    /// Fixed scanline filter. `None` brute-forces all five per frame and
    /// keeps whichever compresses smallest.
    pub filter: Option<Filter>,
    /// Animation play count; 0 means infinite.
    pub plays: u32,
}

/// Images larger than this skip the Up/Average/Paeth filter candidates.
const BRUTE_FORCE_LIMIT: usize = 500_000;

/// Exact palette collection gives up past this many colors; the image then
/// stays truecolor.
const EXACT_PALETTE_LIMIT: usize = 300;


/// Encodes an RGBA8 frame sequence as a PNG (one frame) or APNG.
///
/// Every frame buffer must cover the full `width * height` canvas; the
/// encoder reduces later frames to their changed region itself and picks
/// color type, bit depth and per-frame blend/dispose operators.
pub fn encode<W: Write>(
    writer: &mut W,
    width: u32,
    height: u32,
    frames: &[Frame],
    options: &EncodeOptions,
) -> CodecResult<()> {
    if width == 0 || height == 0 {
        return Err(CodecError::InvalidHeader("image dimensions"));
    }
    if frames.is_empty() {
        return Err(CodecError::InvalidHeader("no frames"));
    }
    let canvas_len = width as usize * height as usize * 4;
    for frame in frames {
        if frame.rgba.len() != canvas_len {
            return Err(CodecError::BufferTooSmall);
        }
    }

    // Frames past the first can introduce transparency for blending, so the
    // opaque check runs over the originals.
    let mut alpha_and = 0xff;
    for frame in frames {
        for pixel in frame.rgba.chunks(4) {
            alpha_and &= pixel[3];
        }
    }
    let got_alpha = alpha_and != 255;

    let mut reduced = reduce_frames(frames, width, height);

    let mut palette: Vec<[u8; 4]> = vec![];
    let mut index_buffers: Vec<Vec<u8>> = vec![];

    match options.max_colors {
        Some(max_colors) if max_colors > 0 => {
            let concatenated = concat_rgba(&reduced);
            let result = quant::quantize(&concatenated, usize::from(max_colors));
            let mut offset = 0;
            for frame in &mut reduced {
                let count = frame.rgba.len() / 4;
                index_buffers.push(result.indices[offset..offset + count].to_vec());
                frame.rgba.copy_from_slice(&result.pixels[offset * 4..(offset + count) * 4]);
                offset += count;
            }
            palette = result.palette;
        },
        _ => collect_exact_palette(&reduced, &mut palette, &mut index_buffers),
    }

    let color_count = palette.len();
    let use_palette = color_count <= 256 && !options.forbid_palette;
    let single_opaque = !got_alpha && reduced.len() == 1;

    let (color_type, bit_depth) = if use_palette {
        let depth = match color_count {
            0..=2 => 1,
            3..=4 => 2,
            5..=16 => 4,
            _ => 8,
        };
        (3, depth)
    } else if single_opaque {
        (2, 8)
    } else {
        (6, 8)
    };

    // Pack every frame down to its wire form and compress it.
    let mut compressed = Vec::with_capacity(reduced.len());
    for (frame, indices) in reduced.iter().zip(index_buffers.iter()) {
        let nw = frame.rect.width as usize;
        let nh = frame.rect.height as usize;
        let (image, bpp, bpl): (Vec<u8>, usize, usize) = if use_palette {
            let bpl = (nw * usize::from(bit_depth) + 7) / 8;
            (pack_indices(indices, nw, nh, bit_depth), 1, bpl)
        } else if single_opaque {
            let mut rgb = Vec::with_capacity(nw * nh * 3);
            for pixel in frame.rgba.chunks(4) {
                rgb.extend_from_slice(&pixel[0..3]);
            }
            (rgb, 3, nw * 3)
        } else {
            (frame.rgba.clone(), 4, nw * 4)
        };
        compressed.push(filter_and_compress(&image, nh, bpp, bpl, options.filter)?);
    }

    let mut chunk_writer = ChunkWriter::new(writer);
    chunk_writer.write_signature()?;
    chunk_writer.write_image_header(width, height, bit_depth, color_type)?;
    chunk_writer.write_srgb()?;

    let animated = reduced.len() > 1;
    if animated {
        chunk_writer.write_animation_control(reduced.len() as u32, options.plays)?;
    }
    if use_palette {
        chunk_writer.write_palette(&palette)?;
        if palette.iter().any(|entry| entry[3] != 255) {
            chunk_writer.write_transparency(&palette)?;
        }
    }

    let mut sequence = 0u32;
    for (j, (frame, data)) in reduced.iter().zip(compressed.iter()).enumerate() {
        if animated {
            chunk_writer.write_frame_control(&mut sequence, frame)?;
        }
        if j == 0 {
            chunk_writer.write_chunk(chunks::IDAT, data)?;
        } else {
            chunk_writer.write_frame_data(&mut sequence, data)?;
        }
    }
    chunk_writer.write_end()?;
    Ok(())
}


struct ReducedFrame {
    rect: Rect,
    rgba: Vec<u8>,
    blend: BlendOperator,
    dispose: DisposeOperator,
    delay: Delay,
}

/// Reduces each frame after the first to the bounding rectangle of its
/// difference against the previous frame — or the one before it when that
/// gives a smaller patch, in which case the in-between frame is marked to
/// dispose to previous. A frame whose patch can be reproduced by
/// alpha-compositing keeps only its changed pixels and blends `Over`.
fn reduce_frames(frames: &[Frame], width: u32, height: u32) -> Vec<ReducedFrame> {
    let w = width as usize;
    let h = height as usize;
    let mut reduced: Vec<ReducedFrame> = Vec::with_capacity(frames.len());

    for (j, frame) in frames.iter().enumerate() {
        if j == 0 {
            reduced.push(ReducedFrame {
                rect: Rect { x: 0, y: 0, width, height },
                rgba: frame.rgba.to_vec(),
                blend: BlendOperator::Source,
                dispose: DisposeOperator::None,
                delay: frame.delay,
            });
            continue;
        }

        let candidates = if j == 1 || reduced[j - 2].dispose == DisposeOperator::Previous { 1 } else { 2 };
        let mut best_step = 0;
        let mut best_rect = Rect { x: 0, y: 0, width: 1, height: 1 };
        let mut best_area = u64::max_value();
        for step in 0..candidates {
            let (rect, area) = match diff_bounds(frame.rgba, frames[j - 1 - step].rgba, w, h) {
                Some(rect) => (rect, u64::from(rect.width) * u64::from(rect.height)),
                None => (Rect { x: 0, y: 0, width: 1, height: 1 }, 1),
            };
            if area < best_area {
                best_area = area;
                best_step = step;
                best_rect = rect;
            }
        }
        if best_step == 1 {
            reduced[j - 1].dispose = DisposeOperator::Previous;
        }

        let base = crop(frames[j - 1 - best_step].rgba, w, best_rect);
        let current = crop(frame.rgba, w, best_rect);
        let (rgba, blend) = if can_blend(&current, &base) {
            (changed_or_clear(&current, &base), BlendOperator::Over)
        } else {
            (current, BlendOperator::Source)
        };

        reduced.push(ReducedFrame {
            rect: best_rect,
            rgba,
            blend,
            dispose: DisposeOperator::None,
            delay: frame.delay,
        });
    }
    reduced
}

/// Bounding rectangle of the pixels where the two canvases differ, or `None`
/// when they are identical.
fn diff_bounds(current: &[u8], previous: &[u8], w: usize, h: usize) -> Option<Rect> {
    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = None;
    let mut max_y = 0;
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 4;
            if current[i..i + 4] != previous[i..i + 4] {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = Some(max_x.map_or(x, |mx: usize| mx.max(x)));
                max_y = y;
            }
        }
    }
    max_x.map(|max_x| Rect {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

fn crop(canvas: &[u8], canvas_width: usize, rect: Rect) -> Vec<u8> {
    let fw = rect.width as usize;
    let mut out = Vec::with_capacity(fw * rect.height as usize * 4);
    for y in 0..rect.height as usize {
        let i = ((rect.y as usize + y) * canvas_width + rect.x as usize) * 4;
        out.extend_from_slice(&canvas[i..i + fw * 4]);
    }
    out
}

/// Whether every changed pixel can be produced by compositing over the base:
/// a translucent replacement over a visible destination cannot.
fn can_blend(current: &[u8], base: &[u8]) -> bool {
    for (cur, old) in current.chunks(4).zip(base.chunks(4)) {
        if cur == old {
            continue;
        }
        if cur[3] < 220 && old[3] > 20 {
            return false;
        }
    }
    true
}

/// Keeps only the changed pixels; unchanged ones become fully transparent.
fn changed_or_clear(current: &[u8], base: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; current.len()];
    for ((cur, old), slot) in current.chunks(4).zip(base.chunks(4)).zip(out.chunks_mut(4)) {
        if cur != old {
            slot.copy_from_slice(cur);
        }
    }
    out
}

/// Concatenates the reduced frames for the quantizer, zeroing the color of
/// fully transparent pixels so they cluster together.
fn concat_rgba(reduced: &[ReducedFrame]) -> Vec<u8> {
    let total = reduced.iter().map(|f| f.rgba.len()).sum();
    let mut out = Vec::with_capacity(total);
    for frame in reduced {
        for pixel in frame.rgba.chunks(4) {
            if pixel[3] == 0 {
                out.extend_from_slice(&[0, 0, 0, 0]);
            } else {
                out.extend_from_slice(pixel);
            }
        }
    }
    out
}

/// Collects the exact colors in use, with a fast path for runs and for the
/// pixel directly above. Gives up once the count passes the truecolor
/// cutoff; the partial index buffers are then never used.
fn collect_exact_palette(
    reduced: &[ReducedFrame],
    palette: &mut Vec<[u8; 4]>,
    index_buffers: &mut Vec<Vec<u8>>,
) {
    let mut map: HashMap<[u8; 4], usize> = HashMap::new();
    for frame in reduced {
        let nw = frame.rect.width as usize;
        let count = frame.rgba.len() / 4;
        let mut indices = vec![0u8; count];
        for i in 0..count {
            let pixel = [
                frame.rgba[i * 4],
                frame.rgba[i * 4 + 1],
                frame.rgba[i * 4 + 2],
                frame.rgba[i * 4 + 3],
            ];
            if i > 0 && frame.rgba[(i - 1) * 4..i * 4] == pixel {
                indices[i] = indices[i - 1];
            } else if i > nw && frame.rgba[(i - nw) * 4..(i - nw) * 4 + 4] == pixel {
                indices[i] = indices[i - nw];
            } else {
                let index = match map.get(&pixel) {
                    Some(&index) => index,
                    None => {
                        let index = palette.len();
                        map.insert(pixel, index);
                        palette.push(pixel);
                        if palette.len() >= EXACT_PALETTE_LIMIT {
                            break;
                        }
                        index
                    },
                };
                indices[i] = index as u8;
            }
        }
        index_buffers.push(indices);
    }
}

fn pack_indices(indices: &[u8], width: usize, height: usize, bit_depth: u8) -> Vec<u8> {
    let bpl = (width * usize::from(bit_depth) + 7) / 8;
    let mut out = vec![0u8; bpl * height];
    for y in 0..height {
        let i = y * bpl;
        let ii = y * width;
        for x in 0..width {
            let index = indices[ii + x];
            match bit_depth {
                8 => out[i + x] = index,
                4 => out[i + (x >> 1)] |= index << (4 - (x & 1) * 4),
                2 => out[i + (x >> 2)] |= index << (6 - (x & 3) * 2),
                _ => out[i + (x >> 3)] |= index << (7 - (x & 7)),
            }
        }
    }
    out
}


/// Filters and deflates one frame. Without a fixed filter every candidate is
/// compressed and the smallest stream wins; very large images skip the three
/// expensive candidates, and 1-byte-per-pixel images settle for the first.
fn filter_and_compress(
    image: &[u8],
    height: usize,
    bpp: usize,
    bpl: usize,
    fixed: Option<Filter>,
) -> CodecResult<Vec<u8>> {
    let mut data = vec![0u8; height * bpl + height];

    if let Some(filter) = fixed {
        for y in 0..height {
            filter_line(&mut data, image, y, bpl, bpp, filter);
        }
        return deflate(&data);
    }

    let mut candidates = vec![];
    for filter in Filter::into_enum_iter() {
        if height * bpl > BRUTE_FORCE_LIMIT && filter != Filter::None && filter != Filter::Sub {
            continue;
        }
        for y in 0..height {
            filter_line(&mut data, image, y, bpl, bpp, filter);
        }
        candidates.push(deflate(&data)?);
        if bpp == 1 {
            break;
        }
    }
    Ok(candidates.into_iter().min_by_key(|c| c.len()).unwrap_or_default())
}

fn filter_line(data: &mut [u8], image: &[u8], y: usize, bpl: usize, bpp: usize, filter: Filter) {
    let i = y * bpl;
    let di = i + y + 1;
    data[di - 1] = filter as u8;
    let first = bpp.min(bpl);

    match filter {
        Filter::None => data[di..di + bpl].copy_from_slice(&image[i..i + bpl]),
        Filter::Sub => {
            for x in 0..first {
                data[di + x] = image[i + x];
            }
            for x in bpp..bpl {
                data[di + x] = image[i + x].wrapping_sub(image[i + x - bpp]);
            }
        },
        Filter::Up => {
            if y == 0 {
                data[di..di + bpl].copy_from_slice(&image[i..i + bpl]);
            } else {
                for x in 0..bpl {
                    data[di + x] = image[i + x].wrapping_sub(image[i + x - bpl]);
                }
            }
        },
        Filter::Average => {
            if y == 0 {
                for x in 0..first {
                    data[di + x] = image[i + x];
                }
                for x in bpp..bpl {
                    data[di + x] = image[i + x].wrapping_sub(image[i + x - bpp] >> 1);
                }
            } else {
                for x in 0..first {
                    data[di + x] = image[i + x].wrapping_sub(image[i + x - bpl] >> 1);
                }
                for x in bpp..bpl {
                    let average = (u16::from(image[i + x - bpl]) + u16::from(image[i + x - bpp])) >> 1;
                    data[di + x] = image[i + x].wrapping_sub(average as u8);
                }
            }
        },
        Filter::Paeth => {
            if y == 0 {
                for x in 0..first {
                    data[di + x] = image[i + x];
                }
                for x in bpp..bpl {
                    data[di + x] = image[i + x].wrapping_sub(paeth(image[i + x - bpp], 0, 0));
                }
            } else {
                for x in 0..first {
                    data[di + x] = image[i + x].wrapping_sub(paeth(0, image[i + x - bpl], 0));
                }
                for x in bpp..bpl {
                    let predictor = paeth(
                        image[i + x - bpp],
                        image[i + x - bpl],
                        image[i + x - bpp - bpl],
                    );
                    data[di + x] = image[i + x].wrapping_sub(predictor);
                }
            }
        },
    }
}

/// The DEFLATE collaborator: a zlib-wrapped stream at the default level.
fn deflate(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}


struct ChunkWriter<'a, W: io::Write> {
    writer: &'a mut W,
}

impl<'a, W: io::Write> ChunkWriter<'a, W> {
    fn new(writer: &'a mut W) -> Self {
        ChunkWriter { writer }
    }

    fn write_signature(&mut self) -> io::Result<()> {
        self.writer.write_all(&SIGNATURE)
    }

    fn write_chunk(&mut self, chunk_type: &[u8; 4], chunk_data: &[u8]) -> io::Result<()> {
        let mut crc = Crc::new();
        // Length
        self.write_u32(chunk_data.len() as u32)?;
        // Type
        self.writer.write_all(chunk_type)?;
        // Data
        self.writer.write_all(chunk_data)?;
        // CRC
        crc.update(chunk_type);
        crc.update(chunk_data);
        self.write_u32(crc.sum())?;
        Ok(())
    }

    fn write_image_header(&mut self, width: u32, height: u32, bit_depth: u8, color_type: u8) -> io::Result<()> {
        let mut buffer = vec![];
        buffer.write_u32::<BigEndian>(width)?;
        buffer.write_u32::<BigEndian>(height)?;
        // ... compression_method, filter_method, interlace_method
        buffer.write_all(&[bit_depth, color_type, 0, 0, 0])?;
        self.write_chunk(chunks::IHDR, &buffer)
    }

    fn write_srgb(&mut self) -> io::Result<()> {
        self.write_chunk(chunks::SRGB, &[1])
    }

    fn write_animation_control(&mut self, num_frames: u32, num_plays: u32) -> io::Result<()> {
        let mut buffer = vec![];
        buffer.write_u32::<BigEndian>(num_frames)?;
        buffer.write_u32::<BigEndian>(num_plays)?;
        self.write_chunk(chunks::ACTL, &buffer)
    }

    fn write_palette(&mut self, palette: &[[u8; 4]]) -> io::Result<()> {
        let mut buffer = Vec::with_capacity(palette.len() * 3);
        for entry in palette {
            buffer.extend_from_slice(&entry[0..3]);
        }
        self.write_chunk(chunks::PLTE, &buffer)
    }

    fn write_transparency(&mut self, palette: &[[u8; 4]]) -> io::Result<()> {
        let buffer: Vec<u8> = palette.iter().map(|entry| entry[3]).collect();
        self.write_chunk(chunks::TRNS, &buffer)
    }

    fn write_frame_control(&mut self, sequence: &mut u32, frame: &ReducedFrame) -> io::Result<()> {
        let mut buffer = vec![];
        buffer.write_u32::<BigEndian>(*sequence)?;
        *sequence += 1;
        buffer.write_u32::<BigEndian>(frame.rect.width)?;
        buffer.write_u32::<BigEndian>(frame.rect.height)?;
        buffer.write_u32::<BigEndian>(frame.rect.x)?;
        buffer.write_u32::<BigEndian>(frame.rect.y)?;
        buffer.write_u16::<BigEndian>(frame.delay.numerator)?;
        buffer.write_u16::<BigEndian>(frame.delay.denominator)?;
        buffer.write_all(&[frame.dispose as u8, frame.blend as u8])?;
        self.write_chunk(chunks::FCTL, &buffer)
    }

    fn write_frame_data(&mut self, sequence: &mut u32, data: &[u8]) -> io::Result<()> {
        let mut buffer = Vec::with_capacity(data.len() + 4);
        buffer.write_u32::<BigEndian>(*sequence)?;
        *sequence += 1;
        buffer.extend_from_slice(data);
        self.write_chunk(chunks::FDAT, &buffer)
    }

    fn write_end(&mut self) -> io::Result<()> {
        let zero: [u8; 0] = [];
        self.write_chunk(chunks::IEND, &zero)
    }

    fn write_u32(&mut self, value: u32) -> io::Result<()> {
        let mut buffer = vec![];
        buffer.write_u32::<BigEndian>(value)?;
        self.writer.write_all(&buffer)
    }
}
