
use std::io::Read;

use flate2::read::ZlibDecoder;

use super::chunks::{self, ChunkReader};
use super::validators;
use super::{
    AnimationControl, BlendOperator, ColorType, Delay, DisposeOperator, FrameControl, ImageHeader,
    Transparency,
};
use crate::errors::{CodecError, CodecResult};
use crate::Rect;



pub const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];


/// A decoded PNG or APNG.
///
/// Frame payloads are inflated and defiltered during `decode`; expansion to
/// RGBA8 and animation compositing happen in `frames_rgba`.
pub struct Image {
    pub header: ImageHeader,
    /// PLTE chunk: RGB triples, index = position.
    pub palette: Option<Vec<u8>>,
    pub transparency: Option<Transparency>,
    pub animation: Option<AnimationControl>,
    pub gamma: Option<f64>,
    pub srgb: Option<u8>,
    pub background: Option<Vec<u16>>,
    /// pHYs: pixels per unit (x, y) and unit specifier.
    pub pixel_dimensions: Option<(u32, u32, u8)>,
    pub chromaticities: Option<[u32; 8]>,
    pub text: Vec<(String, String)>,
    pub histogram: Option<Vec<u16>>,
    /// Default image: raw scanline bytes, decompressed and defiltered.
    pub data: Vec<u8>,
    pub frames: Vec<DecodedFrame>,
}

/// One animation frame. `data` is `None` for the first frame when its pixel
/// data is the default image's IDAT stream.
pub struct DecodedFrame {
    pub control: FrameControl,
    pub data: Option<Vec<u8>>,
}


impl Image {
    pub fn decode(buf: &[u8]) -> CodecResult<Image> {
        if buf.len() < 8 || buf[0..8] != SIGNATURE {
            return Err(CodecError::InvalidSignature);
        }

        let mut header: Option<ImageHeader> = None;
        let mut palette = None;
        let mut transparency = None;
        let mut animation = None;
        let mut gamma = None;
        let mut srgb = None;
        let mut background = None;
        let mut pixel_dimensions = None;
        let mut chromaticities = None;
        let mut text = vec![];
        let mut histogram = None;

        let mut idat: Vec<u8> = vec![];
        let mut frames: Vec<DecodedFrame> = vec![];
        // fdAT bytes of the frame currently being accumulated.
        let mut pending: Vec<u8> = vec![];

        let mut reader = ChunkReader::new(&buf[8..]);
        while let Some(chunk) = reader.next_chunk()? {
            if header.is_none() && &chunk.kind != chunks::IHDR {
                return Err(CodecError::MissingHeader);
            }
            match &chunk.kind {
                chunks::IHDR => {
                    if header.is_some() {
                        return Err(CodecError::DuplicateHeader);
                    }
                    header = Some(read_header(chunk.data)?);
                },
                chunks::PLTE => palette = Some(chunk.data.to_vec()),
                chunks::TRNS => {
                    let color_type = header_ref(&header)?.color_type;
                    transparency = Some(read_transparency(chunk.data, color_type)?);
                },
                chunks::IDAT => idat.extend_from_slice(chunk.data),
                chunks::ACTL => {
                    animation = Some(AnimationControl {
                        num_frames: chunks::read_u32(chunk.data, 0)?,
                        num_plays: chunks::read_u32(chunk.data, 4)?,
                    });
                },
                chunks::FCTL => {
                    let header = header_ref(&header)?;
                    if !pending.is_empty() {
                        finalize_frame(header, &mut frames, &mut pending)?;
                    }
                    let control = read_frame_control(chunk.data)?;
                    let rect = control.rect;
                    if frames.is_empty() {
                        let full = Rect { x: 0, y: 0, width: header.width, height: header.height };
                        if rect != full {
                            return Err(CodecError::InvalidHeader("first frame must cover the canvas"));
                        }
                    }
                    let x_end = rect.x.checked_add(rect.width);
                    let y_end = rect.y.checked_add(rect.height);
                    if x_end.map_or(true, |e| e > header.width) || y_end.map_or(true, |e| e > header.height) {
                        return Err(CodecError::InvalidHeader("frame rectangle outside canvas"));
                    }
                    frames.push(DecodedFrame { control, data: None });
                },
                chunks::FDAT => {
                    if chunk.data.len() < 4 {
                        return Err(CodecError::Truncated("fdAT sequence number"));
                    }
                    pending.extend_from_slice(&chunk.data[4..]);
                },
                chunks::GAMA => gamma = Some(f64::from(chunks::read_u32(chunk.data, 0)?) / 100_000.0),
                chunks::SRGB => srgb = Some(chunks::read_u8(chunk.data, 0)?),
                chunks::BKGD => {
                    background = Some(read_background(chunk.data, header_ref(&header)?.color_type)?);
                },
                chunks::PHYS => {
                    pixel_dimensions = Some((
                        chunks::read_u32(chunk.data, 0)?,
                        chunks::read_u32(chunk.data, 4)?,
                        chunks::read_u8(chunk.data, 8)?,
                    ));
                },
                chunks::CHRM => {
                    let mut values = [0u32; 8];
                    for (i, value) in values.iter_mut().enumerate() {
                        *value = chunks::read_u32(chunk.data, i * 4)?;
                    }
                    chromaticities = Some(values);
                },
                chunks::TEXT => {
                    if let Some(entry) = read_text(chunk.data) {
                        text.push(entry);
                    }
                },
                chunks::ITXT => {
                    if let Some(entry) = read_international_text(chunk.data) {
                        text.push(entry);
                    }
                },
                chunks::HIST => {
                    let mut entries = Vec::with_capacity(chunk.data.len() / 2);
                    for i in 0..chunk.data.len() / 2 {
                        entries.push(chunks::read_u16(chunk.data, i * 2)?);
                    }
                    histogram = Some(entries);
                },
                chunks::IEND => break,
                _ => (), // unknown chunks are skipped
            }
        }

        let header = header.ok_or(CodecError::MissingHeader)?;
        if !pending.is_empty() {
            finalize_frame(&header, &mut frames, &mut pending)?;
        }

        let data = decompress(&header, &idat, header.width, header.height)?;

        Ok(Image {
            header,
            palette,
            transparency,
            animation,
            gamma,
            srgb,
            background,
            pixel_dimensions,
            chromaticities,
            text,
            histogram,
            data,
            frames,
        })
    }

    /// Expands and composites every frame to a canvas-sized RGBA8 buffer.
    ///
    /// A plain PNG yields a single buffer. For animations this folds the
    /// frame sequence in order, applying each frame's blend operator over
    /// the current canvas and its dispose operator afterwards.
    pub fn frames_rgba(&self) -> CodecResult<Vec<Vec<u8>>> {
        let width = self.header.width;
        let height = self.header.height;

        if self.animation.is_none() || self.frames.is_empty() {
            return Ok(vec![self.unpack(&self.data, width, height)?]);
        }

        let canvas_len = width as usize * height as usize * 4;
        let mut outputs: Vec<Vec<u8>> = Vec::with_capacity(self.frames.len());
        let mut canvas = vec![0u8; canvas_len];

        for (i, frame) in self.frames.iter().enumerate() {
            let rect = frame.control.rect;
            let raw = frame.data.as_ref().unwrap_or(&self.data);
            let fdata = self.unpack(raw, rect.width, rect.height)?;

            if i == 0 {
                canvas = fdata;
            } else {
                match frame.control.blend_operator {
                    BlendOperator::Source => blit_source(&fdata, &mut canvas, width, rect),
                    BlendOperator::Over => blit_over(&fdata, &mut canvas, width, rect),
                }
            }

            outputs.push(canvas.clone());

            match frame.control.dispose_operator {
                DisposeOperator::None => (),
                DisposeOperator::Background => clear_rect(&mut canvas, width, rect),
                DisposeOperator::Previous => {
                    // Rewind to the last canvas not itself disposed to
                    // previous; at the start of the animation that is the
                    // fully transparent canvas.
                    let mut pi = i as isize - 1;
                    while pi >= 0
                        && self.frames[pi as usize].control.dispose_operator == DisposeOperator::Previous
                    {
                        pi -= 1;
                    }
                    canvas = if pi >= 0 {
                        outputs[pi as usize].clone()
                    } else {
                        vec![0u8; canvas_len]
                    };
                },
            }
        }

        Ok(outputs)
    }

    /// Expands raw scanline bytes to RGBA8 for any supported color type and
    /// bit depth. 16-bit samples are truncated to their high byte.
    fn unpack(&self, data: &[u8], width: u32, height: u32) -> CodecResult<Vec<u8>> {
        let w = width as usize;
        let h = height as usize;
        let area = w * h;
        let bpl = self.header.bytes_per_line(width);
        let depth = self.header.bit_depth;
        let mut out = vec![0u8; area * 4];

        let expected = match self.header.color_type {
            ColorType::Palette | ColorType::Grayscale => h * bpl,
            _ => area * self.header.bytes_per_pixel(),
        };
        if data.len() < expected {
            return Err(CodecError::Truncated("pixel data"));
        }

        match self.header.color_type {
            ColorType::Rgba => {
                for i in 0..area {
                    let qi = i * 4;
                    match depth {
                        8 => out[qi..qi + 4].copy_from_slice(&data[qi..qi + 4]),
                        _ => {
                            for j in 0..4 {
                                out[qi + j] = data[(qi + j) << 1];
                            }
                        },
                    }
                }
            },
            ColorType::Rgb => {
                let key = match self.transparency {
                    Some(Transparency::Rgb(r, g, b)) => Some((r, g, b)),
                    _ => None,
                };
                for i in 0..area {
                    let qi = i * 4;
                    let sample = |c: usize| -> (u8, u16) {
                        match depth {
                            8 => (data[i * 3 + c], u16::from(data[i * 3 + c])),
                            _ => {
                                let ti = i * 6 + c * 2;
                                (data[ti], u16::from(data[ti]) << 8 | u16::from(data[ti + 1]))
                            },
                        }
                    };
                    let (r8, r16) = sample(0);
                    let (g8, g16) = sample(1);
                    let (b8, b16) = sample(2);
                    out[qi] = r8;
                    out[qi + 1] = g8;
                    out[qi + 2] = b8;
                    out[qi + 3] = if key == Some((r16, g16, b16)) { 0 } else { 255 };
                }
            },
            ColorType::Palette => {
                let palette = self.palette.as_ref().ok_or(CodecError::MissingPalette)?;
                let alphas: &[u8] = match self.transparency {
                    Some(Transparency::Palette(ref alphas)) => alphas,
                    _ => &[],
                };
                for y in 0..h {
                    let s0 = y * bpl;
                    for x in 0..w {
                        let index = unpack_index(data, s0, x, depth);
                        let ci = usize::from(index) * 3;
                        if ci + 3 > palette.len() {
                            return Err(CodecError::InvalidPaletteIndex(index));
                        }
                        let qi = (y * w + x) * 4;
                        out[qi..qi + 3].copy_from_slice(&palette[ci..ci + 3]);
                        out[qi + 3] = alphas.get(usize::from(index)).copied().unwrap_or(255);
                    }
                }
            },
            ColorType::GrayscaleAlpha => {
                for i in 0..area {
                    let qi = i * 4;
                    let (gray, alpha) = match depth {
                        8 => (data[i * 2], data[i * 2 + 1]),
                        _ => (data[i * 4], data[i * 4 + 2]),
                    };
                    out[qi] = gray;
                    out[qi + 1] = gray;
                    out[qi + 2] = gray;
                    out[qi + 3] = alpha;
                }
            },
            ColorType::Grayscale => {
                let key = match self.transparency {
                    Some(Transparency::Grayscale(key)) => Some(key),
                    _ => None,
                };
                for y in 0..h {
                    let s0 = y * bpl;
                    for x in 0..w {
                        // Sub-byte samples scale to full range: 0xff/0x55/0x11
                        // per step for depths 1/2/4.
                        let (gray, raw) = match depth {
                            1 | 2 | 4 => {
                                let sample = unpack_index(data, s0, x, depth);
                                let scale = 255 / ((1u16 << depth) - 1) as u8;
                                (sample * scale, u16::from(sample))
                            },
                            8 => (data[s0 + x], u16::from(data[s0 + x])),
                            _ => {
                                let ti = s0 + x * 2;
                                (data[ti], u16::from(data[ti]) << 8 | u16::from(data[ti + 1]))
                            },
                        };
                        let qi = (y * w + x) * 4;
                        out[qi] = gray;
                        out[qi + 1] = gray;
                        out[qi + 2] = gray;
                        out[qi + 3] = if key == Some(raw) { 0 } else { 255 };
                    }
                }
            },
        }

        Ok(out)
    }
}


fn header_ref<'a>(header: &'a Option<ImageHeader>) -> CodecResult<&'a ImageHeader> {
    header.as_ref().ok_or(CodecError::MissingHeader)
}

fn read_header(data: &[u8]) -> CodecResult<ImageHeader> {
    let width = chunks::read_u32(data, 0)?;
    let height = chunks::read_u32(data, 4)?;
    let bit_depth = chunks::read_u8(data, 8)?;
    let color_type = ColorType::from_u8(chunks::read_u8(data, 9)?)?;
    let compression = chunks::read_u8(data, 10)?;
    let filter = chunks::read_u8(data, 11)?;
    let interlace = chunks::read_u8(data, 12)?;

    if width == 0 || height == 0 {
        return Err(CodecError::InvalidHeader("image dimensions"));
    }
    validators::validate_bit_depth(color_type, bit_depth)?;
    if compression != 0 {
        return Err(CodecError::UnsupportedCompression);
    }
    if filter != 0 {
        return Err(CodecError::InvalidHeader("filter method"));
    }
    if interlace > 1 {
        return Err(CodecError::InvalidHeader("interlace method"));
    }

    Ok(ImageHeader { width, height, bit_depth, color_type, interlaced: interlace == 1 })
}

fn read_transparency(data: &[u8], color_type: ColorType) -> CodecResult<Transparency> {
    let result = match color_type {
        ColorType::Palette => Transparency::Palette(data.to_vec()),
        ColorType::Grayscale => Transparency::Grayscale(chunks::read_u16(data, 0)?),
        ColorType::Rgb => Transparency::Rgb(
            chunks::read_u16(data, 0)?,
            chunks::read_u16(data, 2)?,
            chunks::read_u16(data, 4)?,
        ),
        _ => return Err(CodecError::InvalidHeader("tRNS for alpha color type")),
    };
    Ok(result)
}

fn read_frame_control(data: &[u8]) -> CodecResult<FrameControl> {
    Ok(FrameControl {
        rect: Rect {
            width: chunks::read_u32(data, 4)?,
            height: chunks::read_u32(data, 8)?,
            x: chunks::read_u32(data, 12)?,
            y: chunks::read_u32(data, 16)?,
        },
        delay: Delay::new(chunks::read_u16(data, 20)?, chunks::read_u16(data, 22)?),
        dispose_operator: DisposeOperator::from_u8(chunks::read_u8(data, 24)?)?,
        blend_operator: BlendOperator::from_u8(chunks::read_u8(data, 25)?)?,
    })
}

fn read_background(data: &[u8], color_type: ColorType) -> CodecResult<Vec<u16>> {
    let result = match color_type {
        ColorType::Grayscale | ColorType::GrayscaleAlpha => vec![chunks::read_u16(data, 0)?],
        ColorType::Rgb | ColorType::Rgba => vec![
            chunks::read_u16(data, 0)?,
            chunks::read_u16(data, 2)?,
            chunks::read_u16(data, 4)?,
        ],
        ColorType::Palette => vec![u16::from(chunks::read_u8(data, 0)?)],
    };
    Ok(result)
}

fn read_text(data: &[u8]) -> Option<(String, String)> {
    let zero = data.iter().position(|&b| b == 0)?;
    let keyword = data[..zero].iter().map(|&b| char::from(b)).collect();
    let value = data[zero + 1..].iter().map(|&b| char::from(b)).collect();
    Some((keyword, value))
}

fn read_international_text(data: &[u8]) -> Option<(String, String)> {
    let zero = data.iter().position(|&b| b == 0)?;
    let keyword = data[..zero].iter().map(|&b| char::from(b)).collect();
    // Skip compression flag/method, language tag and translated keyword.
    let mut pos = zero + 3;
    for _ in 0..2 {
        pos += data.get(pos..)?.iter().position(|&b| b == 0)? + 1;
    }
    let value = String::from_utf8_lossy(data.get(pos..)?).into_owned();
    Some((keyword, value))
}

fn finalize_frame(
    header: &ImageHeader,
    frames: &mut Vec<DecodedFrame>,
    pending: &mut Vec<u8>,
) -> CodecResult<()> {
    let frame = frames.last_mut().ok_or(CodecError::InvalidHeader("fdAT before fcTL"))?;
    let rect = frame.control.rect;
    frame.data = Some(decompress(header, pending, rect.width, rect.height)?);
    pending.clear();
    Ok(())
}


/// Inflates one frame's compressed stream and reconstructs its scanlines,
/// yielding `height * bytes_per_line` raw bytes.
fn decompress(header: &ImageHeader, compressed: &[u8], width: u32, height: u32) -> CodecResult<Vec<u8>> {
    let mut raw = Vec::new();
    ZlibDecoder::new(compressed).read_to_end(&mut raw)?;

    if header.interlaced {
        read_interlace(&mut raw, header, width, height)
    } else {
        defilter(&mut raw, header, 0, width, height)?;
        raw.truncate(height as usize * header.bytes_per_line(width));
        Ok(raw)
    }
}

/// Reconstructs `height` scanlines in place: scanline `y`'s filtered bytes
/// (tag byte included) start at `off + y * (bpl + 1)`, and its reconstructed
/// bytes are written compacted to `off + y * bpl`.
fn defilter(data: &mut [u8], header: &ImageHeader, off: usize, width: u32, height: u32) -> CodecResult<()> {
    let bpp = header.bytes_per_pixel();
    let bpl = header.bytes_per_line(width);

    for y in 0..height as usize {
        let i = off + y * bpl;
        let di = i + y + 1;
        if data.len() < di + bpl {
            return Err(CodecError::Truncated("scanline data"));
        }
        let first = bpp.min(bpl);

        match data[di - 1] {
            0 => {
                for x in 0..bpl {
                    data[i + x] = data[di + x];
                }
            },
            1 => {
                for x in 0..first {
                    data[i + x] = data[di + x];
                }
                for x in bpp..bpl {
                    data[i + x] = data[di + x].wrapping_add(data[i + x - bpp]);
                }
            },
            2 => {
                if y == 0 {
                    for x in 0..bpl {
                        data[i + x] = data[di + x];
                    }
                } else {
                    for x in 0..bpl {
                        data[i + x] = data[di + x].wrapping_add(data[i + x - bpl]);
                    }
                }
            },
            3 => {
                if y == 0 {
                    for x in 0..first {
                        data[i + x] = data[di + x];
                    }
                    for x in bpp..bpl {
                        data[i + x] = data[di + x].wrapping_add(data[i + x - bpp] >> 1);
                    }
                } else {
                    for x in 0..first {
                        data[i + x] = data[di + x].wrapping_add(data[i + x - bpl] >> 1);
                    }
                    for x in bpp..bpl {
                        let avg = (u16::from(data[i + x - bpl]) + u16::from(data[i + x - bpp])) >> 1;
                        data[i + x] = data[di + x].wrapping_add(avg as u8);
                    }
                }
            },
            4 => {
                if y == 0 {
                    for x in 0..first {
                        data[i + x] = data[di + x];
                    }
                    for x in bpp..bpl {
                        data[i + x] = data[di + x].wrapping_add(paeth(data[i + x - bpp], 0, 0));
                    }
                } else {
                    for x in 0..first {
                        data[i + x] = data[di + x].wrapping_add(paeth(0, data[i + x - bpl], 0));
                    }
                    for x in bpp..bpl {
                        let predictor = paeth(
                            data[i + x - bpp],
                            data[i + x - bpl],
                            data[i + x - bpp - bpl],
                        );
                        data[i + x] = data[di + x].wrapping_add(predictor);
                    }
                }
            },
            _ => return Err(CodecError::InvalidHeader("filter type")),
        }
    }
    Ok(())
}

/// The Paeth predictor: whichever of left/up/upper-left is closest to their
/// linear combination, ties broken in that order.
pub(super) fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

const ADAM7_ROW_START: [usize; 7] = [0, 0, 4, 0, 2, 0, 1];
const ADAM7_COL_START: [usize; 7] = [0, 4, 0, 2, 0, 1, 0];
const ADAM7_ROW_STEP: [usize; 7] = [8, 8, 8, 4, 4, 2, 2];
const ADAM7_COL_STEP: [usize; 7] = [8, 8, 4, 4, 2, 2, 1];

/// Adam7: defilters each pass's sub-image independently, then scatters its
/// pixels into the full-resolution raw buffer at their final bit positions.
fn read_interlace(data: &mut [u8], header: &ImageHeader, width: u32, height: u32) -> CodecResult<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let bits = header.bits_per_pixel();
    let cbpp = bits >> 3;
    let bpl = header.bytes_per_line(width);
    let mut img = vec![0u8; h * bpl];
    let mut di = 0;

    for pass in 0..7 {
        let row_step = ADAM7_ROW_STEP[pass];
        let col_step = ADAM7_COL_STEP[pass];
        let row_start = ADAM7_ROW_START[pass];
        let col_start = ADAM7_COL_START[pass];
        let sh = if row_start < h { (h - row_start + row_step - 1) / row_step } else { 0 };
        let sw = if col_start < w { (w - col_start + col_step - 1) / col_step } else { 0 };

        let bpll = (sw * bits + 7) / 8;
        if sw != 0 && sh != 0 {
            defilter(data, header, di, sw as u32, sh as u32)?;
        }

        let mut y = 0;
        let mut row = row_start;
        while row < h {
            let mut col = col_start;
            let mut cdi = (di + y * bpll) * 8;

            while col < w {
                match bits {
                    1 | 2 | 4 => {
                        let byte = data[cdi >> 3];
                        let value = byte >> (8 - bits - (cdi & 7)) & ((1 << bits) - 1);
                        let shift = 8 - bits - (col * bits & 7);
                        img[row * bpl + col * bits / 8] |= value << shift;
                    },
                    _ => {
                        let ii = row * bpl + col * cbpp;
                        let si = cdi >> 3;
                        img[ii..ii + cbpp].copy_from_slice(&data[si..si + cbpp]);
                    },
                }
                cdi += bits;
                col += col_step;
            }
            y += 1;
            row += row_step;
        }
        if sw * sh != 0 {
            di += sh * (1 + bpll);
        }
    }
    Ok(img)
}


/// Overwrites the rectangle with the frame's pixels, transparency included.
fn blit_source(src: &[u8], canvas: &mut [u8], canvas_width: u32, rect: Rect) {
    let cw = canvas_width as usize;
    let fw = rect.width as usize;
    for y in 0..rect.height as usize {
        let si = y * fw * 4;
        let ti = ((rect.y as usize + y) * cw + rect.x as usize) * 4;
        canvas[ti..ti + fw * 4].copy_from_slice(&src[si..si + fw * 4]);
    }
}

/// Standard over-compositing of straight-alpha pixels; a fully transparent
/// result has its RGB forced to zero.
fn blit_over(src: &[u8], canvas: &mut [u8], canvas_width: u32, rect: Rect) {
    let cw = canvas_width as usize;
    let fw = rect.width as usize;
    for y in 0..rect.height as usize {
        for x in 0..fw {
            let si = (y * fw + x) * 4;
            let ti = ((rect.y as usize + y) * cw + rect.x as usize + x) * 4;

            let fa = f64::from(src[si + 3]) / 255.0;
            let ba = f64::from(canvas[ti + 3]) / 255.0;
            let oa = fa + ba * (1.0 - fa);
            let ioa = if oa == 0.0 { 0.0 } else { 1.0 / oa };

            for c in 0..3 {
                let fc = f64::from(src[si + c]) * fa;
                let bc = f64::from(canvas[ti + c]) * ba;
                canvas[ti + c] = ((fc + bc * (1.0 - fa)) * ioa) as u8;
            }
            canvas[ti + 3] = (255.0 * oa) as u8;
        }
    }
}

fn clear_rect(canvas: &mut [u8], canvas_width: u32, rect: Rect) {
    let cw = canvas_width as usize;
    for y in 0..rect.height as usize {
        let ti = ((rect.y as usize + y) * cw + rect.x as usize) * 4;
        for byte in &mut canvas[ti..ti + rect.width as usize * 4] {
            *byte = 0;
        }
    }
}

/// Reads the `x`-th sample of a scanline starting at `s0`, MSB-first within
/// each byte for sub-byte depths.
fn unpack_index(data: &[u8], s0: usize, x: usize, depth: u8) -> u8 {
    match depth {
        1 => data[s0 + (x >> 3)] >> (7 - (x & 7)) & 1,
        2 => data[s0 + (x >> 2)] >> (6 - ((x & 3) << 1)) & 3,
        4 => data[s0 + (x >> 1)] >> (4 - ((x & 1) << 2)) & 15,
        _ => data[s0 + x],
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paeth_ties_resolve_to_left() {
        for a in 0..=255u8 {
            assert_eq!(paeth(a, a, a), a);
        }
    }

    #[test]
    fn test_paeth_returns_an_input() {
        for &(a, b, c) in &[(1u8, 2u8, 3u8), (0, 255, 128), (200, 100, 50), (3, 9, 27)] {
            let p = paeth(a, b, c);
            assert!(p == a || p == b || p == c);
        }
    }

    #[test]
    fn test_defilter_sub() {
        let header = ImageHeader {
            width: 4,
            height: 1,
            bit_depth: 8,
            color_type: ColorType::Grayscale,
            interlaced: false,
        };
        let mut data = vec![1, 10, 5, 5, 5];
        defilter(&mut data, &header, 0, 4, 1).unwrap();
        assert_eq!(&data[0..4], &[10, 15, 20, 25]);
    }

    #[test]
    fn test_defilter_up_first_row_is_passthrough() {
        let header = ImageHeader {
            width: 3,
            height: 2,
            bit_depth: 8,
            color_type: ColorType::Grayscale,
            interlaced: false,
        };
        let mut data = vec![2, 7, 8, 9, 2, 1, 1, 1];
        defilter(&mut data, &header, 0, 3, 2).unwrap();
        assert_eq!(&data[0..6], &[7, 8, 9, 8, 9, 10]);
    }

    #[test]
    fn test_defilter_rejects_unknown_filter_type() {
        let header = ImageHeader {
            width: 1,
            height: 1,
            bit_depth: 8,
            color_type: ColorType::Grayscale,
            interlaced: false,
        };
        let mut data = vec![9, 0];
        assert!(defilter(&mut data, &header, 0, 1, 1).is_err());
    }

    #[test]
    fn test_unpack_index_msb_first() {
        let data = [0b1010_0000];
        assert_eq!(unpack_index(&data, 0, 0, 1), 1);
        assert_eq!(unpack_index(&data, 0, 1, 1), 0);
        assert_eq!(unpack_index(&data, 0, 2, 1), 1);
        let data = [0b0111_0010];
        assert_eq!(unpack_index(&data, 0, 0, 4), 7);
        assert_eq!(unpack_index(&data, 0, 1, 4), 2);
    }
}
