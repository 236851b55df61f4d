

use super::ColorType;
use crate::errors::{CodecError, CodecResult};



pub fn validate_bit_depth(color_type: ColorType, bit_depth: u8) -> CodecResult<()> {
    use self::ColorType::*;

    match color_type {
        Grayscale if [1, 2, 4, 8, 16].contains(&bit_depth) => (),
        Palette if [1, 2, 4, 8].contains(&bit_depth) => (),
        GrayscaleAlpha | Rgb | Rgba if [8, 16].contains(&bit_depth) => (),
        _ => return Err(CodecError::InvalidHeader("bit depth")),
    };

    Ok(())
}
