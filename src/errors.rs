
use failure::Fail;
use std::io::Error as IOError;


pub type CodecResult<T> = Result<T, CodecError>;



#[derive(Fail, Debug)]
pub enum CodecError {
    #[fail(display = "Destination buffer too small")]
    BufferTooSmall,
    #[fail(display = "Duplicate IHDR chunk")]
    DuplicateHeader,
    #[fail(display = "Frame index out of range: {}", 0)]
    FrameIndexOutOfRange(usize),
    #[fail(display = "Invalid graphics control block")]
    InvalidGraphicsControl,
    #[fail(display = "Invalid header field: {}", 0)]
    InvalidHeader(&'static str),
    #[fail(display = "Invalid LZW code: {} (next is {})", 0, 1)]
    InvalidLzwCode(u16, u16),
    #[fail(display = "Invalid palette index: {}", 0)]
    InvalidPaletteIndex(u8),
    #[fail(display = "Invalid file signature")]
    InvalidSignature,
    #[fail(display = "IO error: {}", 0)]
    Io(IOError),
    #[fail(display = "Chunk appears before IHDR")]
    MissingHeader,
    #[fail(display = "No palette available for indexed frame")]
    MissingPalette,
    #[fail(display = "Truncated input: {}", 0)]
    Truncated(&'static str),
    #[fail(display = "Unknown block: 0x{:02x}", 0)]
    UnknownBlock(u8),
    #[fail(display = "Unknown extension label: 0x{:02x}", 0)]
    UnknownExtension(u8),
    #[fail(display = "Unsupported compression method")]
    UnsupportedCompression,
    #[fail(display = "Unrecognized image format")]
    UnsupportedFormat,
}

/// Outcome of decoding one frame's pixel data.
///
/// Pixel decodes keep whatever was produced before the stream went bad, so a
/// non-`Complete` result still comes with usable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The stream decoded fully.
    Complete,
    /// The stream ended before producing all expected pixels.
    Truncated,
    /// The stream would have produced more pixels than expected; decoding
    /// stopped at the expected length.
    Overrun,
}

impl Completion {
    pub fn is_complete(self) -> bool {
        self == Completion::Complete
    }
}

macro_rules! define_error {
    ($source:ty, $kind:tt) => {
        impl From<$source> for CodecError {
            fn from(error: $source) -> CodecError {
                CodecError::$kind(error)
            }
        }
    }
}

define_error!(IOError, Io);
