
use failure::{Backtrace, Context, Fail};
use std::fmt::Display;
use std::fmt;
use std::io::Error as IOError;
use std::num::ParseIntError;

use animg_codec::errors::CodecError;

pub type AppResult<T> = Result<T, Error>;



#[derive(Fail, Debug)]
pub enum ErrorKind {
    #[fail(display = "Codec error")]
    Codec,
    #[fail(display = "Invalid option value")]
    InvalidOptionValue,
    #[fail(display = "IO error")]
    Io,
    #[fail(display = "Not enough argument")]
    NotEnoughArgument,
}

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}


impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

impl From<IOError> for Error {
    fn from(error: IOError) -> Error {
        Error {
            inner: error.context(ErrorKind::Io),
        }
    }
}

impl From<ParseIntError> for Error {
    fn from(error: ParseIntError) -> Error {
        Error {
            inner: error.context(ErrorKind::InvalidOptionValue),
        }
    }
}

impl From<CodecError> for Error {
    fn from(error: CodecError) -> Error {
        Error {
            inner: error.context(ErrorKind::Codec),
        }
    }
}
