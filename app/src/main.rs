
use std::env;
use std::fs;
use std::io::{stdout, BufWriter, Write};
use std::process::exit;

use failure::Fail;

use animg_codec::apng::encoder::{encode, EncodeOptions};
use animg_codec::apng::{Delay, Frame};
use animg_codec::{decode_animation, LoopCount};

mod errors;

use crate::errors::{AppResult, ErrorKind};



#[derive(Debug, Default)]
struct Setting {
    plays: Option<u32>,
    max_colors: Option<u16>,
    filepath: Option<String>,
}


fn main() {
    if let Err(err) = app() {
        let mut fail: &dyn Fail = &err;
        let mut message = err.to_string();

        while let Some(cause) = fail.cause() {
            message.push_str(&format!("\n\tcaused by: {}", cause));
            fail = cause;
        }

        eprintln!("Error: {}", message);

        exit(1);
    }
}

/// Reads a GIF or (A)PNG file and writes it to stdout as an APNG.
fn app() -> AppResult<()> {
    let setting = parse_args()?;
    let filepath = setting.filepath.ok_or(ErrorKind::NotEnoughArgument)?;

    let bytes = fs::read(&filepath)?;
    let animation = decode_animation(&bytes)?;

    let frames: Vec<Frame> = animation
        .frames
        .iter()
        .map(|frame| Frame {
            rgba: &frame.rgba,
            delay: Delay::new(frame.delay_ms.min(u32::from(u16::max_value())) as u16, 1000),
        })
        .collect();

    let plays = setting.plays.unwrap_or(match animation.loop_count {
        LoopCount::Infinite => 0,
        LoopCount::Finite(n) => n,
    });

    let options = EncodeOptions {
        max_colors: setting.max_colors,
        plays,
        ..Default::default()
    };

    let out = stdout();
    let mut out = BufWriter::new(out.lock());
    encode(&mut out, animation.width, animation.height, &frames, &options)?;
    out.flush()?;

    Ok(())
}


fn parse_args() -> AppResult<Setting> {
    let mut setting = Setting::default();

    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        let mut next = || args.next().ok_or(ErrorKind::NotEnoughArgument);

        match &*arg {
            "-p" | "--plays" =>
                setting.plays = Some(next()?.parse()?),
            "-c" | "--colors" =>
                setting.max_colors = Some(next()?.parse()?),
            filepath =>
                setting.filepath = Some(filepath.to_owned()),
        }
    }

    Ok(setting)
}
