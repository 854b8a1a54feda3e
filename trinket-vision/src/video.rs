use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::error::{Result, VisionError};

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

fn capture_err(what: &str) -> impl FnOnce(std::io::Error) -> VisionError + '_ {
    move |e| VisionError::Capture(format!("{what}: {e}"))
}

/// V4L2 camera delivering RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).map_err(capture_err("opening camera"))?;
        let mut fmt = dev.format().map_err(capture_err("reading format"))?;

        // Prefer RGB, then YUYV, else keep whatever the device offers.
        for fourcc in [RGB3, YUYV] {
            if fmt.fourcc == FourCC::new(fourcc) {
                break;
            }
            let wanted = Format::new(fmt.width, fmt.height, FourCC::new(fourcc));
            fmt = dev.set_format(&wanted).unwrap_or(fmt);
        }

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
            .map_err(capture_err("starting stream"))?;
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().map_err(capture_err("capturing frame"))?;
        log::debug!(
            "captured frame seq={} len={}",
            meta.sequence,
            data.len()
        );

        let pixels = match &self.fourcc.repr {
            f if f == RGB3 => data.to_vec(),
            f if f == YUYV => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == GREY => grey_to_rgb(self.width, self.height, data)?,
            _ => {
                return Err(VisionError::Capture(format!(
                    "unsupported pixel format {:?}",
                    self.fourcc
                )))
            }
        };

        let expected = (self.width * self.height * 3) as usize;
        if pixels.len() < expected {
            return Err(VisionError::Capture(format!(
                "short frame: {} bytes, expected {expected}",
                pixels.len()
            )));
        }

        let mut pixels = pixels;
        pixels.truncate(expected);
        RgbImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| VisionError::Capture("frame buffer does not match format".into()))
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(VisionError::Capture("short YUYV buffer".into()));
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(to_u8(y + 1.402 * v));
            out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
            out.push(to_u8(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return Err(VisionError::Capture("short GREY buffer".into()));
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
